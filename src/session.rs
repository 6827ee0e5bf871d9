//! The established, authenticated record channel: AEAD framing, sequence
//! counters, and the rekey protocol. A `Session` exclusively owns its
//! socket and key material for the lifetime of one connection; nothing
//! outside the owning task may read or write its fields.

use crate::config::TransferStats;
use crate::crypto::{aead, hash};
use crate::error::{DepotError, ErrorCode};
use crate::wire::{self, record};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use zeroize::Zeroize;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct PendingRx {
    key: [u8; 32],
    prefix: [u8; 16],
}

pub struct Session {
    stream: TcpStream,
    is_client: bool,

    tx_key: [u8; 32],
    rx_key: [u8; 32],
    tx_prefix: [u8; 16],
    rx_prefix: [u8; 16],
    tx_seq: u64,
    rx_seq: u64,
    tx_epoch: u32,
    rx_epoch: u32,

    traffic_secret: [u8; 32],
    last_rekey_ms: i64,
    pub rekey_interval_ms: i64,
    pending_epoch: u32,
    pending_rx: Option<PendingRx>,

    pub dl_ack_v1: bool,
    pub server_sandboxed: bool,
    pub io_timeout_ms: i64,
    pub stats: TransferStats,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        is_client: bool,
        tx_key: [u8; 32],
        rx_key: [u8; 32],
        tx_prefix: [u8; 16],
        rx_prefix: [u8; 16],
        traffic_secret: [u8; 32],
        rekey_interval_ms: i64,
        io_timeout_ms: i64,
        server_sandboxed: bool,
    ) -> Self {
        Session {
            stream,
            is_client,
            tx_key,
            rx_key,
            tx_prefix,
            rx_prefix,
            tx_seq: 0,
            rx_seq: 0,
            tx_epoch: 0,
            rx_epoch: 0,
            traffic_secret,
            last_rekey_ms: now_ms(),
            rekey_interval_ms,
            pending_epoch: 0,
            pending_rx: None,
            dl_ack_v1: true,
            server_sandboxed,
            io_timeout_ms,
            stats: TransferStats::new(),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.tx_epoch
    }

    fn build_ad(rtype: u8, seq: u64, epoch: u32) -> Vec<u8> {
        let mut ad = Vec::with_capacity(1 + 10 + 5);
        ad.push(rtype);
        ad.extend(crate::wire::varint::encode(seq));
        ad.extend(crate::wire::varint::encode(epoch as u64));
        ad
    }

    /// Sends one record, advancing `tx_seq` by exactly one on success.
    pub async fn send_record(&mut self, rtype: u8, payload: &[u8]) -> Result<(), DepotError> {
        let ad = Self::build_ad(rtype, self.tx_seq, self.tx_epoch);
        let nonce = aead::build_nonce(&self.tx_prefix, self.tx_seq);
        let sealed = aead::seal(&self.tx_key, &nonce, &ad, payload)?;
        wire::write_sealed_frame(&mut self.stream, rtype, &sealed).await?;
        self.tx_seq += 1;
        Ok(())
    }

    /// Receives one record bounded by `io_timeout_ms`, advancing `rx_seq`
    /// by exactly one on success. Does not service rekey records itself;
    /// callers in a wait loop should use [`Session::recv_servicing_rekey`].
    pub async fn recv_record(&mut self) -> Result<(u8, Vec<u8>), DepotError> {
        let bound = Duration::from_millis(self.io_timeout_ms.max(0) as u64);
        let (rtype, ciphertext_and_tag) = match timeout(bound, wire::read_sealed_frame(&mut self.stream)).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = self
                    .send_record(record::ERROR_REC, &[ErrorCode::Timeout.as_byte()])
                    .await;
                return Err(DepotError::Code(ErrorCode::Timeout));
            }
        };
        let ad = Self::build_ad(rtype, self.rx_seq, self.rx_epoch);
        let nonce = aead::build_nonce(&self.rx_prefix, self.rx_seq);
        let payload = aead::open(&self.rx_key, &nonce, &ad, &ciphertext_and_tag)
            .map_err(|_| DepotError::Code(ErrorCode::Auth))?;
        self.rx_seq += 1;
        Ok((rtype, payload))
    }

    /// Receives the next record, transparently servicing any `RekeyReq`
    /// or `RekeyAck` records encountered along the way and returning the
    /// first non-rekey record. Wait loops (OPEN_WAIT, COMMIT_WAIT,
    /// PathAccept/PathSkip waits) must use this rather than
    /// [`Session::recv_record`] directly.
    pub async fn recv_servicing_rekey(&mut self) -> Result<(u8, Vec<u8>), DepotError> {
        loop {
            let (rtype, payload) = self.recv_record().await?;
            match rtype {
                record::REKEY_REQ => {
                    self.handle_rekey_req(&payload).await?;
                }
                record::REKEY_ACK => {
                    self.activate_pending_rx(&payload)?;
                }
                _ => return Ok((rtype, payload)),
            }
        }
    }

    fn derive_rekey_pair(&self, new_epoch: u32) -> (([u8; 32], [u8; 16]), ([u8; 32], [u8; 16])) {
        let epoch_bytes = new_epoch.to_le_bytes();
        let mut c2s_input = Vec::with_capacity(32 + 3 + 4);
        c2s_input.extend_from_slice(&self.traffic_secret);
        c2s_input.extend_from_slice(b"c2s");
        c2s_input.extend_from_slice(&epoch_bytes);
        let k1 = hash::blake2b384(&c2s_input);

        let mut s2c_input = Vec::with_capacity(32 + 3 + 4);
        s2c_input.extend_from_slice(&self.traffic_secret);
        s2c_input.extend_from_slice(b"s2c");
        s2c_input.extend_from_slice(&epoch_bytes);
        let k2 = hash::blake2b384(&s2c_input);

        let split = |k: [u8; 48]| -> ([u8; 32], [u8; 16]) {
            let mut key = [0u8; 32];
            let mut prefix = [0u8; 16];
            key.copy_from_slice(&k[..32]);
            prefix.copy_from_slice(&k[32..]);
            (key, prefix)
        };
        let c2s = split(k1);
        let s2c = split(k2);

        if self.is_client {
            (c2s, s2c) // (tx, rx)
        } else {
            (s2c, c2s) // (tx, rx), mirrored
        }
    }

    /// Called by the sender of the current stream (client during upload,
    /// server during download) at a file boundary. No-op if a rekey is
    /// already pending or the interval hasn't elapsed. Blocks until the
    /// peer's `RekeyAck` is observed before returning, since the proposer
    /// must not send any other record type in between.
    pub async fn maybe_propose_rekey(&mut self) -> Result<bool, DepotError> {
        if self.pending_epoch != 0 {
            return Ok(false);
        }
        if now_ms() - self.last_rekey_ms <= self.rekey_interval_ms {
            return Ok(false);
        }

        let new_epoch = self.tx_epoch.wrapping_add(1);
        self.send_record(record::REKEY_REQ, &new_epoch.to_le_bytes()).await?;

        let (tx, rx) = self.derive_rekey_pair(new_epoch);
        self.tx_key = tx.0;
        self.tx_prefix = tx.1;
        self.tx_epoch = new_epoch;
        self.tx_seq = 0;
        self.pending_epoch = new_epoch;
        self.pending_rx = Some(PendingRx { key: rx.0, prefix: rx.1 });
        self.last_rekey_ms = now_ms();

        let (rtype, payload) = self.recv_record().await?;
        match rtype {
            record::REKEY_ACK => self.activate_pending_rx(&payload)?,
            record::ERROR_REC => {
                return Err(DepotError::Remote(ErrorCode::from_byte(
                    *payload.first().unwrap_or(&0),
                )))
            }
            _ => return Err(DepotError::Protocol("expected RekeyAck after RekeyReq".into())),
        }
        Ok(true)
    }

    fn activate_pending_rx(&mut self, epoch_bytes: &[u8]) -> Result<(), DepotError> {
        if epoch_bytes.len() != 4 {
            return Err(DepotError::Protocol("malformed RekeyAck payload".into()));
        }
        let new_epoch = u32::from_le_bytes(epoch_bytes.try_into().unwrap());
        if new_epoch != self.pending_epoch {
            return Err(DepotError::Protocol("RekeyAck epoch mismatch".into()));
        }
        let pending = self
            .pending_rx
            .take()
            .ok_or_else(|| DepotError::Protocol("RekeyAck with no pending rekey".into()))?;
        self.rx_key = pending.key;
        self.rx_prefix = pending.prefix;
        self.rx_epoch = new_epoch;
        self.rx_seq = 0;
        self.pending_epoch = 0;
        Ok(())
    }

    async fn handle_rekey_req(&mut self, epoch_bytes: &[u8]) -> Result<(), DepotError> {
        if epoch_bytes.len() != 4 {
            return Err(DepotError::Protocol("malformed RekeyReq payload".into()));
        }
        let new_epoch = u32::from_le_bytes(epoch_bytes.try_into().unwrap());
        let (tx, rx) = self.derive_rekey_pair(new_epoch);

        self.send_record(record::REKEY_ACK, &new_epoch.to_le_bytes()).await?;

        self.tx_key = tx.0;
        self.tx_prefix = tx.1;
        self.rx_key = rx.0;
        self.rx_prefix = rx.1;
        self.tx_epoch = new_epoch;
        self.rx_epoch = new_epoch;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.pending_epoch = 0;
        self.last_rekey_ms = now_ms();
        Ok(())
    }

    /// Sends a handshake-style single-byte error record and marks the
    /// session as no longer usable by dropping it after the write.
    pub async fn send_error_and_close(mut self, code: ErrorCode) {
        let _ = self.send_record(record::ERROR_REC, &[code.as_byte()]).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.tx_key.zeroize();
        self.rx_key.zeroize();
        self.traffic_secret.zeroize();
        if let Some(pending) = self.pending_rx.as_mut() {
            pending.key.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_is_strictly_increasing_lexicographically() {
        let mut prev = Session::build_ad(record::FILE_DATA, 0, 0);
        for seq in 1..5u64 {
            let cur = Session::build_ad(record::FILE_DATA, seq, 0);
            assert!(cur > prev);
            prev = cur;
        }
    }
}
