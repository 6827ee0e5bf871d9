//! XChaCha20-Poly1305 sealing/opening for record frames and the DPK1 envelope.

use crate::error::DepotError;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};

/// Seals `plaintext` under `key`/`nonce`/`ad`. The returned buffer is
/// `ciphertext || tag(16)`, matching the wire frame layout directly.
pub fn seal(key: &[u8; 32], nonce: &[u8; 24], ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, DepotError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let xnonce = XNonce::from_slice(nonce);
    cipher
        .encrypt(xnonce, Payload { msg: plaintext, aad: ad })
        .map_err(|_| DepotError::Crypto("AEAD seal failed".into()))
}

/// Opens a `ciphertext || tag(16)` buffer under `key`/`nonce`/`ad`.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; 24],
    ad: &[u8],
    ciphertext_and_tag: &[u8],
) -> Result<Vec<u8>, DepotError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let xnonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(
            xnonce,
            Payload {
                msg: ciphertext_and_tag,
                aad: ad,
            },
        )
        .map_err(|_| DepotError::Crypto("AEAD open failed: tag mismatch".into()))
}

/// Builds the 24-byte nonce `prefix(16) || u64_le(seq)`.
pub fn build_nonce(prefix: &[u8; 16], seq: u64) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..16].copy_from_slice(prefix);
    nonce[16..].copy_from_slice(&seq.to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; 32];
        let prefix = [3u8; 16];
        let nonce = build_nonce(&prefix, 42);
        let ad = b"type+seq+epoch";
        let ct = seal(&key, &nonce, ad, b"hello depot").unwrap();
        let pt = open(&key, &nonce, ad, &ct).unwrap();
        assert_eq!(pt, b"hello depot");
    }

    #[test]
    fn tampered_ad_fails() {
        let key = [7u8; 32];
        let nonce = build_nonce(&[3u8; 16], 1);
        let ct = seal(&key, &nonce, b"ad-a", b"payload").unwrap();
        assert!(open(&key, &nonce, b"ad-b", &ct).is_err());
    }

    #[test]
    fn tampered_tag_fails() {
        let key = [7u8; 32];
        let nonce = build_nonce(&[3u8; 16], 1);
        let mut ct = seal(&key, &nonce, b"ad", b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(open(&key, &nonce, b"ad", &ct).is_err());
    }
}
