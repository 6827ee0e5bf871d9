//! Unsigned LEB128 varints: 7 payload bits per byte, continuation bit in the
//! MSB, capped at 10 bytes (enough for a u64).

use crate::error::{DepotError, ErrorCode};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAX_VARINT_BYTES: usize = 10;

pub fn encode(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_BYTES);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), DepotError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(DepotError::Code(ErrorCode::BadPayload));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(DepotError::Protocol("truncated varint".into()))
}

/// Reads a varint directly off an async byte stream, one byte at a time.
pub async fn read_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, DepotError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let byte = reader.read_u8().await?;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        let _ = i;
    }
    Err(DepotError::Code(ErrorCode::BadPayload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_boundary_values() {
        for &v in &[0u64, 1, 127, 128, 16383, 16384, (1u64 << 32) - 1, (1u64 << 63) - 1] {
            let encoded = encode(v);
            assert!(encoded.len() <= MAX_VARINT_BYTES);
            let (decoded, used) = decode(&encoded).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn rejects_overlong_varint() {
        let buf = [0x80u8; 11];
        assert!(decode(&buf).is_err());
    }

    #[tokio::test]
    async fn read_async_matches_sync_decode() {
        for &v in &[0u64, 300, 16384, u64::MAX] {
            let encoded = encode(v);
            let mut cursor = std::io::Cursor::new(encoded);
            let got = read_async(&mut cursor).await.unwrap();
            assert_eq!(got, v);
        }
    }
}
