pub mod record;
pub mod varint;

use crate::error::{DepotError, ErrorCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body accepted on the wire; guards against a hostile peer
/// claiming an enormous `body_len` and exhausting memory before the bytes
/// are even read.
pub const MAX_FRAME_BODY: u64 = 64 * 1024 * 1024;

/// Writes a plaintext handshake frame: `varint(body_len) | type(u8) | payload`.
pub async fn write_plain_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rtype: u8,
    payload: &[u8],
) -> Result<(), DepotError> {
    let body_len = 1 + payload.len() as u64;
    let mut frame = varint::encode(body_len);
    frame.push(rtype);
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a plaintext handshake frame, returning (type, payload).
pub async fn read_plain_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u8, Vec<u8>), DepotError> {
    let body_len = varint::read_async(reader).await?;
    if body_len == 0 || body_len > MAX_FRAME_BODY {
        return Err(DepotError::Code(ErrorCode::BadPayload));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;
    let rtype = body[0];
    let payload = body[1..].to_vec();
    Ok((rtype, payload))
}

/// Writes an encrypted record frame: `varint(body_len) | type(u8) | ciphertext | tag(16)`.
/// `ciphertext_and_tag` already has the AEAD tag appended, as produced by
/// [`crate::crypto::aead::seal`].
pub async fn write_sealed_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rtype: u8,
    ciphertext_and_tag: &[u8],
) -> Result<(), DepotError> {
    let body_len = 1 + ciphertext_and_tag.len() as u64;
    let mut frame = varint::encode(body_len);
    frame.push(rtype);
    frame.extend_from_slice(ciphertext_and_tag);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads an encrypted record frame, returning (type, ciphertext_and_tag).
pub async fn read_sealed_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u8, Vec<u8>), DepotError> {
    let body_len = varint::read_async(reader).await?;
    if body_len < 1 + 16 || body_len > MAX_FRAME_BODY {
        return Err(DepotError::Code(ErrorCode::BadPayload));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;
    let rtype = body[0];
    let ciphertext_and_tag = body[1..].to_vec();
    Ok((rtype, ciphertext_and_tag))
}
