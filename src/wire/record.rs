//! Record type constants and the shared payload encoding helpers used by
//! the handshake and transfer state machines.

use crate::error::{DepotError, ErrorCode};
use crate::wire::varint;

// Handshake messages (plaintext frames, exchanged before a Session exists).
pub const CLIENT_HELLO: u8 = 0x00;
pub const SERVER_ID: u8 = 0x01;
pub const KEM_PK: u8 = 0x02;
pub const KEM_ENV: u8 = 0x03;
pub const SERVER_HELLO: u8 = 0x04;
pub const CLIENT_AUTH: u8 = 0x05;
pub const HS_ERROR: u8 = 0x06;

// Streaming.
pub const FILE_DATA: u8 = 0x11;
pub const FILE_CLOSE: u8 = 0x12;
pub const ERROR_REC: u8 = 0x13;

// Path control.
pub const PATH_OPEN: u8 = 0x21;
pub const PATH_ACCEPT: u8 = 0x22;
pub const PATH_SKIP: u8 = 0x23;

// Upload.
pub const UPLOAD_OPEN: u8 = 0x30;
pub const UPLOAD_OK: u8 = 0x31;
pub const UPLOAD_FAIL: u8 = 0x32;
pub const UPLOAD_DONE: u8 = 0x33;

// Download.
pub const DOWNLOAD_OPEN: u8 = 0x40;
pub const DOWNLOAD_DONE: u8 = 0x41;

// Listing.
pub const LIST_OPEN: u8 = 0x50;
pub const LIST_CHUNK: u8 = 0x51;
pub const LIST_DONE: u8 = 0x52;

// Rekey.
pub const REKEY_REQ: u8 = 0x60;
pub const REKEY_ACK: u8 = 0x61;

/// A portable permission bit, represented on the wire as its ordinal (0..8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FilePermission {
    OwnerRead = 0,
    OwnerWrite = 1,
    OwnerExec = 2,
    GroupRead = 3,
    GroupWrite = 4,
    GroupExec = 5,
    OtherRead = 6,
    OtherWrite = 7,
    OtherExec = 8,
}

impl FilePermission {
    pub fn from_ordinal(b: u8) -> Result<FilePermission, DepotError> {
        Ok(match b {
            0 => FilePermission::OwnerRead,
            1 => FilePermission::OwnerWrite,
            2 => FilePermission::OwnerExec,
            3 => FilePermission::GroupRead,
            4 => FilePermission::GroupWrite,
            5 => FilePermission::GroupExec,
            6 => FilePermission::OtherRead,
            7 => FilePermission::OtherWrite,
            8 => FilePermission::OtherExec,
            _ => return Err(DepotError::Code(ErrorCode::BadPayload)),
        })
    }

    /// Derives the portable permission set from a unix mode, best-effort.
    #[cfg(unix)]
    pub fn from_unix_mode(mode: u32) -> Vec<FilePermission> {
        let mut out = Vec::new();
        let bits = [
            (0o400, FilePermission::OwnerRead),
            (0o200, FilePermission::OwnerWrite),
            (0o100, FilePermission::OwnerExec),
            (0o040, FilePermission::GroupRead),
            (0o020, FilePermission::GroupWrite),
            (0o010, FilePermission::GroupExec),
            (0o004, FilePermission::OtherRead),
            (0o002, FilePermission::OtherWrite),
            (0o001, FilePermission::OtherExec),
        ];
        for (mask, perm) in bits {
            if mode & mask != 0 {
                out.push(perm);
            }
        }
        out
    }

    #[cfg(unix)]
    pub fn to_unix_mode(perms: &[FilePermission]) -> u32 {
        let mut mode = 0u32;
        for p in perms {
            mode |= match p {
                FilePermission::OwnerRead => 0o400,
                FilePermission::OwnerWrite => 0o200,
                FilePermission::OwnerExec => 0o100,
                FilePermission::GroupRead => 0o040,
                FilePermission::GroupWrite => 0o020,
                FilePermission::GroupExec => 0o010,
                FilePermission::OtherRead => 0o004,
                FilePermission::OtherWrite => 0o002,
                FilePermission::OtherExec => 0o001,
            };
        }
        mode
    }
}

pub fn encode_path(path: &str) -> Vec<u8> {
    let bytes = path.as_bytes();
    let mut out = varint::encode(bytes.len() as u64);
    out.extend_from_slice(bytes);
    out
}

pub fn decode_path(buf: &[u8]) -> Result<(String, usize), DepotError> {
    let (len, used) = varint::decode(buf)?;
    let len = len as usize;
    let start = used;
    let end = start
        .checked_add(len)
        .ok_or(DepotError::Code(ErrorCode::BadPayload))?;
    if end > buf.len() {
        return Err(DepotError::Code(ErrorCode::BadPayload));
    }
    let s = std::str::from_utf8(&buf[start..end])
        .map_err(|_| DepotError::Code(ErrorCode::BadPayload))?
        .to_string();
    Ok((s, end))
}

pub fn encode_perms(perms: &[FilePermission]) -> Vec<u8> {
    let mut out = varint::encode(perms.len() as u64);
    out.extend(perms.iter().map(|p| *p as u8));
    out
}

pub fn decode_perms(buf: &[u8]) -> Result<(Vec<FilePermission>, usize), DepotError> {
    let (count, mut used) = varint::decode(buf)?;
    let count = count as usize;
    let mut perms = Vec::with_capacity(count);
    for _ in 0..count {
        let byte = *buf
            .get(used)
            .ok_or(DepotError::Code(ErrorCode::BadPayload))?;
        perms.push(FilePermission::from_ordinal(byte)?);
        used += 1;
    }
    Ok((perms, used))
}
