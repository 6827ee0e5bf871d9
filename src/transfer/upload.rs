//! Client and server halves of the upload flow: OPEN_WAIT -> STREAM ->
//! COMMIT_WAIT -> DONE | FAILED.

use crate::crypto::hash::FileHasher;
use crate::error::{self, DepotError, ErrorCode};
use crate::session::Session;
use crate::transfer::PartialFileGuard;
use crate::wire::record::{self, FilePermission};
use crate::wire::varint;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Done { bytes: u64 },
    Skipped,
    Failed(ErrorCode),
}

fn encode_upload_open(wire_path: &str, mtime_unix: i64, perms: &[FilePermission]) -> Vec<u8> {
    let mut out = record::encode_path(wire_path);
    out.extend(varint::encode(mtime_unix.max(0) as u64));
    out.extend(record::encode_perms(perms));
    out
}

fn decode_upload_open(payload: &[u8]) -> Result<(String, i64, Vec<FilePermission>), DepotError> {
    let (wire_path, used) = record::decode_path(payload)?;
    let (mtime_unix, used2) = varint::decode(&payload[used..])?;
    let (perms, _used3) = record::decode_perms(&payload[used + used2..])?;
    Ok((wire_path, mtime_unix as i64, perms))
}

fn apply_metadata(path: &Path, mtime_unix: i64, perms: &[FilePermission]) {
    let mtime = filetime::FileTime::from_unix_time(mtime_unix, 0);
    let _ = filetime::set_file_mtime(path, mtime);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !perms.is_empty() {
            let mode = FilePermission::to_unix_mode(perms);
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
        }
    }
}

/// Uploads one local file to `wire_path` over an established session.
/// Session-fatal reply codes propagate as `Err`; per-item failures (other
/// than a skipped `ecExists`) are returned as `Ok(ItemOutcome::Failed)` so
/// the caller's batch loop can continue with the next item.
pub async fn client_upload_one(
    session: &mut Session,
    local_path: &Path,
    wire_path: &str,
    mtime_unix: i64,
    perms: &[FilePermission],
    skip_existing: bool,
) -> Result<ItemOutcome, DepotError> {
    let payload = encode_upload_open(wire_path, mtime_unix, perms);
    session.send_record(record::UPLOAD_OPEN, &payload).await?;

    let (rtype, open_resp) = session.recv_servicing_rekey().await?;
    match rtype {
        record::UPLOAD_OK => {}
        record::UPLOAD_FAIL | record::ERROR_REC => {
            let code = ErrorCode::from_byte(*open_resp.first().unwrap_or(&0));
            if code.is_session_fatal() {
                return Err(DepotError::Remote(code));
            }
            if code == ErrorCode::Exists && skip_existing {
                return Ok(ItemOutcome::Skipped);
            }
            return Ok(ItemOutcome::Failed(code));
        }
        _ => return Err(DepotError::Protocol("unexpected reply to UploadOpen".into())),
    }

    let mut file = File::open(local_path).await?;
    let mut hasher = FileHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        session.send_record(record::FILE_DATA, &buf[..n]).await?;
        total += n as u64;
    }
    let digest = hasher.finalize();
    session.send_record(record::FILE_CLOSE, &digest).await?;

    let (rtype, resp) = session.recv_servicing_rekey().await?;
    match rtype {
        record::UPLOAD_DONE => Ok(ItemOutcome::Done { bytes: total }),
        record::ERROR_REC | record::UPLOAD_FAIL => {
            let code = ErrorCode::from_byte(*resp.first().unwrap_or(&0));
            if code.is_session_fatal() {
                return Err(DepotError::Remote(code));
            }
            if code == ErrorCode::Exists && skip_existing {
                return Ok(ItemOutcome::Skipped);
            }
            Ok(ItemOutcome::Failed(code))
        }
        _ => Err(DepotError::Protocol("unexpected reply after FileClose".into())),
    }
}

/// Services exactly one `UploadOpen` already read by the server's
/// dispatch loop through commit or failure.
pub async fn server_handle_upload(
    session: &mut Session,
    share_root: &Path,
    sandboxed: bool,
    overwrite: bool,
    open_payload: &[u8],
) -> Result<(), DepotError> {
    let (wire_path, mtime_unix, perms) = decode_upload_open(open_payload)?;

    let dest = if sandboxed {
        match crate::sandbox::resolve(share_root, &wire_path) {
            Ok(p) => p,
            Err(e) => {
                session
                    .send_record(record::UPLOAD_FAIL, &[e.code().as_byte()])
                    .await?;
                return Ok(());
            }
        }
    } else {
        share_root.join(wire_path.trim_start_matches('/'))
    };

    if dest.exists() && !overwrite {
        session
            .send_record(record::UPLOAD_FAIL, &[ErrorCode::Exists.as_byte()])
            .await?;
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let code = error::from_io_error(&e, ErrorCode::OpenFail);
            session
                .send_record(record::UPLOAD_FAIL, &[code.as_byte()])
                .await?;
            return Ok(());
        }
    }

    let guard = PartialFileGuard::new(&dest);
    let mut part_file = match File::create(guard.part_path()).await {
        Ok(f) => f,
        Err(e) => {
            let code = error::from_io_error(&e, ErrorCode::OpenFail);
            session
                .send_record(record::UPLOAD_FAIL, &[code.as_byte()])
                .await?;
            return Ok(());
        }
    };

    session.send_record(record::UPLOAD_OK, &[]).await?;

    let mut hasher = FileHasher::new();
    loop {
        let (rtype, payload) = session.recv_servicing_rekey().await?;
        match rtype {
            record::FILE_DATA => {
                hasher.update(&payload);
                if let Err(e) = part_file.write_all(&payload).await {
                    let code = error::from_io_error(&e, ErrorCode::WriteFail);
                    session
                        .send_record(record::ERROR_REC, &[code.as_byte()])
                        .await?;
                    return Ok(());
                }
            }
            record::FILE_CLOSE => {
                part_file.flush().await?;
                drop(part_file);
                let digest = hasher.finalize();
                if payload.len() != 32 || payload.as_slice() != digest.as_slice() {
                    session
                        .send_record(record::ERROR_REC, &[ErrorCode::Checksum.as_byte()])
                        .await?;
                    return Ok(());
                }
                if dest.exists() && !overwrite {
                    session
                        .send_record(record::ERROR_REC, &[ErrorCode::Exists.as_byte()])
                        .await?;
                    return Ok(());
                }
                match guard.commit(&dest) {
                    Ok(()) => {
                        apply_metadata(&dest, mtime_unix, &perms);
                        session.send_record(record::UPLOAD_DONE, &[]).await?;
                    }
                    Err(e) => {
                        let code = error::from_io_error(&e, ErrorCode::CommitFail);
                        session
                            .send_record(record::ERROR_REC, &[code.as_byte()])
                            .await?;
                    }
                }
                return Ok(());
            }
            record::ERROR_REC => {
                return Err(DepotError::Remote(ErrorCode::from_byte(
                    *payload.first().unwrap_or(&0),
                )));
            }
            _ => return Err(DepotError::Protocol("unexpected record during upload stream".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_open_round_trips() {
        let perms = vec![FilePermission::OwnerRead, FilePermission::OwnerWrite];
        let encoded = encode_upload_open("dir/alpha.bin", 1_700_000_000, &perms);
        let (path, mtime, decoded_perms) = decode_upload_open(&encoded).unwrap();
        assert_eq!(path, "dir/alpha.bin");
        assert_eq!(mtime, 1_700_000_000);
        assert_eq!(decoded_perms, perms);
    }

    #[test]
    fn upload_open_round_trips_empty_and_full_perms() {
        let encoded = encode_upload_open("f", 0, &[]);
        let (_, _, perms) = decode_upload_open(&encoded).unwrap();
        assert!(perms.is_empty());

        let all = vec![
            FilePermission::OwnerRead,
            FilePermission::OwnerWrite,
            FilePermission::OwnerExec,
            FilePermission::GroupRead,
            FilePermission::GroupWrite,
            FilePermission::GroupExec,
            FilePermission::OtherRead,
            FilePermission::OtherWrite,
            FilePermission::OtherExec,
        ];
        let encoded = encode_upload_open("f", 0, &all);
        let (_, _, perms) = decode_upload_open(&encoded).unwrap();
        assert_eq!(perms, all);
    }
}
