//! Client and server halves of the download flow: the server streams
//! `PathOpen`/`FileData`/`FileClose` for each regular file under a
//! requested path (recursing through directories), the client accepts or
//! skips each one and verifies its digest before committing.

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

#[derive(Debug, Default)]
pub struct DownloadStats {
    pub files_ok: u32,
    pub files_skipped: u32,
    pub bytes_received: u64,
    pending_error: Option<ErrorCode>,
}

fn encode_path_open(wire_path: &str, size: u64, mtime_unix: i64, perms: &[FilePermission]) -> Vec<u8> {
    let mut out = record::encode_path(wire_path);
    out.extend(varint::encode(size));
    out.extend(varint::encode(mtime_unix.max(0) as u64));
    out.extend(record::encode_perms(perms));
    out
}

fn decode_path_open(payload: &[u8]) -> Result<(String, u64, i64, Vec<FilePermission>), DepotError> {
    let (path, used) = record::decode_path(payload)?;
    let (size, used2) = varint::decode(&payload[used..])?;
    let (mtime, used3) = varint::decode(&payload[used + used2..])?;
    let (perms, _used4) = record::decode_perms(&payload[used + used2 + used3..])?;
    Ok((path, size, mtime as i64, perms))
}

fn apply_local_metadata(path: &Path, mtime_unix: i64, perms: &[FilePermission]) {
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

/// Server side: resolves `wire_path` under the share root and streams
/// every regular file it names (recursing through directories), then
/// sends `DownloadDone`.
pub async fn server_handle_download(
    session: &mut Session,
    share_root: &Path,
    sandboxed: bool,
    wire_path: &str,
) -> Result<(), DepotError> {
    let resolved = if sandboxed {
        match crate::sandbox::resolve(share_root, wire_path) {
            Ok(p) => p,
            Err(e) => {
                session
                    .send_record(record::ERROR_REC, &[e.code().as_byte()])
                    .await?;
                return Ok(());
            }
        }
    } else {
        share_root.join(wire_path.trim_start_matches('/'))
    };

    let meta = match tokio::fs::symlink_metadata(&resolved).await {
        Ok(m) => m,
        Err(e) => {
            let code = error::from_io_error(&e, ErrorCode::NotFound);
            session
                .send_record(record::ERROR_REC, &[code.as_byte()])
                .await?;
            return Ok(());
        }
    };

    if meta.is_dir() {
        stream_directory(session, &resolved, wire_path).await?;
    } else if meta.file_type().is_file() {
        session.maybe_propose_rekey().await?;
        stream_one_file(session, &resolved, wire_path, &meta).await?;
    } else {
        session
            .send_record(record::ERROR_REC, &[ErrorCode::BadPath.as_byte()])
            .await?;
        return Ok(());
    }

    session.send_record(record::DOWNLOAD_DONE, &[]).await?;
    Ok(())
}

fn stream_directory<'a>(
    session: &'a mut Session,
    dir_abs: &'a Path,
    wire_prefix: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DepotError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir_abs).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            let child_wire = format!("{wire_prefix}/{name}");
            let child_abs = entry.path();
            if meta.is_dir() {
                stream_directory(session, &child_abs, &child_wire).await?;
            } else if meta.is_file() {
                session.maybe_propose_rekey().await?;
                stream_one_file(session, &child_abs, &child_wire, &meta).await?;
            }
        }
        Ok(())
    })
}

async fn stream_one_file(
    session: &mut Session,
    abs_path: &Path,
    wire_path: &str,
    meta: &std::fs::Metadata,
) -> Result<(), DepotError> {
    let size = meta.len();
    let mtime_unix = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        FilePermission::from_unix_mode(meta.permissions().mode())
    };
    #[cfg(not(unix))]
    let perms: Vec<FilePermission> = Vec::new();

    let payload = encode_path_open(wire_path, size, mtime_unix, &perms);
    session.send_record(record::PATH_OPEN, &payload).await?;

    let (rtype, _) = session.recv_servicing_rekey().await?;
    match rtype {
        record::PATH_SKIP => return Ok(()),
        record::PATH_ACCEPT => {}
        record::ERROR_REC => return Ok(()),
        _ => return Err(DepotError::Protocol("unexpected reply to PathOpen".into())),
    }

    let mut file = File::open(abs_path).await?;
    let mut hasher = FileHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        session.send_record(record::FILE_DATA, &buf[..n]).await?;
    }
    let digest = hasher.finalize();
    session.send_record(record::FILE_CLOSE, &digest).await?;
    Ok(())
}

/// Client side: requests `wire_path` and services every `PathOpen` the
/// server sends, creating the same subtree under `local_dest_root`.
pub async fn client_download(
    session: &mut Session,
    wire_path: &str,
    local_dest_root: &Path,
    skip_existing: bool,
) -> Result<DownloadStats, DepotError> {
    session
        .send_record(record::DOWNLOAD_OPEN, &record::encode_path(wire_path))
        .await?;

    let mut stats = DownloadStats::default();
    loop {
        let (rtype, payload) = session.recv_servicing_rekey().await?;
        match rtype {
            record::PATH_OPEN => {
                let (remote_path, _size, mtime_unix, perms) = decode_path_open(&payload)?;
                let local_path = match crate::sandbox::resolve(local_dest_root, &remote_path) {
                    Ok(p) => p,
                    Err(e) => {
                        session.send_record(record::PATH_SKIP, &[]).await?;
                        stats.pending_error.get_or_insert(e.code());
                        continue;
                    }
                };

                if local_path.exists() {
                    session.send_record(record::PATH_SKIP, &[]).await?;
                    if skip_existing {
                        stats.files_skipped += 1;
                    } else {
                        stats.pending_error.get_or_insert(ErrorCode::Exists);
                    }
                    continue;
                }

                session.send_record(record::PATH_ACCEPT, &[]).await?;
                if let Some(parent) = local_path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        let code = error::from_io_error(&e, ErrorCode::OpenFail);
                        session.send_record(record::ERROR_REC, &[code.as_byte()]).await?;
                        return Err(DepotError::Code(code));
                    }
                }
                let guard = PartialFileGuard::new(&local_path);
                let mut part_file = match File::create(guard.part_path()).await {
                    Ok(f) => f,
                    Err(e) => {
                        let code = error::from_io_error(&e, ErrorCode::OpenFail);
                        session.send_record(record::ERROR_REC, &[code.as_byte()]).await?;
                        return Err(DepotError::Code(code));
                    }
                };
                let mut hasher = FileHasher::new();
                let mut received: u64 = 0;
                loop {
                    let (rtype, payload) = session.recv_servicing_rekey().await?;
                    match rtype {
                        record::FILE_DATA => {
                            hasher.update(&payload);
                            if let Err(e) = part_file.write_all(&payload).await {
                                let code = error::from_io_error(&e, ErrorCode::WriteFail);
                                session.send_record(record::ERROR_REC, &[code.as_byte()]).await?;
                                return Err(DepotError::Code(code));
                            }
                            received += payload.len() as u64;
                        }
                        record::FILE_CLOSE => {
                            part_file.flush().await?;
                            drop(part_file);
                            let digest = hasher.finalize();
                            if payload.len() != 32 || payload.as_slice() != digest.as_slice() {
                                return Err(DepotError::Code(ErrorCode::Checksum));
                            }
                            if local_path.exists() {
                                return Err(DepotError::Code(ErrorCode::Exists));
                            }
                            guard.commit(&local_path)?;
                            apply_local_metadata(&local_path, mtime_unix, &perms);
                            stats.files_ok += 1;
                            stats.bytes_received += received;
                            break;
                        }
                        record::ERROR_REC => {
                            return Err(DepotError::Remote(ErrorCode::from_byte(
                                *payload.first().unwrap_or(&0),
                            )));
                        }
                        _ => {
                            return Err(DepotError::Protocol(
                                "unexpected record mid file-stream".into(),
                            ))
                        }
                    }
                }
            }
            record::DOWNLOAD_DONE => {
                if let Some(code) = stats.pending_error {
                    return Err(DepotError::Code(code));
                }
                return Ok(stats);
            }
            record::ERROR_REC => {
                return Err(DepotError::Remote(ErrorCode::from_byte(
                    *payload.first().unwrap_or(&0),
                )));
            }
            _ => {
                return Err(DepotError::Protocol(
                    "unexpected record awaiting PathOpen/DownloadDone".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_open_round_trips() {
        let perms = vec![FilePermission::OwnerRead];
        let encoded = encode_path_open("mixdir/child/a.bin", 65537, 42, &perms);
        let (path, size, mtime, decoded_perms) = decode_path_open(&encoded).unwrap();
        assert_eq!(path, "mixdir/child/a.bin");
        assert_eq!(size, 65537);
        assert_eq!(mtime, 42);
        assert_eq!(decoded_perms, perms);
    }
}
