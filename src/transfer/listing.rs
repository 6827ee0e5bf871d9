//! Non-recursive remote directory listing.

use crate::error::{self, DepotError, ErrorCode};
use crate::session::Session;
use crate::wire::record;
use crate::wire::varint;
use std::path::Path;

const CHUNK_TARGET_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub path: String,
    pub size: u64,
    pub kind: EntryKind,
}

fn encode_entry(entry: &ListEntry) -> Vec<u8> {
    let mut out = record::encode_path(&entry.path);
    out.extend(varint::encode(entry.size));
    out.push(match entry.kind {
        EntryKind::File => 0,
        EntryKind::Directory => 1,
    });
    out
}

fn decode_entries(mut buf: &[u8]) -> Result<Vec<ListEntry>, DepotError> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        let (path, used) = record::decode_path(buf)?;
        let (size, used2) = varint::decode(&buf[used..])?;
        let kind_byte = *buf
            .get(used + used2)
            .ok_or(DepotError::Code(ErrorCode::BadPayload))?;
        let kind = match kind_byte {
            0 => EntryKind::File,
            1 => EntryKind::Directory,
            _ => return Err(DepotError::Code(ErrorCode::BadPayload)),
        };
        entries.push(ListEntry { path, size, kind });
        buf = &buf[used + used2 + 1..];
    }
    Ok(entries)
}

/// Server side: resolves `wire_path` and streams a listing of it. A file
/// produces a single-entry chunk; a directory produces its immediate
/// children batched into ~64 KiB chunks.
pub async fn server_handle_list(
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

    if meta.is_file() {
        let entry = ListEntry {
            path: wire_path.to_string(),
            size: meta.len(),
            kind: EntryKind::File,
        };
        session
            .send_record(record::LIST_CHUNK, &encode_entry(&entry))
            .await?;
    } else if meta.is_dir() {
        let mut entries = tokio::fs::read_dir(&resolved).await?;
        let mut chunk = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let child_meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            let child_path = if wire_path.is_empty() {
                name
            } else {
                format!("{wire_path}/{name}")
            };
            let list_entry = ListEntry {
                path: child_path,
                size: child_meta.len(),
                kind: if child_meta.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            };
            let encoded = encode_entry(&list_entry);
            if !chunk.is_empty() && chunk.len() + encoded.len() > CHUNK_TARGET_BYTES {
                session.send_record(record::LIST_CHUNK, &chunk).await?;
                chunk.clear();
            }
            chunk.extend(encoded);
        }
        if !chunk.is_empty() {
            session.send_record(record::LIST_CHUNK, &chunk).await?;
        }
    } else {
        session
            .send_record(record::ERROR_REC, &[ErrorCode::BadPath.as_byte()])
            .await?;
        return Ok(());
    }

    session.send_record(record::LIST_DONE, &[]).await?;
    Ok(())
}

/// Client side: requests a listing and collects every entry across
/// however many chunks the server sends.
pub async fn client_list(session: &mut Session, wire_path: &str) -> Result<Vec<ListEntry>, DepotError> {
    session
        .send_record(record::LIST_OPEN, &record::encode_path(wire_path))
        .await?;

    let mut entries = Vec::new();
    loop {
        let (rtype, payload) = session.recv_servicing_rekey().await?;
        match rtype {
            record::LIST_CHUNK => {
                entries.extend(decode_entries(&payload)?);
            }
            record::LIST_DONE => return Ok(entries),
            record::ERROR_REC => {
                return Err(DepotError::Remote(ErrorCode::from_byte(
                    *payload.first().unwrap_or(&0),
                )));
            }
            _ => {
                return Err(DepotError::Protocol(
                    "unexpected record awaiting ListChunk/ListDone".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips() {
        let entries = vec![
            ListEntry {
                path: "a.bin".into(),
                size: 10,
                kind: EntryKind::File,
            },
            ListEntry {
                path: "sub".into(),
                size: 0,
                kind: EntryKind::Directory,
            },
        ];
        let mut buf = Vec::new();
        for e in &entries {
            buf.extend(encode_entry(e));
        }
        let decoded = decode_entries(&buf).unwrap();
        assert_eq!(decoded, entries);
    }
}
