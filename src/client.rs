//! The client half: connect, handshake, then issue upload/download/list
//! operations one at a time over the resulting session.

use crate::config::{ClientConfig, TransferStats};
use crate::error::DepotError;
use crate::handshake;
use crate::identity::IdentityStore;
use crate::session::Session;
use crate::transfer::listing::ListEntry;
use crate::transfer::upload::ItemOutcome;
use crate::transfer::{download, listing, upload, Batch};
use crate::wire::record::FilePermission;
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;

/// One local file queued for upload: its source path, the wire path to
/// create it under, its mtime, and its portable permission set.
pub struct UploadItem {
    pub local_path: PathBuf,
    pub wire_path: String,
    pub mtime_unix: i64,
    pub perms: Vec<FilePermission>,
}

fn file_metadata_to_item(local_path: PathBuf, wire_path: String) -> std::io::Result<UploadItem> {
    let metadata = std::fs::metadata(&local_path)?;
    let mtime_unix = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        FilePermission::from_unix_mode(metadata.permissions().mode())
    };
    #[cfg(not(unix))]
    let perms: Vec<FilePermission> = Vec::new();
    Ok(UploadItem {
        local_path,
        wire_path,
        mtime_unix,
        perms,
    })
}

fn walk_dir_into(local_dir: &Path, wire_prefix: &str, out: &mut Vec<UploadItem>) -> std::io::Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(local_dir)?.collect::<Result<_, _>>()?;
    children.sort_by_key(|e| e.file_name());
    for entry in children {
        let meta = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().to_string();
        let child_wire = format!("{wire_prefix}/{name}");
        if meta.is_dir() {
            walk_dir_into(&entry.path(), &child_wire, out)?;
        } else if meta.is_file() {
            out.push(file_metadata_to_item(entry.path(), child_wire)?);
        }
    }
    Ok(())
}

/// Builds the [`UploadItem`] list for one upload request. A file source
/// uploads as a single item at `remote_base`. A directory source uploads
/// its full tree, preserving the top-level directory name under
/// `remote_base` per the directory upload semantics (`remote_base/<top>/<relpath>`).
pub fn collect_upload_items(local_path: &Path, remote_base: &str) -> std::io::Result<Vec<UploadItem>> {
    let metadata = std::fs::metadata(local_path)?;
    if metadata.is_dir() {
        let top = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let wire_prefix = if remote_base.is_empty() {
            top
        } else {
            format!("{remote_base}/{top}")
        };
        let mut items = Vec::new();
        walk_dir_into(local_path, &wire_prefix, &mut items)?;
        Ok(items)
    } else {
        Ok(vec![file_metadata_to_item(
            local_path.to_path_buf(),
            remote_base.to_string(),
        )?])
    }
}

pub struct Client {
    session: Session,
}

impl Client {
    pub async fn connect(config: &ClientConfig, identity_store: &IdentityStore) -> Result<Client, DepotError> {
        let stream = TcpStream::connect(config.server_addr).await?;
        let session = handshake::run_client_handshake(stream, config, identity_store).await?;
        Ok(Client { session })
    }

    /// Aborts the remaining batch immediately on a session-fatal error;
    /// per-item failures are tallied and the batch continues.
    fn is_batch_fatal(e: &DepotError) -> bool {
        matches!(e, DepotError::Io(_)) || e.code().is_session_fatal()
    }

    pub async fn upload_many(
        &mut self,
        items: &[UploadItem],
        skip_existing: bool,
    ) -> Result<TransferStats, DepotError> {
        let mut batch = Batch::new();
        for item in items {
            let outcome = upload::client_upload_one(
                &mut self.session,
                &item.local_path,
                &item.wire_path,
                item.mtime_unix,
                &item.perms,
                skip_existing,
            )
            .await;

            match outcome {
                Ok(ItemOutcome::Done { bytes }) => batch.record_ok(bytes, true),
                Ok(ItemOutcome::Skipped) => batch.record_skipped(),
                Ok(ItemOutcome::Failed(_)) => batch.record_failed(),
                Err(e) if Self::is_batch_fatal(&e) => return Err(e),
                Err(_) => batch.record_failed(),
            }

            self.session.maybe_propose_rekey().await?;
        }
        Ok(batch.stats)
    }

    pub async fn download_many(
        &mut self,
        wire_paths: &[String],
        local_dest_root: &Path,
        skip_existing: bool,
    ) -> Result<TransferStats, DepotError> {
        let mut batch = Batch::new();
        for wire_path in wire_paths {
            match download::client_download(&mut self.session, wire_path, local_dest_root, skip_existing).await {
                Ok(stats) => {
                    batch.stats.files_ok += stats.files_ok;
                    batch.stats.files_skipped += stats.files_skipped;
                    batch.stats.bytes_received += stats.bytes_received;
                }
                Err(e) if Self::is_batch_fatal(&e) => return Err(e),
                Err(_) => batch.record_failed(),
            }
        }
        Ok(batch.stats)
    }

    pub async fn list(&mut self, wire_path: &str) -> Result<Vec<ListEntry>, DepotError> {
        listing::client_list(&mut self.session, wire_path).await
    }

    /// The session's current key-generation counter. Exposed for
    /// diagnostics and for tests that verify a rekey actually occurred.
    pub fn session_epoch(&self) -> u32 {
        self.session.epoch()
    }
}
