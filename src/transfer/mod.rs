pub mod download;
pub mod listing;
pub mod upload;

use crate::config::TransferStats;
use std::path::{Path, PathBuf};

/// RAII guard for a `<target>.part` staging file. Removes the partial file
/// on drop unless [`PartialFileGuard::commit`] has consumed it, guaranteeing
/// cleanup across every error path and task cancellation without every
/// call site having to remember to unlink it by hand.
pub struct PartialFileGuard {
    part_path: PathBuf,
    committed: bool,
}

impl PartialFileGuard {
    pub fn new(destination: &Path) -> Self {
        let mut part_path = destination.as_os_str().to_owned();
        part_path.push(".part");
        PartialFileGuard {
            part_path: PathBuf::from(part_path),
            committed: false,
        }
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Atomically renames the `.part` file into place and disarms cleanup.
    pub fn commit(mut self, destination: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.part_path, destination)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

/// Accumulates [`TransferStats`] across a batch of upload/download/list
/// items issued one after another over the same session.
#[derive(Debug, Default)]
pub struct Batch {
    pub stats: TransferStats,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn record_ok(&mut self, bytes: u64, direction_sent: bool) {
        if direction_sent {
            self.stats.bytes_sent += bytes;
        } else {
            self.stats.bytes_received += bytes;
        }
        self.stats.files_ok += 1;
    }

    pub fn record_skipped(&mut self) {
        self.stats.files_skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.stats.files_failed += 1;
    }
}
