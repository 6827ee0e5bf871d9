//! Plain configuration structs consumed by the handshake engine, identity
//! store and sandbox. Parsing these from an INI file or CLI flags is
//! deliberately left to the binaries; the core only depends on their shape.

use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 60006;
pub const DEFAULT_IO_TIMEOUT_MS: i64 = 120_000;
pub const DEFAULT_REKEY_INTERVAL_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub share_root: PathBuf,
    pub sandboxed: bool,
    pub require_psk: bool,
    pub psk: Option<Vec<u8>>,
    pub require_client_auth: bool,
    pub allowed_clients_dir: PathBuf,
    pub config_dir: PathBuf,
    pub rekey_interval_ms: i64,
    pub io_timeout_ms: i64,
    pub overwrite: bool,
    pub passphrase: Option<String>,
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr, share_root: PathBuf, config_dir: PathBuf) -> Self {
        ServerConfig {
            listen_addr,
            share_root,
            sandboxed: true,
            require_psk: false,
            psk: None,
            require_client_auth: false,
            allowed_clients_dir: config_dir.join("trust").join("clients"),
            config_dir,
            rekey_interval_ms: DEFAULT_REKEY_INTERVAL_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            overwrite: false,
            passphrase: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub remote_id: String,
    pub config_dir: PathBuf,
    pub psk: Option<Vec<u8>>,
    pub client_auth: bool,
    pub skip_existing: bool,
    pub io_timeout_ms: i64,
    pub rekey_interval_ms: i64,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr, remote_id: impl Into<String>, config_dir: PathBuf) -> Self {
        ClientConfig {
            server_addr,
            remote_id: remote_id.into(),
            config_dir,
            psk: None,
            client_auth: false,
            skip_existing: false,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            rekey_interval_ms: DEFAULT_REKEY_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub files_ok: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &TransferStats) {
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.files_ok += other.files_ok;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
    }
}
