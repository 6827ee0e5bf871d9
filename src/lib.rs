//! Depot: a post-quantum secure point-to-point file transfer engine.
//!
//! This crate is the protocol core — the handshake, record channel, and
//! transfer state machines — consumed by the `depot-server` and
//! `depot-client` binaries. CLI parsing, INI configuration, and console
//! logging setup live in the binaries, not here.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod transfer;
pub mod wire;

pub use config::{ClientConfig, ServerConfig, TransferStats};
pub use error::{DepotError, ErrorCode};
pub use session::Session;
