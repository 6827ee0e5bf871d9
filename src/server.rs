//! The accept loop: one cooperative `tokio::spawn`'d task per connection,
//! each owning its `Session` exclusively until the socket closes.

use crate::config::ServerConfig;
use crate::error::{DepotError, ErrorCode};
use crate::handshake;
use crate::identity::IdentityStore;
use crate::session::Session;
use crate::transfer::{download, listing, upload};
use crate::wire::record;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub async fn run(config: ServerConfig) -> Result<(), DepotError> {
    let identity_store = IdentityStore::new(config.config_dir.clone());
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "depot server listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let config = config.clone();
        let identity_store = identity_store.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, config, identity_store).await {
                warn!(%peer_addr, error = %e, "connection ended with error");
            }
        });
    }
}

/// Services one accepted connection end to end: handshake, then dispatch
/// of upload/download/list requests until the peer closes the socket.
/// Public so embedders (and tests) can drive a single connection without
/// going through the accept loop in [`run`].
pub async fn handle_connection(
    socket: TcpStream,
    config: ServerConfig,
    identity_store: IdentityStore,
) -> Result<(), DepotError> {
    let mut session = handshake::run_server_handshake(socket, &config, &identity_store).await?;

    match dispatch(&mut session, &config).await {
        Ok(()) => Ok(()),
        Err(DepotError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
        Err(e) => {
            // `recv_record` already notified the peer of its own timeout;
            // anything else reaching here hasn't been communicated yet.
            if e.code() != ErrorCode::Timeout {
                session.send_error_and_close(e.code()).await;
            }
            Err(e)
        }
    }
}

/// Reads and services records until the peer disconnects or a session-fatal
/// error occurs. Does not itself notify the peer of the error; the caller
/// (`handle_connection`) does that once, after the dispatch loop exits.
async fn dispatch(session: &mut Session, config: &ServerConfig) -> Result<(), DepotError> {
    loop {
        let (rtype, payload) = session.recv_servicing_rekey().await?;

        match rtype {
            record::UPLOAD_OPEN => {
                upload::server_handle_upload(
                    session,
                    &config.share_root,
                    config.sandboxed,
                    config.overwrite,
                    &payload,
                )
                .await?;
            }
            record::DOWNLOAD_OPEN => {
                let (wire_path, _) = record::decode_path(&payload)?;
                download::server_handle_download(session, &config.share_root, config.sandboxed, &wire_path)
                    .await?;
            }
            record::LIST_OPEN => {
                let (wire_path, _) = record::decode_path(&payload)?;
                listing::server_handle_list(session, &config.share_root, config.sandboxed, &wire_path)
                    .await?;
            }
            record::ERROR_REC => {
                return Ok(());
            }
            _ => {
                return Err(DepotError::Code(ErrorCode::Protocol));
            }
        }
    }
}
