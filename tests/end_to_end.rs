//! End-to-end protocol scenarios run over a real loopback TCP socket: one
//! task plays the server accept loop for a single connection, the test
//! body drives the client side through the public `depot` API. These
//! mirror the literal scenarios in the core specification (single-file
//! upload, skip-existing download, mixed multi-item download, corrupt
//! checksum rejection, path traversal rejection, rekey across a file
//! boundary).

use depot::client::{collect_upload_items, Client};
use depot::config::{ClientConfig, ServerConfig};
use depot::identity::IdentityStore;
use depot::wire::{record, varint};
use depot::ErrorCode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

/// Deterministic filler content, mirroring the XorShift64-seeded fixtures
/// the specification's end-to-end scenarios describe.
fn xorshift_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

async fn spawn_server(
    share_root: PathBuf,
    config_dir: PathBuf,
    sandboxed: bool,
    overwrite: bool,
    rekey_interval_ms: i64,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ServerConfig::new(addr, share_root, config_dir);
    config.sandboxed = sandboxed;
    config.overwrite = overwrite;
    config.rekey_interval_ms = rekey_interval_ms;
    config.io_timeout_ms = 5_000;
    config.passphrase = Some("integration-test-passphrase".to_string());

    let identity_store = IdentityStore::new(config.config_dir.clone());

    tokio::spawn(async move {
        loop {
            let (socket, _peer) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let config = config.clone();
            let identity_store = identity_store.clone();
            tokio::spawn(async move {
                let _ = depot::server::handle_connection(socket, config, identity_store).await;
            });
        }
    });

    addr
}

async fn connect_client(
    addr: SocketAddr,
    config_dir: PathBuf,
    remote_id: &str,
    rekey_interval_ms: i64,
) -> Client {
    let mut config = ClientConfig::new(addr, remote_id.to_string(), config_dir.clone());
    config.io_timeout_ms = 5_000;
    config.rekey_interval_ms = rekey_interval_ms;
    let identity_store = IdentityStore::new(config_dir);
    Client::connect(&config, &identity_store).await.unwrap()
}

const DEFAULT_REKEY_MS: i64 = 10 * 60 * 1000;

#[tokio::test]
async fn scenario_a_single_file_upload() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();

    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        DEFAULT_REKEY_MS,
    )
    .await;

    let content = xorshift_bytes(42, 1_048_699);
    let local_file = local_dir.path().join("alpha.bin");
    std::fs::write(&local_file, &content).unwrap();

    let mut client = connect_client(
        addr,
        client_config_dir.path().to_path_buf(),
        "scenario-a",
        DEFAULT_REKEY_MS,
    )
    .await;

    let items = collect_upload_items(&local_file, "alpha.bin").unwrap();
    let stats = client.upload_many(&items, false).await.unwrap();
    assert_eq!(stats.files_ok, 1);
    assert_eq!(stats.files_failed, 0);
    assert_eq!(stats.bytes_sent, content.len() as u64);

    let dest = share_root.path().join("alpha.bin");
    let written = std::fs::read(&dest).unwrap();
    assert_eq!(written.len(), 1_048_699);
    assert_eq!(written, content);
    assert!(!share_root.path().join("alpha.bin.part").exists());
}

#[tokio::test]
async fn scenario_b_download_skip_existing() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();

    let content = xorshift_bytes(99, 524_295);
    std::fs::write(share_root.path().join("beta.dat"), &content).unwrap();

    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        DEFAULT_REKEY_MS,
    )
    .await;

    let mut client = connect_client(
        addr,
        client_config_dir.path().to_path_buf(),
        "scenario-b",
        DEFAULT_REKEY_MS,
    )
    .await;

    let first = client
        .download_many(&["beta.dat".to_string()], dest_dir.path(), false)
        .await
        .unwrap();
    assert_eq!(first.files_ok, 1);
    assert_eq!(first.files_skipped, 0);

    let dest_file = dest_dir.path().join("beta.dat");
    assert_eq!(std::fs::metadata(&dest_file).unwrap().len(), 524_295);

    let second = client
        .download_many(&["beta.dat".to_string()], dest_dir.path(), true)
        .await
        .unwrap();
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.files_ok, 0);
    assert_eq!(std::fs::metadata(&dest_file).unwrap().len(), 524_295);
}

#[tokio::test]
async fn scenario_c_mixed_multi_item_download() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();

    std::fs::write(
        share_root.path().join("gamma.bin"),
        xorshift_bytes(777, 131_075),
    )
    .unwrap();
    std::fs::create_dir_all(share_root.path().join("mixdir/child")).unwrap();
    std::fs::write(
        share_root.path().join("mixdir/child/a.bin"),
        xorshift_bytes(101, 65_537),
    )
    .unwrap();
    std::fs::write(
        share_root.path().join("mixdir/child/b.bin"),
        xorshift_bytes(202, 204_805),
    )
    .unwrap();

    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        DEFAULT_REKEY_MS,
    )
    .await;

    let mut client = connect_client(
        addr,
        client_config_dir.path().to_path_buf(),
        "scenario-c",
        DEFAULT_REKEY_MS,
    )
    .await;

    let stats = client
        .download_many(
            &["gamma.bin".to_string(), "mixdir".to_string()],
            dest_dir.path(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(stats.files_ok, 3);

    assert_eq!(
        std::fs::metadata(dest_dir.path().join("gamma.bin"))
            .unwrap()
            .len(),
        131_075
    );
    assert_eq!(
        std::fs::metadata(dest_dir.path().join("mixdir/child/a.bin"))
            .unwrap()
            .len(),
        65_537
    );
    assert_eq!(
        std::fs::metadata(dest_dir.path().join("mixdir/child/b.bin"))
            .unwrap()
            .len(),
        204_805
    );
}

/// A peer that alters its bytes after hashing them must be rejected: the
/// server authenticates against its own rolling digest, not whatever the
/// `FileClose` record claims.
#[tokio::test]
async fn scenario_d_corrupt_checksum_rejected() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();

    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        DEFAULT_REKEY_MS,
    )
    .await;

    let client_config = ClientConfig::new(addr, "scenario-d".to_string(), client_config_dir.path().to_path_buf());
    let identity_store = IdentityStore::new(client_config_dir.path().to_path_buf());
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut session = depot::handshake::run_client_handshake(stream, &client_config, &identity_store)
        .await
        .unwrap();

    let mut open_payload = record::encode_path("corrupt.bin");
    open_payload.extend(varint::encode(0));
    open_payload.extend(record::encode_perms(&[]));
    session
        .send_record(record::UPLOAD_OPEN, &open_payload)
        .await
        .unwrap();
    let (rtype, _) = session.recv_servicing_rekey().await.unwrap();
    assert_eq!(rtype, record::UPLOAD_OK);

    session
        .send_record(record::FILE_DATA, b"honest bytes hashed by the sender")
        .await
        .unwrap();
    // Claim a digest that does not match what was actually sent.
    let bogus_digest = [0xEEu8; 32];
    session
        .send_record(record::FILE_CLOSE, &bogus_digest)
        .await
        .unwrap();

    let (rtype, payload) = session.recv_servicing_rekey().await.unwrap();
    assert!(rtype == record::ERROR_REC || rtype == record::UPLOAD_FAIL);
    assert_eq!(payload.len(), 1);
    assert_eq!(ErrorCode::from_byte(payload[0]), ErrorCode::Checksum);

    assert!(!share_root.path().join("corrupt.bin").exists());
    assert!(!share_root.path().join("corrupt.bin.part").exists());
}

#[tokio::test]
async fn scenario_e_path_traversal_rejected() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();

    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        DEFAULT_REKEY_MS,
    )
    .await;

    let mut client = connect_client(
        addr,
        client_config_dir.path().to_path_buf(),
        "scenario-e",
        DEFAULT_REKEY_MS,
    )
    .await;

    let err = client.list("../etc/passwd").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsafePath);
}

#[tokio::test]
async fn scenario_f_rekey_across_file_boundary() {
    let share_root = tempfile::tempdir().unwrap();
    let server_config_dir = tempfile::tempdir().unwrap();
    let client_config_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();

    let rekey_interval_ms: i64 = 50;
    let addr = spawn_server(
        share_root.path().to_path_buf(),
        server_config_dir.path().to_path_buf(),
        true,
        false,
        rekey_interval_ms,
    )
    .await;

    let mut client = connect_client(
        addr,
        client_config_dir.path().to_path_buf(),
        "scenario-f",
        rekey_interval_ms,
    )
    .await;

    assert_eq!(client.session_epoch(), 0);

    for i in 0..3u64 {
        let content = xorshift_bytes(1000 + i, 4096);
        let local_file = local_dir.path().join(format!("f{i}.bin"));
        std::fs::write(&local_file, &content).unwrap();

        let items = collect_upload_items(&local_file, &format!("f{i}.bin")).unwrap();
        let stats = client.upload_many(&items, false).await.unwrap();
        assert_eq!(stats.files_ok, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert!(client.session_epoch() >= 1, "expected at least one rekey to have occurred");

    for i in 0..3u64 {
        let expected = xorshift_bytes(1000 + i, 4096);
        let got = std::fs::read(share_root.path().join(format!("f{i}.bin"))).unwrap();
        assert_eq!(got, expected);
    }
}
