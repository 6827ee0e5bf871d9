//! The post-quantum authenticated handshake: feature negotiation, Kyber
//! KEM exchange, Dilithium signatures, TOFU pinning, transcript-bound key
//! derivation, and optional client authentication.

use crate::config::{ClientConfig, ServerConfig};
use crate::crypto::{dilithium, hash, kdf, kyber};
use crate::error::{DepotError, ErrorCode};
use crate::identity::IdentityStore;
use crate::session::Session;
use crate::wire::{self, record, varint};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const CIPHER_NAME: &str = "kyber-xchacha20";
const FEATURE_DL_ACK_V1: &str = "dlAckV1";

#[derive(Debug, Serialize, Deserialize)]
struct ClientHelloMsg {
    version: u32,
    ciphers: Vec<String>,
    psk: bool,
    #[serde(rename = "clientAuth")]
    client_auth: bool,
    features: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerHelloMsg {
    version: u32,
    cipher: String,
    #[serde(rename = "requirePsk")]
    require_psk: bool,
    #[serde(rename = "requireClientAuth")]
    require_client_auth: bool,
    features: Vec<String>,
    sandbox: bool,
}

fn expect_type(got: u8, want: u8) -> Result<(), DepotError> {
    if got != want {
        return Err(DepotError::Protocol(format!(
            "expected handshake record 0x{want:02x}, got 0x{got:02x}"
        )));
    }
    Ok(())
}

async fn fail(stream: &mut TcpStream, code: ErrorCode) {
    let _ = wire::write_plain_frame(stream, record::HS_ERROR, &[code.as_byte()]).await;
}

#[allow(clippy::too_many_arguments)]
fn build_transcript(
    version: u32,
    server_hello_bytes: &[u8],
    client_hello_bytes: &[u8],
    server_sign_pk: &[u8],
    kyber_pk: &[u8],
    envelope: &[u8],
    c2s_prefix: &[u8; 16],
    s2c_prefix: &[u8; 16],
    psk: Option<&[u8]>,
) -> [u8; 64] {
    let mut buf = Vec::new();
    buf.extend(varint::encode(version as u64));
    buf.extend_from_slice(server_hello_bytes);
    buf.extend_from_slice(client_hello_bytes);
    buf.extend_from_slice(server_sign_pk);
    buf.extend_from_slice(kyber_pk);
    buf.extend_from_slice(envelope);
    buf.extend_from_slice(c2s_prefix);
    buf.extend_from_slice(s2c_prefix);
    if let Some(psk) = psk {
        buf.extend_from_slice(psk);
    }
    hash::blake2b512(&buf)
}

/// Runs the client side of the handshake over an already-connected socket.
pub async fn run_client_handshake(
    mut stream: TcpStream,
    config: &ClientConfig,
    identity_store: &IdentityStore,
) -> Result<Session, DepotError> {
    let client_hello = ClientHelloMsg {
        version: 1,
        ciphers: vec![CIPHER_NAME.to_string()],
        psk: config.psk.is_some(),
        client_auth: config.client_auth,
        features: vec![FEATURE_DL_ACK_V1.to_string()],
    };
    let client_hello_bytes =
        serde_json::to_vec(&client_hello).map_err(|e| DepotError::Protocol(e.to_string()))?;
    wire::write_plain_frame(&mut stream, record::CLIENT_HELLO, &client_hello_bytes).await?;

    let (rtype, server_hello_bytes) = wire::read_plain_frame(&mut stream).await?;
    expect_type(rtype, record::SERVER_HELLO)?;
    let server_hello: ServerHelloMsg = serde_json::from_slice(&server_hello_bytes)
        .map_err(|_| DepotError::Code(ErrorCode::BadPayload))?;

    if !server_hello.features.iter().any(|f| f == FEATURE_DL_ACK_V1) {
        fail(&mut stream, ErrorCode::Compat).await;
        return Err(DepotError::Code(ErrorCode::Compat));
    }
    if server_hello.require_psk && config.psk.is_none() {
        fail(&mut stream, ErrorCode::Auth).await;
        return Err(DepotError::Code(ErrorCode::Auth));
    }

    let (rtype, server_sign_pk) = wire::read_plain_frame(&mut stream).await?;
    expect_type(rtype, record::SERVER_ID)?;

    if identity_store
        .pin_server_key(&config.remote_id, &server_sign_pk)
        .is_err()
    {
        warn!(remote_id = %config.remote_id, "server identity did not match pinned key");
        fail(&mut stream, ErrorCode::Auth).await;
        return Err(DepotError::Code(ErrorCode::Auth));
    }

    let (rtype, kem_pk_payload) = wire::read_plain_frame(&mut stream).await?;
    expect_type(rtype, record::KEM_PK)?;
    let (pk_len, used) = varint::decode(&kem_pk_payload)?;
    let pk_len = pk_len as usize;
    if used + pk_len > kem_pk_payload.len() {
        return Err(DepotError::Code(ErrorCode::BadPayload));
    }
    let kyber_pk = &kem_pk_payload[used..used + pk_len];
    let signature = &kem_pk_payload[used + pk_len..];

    match dilithium::verify_detached(&server_sign_pk, kyber_pk, signature) {
        Ok(true) => {}
        _ => {
            fail(&mut stream, ErrorCode::Auth).await;
            return Err(DepotError::Code(ErrorCode::Auth));
        }
    }

    let (envelope, shared_secret) = kyber::encapsulate(kyber_pk)?;

    let mut c2s_prefix = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut c2s_prefix);
    let mut s2c_prefix = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut s2c_prefix);

    let mut kem_env_payload = envelope.clone();
    kem_env_payload.extend_from_slice(&c2s_prefix);
    kem_env_payload.extend_from_slice(&s2c_prefix);
    wire::write_plain_frame(&mut stream, record::KEM_ENV, &kem_env_payload).await?;

    let transcript = build_transcript(
        1,
        &server_hello_bytes,
        &client_hello_bytes,
        &server_sign_pk,
        kyber_pk,
        &envelope,
        &c2s_prefix,
        &s2c_prefix,
        config.psk.as_deref(),
    );

    let mut salt = [0u8; 32];
    salt[..16].copy_from_slice(&c2s_prefix);
    salt[16..].copy_from_slice(&s2c_prefix);
    let km = kdf::derive_handshake_km(&shared_secret, &salt, &transcript)?;

    if server_hello.require_client_auth {
        let (client_pk, client_sk) = identity_store.load_or_generate_client_identity()?;
        let sig = dilithium::sign_detached(&client_sk, &transcript)?;
        let mut payload = varint::encode(client_pk.len() as u64);
        payload.extend_from_slice(&client_pk);
        payload.extend_from_slice(&sig);
        wire::write_plain_frame(&mut stream, record::CLIENT_AUTH, &payload).await?;
    }

    let mut tx_key = [0u8; 32];
    tx_key.copy_from_slice(&km[0..32]);
    let mut rx_key = [0u8; 32];
    rx_key.copy_from_slice(&km[32..64]);
    let traffic_secret = hash::blake2b256(&km);

    debug!(remote_id = %config.remote_id, "client handshake complete");

    Ok(Session::new(
        stream,
        true,
        tx_key,
        rx_key,
        c2s_prefix,
        s2c_prefix,
        traffic_secret,
        config.rekey_interval_ms,
        config.io_timeout_ms,
        server_hello.sandbox,
    ))
}

/// Runs the server side of the handshake over an accepted socket.
pub async fn run_server_handshake(
    mut stream: TcpStream,
    config: &ServerConfig,
    identity_store: &IdentityStore,
) -> Result<Session, DepotError> {
    let (rtype, client_hello_bytes) = wire::read_plain_frame(&mut stream).await?;
    expect_type(rtype, record::CLIENT_HELLO)?;
    let client_hello: ClientHelloMsg = serde_json::from_slice(&client_hello_bytes)
        .map_err(|_| DepotError::Code(ErrorCode::BadPayload))?;

    let server_hello = ServerHelloMsg {
        version: 1,
        cipher: CIPHER_NAME.to_string(),
        require_psk: config.require_psk,
        require_client_auth: config.require_client_auth,
        features: vec![FEATURE_DL_ACK_V1.to_string()],
        sandbox: config.sandboxed,
    };
    let server_hello_bytes =
        serde_json::to_vec(&server_hello).map_err(|e| DepotError::Protocol(e.to_string()))?;

    if !client_hello.features.iter().any(|f| f == FEATURE_DL_ACK_V1) {
        wire::write_plain_frame(&mut stream, record::SERVER_HELLO, &server_hello_bytes).await?;
        fail(&mut stream, ErrorCode::Compat).await;
        return Err(DepotError::Code(ErrorCode::Compat));
    }
    if config.require_psk && !client_hello.psk {
        wire::write_plain_frame(&mut stream, record::SERVER_HELLO, &server_hello_bytes).await?;
        fail(&mut stream, ErrorCode::Auth).await;
        return Err(DepotError::Code(ErrorCode::Auth));
    }

    wire::write_plain_frame(&mut stream, record::SERVER_HELLO, &server_hello_bytes).await?;

    let (server_pk, server_sk) =
        identity_store.load_or_generate_server_identity(config.passphrase.as_deref())?;
    wire::write_plain_frame(&mut stream, record::SERVER_ID, &server_pk).await?;

    let kyber_kp = kyber::keypair();
    let signature = dilithium::sign_detached(&server_sk, &kyber_kp.public)?;
    let mut kem_pk_payload = varint::encode(kyber_kp.public.len() as u64);
    kem_pk_payload.extend_from_slice(&kyber_kp.public);
    kem_pk_payload.extend_from_slice(&signature);
    wire::write_plain_frame(&mut stream, record::KEM_PK, &kem_pk_payload).await?;

    let (rtype, kem_env_payload) = wire::read_plain_frame(&mut stream).await?;
    expect_type(rtype, record::KEM_ENV)?;
    if kem_env_payload.len() < 32 {
        return Err(DepotError::Code(ErrorCode::BadPayload));
    }
    let split = kem_env_payload.len() - 32;
    let envelope = &kem_env_payload[..split];
    let mut c2s_prefix = [0u8; 16];
    c2s_prefix.copy_from_slice(&kem_env_payload[split..split + 16]);
    let mut s2c_prefix = [0u8; 16];
    s2c_prefix.copy_from_slice(&kem_env_payload[split + 16..]);

    let shared_secret = kyber::decapsulate(&kyber_kp.secret, envelope)?;

    let transcript = build_transcript(
        1,
        &server_hello_bytes,
        &client_hello_bytes,
        &server_pk,
        &kyber_kp.public,
        envelope,
        &c2s_prefix,
        &s2c_prefix,
        config.psk.as_deref(),
    );

    let mut salt = [0u8; 32];
    salt[..16].copy_from_slice(&c2s_prefix);
    salt[16..].copy_from_slice(&s2c_prefix);
    let km = kdf::derive_handshake_km(&shared_secret, &salt, &transcript)?;

    if config.require_client_auth {
        let (rtype, client_auth_payload) = wire::read_plain_frame(&mut stream).await?;
        expect_type(rtype, record::CLIENT_AUTH)?;
        let (pk_len, used) = varint::decode(&client_auth_payload)?;
        let pk_len = pk_len as usize;
        if used + pk_len > client_auth_payload.len() {
            return Err(DepotError::Code(ErrorCode::BadPayload));
        }
        let client_pk = &client_auth_payload[used..used + pk_len];
        let client_sig = &client_auth_payload[used + pk_len..];

        let allowed = identity_store.load_allowed_client_keys()?;
        let is_allowed = allowed.iter().any(|pk| pk.as_slice() == client_pk);
        let sig_ok = dilithium::verify_detached(client_pk, &transcript, client_sig).unwrap_or(false);

        if !is_allowed || !sig_ok {
            fail(&mut stream, ErrorCode::Auth).await;
            return Err(DepotError::Code(ErrorCode::Auth));
        }
    }

    let mut tx_key = [0u8; 32];
    tx_key.copy_from_slice(&km[32..64]);
    let mut rx_key = [0u8; 32];
    rx_key.copy_from_slice(&km[0..32]);
    let traffic_secret = hash::blake2b256(&km);

    debug!("server handshake complete");

    Ok(Session::new(
        stream,
        false,
        tx_key,
        rx_key,
        s2c_prefix,
        c2s_prefix,
        traffic_secret,
        config.rekey_interval_ms,
        config.io_timeout_ms,
        config.sandboxed,
    ))
}
