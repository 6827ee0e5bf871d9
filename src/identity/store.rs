//! On-disk identity, trust (TOFU pinning), and the DPK1 encrypted secret
//! key envelope. Directly generalizes the teacher's `EncryptedWallet`
//! (Argon2id + XChaCha20-Poly1305) from a single bincode-wrapped blob to
//! the byte-exact DPK1 layout.

use crate::crypto::{aead, kdf};
use crate::error::{DepotError, ErrorCode};
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};

const DPK1_MAGIC: &[u8; 4] = b"DPK1";
const DPK1_AD: &[u8] = b"DPK1";

#[derive(Clone)]
pub struct IdentityStore {
    config_dir: PathBuf,
}

impl IdentityStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        IdentityStore {
            config_dir: config_dir.into(),
        }
    }

    fn id_dir(&self) -> PathBuf {
        self.config_dir.join("id")
    }

    fn trust_dir(&self) -> PathBuf {
        self.config_dir.join("trust")
    }

    fn clients_trust_dir(&self) -> PathBuf {
        self.trust_dir().join("clients")
    }

    /// Loads the server's Dilithium identity, generating and persisting one
    /// on first run if `passphrase` is supplied. Without a passphrase and no
    /// existing keys, startup fails with `ecConfig`.
    pub fn load_or_generate_server_identity(
        &self,
        passphrase: Option<&str>,
    ) -> Result<(Vec<u8>, Vec<u8>), DepotError> {
        let dir = self.id_dir();
        let pk_path = dir.join("server_dilithium.pk");
        let sk_path = dir.join("server_dilithium.sk");

        if pk_path.exists() && sk_path.exists() {
            let pk = fs::read(&pk_path)?;
            let passphrase = passphrase.ok_or_else(|| {
                DepotError::Identity("server secret key requires a passphrase".into())
            })?;
            let sk = load_dpk1(&sk_path, passphrase)?;
            return Ok((pk, sk));
        }

        let passphrase = passphrase.ok_or_else(|| DepotError::Code(ErrorCode::Config))?;
        let kp = crate::crypto::dilithium::keypair();
        fs::create_dir_all(&dir)?;
        fs::write(&pk_path, &kp.public)?;
        save_dpk1(&sk_path, passphrase, &kp.secret)?;
        Ok((kp.public, kp.secret))
    }

    /// Loads (or generates, plaintext) the client's own Dilithium identity.
    /// Client secret keys are not required to carry a passphrase by the
    /// wire format; operators who want one can still point `config_dir`
    /// at encrypted-at-rest storage.
    pub fn load_or_generate_client_identity(&self) -> Result<(Vec<u8>, Vec<u8>), DepotError> {
        let dir = self.id_dir();
        let pk_path = dir.join("client_dilithium.pk");
        let sk_path = dir.join("client_dilithium.sk");

        if pk_path.exists() && sk_path.exists() {
            return Ok((fs::read(&pk_path)?, fs::read(&sk_path)?));
        }

        let kp = crate::crypto::dilithium::keypair();
        fs::create_dir_all(&dir)?;
        fs::write(&pk_path, &kp.public)?;
        fs::write(&sk_path, &kp.secret)?;
        Ok((kp.public, kp.secret))
    }

    /// TOFU pin check/write for a remote server identity. Returns Ok(()) if
    /// this is the first observation (now pinned) or the observed key
    /// matches the existing pin; returns `ecAuth` on mismatch.
    pub fn pin_server_key(&self, remote_id: &str, observed_pk: &[u8]) -> Result<(), DepotError> {
        let dir = self.trust_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{remote_id}.pk"));

        if let Ok(existing) = fs::read(&path) {
            if existing == observed_pk {
                return Ok(());
            }
            return Err(DepotError::Code(ErrorCode::Auth));
        }

        atomic_write(&path, observed_pk)?;
        Ok(())
    }

    /// Loads the allowlist of client public keys the server will accept
    /// when client authentication is required.
    pub fn load_allowed_client_keys(&self) -> Result<Vec<Vec<u8>>, DepotError> {
        let dir = self.clients_trust_dir();
        let mut keys = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("pk") {
                keys.push(fs::read(entry.path())?);
            }
        }
        Ok(keys)
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), DepotError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Encodes and writes the DPK1 envelope:
/// `"DPK1"(4) | len_u32_le(4) | salt(16) | nonce(24) | ciphertext(len) | tag(16)`.
fn save_dpk1(path: &Path, passphrase: &str, plaintext: &[u8]) -> Result<(), DepotError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = kdf::derive_dpk1_key(passphrase, &salt)?;
    let ciphertext_and_tag = aead::seal(&key, &nonce, DPK1_AD, plaintext)?;

    let mut out = Vec::with_capacity(4 + 4 + 16 + 24 + ciphertext_and_tag.len());
    out.extend_from_slice(DPK1_MAGIC);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext_and_tag);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    atomic_write(path, &out)
}

fn load_dpk1(path: &Path, passphrase: &str) -> Result<Vec<u8>, DepotError> {
    let data = fs::read(path)?;
    if data.len() < 4 + 4 + 16 + 24 + 16 {
        return Err(DepotError::Identity("DPK1 envelope truncated".into()));
    }
    if &data[0..4] != DPK1_MAGIC {
        return Err(DepotError::Identity(
            "unencrypted or unrecognized secret key format".into(),
        ));
    }
    let plaintext_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let salt: [u8; 16] = data[8..24].try_into().unwrap();
    let nonce: [u8; 24] = data[24..48].try_into().unwrap();
    let ciphertext_and_tag = &data[48..];

    let key = kdf::derive_dpk1_key(passphrase, &salt)?;
    let plaintext = aead::open(&key, &nonce, DPK1_AD, ciphertext_and_tag)?;
    if plaintext.len() != plaintext_len {
        return Err(DepotError::Identity("DPK1 length mismatch".into()));
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpk1_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server_dilithium.sk");
        save_dpk1(&path, "correct horse", b"super secret key bytes").unwrap();
        let loaded = load_dpk1(&path, "correct horse").unwrap();
        assert_eq!(loaded, b"super secret key bytes");
    }

    #[test]
    fn dpk1_rejects_wrong_passphrase() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server_dilithium.sk");
        save_dpk1(&path, "right", b"secret").unwrap();
        assert!(load_dpk1(&path, "wrong").is_err());
    }

    #[test]
    fn pin_server_key_tofu() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(tmp.path());
        store.pin_server_key("srv-1", b"pk-bytes-a").unwrap();
        assert!(store.pin_server_key("srv-1", b"pk-bytes-a").is_ok());
        let err = store.pin_server_key("srv-1", b"pk-bytes-b").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Auth);
    }
}
