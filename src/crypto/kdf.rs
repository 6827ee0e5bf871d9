//! Argon2id key derivation. Mirrors the teacher's encrypted-wallet KDF
//! shape (`Argon2::hash_password_into`) but the RustCrypto `argon2` crate's
//! safe API has no raw associated-data parameter, so transcript binding is
//! achieved by folding the transcript into the password input.

use crate::error::DepotError;
use argon2::{Algorithm, Argon2, Params, Version};

/// Derives the 64-byte handshake key material KM from the Kyber shared
/// secret `k`, the 32-byte salt `c2s_prefix||s2c_prefix`, and the
/// transcript digest `t`. `password = k || t`.
pub fn derive_handshake_km(k: &[u8], salt: &[u8; 32], transcript: &[u8]) -> Result<[u8; 64], DepotError> {
    let mut password = Vec::with_capacity(k.len() + transcript.len());
    password.extend_from_slice(k);
    password.extend_from_slice(transcript);

    let params = Params::new(65536, 2, 1, Some(64))
        .map_err(|e| DepotError::Crypto(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; 64];
    argon2
        .hash_password_into(&password, salt, &mut out)
        .map_err(|e| DepotError::Crypto(format!("argon2 derivation failed: {e}")))?;
    Ok(out)
}

/// Derives the 32-byte DPK1 envelope key from a passphrase and its salt.
pub fn derive_dpk1_key(passphrase: &str, salt: &[u8; 16]) -> Result<[u8; 32], DepotError> {
    let params = Params::new(65536, 2, 1, Some(32))
        .map_err(|e| DepotError::Crypto(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .map_err(|e| DepotError::Crypto(format!("argon2 derivation failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_km_is_deterministic() {
        let salt = [1u8; 32];
        let a = derive_handshake_km(b"shared-secret", &salt, b"transcript").unwrap();
        let b = derive_handshake_km(b"shared-secret", &salt, b"transcript").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn handshake_km_is_transcript_bound() {
        let salt = [1u8; 32];
        let a = derive_handshake_km(b"shared-secret", &salt, b"transcript-a").unwrap();
        let b = derive_handshake_km(b"shared-secret", &salt, b"transcript-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dpk1_key_is_deterministic() {
        let salt = [9u8; 16];
        let a = derive_dpk1_key("hunter2", &salt).unwrap();
        let b = derive_dpk1_key("hunter2", &salt).unwrap();
        assert_eq!(a, b);
    }
}
