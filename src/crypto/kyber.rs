//! CRYSTALS-Kyber-768 KEM wrapper.

use crate::error::DepotError;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext, PublicKey, SecretKey, SharedSecret};

pub struct KyberKeypair {
    pub public: Vec<u8>,
    pub secret: kyber768::SecretKey,
}

pub fn keypair() -> KyberKeypair {
    let (pk, sk) = kyber768::keypair();
    KyberKeypair {
        public: pk.as_bytes().to_vec(),
        secret: sk,
    }
}

/// Client side: encapsulates against the server's public key, returning
/// the envelope to send and the shared secret to feed the KDF.
pub fn encapsulate(server_pk: &[u8]) -> Result<(Vec<u8>, Vec<u8>), DepotError> {
    let pk = kyber768::PublicKey::from_bytes(server_pk)
        .map_err(|_| DepotError::Crypto("invalid kyber public key".into()))?;
    let (shared_secret, ciphertext) = kyber768::encapsulate(&pk);
    Ok((ciphertext.as_bytes().to_vec(), shared_secret.as_bytes().to_vec()))
}

/// Server side: decapsulates the client's envelope with our secret key.
pub fn decapsulate(secret: &kyber768::SecretKey, envelope: &[u8]) -> Result<Vec<u8>, DepotError> {
    let ct = kyber768::Ciphertext::from_bytes(envelope)
        .map_err(|_| DepotError::Crypto("invalid kyber ciphertext".into()))?;
    let shared_secret = kyber768::decapsulate(&ct, secret);
    Ok(shared_secret.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_decapsulate_agree() {
        let kp = keypair();
        let (envelope, client_secret) = encapsulate(&kp.public).unwrap();
        let server_secret = decapsulate(&kp.secret, &envelope).unwrap();
        assert_eq!(client_secret, server_secret);
    }
}
