//! CRYSTALS-Dilithium3 detached-signature wrapper. Dilithium3 is paired
//! with Kyber-768 so both primitives sit at the same NIST security level.

use crate::error::DepotError;
use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};

pub struct DilithiumKeypair {
    pub public: Vec<u8>,
    pub secret: Vec<u8>,
}

pub fn keypair() -> DilithiumKeypair {
    let (pk, sk) = dilithium3::keypair();
    DilithiumKeypair {
        public: pk.as_bytes().to_vec(),
        secret: sk.as_bytes().to_vec(),
    }
}

pub fn sign_detached(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, DepotError> {
    let sk = dilithium3::SecretKey::from_bytes(secret)
        .map_err(|_| DepotError::Crypto("invalid dilithium secret key".into()))?;
    let sig = dilithium3::detached_sign(message, &sk);
    Ok(sig.as_bytes().to_vec())
}

pub fn verify_detached(public: &[u8], message: &[u8], signature: &[u8]) -> Result<bool, DepotError> {
    let pk = dilithium3::PublicKey::from_bytes(public)
        .map_err(|_| DepotError::Crypto("invalid dilithium public key".into()))?;
    let sig = dilithium3::DetachedSignature::from_bytes(signature)
        .map_err(|_| DepotError::Crypto("invalid dilithium signature".into()))?;
    Ok(dilithium3::verify_detached_signature(&sig, message, &pk).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = keypair();
        let sig = sign_detached(&kp.secret, b"transcript digest").unwrap();
        assert!(verify_detached(&kp.public, b"transcript digest", &sig).unwrap());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let kp = keypair();
        let sig = sign_detached(&kp.secret, b"transcript digest").unwrap();
        assert!(!verify_detached(&kp.public, b"different digest", &sig).unwrap());
    }
}
