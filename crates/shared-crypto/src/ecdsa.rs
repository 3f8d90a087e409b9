//! # ECDSA Signatures (secp256k1)
//!
//! Processor and backend signatures use the secp256k1 curve.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Low-S normalization
//! - Constant-time operations
//!
//! Signing hashes the message with SHA-256 internally, so callers pass the
//! full canonical bytes, never a pre-computed digest.

use crate::errors::CryptoError;
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use zeroize::Zeroize;

/// Compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorPublicKey([u8; 33]);

impl ProcessorPublicKey {
    /// Create from compressed bytes (33 bytes, starting with 0x02 or 0x03).
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Get raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Verify a signature over `message`.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &ProcessorSignature,
    ) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_slice(&signature.0).map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// ECDSA signature (64 bytes, r||s format).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorSignature([u8; 64]);

impl ProcessorSignature {
    /// Create from raw bytes (64 bytes).
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// secp256k1 ECDSA keypair holding the processor's signing key.
pub struct ProcessorKeyPair {
    signing_key: SigningKey,
}

impl ProcessorKeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Get the public key (compressed, 33 bytes).
    ///
    /// # Panics
    ///
    /// This function will not panic - the conversion from verifying key to
    /// SEC1 compressed format always produces exactly 33 bytes.
    pub fn public_key(&self) -> ProcessorPublicKey {
        let verifying_key = self.signing_key.verifying_key();
        let sec1_bytes = verifying_key.to_sec1_bytes();
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1_bytes[..33]);
        ProcessorPublicKey(bytes)
    }

    /// Sign a message (deterministic RFC 6979).
    pub fn sign(&self, message: &[u8]) -> ProcessorSignature {
        let sig: Signature = self.signing_key.sign(message);
        let bytes: [u8; 64] = sig.to_bytes().into();
        ProcessorSignature(bytes)
    }

    /// Get secret key bytes (for WIF encoding).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl Drop for ProcessorKeyPair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = ProcessorKeyPair::generate();
        let message = b"block 0 canonical bytes";

        let signature = keypair.sign(message);
        assert!(keypair.public_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = ProcessorKeyPair::generate();
        let signature = keypair.sign(b"message1");
        assert!(keypair.public_key().verify(b"message2", &signature).is_err());
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = ProcessorKeyPair::from_bytes(&[0xABu8; 32]).unwrap();
        let sig1 = keypair.sign(b"deterministic test");
        let sig2 = keypair.sign(b"deterministic test");
        assert_eq!(sig1.as_bytes(), sig2.as_bytes());
    }

    #[test]
    fn test_rejects_invalid_public_key() {
        assert!(ProcessorPublicKey::from_bytes([0x05u8; 33]).is_err());
    }

    #[test]
    fn test_roundtrip_bytes() {
        let original = ProcessorKeyPair::generate();
        let bytes = original.to_bytes();
        let restored = ProcessorKeyPair::from_bytes(&bytes).unwrap();
        assert_eq!(original.public_key(), restored.public_key());
    }
}
