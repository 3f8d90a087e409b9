//! Error types for cryptographic operations.
//!
//! Errors deliberately carry no key material; a failed WIF parse reports
//! only what was structurally wrong with the input.

use thiserror::Error;

/// Errors that can occur in key handling, signing and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The compressed public key bytes do not describe a curve point.
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// The private key scalar is out of range.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Signature bytes are malformed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature did not verify against the given key and message.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Base58Check decoding failed.
    #[error("Invalid base58check encoding: {0}")]
    InvalidBase58(&'static str),

    /// A WIF string was structurally wrong (prefix, length or compression
    /// marker).
    #[error("Invalid WIF key: {0}")]
    InvalidWif(&'static str),
}
