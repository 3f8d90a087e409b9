//! # Quill - Shared Cryptography
//!
//! The cryptographic primitives the chain is built on:
//!
//! - SHA-256 and SHA-256d hashing ([`hashing`])
//! - secp256k1 ECDSA with RFC 6979 deterministic nonces ([`ecdsa`])
//! - WIF private key encoding ([`wif`])
//! - Base58Check address derivation ([`address`])
//!
//! Everything the processor signs is domain-separated by a chain-wide sign
//! prefix bound into the signed bytes; see the block mining crate for the
//! canonical layouts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod ecdsa;
pub mod encoding;
pub mod errors;
pub mod hashing;
pub mod wif;

pub use address::address_from_public_key;
pub use ecdsa::{ProcessorKeyPair, ProcessorPublicKey, ProcessorSignature};
pub use errors::CryptoError;
pub use hashing::{sha256, sha256d};
pub use wif::{wif_decode, wif_encode};
