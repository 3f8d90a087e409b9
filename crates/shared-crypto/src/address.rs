//! # Address Derivation
//!
//! Chain addresses are Base58Check over `0x00 || RIPEMD160(SHA256(pubkey))`,
//! at most 35 characters. The processor derives the sender address of every
//! transaction it terminalises; contracts compare addresses as opaque
//! strings.

use crate::encoding::{base58check_decode, base58check_encode};
use crate::errors::CryptoError;
use crate::hashing::sha256;
use ripemd::{Digest, Ripemd160};

/// Version prefix for addresses.
const ADDRESS_PREFIX: u8 = 0x00;

/// Derive the address of a compressed public key.
pub fn address_from_public_key(public_key: &[u8; 33]) -> String {
    let sha = sha256(public_key);
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha);
    let hash160 = ripemd.finalize();

    let mut payload = Vec::with_capacity(21);
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(&hash160);
    base58check_encode(&payload)
}

/// Check that a string is a well-formed chain address.
pub fn verify_address(address: &str) -> Result<(), CryptoError> {
    let payload = base58check_decode(address)?;
    match payload.as_slice() {
        [ADDRESS_PREFIX, rest @ ..] if rest.len() == 20 => Ok(()),
        _ => Err(CryptoError::InvalidBase58("not an address payload")),
    }
}
