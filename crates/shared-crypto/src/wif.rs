//! # WIF Private Key Encoding
//!
//! The processor's private key is configured as a WIF string: Base58Check
//! over `0x80 || key (32B) || 0x01`. Only compressed keys are accepted;
//! uncompressed WIF (no trailing 0x01) is rejected because every public key
//! on the chain is the 33-byte compressed form.

use crate::encoding::{base58check_decode, base58check_encode};
use crate::errors::CryptoError;
use zeroize::Zeroize;

/// Version prefix for mainnet private keys.
const WIF_PREFIX: u8 = 0x80;

/// Marker byte indicating the corresponding public key is compressed.
const COMPRESSED_MARKER: u8 = 0x01;

/// Decode a WIF string into the raw 32-byte private key.
pub fn wif_decode(wif: &str) -> Result<[u8; 32], CryptoError> {
    let mut payload =
        base58check_decode(wif).map_err(|_| CryptoError::InvalidWif("bad base58check"))?;

    let result = match payload.as_slice() {
        [WIF_PREFIX, key @ .., COMPRESSED_MARKER] if key.len() == 32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(key);
            Ok(out)
        }
        [WIF_PREFIX, ..] if payload.len() == 33 => {
            Err(CryptoError::InvalidWif("uncompressed key not supported"))
        }
        [WIF_PREFIX, ..] => Err(CryptoError::InvalidWif("wrong length")),
        _ => Err(CryptoError::InvalidWif("wrong version prefix")),
    };

    payload.zeroize();
    result
}

/// Encode a raw private key as a compressed-key WIF string.
pub fn wif_encode(key: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(34);
    payload.push(WIF_PREFIX);
    payload.extend_from_slice(key);
    payload.push(COMPRESSED_MARKER);
    let encoded = base58check_encode(&payload);
    payload.zeroize();
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::base58check_encode;

    #[test]
    fn test_round_trip() {
        let key = [0x5Au8; 32];
        let wif = wif_encode(&key);
        assert_eq!(wif_decode(&wif).unwrap(), key);
    }

    #[test]
    fn test_compressed_wif_starts_with_k_or_l() {
        // 0x80-prefixed 34-byte payloads always encode to 'K' or 'L'.
        let wif = wif_encode(&[0x11u8; 32]);
        assert!(wif.starts_with('K') || wif.starts_with('L'), "got {wif}");
    }

    #[test]
    fn test_rejects_uncompressed() {
        let mut payload = vec![0x80];
        payload.extend_from_slice(&[0x22u8; 32]);
        let uncompressed = base58check_encode(&payload);
        assert_eq!(
            wif_decode(&uncompressed),
            Err(CryptoError::InvalidWif("uncompressed key not supported"))
        );
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        let mut payload = vec![0xEF]; // testnet prefix
        payload.extend_from_slice(&[0x33u8; 32]);
        payload.push(0x01);
        let wrong = base58check_encode(&payload);
        assert_eq!(
            wif_decode(&wrong),
            Err(CryptoError::InvalidWif("wrong version prefix"))
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(wif_decode("definitely not a key").is_err());
    }
}
