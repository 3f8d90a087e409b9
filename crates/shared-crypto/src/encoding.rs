//! Base58Check encoding, shared by WIF keys and addresses.
//!
//! The checksum is the first four bytes of `sha256d(payload)`.

use crate::errors::CryptoError;
use crate::hashing::sha256d;

/// Number of checksum bytes appended to the payload.
const CHECKSUM_LEN: usize = 4;

/// Encode a payload as Base58Check.
pub fn base58check_encode(payload: &[u8]) -> String {
    let checksum = sha256d(payload);
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string, verifying the checksum.
pub fn base58check_decode(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let data = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| CryptoError::InvalidBase58("not base58"))?;
    if data.len() < CHECKSUM_LEN {
        return Err(CryptoError::InvalidBase58("too short"));
    }
    let (payload, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
    if sha256d(payload)[..CHECKSUM_LEN] != *checksum {
        return Err(CryptoError::InvalidBase58("checksum mismatch"));
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let payload = [0x00, 0x01, 0x02, 0xFF];
        let encoded = base58check_encode(&payload);
        assert_eq!(base58check_decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_corruption_detected() {
        let encoded = base58check_encode(b"payload");
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '1' { '2' } else { '1' };
        let corrupted: String = chars.into_iter().collect();
        assert!(base58check_decode(&corrupted).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(base58check_decode("0OIl").is_err());
        assert!(base58check_decode("11").is_err());
    }
}
