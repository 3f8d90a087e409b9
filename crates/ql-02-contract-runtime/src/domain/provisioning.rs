//! Payloads of the two distinguished contracts.
//!
//! A transaction whose contract hash is all zeros creates a contract; all
//! 0xFF deletes one. The runtime interprets these payloads itself instead
//! of loading user code.

use crate::domain::template::validate_template_spec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use shared_types::Hash256;

/// Longest allowed contract type name.
pub const MAX_TYPE_LEN: usize = 64;

/// Longest allowed contract version string.
pub const MAX_VERSION_LEN: usize = 32;

/// Longest allowed contract description.
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// ABI versions the runtime can execute.
pub const SUPPORTED_ABI_VERSIONS: [u8; 2] = [1, 2];

/// Payload of a create-contract transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateContractPayload {
    /// Type name the contract will be known by.
    #[serde(rename = "type")]
    pub contract_type: String,
    /// Version string.
    pub version: String,
    /// Free-form description.
    pub description: String,
    /// Payload template the contract validates against.
    pub template: serde_json::Value,
    /// Base64-encoded contract code.
    pub code: String,
    /// ABI version; 1 is the legacy ABI.
    pub abi_version: u8,
}

impl CreateContractPayload {
    /// Parse and validate a create payload, returning the decoded code.
    pub fn parse(payload: &str) -> Result<(Self, Vec<u8>), String> {
        let parsed: Self =
            serde_json::from_str(payload).map_err(|e| format!("malformed create payload: {e}"))?;

        if parsed.contract_type.is_empty() || parsed.contract_type.len() > MAX_TYPE_LEN {
            return Err(format!("type must be 1..={MAX_TYPE_LEN} bytes"));
        }
        if parsed.version.is_empty() || parsed.version.len() > MAX_VERSION_LEN {
            return Err(format!("version must be 1..={MAX_VERSION_LEN} bytes"));
        }
        if parsed.description.len() > MAX_DESCRIPTION_LEN {
            return Err(format!("description longer than {MAX_DESCRIPTION_LEN} bytes"));
        }
        if !SUPPORTED_ABI_VERSIONS.contains(&parsed.abi_version) {
            return Err(format!("unsupported abi version {}", parsed.abi_version));
        }
        validate_template_spec(&parsed.template)?;

        let code = STANDARD
            .decode(&parsed.code)
            .map_err(|_| "code is not valid base64".to_string())?;
        if code.is_empty() {
            return Err("code is empty".to_string());
        }
        std::str::from_utf8(&code).map_err(|_| "code is not UTF-8".to_string())?;

        Ok((parsed, code))
    }
}

/// Payload of a delete-contract transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteContractPayload {
    /// Hex-encoded hash of the contract to delete.
    pub hash: String,
}

impl DeleteContractPayload {
    /// Parse and validate a delete payload, returning the target hash.
    pub fn parse(payload: &str) -> Result<Hash256, String> {
        let parsed: Self =
            serde_json::from_str(payload).map_err(|e| format!("malformed delete payload: {e}"))?;
        let bytes =
            hex::decode(&parsed.hash).map_err(|_| "hash is not valid hex".to_string())?;
        bytes
            .try_into()
            .map_err(|_| "hash must be 32 bytes".to_string())
    }
}
