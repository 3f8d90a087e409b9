//! `FromRow` mappings for `basics.transactions`, `basics.blocks` and
//! `basics.contracts`.
//!
//! The store keeps fixed-width byte columns as `bytea`; conversion into the
//! fixed arrays of the domain entities checks lengths and reports schema
//! drift as [`StoreError::BadRow`] instead of panicking.

use crate::error::StoreError;
use shared_types::{Block, Contract, Hash256, PendingTransaction, PublicKeyBytes, SignatureBytes};
use sqlx::FromRow;
use uuid::Uuid;

fn fixed<const N: usize>(bytes: Vec<u8>, column: &str) -> Result<[u8; N], StoreError> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| StoreError::BadRow(format!("{column}: expected {N} bytes, got {len}")))
}

/// A pending transaction row (`status = 'new'`).
#[derive(Debug, Clone, FromRow)]
pub struct PendingRow {
    /// Primary key.
    pub transaction_id: Uuid,
    /// Transaction format version.
    pub version: i16,
    /// Contract hash (32 bytes).
    pub contract_hash: Vec<u8>,
    /// Expiry (ms since epoch), 0 for none.
    pub valid_till: i64,
    /// JSON payload text.
    pub payload: String,
    /// Compressed public key (33 bytes).
    pub public_key: Vec<u8>,
    /// Signature (64 bytes).
    pub signature: Vec<u8>,
    /// Insertion timestamp (ms since epoch).
    pub create_ts: i64,
}

impl TryFrom<PendingRow> for PendingTransaction {
    type Error = StoreError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let contract_hash: Hash256 = fixed(row.contract_hash, "contract_hash")?;
        let public_key: PublicKeyBytes = fixed(row.public_key, "public_key")?;
        let signature: SignatureBytes = fixed(row.signature, "signature")?;
        let version = u8::try_from(row.version)
            .map_err(|_| StoreError::BadRow(format!("version out of range: {}", row.version)))?;

        Ok(PendingTransaction {
            transaction_id: row.transaction_id,
            version,
            contract_hash,
            valid_till: row.valid_till,
            payload: row.payload,
            public_key,
            signature,
            create_ts: row.create_ts,
        })
    }
}

/// A block row from the append-only blocks table.
#[derive(Debug, Clone, FromRow)]
pub struct BlockRow {
    /// Primary key, dense from 0.
    pub block_id: i64,
    /// Block format version.
    pub version: i16,
    /// Hash of the previous block (32 bytes).
    pub previous_block_hash: Vec<u8>,
    /// Block timestamp (ms since epoch).
    pub processed_ts: i64,
    /// Concatenated packed transactions.
    pub transactions: Vec<u8>,
    /// Number of packed transactions.
    pub transactions_amount: i32,
    /// Processor signature (64 bytes).
    pub signature: Vec<u8>,
}

impl TryFrom<BlockRow> for Block {
    type Error = StoreError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        let previous_block_hash: Hash256 = fixed(row.previous_block_hash, "previous_block_hash")?;
        let signature: SignatureBytes = fixed(row.signature, "signature")?;
        let version = u8::try_from(row.version)
            .map_err(|_| StoreError::BadRow(format!("version out of range: {}", row.version)))?;
        let transactions_amount = u16::try_from(row.transactions_amount).map_err(|_| {
            StoreError::BadRow(format!(
                "transactions_amount out of range: {}",
                row.transactions_amount
            ))
        })?;

        Ok(Block {
            block_id: row.block_id,
            version,
            previous_block_hash,
            processed_ts: row.processed_ts,
            transactions: row.transactions,
            transactions_amount,
            signature,
        })
    }
}

/// A deployed contract row.
#[derive(Debug, Clone, FromRow)]
pub struct ContractRow {
    /// Content address (32 bytes).
    pub contract_hash: Vec<u8>,
    /// Type name.
    pub contract_type: String,
    /// Version string.
    pub contract_version: String,
    /// Description.
    pub description: String,
    /// Creator address.
    pub creator: String,
    /// Template, fetched as `contract_template::text`.
    pub contract_template: String,
    /// Contract code.
    pub code: Vec<u8>,
    /// ABI version (1 = legacy).
    pub abi_version: i16,
}

impl TryFrom<ContractRow> for Contract {
    type Error = StoreError;

    fn try_from(row: ContractRow) -> Result<Self, Self::Error> {
        let hash: Hash256 = fixed(row.contract_hash, "contract_hash")?;
        let template = serde_json::from_str(&row.contract_template)
            .map_err(|e| StoreError::BadRow(format!("contract_template: {e}")))?;
        let abi_version = u8::try_from(row.abi_version).map_err(|_| {
            StoreError::BadRow(format!("abi_version out of range: {}", row.abi_version))
        })?;

        Ok(Contract {
            hash,
            contract_type: row.contract_type,
            version: row.contract_version,
            description: row.description,
            creator: row.creator,
            template,
            code: row.code,
            abi_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_row() -> PendingRow {
        PendingRow {
            transaction_id: Uuid::from_bytes([1u8; 16]),
            version: 1,
            contract_hash: vec![0xAA; 32],
            valid_till: 0,
            payload: "{}".into(),
            public_key: vec![0x02; 33],
            signature: vec![0x03; 64],
            create_ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_pending_conversion() {
        let tx = PendingTransaction::try_from(pending_row()).unwrap();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.contract_hash, [0xAA; 32]);
    }

    #[test]
    fn test_pending_rejects_short_hash() {
        let mut row = pending_row();
        row.contract_hash = vec![0xAA; 31];
        let err = PendingTransaction::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::BadRow(_)));
    }

    #[test]
    fn test_pending_rejects_version_overflow() {
        let mut row = pending_row();
        row.version = 300;
        assert!(PendingTransaction::try_from(row).is_err());
    }

    #[test]
    fn test_contract_template_must_be_json() {
        let row = ContractRow {
            contract_hash: vec![0x11; 32],
            contract_type: "Transfer".into(),
            contract_version: "1.0".into(),
            description: "".into(),
            creator: "1abc".into(),
            contract_template: "not json".into(),
            code: b"SELECT 1;".to_vec(),
            abi_version: 2,
        };
        assert!(Contract::try_from(row).is_err());
    }
}
