//! # Core Domain Entities
//!
//! Defines the chain entities exactly as they live in the relational store
//! and on the wire inside packed blocks.
//!
//! ## Wire format
//!
//! A transaction is packed into a block as:
//!
//! ```text
//! version (1B) | valid_till (8B BE) | contract_hash (32B)
//! | payload_length (4B BE) | payload_bytes
//! | public_key (33B) | signature (64B) | transaction_id (16B)
//! ```
//!
//! The fixed overhead of that encoding is [`TX_EMPTY_LENGTH`] bytes; block
//! size budgeting is done against `TX_EMPTY_LENGTH + payload.len()`.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use uuid::Uuid;

/// A 32-byte SHA-256 hash.
pub type Hash256 = [u8; 32];

/// A compressed secp256k1 public key (33 bytes).
pub type PublicKeyBytes = [u8; 33];

/// An ECDSA signature (64 bytes, r||s).
pub type SignatureBytes = [u8; 64];

/// A 16-byte transaction identifier.
pub type TxId = Uuid;

/// Distinguished contract hash: create a contract.
pub const CREATE_CONTRACT_HASH: Hash256 = [0x00; 32];

/// Distinguished contract hash: delete a contract.
pub const DELETE_CONTRACT_HASH: Hash256 = [0xFF; 32];

/// Contract type reported for create-contract transactions.
pub const CONTRACT_TYPE_CREATE: &str = "Create Contract";

/// Contract type reported for delete-contract transactions.
pub const CONTRACT_TYPE_DELETE: &str = "Delete Contract";

/// Contract type reported when the contract hash is not deployed.
pub const CONTRACT_TYPE_UNKNOWN: &str = "Unknown";

/// Maximum stored length of a transaction status message, in UTF-8 bytes.
pub const MAX_MESSAGE_BYTES: usize = 128;

/// Maximum stored length of a receiver address, in characters.
pub const MAX_RECEIVER_CHARS: usize = 35;

/// Fixed per-transaction overhead of the packed encoding:
/// version + valid_till + contract_hash + length prefix + public key
/// + signature + transaction id.
pub const TX_EMPTY_LENGTH: usize = 1 + 8 + 32 + 4 + 33 + 64 + 16;

/// Status of a transaction in the store.
///
/// Transitions are monotonic: `New` moves to exactly one of the terminal
/// states and never changes again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Inserted by a backend, not yet considered by the processor.
    New,
    /// Executed, side effects retained.
    Accepted,
    /// Refused by the contract's business rules.
    Rejected,
    /// Structurally broken or refused by the contract interpretation layer.
    Invalid,
}

impl TransactionStatus {
    /// The store representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
        }
    }

    /// Returns true once the status can never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::New)
    }

    /// Checks the monotonic state machine: `new` may move to any terminal
    /// state, terminal states only to themselves.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::New => true,
            terminal => *terminal == next,
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// A pending transaction as fetched from the store (status `new`).
///
/// Payload, signature and public key are immutable from insert; only the
/// processor moves the row to a terminal state.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// 16-byte identifier (primary key).
    pub transaction_id: TxId,
    /// Transaction format version.
    pub version: u8,
    /// Hash of the contract to execute, or a distinguished hash.
    pub contract_hash: Hash256,
    /// Expiry in milliseconds since epoch; 0 means none.
    pub valid_till: i64,
    /// JSON payload text, interpreted by the contract.
    pub payload: String,
    /// Compressed public key of the sender.
    #[serde_as(as = "Bytes")]
    pub public_key: PublicKeyBytes,
    /// Sender's signature over the canonical signing bytes.
    #[serde_as(as = "Bytes")]
    pub signature: SignatureBytes,
    /// Insertion timestamp (ms since epoch), the primary ordering hint.
    pub create_ts: i64,
}

impl PendingTransaction {
    /// Total packed size of this transaction inside a block.
    pub fn packed_len(&self) -> usize {
        TX_EMPTY_LENGTH + self.payload.len()
    }

    /// Canonical on-wire encoding used inside packed blocks.
    pub fn packed(&self) -> Vec<u8> {
        let payload = self.payload.as_bytes();
        let mut out = Vec::with_capacity(TX_EMPTY_LENGTH + payload.len());
        out.push(self.version);
        out.extend_from_slice(&self.valid_till.to_be_bytes());
        out.extend_from_slice(&self.contract_hash);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(self.transaction_id.as_bytes());
        out
    }

    /// The bytes the sender signed: the chain's sign prefix followed by
    /// version, id, contract hash, expiry and payload.
    pub fn signing_bytes(&self, sign_prefix: &[u8]) -> Vec<u8> {
        let payload = self.payload.as_bytes();
        let mut out = Vec::with_capacity(sign_prefix.len() + 57 + payload.len());
        out.extend_from_slice(sign_prefix);
        out.push(self.version);
        out.extend_from_slice(self.transaction_id.as_bytes());
        out.extend_from_slice(&self.contract_hash);
        out.extend_from_slice(&self.valid_till.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Parses the payload as a JSON object, if it is one.
    pub fn payload_object(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        match serde_json::from_str(&self.payload) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// The terminal outcome of one transaction, written back to the store in a
/// single bulk statement at the end of a mining tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    /// The transaction this row terminalises.
    pub transaction_id: TxId,
    /// Terminal status.
    pub status: TransactionStatus,
    /// Optional sanitised message (at most [`MAX_MESSAGE_BYTES`] bytes).
    pub message: Option<String>,
    /// When the processor terminalised the transaction (ms since epoch).
    pub processed_ts: i64,
    /// Block the transaction ended up in, if any.
    pub block_id: Option<i64>,
    /// Position inside that block, if any.
    pub position_in_block: Option<i32>,
    /// Sender address derived from the public key.
    pub sender: String,
    /// Resolved contract type name.
    pub contract_type: String,
    /// Receiver address extracted from the payload, if present.
    pub receiver: Option<String>,
}

/// A signed block as stored in the append-only blocks table.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    /// Dense, monotonic identifier starting at 0.
    pub block_id: i64,
    /// Block format version.
    pub version: u8,
    /// Hash of the previous block; all zeros for genesis.
    pub previous_block_hash: Hash256,
    /// Timestamp (ms since epoch), strictly greater than the previous block's.
    pub processed_ts: i64,
    /// Concatenated packed transactions.
    pub transactions: Vec<u8>,
    /// Number of transactions packed into this block.
    pub transactions_amount: u16,
    /// Processor's signature over the canonical block bytes.
    #[serde_as(as = "Bytes")]
    pub signature: SignatureBytes,
}

/// A deployed contract, content-addressed by the SHA-256 of its code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contract {
    /// Content address: SHA-256 of `code`.
    pub hash: Hash256,
    /// Human-readable type name, unique among deployed contracts.
    pub contract_type: String,
    /// Version string chosen by the creator.
    pub version: String,
    /// Free-form description.
    pub description: String,
    /// Address that created the contract.
    pub creator: String,
    /// Payload template the contract validates payloads against.
    pub template: serde_json::Value,
    /// The contract code itself.
    pub code: Vec<u8>,
    /// Contract ABI version; 1 is the legacy ABI whose rejections retain
    /// side effects.
    pub abi_version: u8,
}

/// In-memory chain tip owned by the mining loop; rebuilt from the store at
/// startup and after reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    /// Hash of the latest block, or all zeros before genesis.
    pub previous_hash: Hash256,
    /// Timestamp of the latest block (ms), or 0 before genesis.
    pub previous_ts: i64,
    /// Identifier the next block will get.
    pub next_block_id: i64,
}

impl ChainTip {
    /// The tip of an empty chain.
    pub fn genesis() -> Self {
        Self {
            previous_hash: [0u8; 32],
            previous_ts: 0,
            next_block_id: 0,
        }
    }

    /// True until the first block has been mined.
    pub fn is_genesis(&self) -> bool {
        self.next_block_id == 0
    }
}

/// Strips control characters and truncates to [`MAX_MESSAGE_BYTES`] UTF-8
/// bytes on a character boundary.
pub fn sanitize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len().min(MAX_MESSAGE_BYTES));
    for c in message.chars().filter(|c| !c.is_control()) {
        if out.len() + c.len_utf8() > MAX_MESSAGE_BYTES {
            break;
        }
        out.push(c);
    }
    out
}

/// Coerces a payload `receiver` field to its stored form: strings and
/// numbers become strings truncated to [`MAX_RECEIVER_CHARS`] characters,
/// anything else (including null) is absent.
pub fn coerce_receiver(value: Option<&serde_json::Value>) -> Option<String> {
    let text = match value? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(text.chars().take(MAX_RECEIVER_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(payload: &str) -> PendingTransaction {
        PendingTransaction {
            transaction_id: Uuid::from_bytes([7u8; 16]),
            version: 1,
            contract_hash: [0xAB; 32],
            valid_till: 0,
            payload: payload.to_string(),
            public_key: [2u8; 33],
            signature: [9u8; 64],
            create_ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(TransactionStatus::New.can_transition_to(TransactionStatus::Accepted));
        assert!(TransactionStatus::New.can_transition_to(TransactionStatus::Invalid));
        assert!(!TransactionStatus::Accepted.can_transition_to(TransactionStatus::Rejected));
        assert!(TransactionStatus::Rejected.can_transition_to(TransactionStatus::Rejected));
        assert!(!TransactionStatus::New.is_terminal());
        assert!(TransactionStatus::Invalid.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransactionStatus::New,
            TransactionStatus::Accepted,
            TransactionStatus::Rejected,
            TransactionStatus::Invalid,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert!("pending".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_packed_layout() {
        let tx = sample_tx(r#"{"a":1}"#);
        let packed = tx.packed();
        assert_eq!(packed.len(), TX_EMPTY_LENGTH + 7);
        assert_eq!(packed.len(), tx.packed_len());
        // version
        assert_eq!(packed[0], 1);
        // valid_till big-endian
        assert_eq!(&packed[1..9], &0i64.to_be_bytes());
        // contract hash
        assert_eq!(&packed[9..41], &[0xAB; 32]);
        // payload length prefix
        assert_eq!(&packed[41..45], &7u32.to_be_bytes());
        // transaction id trails the record
        assert_eq!(&packed[packed.len() - 16..], &[7u8; 16]);
    }

    #[test]
    fn test_signing_bytes_bind_prefix() {
        let tx = sample_tx("{}");
        let a = tx.signing_bytes(b"chain-a");
        let b = tx.signing_bytes(b"chain-b");
        assert_ne!(a, b);
        assert!(a.starts_with(b"chain-a"));
    }

    #[test]
    fn test_payload_object() {
        assert!(sample_tx(r#"{"x":true}"#).payload_object().is_some());
        assert!(sample_tx("[1,2]").payload_object().is_none());
        assert!(sample_tx("not json").payload_object().is_none());
    }

    #[test]
    fn test_sanitize_message_strips_and_truncates() {
        let sanitized = sanitize_message("ok\x00\x1b[31m\n done");
        assert!(!sanitized.contains('\x00'));
        assert!(!sanitized.contains('\n'));

        let long = "é".repeat(100);
        let truncated = sanitize_message(&long);
        assert!(truncated.len() <= MAX_MESSAGE_BYTES);
        assert_eq!(truncated.len() % 2, 0); // never split a 2-byte char
    }

    #[test]
    fn test_coerce_receiver() {
        use serde_json::json;
        assert_eq!(
            coerce_receiver(Some(&json!("1BvBMSEYst"))),
            Some("1BvBMSEYst".to_string())
        );
        assert_eq!(coerce_receiver(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(coerce_receiver(Some(&json!(null))), None);
        assert_eq!(coerce_receiver(Some(&json!({"a": 1}))), None);
        assert_eq!(coerce_receiver(None), None);

        let long = "x".repeat(60);
        let coerced = coerce_receiver(Some(&serde_json::Value::String(long))).unwrap();
        assert_eq!(coerced.chars().count(), MAX_RECEIVER_CHARS);
    }

    #[test]
    fn test_genesis_tip() {
        let tip = ChainTip::genesis();
        assert_eq!(tip.previous_hash, [0u8; 32]);
        assert_eq!(tip.previous_ts, 0);
        assert_eq!(tip.next_block_id, 0);
        assert!(tip.is_genesis());
    }
}
