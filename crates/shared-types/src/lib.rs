//! # Quill - Shared Domain Types
//!
//! Core entities of the permissioned chain, shared by every subsystem:
//! pending and processed transactions, blocks, contracts and the in-memory
//! chain tip.
//!
//! ## Clusters
//!
//! - **Chain**: [`PendingTransaction`], [`ProcessedTransaction`], [`Block`]
//! - **Contracts**: [`Contract`], the distinguished create/delete hashes
//! - **Loop state**: [`ChainTip`]
//!
//! The processor is the only writer of the chain; backends insert pending
//! transactions and read blocks. These types are the vocabulary of that
//! contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entities;

pub use entities::{
    coerce_receiver, sanitize_message, Block, ChainTip, Contract, Hash256, PendingTransaction,
    ProcessedTransaction, PublicKeyBytes, SignatureBytes, TransactionStatus, TxId,
    CONTRACT_TYPE_CREATE, CONTRACT_TYPE_DELETE, CONTRACT_TYPE_UNKNOWN, CREATE_CONTRACT_HASH,
    DELETE_CONTRACT_HASH, MAX_MESSAGE_BYTES, MAX_RECEIVER_CHARS, TX_EMPTY_LENGTH,
};

/// Protocol version stamped into every block the processor signs.
pub const BLOCK_VERSION: u8 = 1;

/// Transaction versions this processor understands.
pub const SUPPORTED_TX_VERSIONS: [u8; 1] = [1];
