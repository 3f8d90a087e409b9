//! Execution outcomes and the per-transaction context.

use shared_types::{Hash256, TransactionStatus};

/// Everything a contract may deterministically observe about the chain
/// while it executes.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Identifier of the block being mined.
    pub block_id: i64,
    /// Timestamp of the block being mined (ms since epoch).
    pub block_ts: i64,
    /// Address of the processor mining the block.
    pub processor_address: String,
    /// Timestamp of the previous block (0 before genesis).
    pub previous_block_ts: i64,
    /// Hash of the previous block (all zeros before genesis).
    pub previous_block_hash: Hash256,
    /// Strict interpretation: unknown contracts are invalid. The processor
    /// always runs strict; replaying nodes may not.
    pub strict: bool,
}

/// The classified outcome of executing one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Contract ran; database side effects must be retained.
    Accepted {
        /// Message returned by the contract, if any.
        message: Option<String>,
    },
    /// Business-rule refusal; side effects rolled back.
    Rejected {
        /// The contract's rejection reason.
        message: String,
    },
    /// Legacy-ABI refusal: the rejection message was the contract's return
    /// value and its side effects are retained.
    V1Rejected {
        /// The contract's rejection reason.
        message: String,
    },
    /// Structural or interpretation failure; side effects rolled back, but
    /// the transaction still reaches a terminal state.
    Invalid {
        /// What was wrong.
        message: String,
    },
    /// Environmental failure (timeout, lost connection); side effects
    /// rolled back and the transaction stays `new`.
    Retry,
}

impl ExecutionResult {
    /// True when the savepoint must be advanced instead of rolled back.
    pub fn keeps_side_effects(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::V1Rejected { .. })
    }

    /// The terminal status this outcome maps to; `None` for `Retry`.
    pub fn status(&self) -> Option<TransactionStatus> {
        match self {
            Self::Accepted { .. } => Some(TransactionStatus::Accepted),
            Self::Rejected { .. } | Self::V1Rejected { .. } => Some(TransactionStatus::Rejected),
            Self::Invalid { .. } => Some(TransactionStatus::Invalid),
            Self::Retry => None,
        }
    }

    /// The message carried by this outcome, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accepted { message } => message.as_deref(),
            Self::Rejected { message }
            | Self::V1Rejected { message }
            | Self::Invalid { message } => Some(message),
            Self::Retry => None,
        }
    }
}
