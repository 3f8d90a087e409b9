//! Error types for the mining loop.

use thiserror::Error;

/// Result type alias for mining operations.
pub type Result<T> = std::result::Result<T, MiningError>;

/// Errors that abort a mining tick.
#[derive(Debug, Error)]
pub enum MiningError {
    /// The store refused an operation.
    #[error("Store error: {0}")]
    Store(#[from] ql_01_store_gateway::StoreError),

    /// The contract runtime could not (re)load its map.
    #[error("Contract runtime error: {0}")]
    Runtime(#[from] ql_02_contract_runtime::RuntimeError),
}
