//! Error types for the contract runtime.

use thiserror::Error;

/// Result type alias for contract runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while managing the contract map.
///
/// Execution itself never errors - it classifies into an
/// [`crate::ExecutionResult`] instead.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Loading the contract map from the store failed.
    #[error("Contract load failed: {0}")]
    Load(#[from] ql_01_store_gateway::StoreError),
}
