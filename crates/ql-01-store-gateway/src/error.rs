//! Error types for the store gateway.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the store.
///
/// The gateway never retries; [`StoreError::is_transient`] tells the mining
/// loop whether a whole-tick retry is worthwhile.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying driver reported an error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database error raised while running contract code, reduced to the
    /// SQLSTATE and server message the contract runtime classifies on.
    #[error("Contract SQL error {sqlstate}: {message}")]
    Script {
        /// Five-character SQLSTATE code.
        sqlstate: String,
        /// Server-side error message.
        message: String,
    },

    /// An operation was attempted before `connect()` succeeded.
    #[error("Not connected to the store")]
    NotConnected,

    /// A row did not have the shape the schema promises.
    #[error("Unexpected row shape: {0}")]
    BadRow(String),
}

/// SQLSTATE classes that indicate a non-deterministic, environmental
/// failure: statement timeout, serialization failure, deadlock, and the
/// connection (08xxx) and operator-intervention shutdown codes.
pub fn transient_sqlstate(code: &str) -> bool {
    matches!(code, "57014" | "40001" | "40P01" | "57P01" | "57P02" | "57P03")
        || code.starts_with("08")
}

impl StoreError {
    /// The SQLSTATE of the underlying database error, if there is one.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().map(|c| c.into_owned())
            }
            StoreError::Script { sqlstate, .. } => Some(sqlstate.clone()),
            _ => None,
        }
    }

    /// The server's error message, if the error came from the server.
    pub fn server_message(&self) -> Option<String> {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => Some(db.message().to_string()),
            StoreError::Script { message, .. } => Some(message.clone()),
            _ => None,
        }
    }

    /// True when retrying the whole tick may succeed: lost connections,
    /// timeouts, deadlocks and serialization failures.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| transient_sqlstate(&code))
                .unwrap_or(false),
            StoreError::Script { sqlstate, .. } => transient_sqlstate(sqlstate),
            StoreError::Database(sqlx::Error::Io(_))
            | StoreError::Database(sqlx::Error::Tls(_))
            | StoreError::Database(sqlx::Error::Protocol(_))
            | StoreError::Database(sqlx::Error::PoolTimedOut)
            | StoreError::Database(sqlx::Error::PoolClosed)
            | StoreError::NotConnected => true,
            _ => false,
        }
    }

    /// True when the connection itself is gone and must be re-established.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Io(_))
            | StoreError::Database(sqlx::Error::Tls(_))
            | StoreError::Database(sqlx::Error::Protocol(_))
            | StoreError::Database(sqlx::Error::PoolClosed) => true,
            StoreError::Database(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| code.starts_with("08") || code.starts_with("57P"))
                .unwrap_or(false),
            StoreError::Script { sqlstate, .. } => {
                sqlstate.starts_with("08") || sqlstate.starts_with("57P")
            }
            _ => false,
        }
    }
}
