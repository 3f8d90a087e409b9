//! Inbound port (driving side - API).
//!
//! [`ChainStore`] is the full contract between the mining loop and the
//! durable store. The PostgreSQL adapter implements it for production; the
//! integration tests drive the loop against an in-memory double.

use crate::error::Result;
use async_trait::async_trait;
use shared_types::{Block, Contract, Hash256, PendingTransaction, ProcessedTransaction};

/// Outcome of a `connect()` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connected {
    /// A new connection was just established; loop state derived from the
    /// session (tip, timeouts, server version) must be rebuilt.
    Fresh,
    /// The existing connection is still in use.
    Existing,
}

/// Typed access to the relational store.
///
/// Every operation either succeeds or returns the raw store error; no
/// operation retries or hides failures. Methods that emit SQL verbs map
/// one-to-one onto statements, so the mining loop's step numbering matches
/// the session's transaction state at all times.
#[async_trait]
pub trait ChainStore: Send {
    /// Establish the single store connection. Idempotent.
    async fn connect(&mut self) -> Result<Connected>;

    /// Fetch pending transactions ordered by `(create_ts ASC,
    /// transaction_id ASC)`.
    async fn fetch_pending(&mut self, limit: i64) -> Result<Vec<PendingTransaction>>;

    /// Fetch the highest block, for tip recovery.
    async fn fetch_latest_block(&mut self) -> Result<Option<Block>>;

    /// Load all deployed contracts.
    async fn fetch_contracts(&mut self) -> Result<Vec<Contract>>;

    /// Numeric server version (e.g. 150004).
    async fn fetch_server_version(&mut self) -> Result<i64>;

    /// Bound the runtime of any single statement, chiefly contract SQL.
    async fn set_statement_timeout(&mut self, millis: i64) -> Result<()>;

    /// `BEGIN; SET LOCAL ROLE smartcontract; SAVEPOINT tx;`
    async fn begin_block(&mut self) -> Result<()>;

    /// `ROLLBACK TO SAVEPOINT tx;`
    async fn savepoint_rollback(&mut self) -> Result<()>;

    /// `RELEASE SAVEPOINT tx; SAVEPOINT tx;`
    async fn savepoint_advance(&mut self) -> Result<()>;

    /// `RESET ROLE;`
    async fn reset_role(&mut self) -> Result<()>;

    /// Run a contract script under the current (smartcontract) role, with
    /// `bindings` published as transaction-local GUCs under the
    /// [`crate::BINDING_PREFIX`] namespace. Returns the first column of the
    /// script's last result row, if any.
    async fn run_contract_code(
        &mut self,
        code: &str,
        bindings: &[(&'static str, String)],
    ) -> Result<Option<String>>;

    /// Insert a contract row under role `smartcontractmanager`.
    async fn create_contract(&mut self, contract: &Contract) -> Result<()>;

    /// Delete a contract row under role `smartcontractmanager`.
    async fn delete_contract(&mut self, hash: &Hash256) -> Result<()>;

    /// Apply all terminal statuses of a tick in one statement.
    async fn bulk_update_statuses(&mut self, rows: &[ProcessedTransaction]) -> Result<()>;

    /// Append a signed block.
    async fn insert_block(&mut self, block: &Block) -> Result<()>;

    /// `SET LOCAL synchronous_commit TO ON; COMMIT;` - the crash-safe
    /// commit used whenever a block was written.
    async fn commit_durable(&mut self) -> Result<()>;

    /// `COMMIT;` - status-only commit; session-level `synchronous_commit`
    /// may be off.
    async fn commit_fast(&mut self) -> Result<()>;

    /// `ROLLBACK;` - session recovery after a failed tick.
    async fn rollback_all(&mut self) -> Result<()>;

    /// Best-effort `pg_notify`; callers log failures and move on.
    async fn notify(&mut self, channel: &str, payload: &str) -> Result<()>;
}
