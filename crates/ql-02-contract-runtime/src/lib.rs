//! # Quill - Contract Runtime (Subsystem 02)
//!
//! **Bounded Context:** Contract execution
//!
//! ## Purpose
//!
//! Holds the content-addressed map of deployed contracts and executes one
//! transaction at a time against it, inside the savepoint the store gateway
//! opened for that transaction. The runtime owns no durable state: contract
//! side effects live in the database under role `smartcontract`, and the
//! in-memory map is rebuilt from the store whenever a session rollback could
//! have crossed a create or delete.
//!
//! ## Execution outcomes
//!
//! Every execution classifies into exactly one [`ExecutionResult`] variant:
//!
//! - `Accepted` - side effects retained, transaction goes into the block
//! - `Rejected` - business-rule refusal, side effects rolled back
//! - `V1Rejected` - legacy-ABI refusal whose side effects are retained
//! - `Invalid` - structural or interpretation failure, still terminal
//! - `Retry` - environmental failure, the transaction stays `new`
//!
//! Database errors never cross this boundary untouched; the runtime
//! classifies them so the mining loop only ever sees the five outcomes.
//!
//! ## Sandboxing
//!
//! Two-sided: the `smartcontract` role blocks privileged and
//! non-deterministic SQL, and the process-global [`sandbox`] flag marks the
//! sections where contract code is in control. Logging or signal handling
//! that runs while the flag is up must wrap itself in
//! [`sandbox::suspended`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod sandbox;
pub mod service;

mod error;

pub use domain::{ExecutionContext, ExecutionResult};
pub use error::{Result, RuntimeError};
pub use service::ContractRuntime;
