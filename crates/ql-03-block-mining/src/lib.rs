//! # Quill - Block Mining (Subsystem 03)
//!
//! **Bounded Context:** Block production
//!
//! ## Purpose
//!
//! The deterministic scheduler at the heart of the processor. Once per
//! tick it drains pending transactions, drives each through the contract
//! runtime under a per-transaction savepoint, packs the survivors into a
//! signed block under timing and size budgets, and commits block plus
//! status updates atomically.
//!
//! ## Critical Invariants
//!
//! 1. **Chain linkage**: every block's `previous_block_hash` is the hash
//!    of its predecessor; `processed_ts` strictly increases.
//! 2. **Dense ids**: block ids are dense and monotonic from 0.
//! 3. **Deterministic order**: transactions are consumed in
//!    `(create_ts ASC, transaction_id ASC)` order and `position_in_block`
//!    follows it.
//! 4. **Budgets**: packed size ≤ `max_block_size`, count ≤
//!    `transactions_per_block`.
//! 5. **Exactly-once terminalisation**: a transaction reaches one terminal
//!    status or stays `new` for retry; never anything in between.
//!
//! ## Module Structure
//!
//! - [`domain`]: block packing, signing and hashing
//! - [`ports`]: clock and supervisor-link interfaces
//! - [`service`]: the tick state machine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod ports;
pub mod service;

mod config;
mod error;

pub use config::MiningConfig;
pub use error::{MiningError, Result};
pub use service::MiningService;

/// Clean exit.
pub const EXIT_CLEAN: i32 = 0;

/// Graceful shutdown that did not complete in time.
pub const EXIT_INCOMPLETE_SHUTDOWN: i32 = 1;

/// First of the stay-down exit codes: restarting would be harmful.
pub const EXIT_STAY_DOWN_MIN: i32 = 50;

/// Last of the stay-down exit codes (inclusive).
pub const EXIT_STAY_DOWN_MAX: i32 = 59;

/// Stay-down: the store server version is unsupported.
pub const EXIT_UNSUPPORTED_STORE: i32 = 52;

/// Oldest supported server version (9.5, numeric form): required for
/// `jsonb_to_recordset` bulk updates and savepoint semantics the loop
/// relies on.
pub const MIN_SERVER_VERSION: i64 = 90500;

/// True for exit codes that must not trigger a restart.
pub fn is_stay_down(code: i32) -> bool {
    (EXIT_STAY_DOWN_MIN..=EXIT_STAY_DOWN_MAX).contains(&code)
}
