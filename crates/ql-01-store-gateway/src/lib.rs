//! # Quill - Store Gateway (Subsystem 01)
//!
//! **Bounded Context:** Durable chain state
//!
//! ## Purpose
//!
//! Typed access to the relational store backing the chain: pending
//! transaction fetch, block append, bulk status updates, savepoint control
//! and NOTIFY emission. The gateway owns exactly one connection; the
//! `processor` role carries `CONNECTION LIMIT 1`, which is the
//! mutual-exclusion mechanism guaranteeing a single writer per chain.
//!
//! ## Key Design Principles
//!
//! 1. **No hidden policy**: every operation either succeeds or returns the
//!    raw store error. Retry and recovery decisions belong to the mining
//!    loop.
//! 2. **Single connection, no pool**: pooling would defeat the
//!    connection-limit singleton and break `SET LOCAL` role scoping.
//! 3. **Least privilege**: contract SQL runs under role `smartcontract`;
//!    contract management under `smartcontractmanager`; both scoped with
//!    `SET LOCAL` so a rollback restores the processor role.
//!
//! ## Module Structure
//!
//! - [`ports`]: the [`ChainStore`] interface the mining loop drives
//! - [`adapters`]: the PostgreSQL implementation
//! - [`domain`]: row types mapping the `basics` schema

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod ports;

mod error;

pub use adapters::PostgresGateway;
pub use error::{Result, StoreError};
pub use ports::{ChainStore, Connected};

/// Channel on which new-block notifications are emitted.
pub const BLOCKS_CHANNEL: &str = "blocks";

/// Prefix for transaction-local GUCs carrying contract bindings.
pub const BINDING_PREFIX: &str = "quill";
