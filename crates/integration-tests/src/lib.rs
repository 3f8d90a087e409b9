//! # Quill - Integration Tests
//!
//! End-to-end scenarios for the mining loop, driven against an in-memory
//! [`harness::MemoryStore`] that models the store's transaction and
//! savepoint semantics, plus a scriptable clock and a recording
//! supervisor link.
//!
//! The harness lives in the library so individual subsystems can reuse
//! it; the scenarios themselves are test-only.

pub mod harness;

#[cfg(test)]
mod scenarios;
