//! # Quill - Node Runtime
//!
//! The process shell around the mining loop:
//!
//! - [`config`]: configuration loading (JSON file + environment) and
//!   validation, done once in the master
//! - [`supervisor`]: the master process owning the worker's lifecycle
//! - [`worker`]: the worker process driving the mining loop
//! - [`ipc`]: line-delimited JSON messages between the two
//! - [`redact`]: secret scrubbing for anything that reaches a log sink
//!
//! ## Two processes, one writer
//!
//! The master owns timers, signal handlers and restart policy; the worker
//! owns the single store connection and the mining loop. Master/worker is
//! process *isolation*, not parallelism: a leaking or hung worker is
//! killed and restarted without losing chain state, because all durable
//! state lives in the store and commits are atomic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod ipc;
pub mod redact;
pub mod supervisor;
pub mod worker;

pub use config::ProcessorConfig;

/// Environment variable carrying the full validated configuration from
/// master to worker.
pub const CONFIG_ENV: &str = "PROCESSOR_CONFIG";

/// CLI flag selecting worker mode.
pub const WORKER_FLAG: &str = "--worker";
