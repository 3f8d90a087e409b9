//! Pure domain logic of the contract runtime.

pub mod execution;
pub mod provisioning;
pub mod template;

pub use execution::{ExecutionContext, ExecutionResult};
pub use provisioning::{CreateContractPayload, DeleteContractPayload};
