//! Row types mapping the `basics` schema onto domain entities.

mod rows;

pub use rows::{BlockRow, ContractRow, PendingRow};
