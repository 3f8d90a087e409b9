//! Hexagonal ports for the store gateway.

mod inbound;

pub use inbound::{ChainStore, Connected};
