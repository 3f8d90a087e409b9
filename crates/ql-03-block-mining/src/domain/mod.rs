//! Pure domain logic: block packing, signing and hashing.

pub mod assembler;

pub use assembler::{block_hash, block_signing_bytes, pack_transactions, sign_block, verify_block};
