//! Canonical block encoding, signing and hashing.
//!
//! The layout is bit-exact; nodes and backends recompute these bytes to
//! verify chain integrity:
//!
//! ```text
//! signed bytes = sign_prefix
//!              | previous_block_hash (32B)
//!              | block_id (8B BE)
//!              | processed_ts (8B BE)
//!              | packed transactions
//!              | version (1B)
//!              | transactions_count (2B BE)
//! ```
//!
//! The signature covers the signed bytes; the block hash is
//! `sha256d(signed bytes)`, so the sign prefix domain-separates both.

use shared_crypto::hashing::sha256d;
use shared_crypto::{ProcessorKeyPair, ProcessorPublicKey, ProcessorSignature};
use shared_types::{Block, ChainTip, Hash256, PendingTransaction};

/// Concatenate the packed encodings of `txs`, preserving order.
pub fn pack_transactions(txs: &[PendingTransaction]) -> (Vec<u8>, u16) {
    let total: usize = txs.iter().map(PendingTransaction::packed_len).sum();
    let mut packed = Vec::with_capacity(total);
    for tx in txs {
        packed.extend_from_slice(&tx.packed());
    }
    (packed, txs.len() as u16)
}

/// The bytes covered by the block signature and hash.
pub fn block_signing_bytes(
    sign_prefix: &[u8],
    previous_block_hash: &Hash256,
    block_id: i64,
    processed_ts: i64,
    transactions: &[u8],
    version: u8,
    transactions_amount: u16,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(sign_prefix.len() + 51 + transactions.len());
    out.extend_from_slice(sign_prefix);
    out.extend_from_slice(previous_block_hash);
    out.extend_from_slice(&block_id.to_be_bytes());
    out.extend_from_slice(&processed_ts.to_be_bytes());
    out.extend_from_slice(transactions);
    out.push(version);
    out.extend_from_slice(&transactions_amount.to_be_bytes());
    out
}

/// Build and sign a block from the chain tip and an ordered transaction
/// list.
pub fn sign_block(
    tip: &ChainTip,
    txs: &[PendingTransaction],
    processed_ts: i64,
    keypair: &ProcessorKeyPair,
    sign_prefix: &[u8],
    version: u8,
) -> Block {
    let (transactions, transactions_amount) = pack_transactions(txs);
    let bytes = block_signing_bytes(
        sign_prefix,
        &tip.previous_hash,
        tip.next_block_id,
        processed_ts,
        &transactions,
        version,
        transactions_amount,
    );
    let signature = keypair.sign(&bytes);

    Block {
        block_id: tip.next_block_id,
        version,
        previous_block_hash: tip.previous_hash,
        processed_ts,
        transactions,
        transactions_amount,
        signature: *signature.as_bytes(),
    }
}

/// The block hash: `sha256d` over the sign-prefixed canonical bytes.
pub fn block_hash(block: &Block, sign_prefix: &[u8]) -> Hash256 {
    let bytes = block_signing_bytes(
        sign_prefix,
        &block.previous_block_hash,
        block.block_id,
        block.processed_ts,
        &block.transactions,
        block.version,
        block.transactions_amount,
    );
    sha256d(&bytes)
}

/// Verify a block's signature against the processor's public key.
pub fn verify_block(block: &Block, sign_prefix: &[u8], key: &ProcessorPublicKey) -> bool {
    let bytes = block_signing_bytes(
        sign_prefix,
        &block.previous_block_hash,
        block.block_id,
        block.processed_ts,
        &block.transactions,
        block.version,
        block.transactions_amount,
    );
    key.verify(&bytes, &ProcessorSignature::from_bytes(block.signature))
        .is_ok()
}
