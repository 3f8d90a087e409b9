//! The contract runtime service.
//!
//! Owns the content-addressed contract map and drives a single transaction
//! through structural validation, template checking and script execution.
//! The mining loop opens the savepoint before calling [`ContractRuntime::execute`]
//! and decides afterwards, from the returned [`ExecutionResult`], whether to
//! advance or roll it back.

use crate::domain::execution::{ExecutionContext, ExecutionResult};
use crate::domain::provisioning::{CreateContractPayload, DeleteContractPayload};
use crate::domain::template;
use crate::error::Result;
use crate::sandbox;
use ql_01_store_gateway::{ChainStore, StoreError};
use shared_crypto::{address_from_public_key, ProcessorPublicKey, ProcessorSignature};
use shared_crypto::hashing::sha256;
use shared_types::{
    Contract, Hash256, PendingTransaction, CONTRACT_TYPE_CREATE, CONTRACT_TYPE_DELETE,
    CONTRACT_TYPE_UNKNOWN, CREATE_CONTRACT_HASH, DELETE_CONTRACT_HASH, SUPPORTED_TX_VERSIONS,
};
use std::collections::HashMap;
use tracing::{debug, info};

fn invalid(message: impl Into<String>) -> ExecutionResult {
    ExecutionResult::Invalid {
        message: message.into(),
    }
}

/// Classify a store error from contract execution into an outcome.
///
/// `P0001` is `raise_exception`: a `reject:`-prefixed message is the
/// contract refusing the transaction, anything else is the contract (or its
/// SQL) being broken. Transient states leave the transaction untouched.
fn classify_script_error(err: &StoreError) -> ExecutionResult {
    if err.is_transient() {
        return ExecutionResult::Retry;
    }
    if err.sqlstate().as_deref() == Some("P0001") {
        let message = err.server_message().unwrap_or_default();
        return match message.strip_prefix("reject:") {
            Some(reason) => ExecutionResult::Rejected {
                message: reason.trim().to_string(),
            },
            None => invalid(message),
        };
    }
    invalid(err.server_message().unwrap_or_else(|| err.to_string()))
}

/// Content-addressed contract map plus the execution entry point.
pub struct ContractRuntime {
    sign_prefix: Vec<u8>,
    contracts: HashMap<Hash256, Contract>,
}

impl ContractRuntime {
    /// Create an empty runtime; call [`reload`](Self::reload) before
    /// executing.
    pub fn new(sign_prefix: Vec<u8>) -> Self {
        Self {
            sign_prefix,
            contracts: HashMap::new(),
        }
    }

    /// Number of deployed contracts currently loaded.
    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    /// Rebuild the contract map from the store. Must run at startup and
    /// after any session rollback that could have crossed a create or
    /// delete transaction.
    pub async fn reload<S: ChainStore>(&mut self, store: &mut S) -> Result<()> {
        let contracts = store.fetch_contracts().await?;
        self.contracts = contracts.into_iter().map(|c| (c.hash, c)).collect();
        info!(count = self.contracts.len(), "contract map loaded");
        Ok(())
    }

    /// Resolve the stored contract-type name for a hash.
    pub fn contract_type(&self, hash: &Hash256) -> String {
        if *hash == CREATE_CONTRACT_HASH {
            return CONTRACT_TYPE_CREATE.to_string();
        }
        if *hash == DELETE_CONTRACT_HASH {
            return CONTRACT_TYPE_DELETE.to_string();
        }
        self.contracts
            .get(hash)
            .map(|c| c.contract_type.clone())
            .unwrap_or_else(|| CONTRACT_TYPE_UNKNOWN.to_string())
    }

    /// Execute one transaction inside the savepoint the caller opened.
    pub async fn execute<S: ChainStore>(
        &mut self,
        store: &mut S,
        tx: &PendingTransaction,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        if !SUPPORTED_TX_VERSIONS.contains(&tx.version) {
            return invalid(format!("unsupported transaction version {}", tx.version));
        }

        let public_key = match ProcessorPublicKey::from_bytes(tx.public_key) {
            Ok(key) => key,
            Err(_) => return invalid("invalid public key"),
        };
        let signature = ProcessorSignature::from_bytes(tx.signature);
        if public_key
            .verify(&tx.signing_bytes(&self.sign_prefix), &signature)
            .is_err()
        {
            return invalid("invalid signature");
        }

        if tx.valid_till != 0 && tx.valid_till <= ctx.block_ts {
            return invalid("transaction expired");
        }

        let payload = match tx.payload_object() {
            Some(payload) => payload,
            None => return invalid("payload is not a JSON object"),
        };

        let sender = address_from_public_key(&tx.public_key);

        match tx.contract_hash {
            CREATE_CONTRACT_HASH => self.execute_create(store, tx, &sender).await,
            DELETE_CONTRACT_HASH => self.execute_delete(store, tx).await,
            hash => {
                let Some(contract) = self.contracts.get(&hash) else {
                    // A replaying node may see contracts from a newer
                    // processor; only the strict (mining) interpretation
                    // invalidates.
                    return if ctx.strict {
                        invalid("unknown contract")
                    } else {
                        ExecutionResult::Accepted {
                            message: Some("unknown contract".to_string()),
                        }
                    };
                };

                if let Err(message) = template::validate_payload(&contract.template, &payload) {
                    return invalid(message);
                }
                let abi_version = contract.abi_version;
                let code = match std::str::from_utf8(&contract.code) {
                    Ok(code) => code.to_string(),
                    Err(_) => return invalid("contract code is not UTF-8"),
                };

                let bindings: Vec<(&'static str, String)> = vec![
                    ("payload", tx.payload.clone()),
                    ("sender", sender),
                    ("transaction_id", tx.transaction_id.to_string()),
                    ("block_id", ctx.block_id.to_string()),
                    ("block_ts", ctx.block_ts.to_string()),
                    ("processor", ctx.processor_address.clone()),
                    ("previous_block_ts", ctx.previous_block_ts.to_string()),
                    ("previous_block_hash", hex::encode(ctx.previous_block_hash)),
                ];

                let guard = sandbox::enter();
                let outcome = store.run_contract_code(&code, &bindings).await;
                drop(guard);

                match outcome {
                    Ok(returned) => {
                        sandbox::suspended(|| {
                            debug!(tx = %tx.transaction_id, "contract script completed")
                        });
                        match returned {
                            // Legacy ABI: a returned string is a rejection
                            // whose side effects are retained.
                            Some(message) if abi_version == 1 && !message.is_empty() => {
                                ExecutionResult::V1Rejected { message }
                            }
                            _ if abi_version == 1 => ExecutionResult::Accepted { message: None },
                            message => ExecutionResult::Accepted { message },
                        }
                    }
                    Err(err) => classify_script_error(&err),
                }
            }
        }
    }

    async fn execute_create<S: ChainStore>(
        &mut self,
        store: &mut S,
        tx: &PendingTransaction,
        sender: &str,
    ) -> ExecutionResult {
        let (parsed, code) = match CreateContractPayload::parse(&tx.payload) {
            Ok(parsed) => parsed,
            Err(message) => return invalid(message),
        };

        let hash = sha256(&code);
        if self.contracts.contains_key(&hash) {
            return invalid("contract already exists");
        }
        if self
            .contracts
            .values()
            .any(|c| c.contract_type == parsed.contract_type)
        {
            return invalid(format!(
                "contract type '{}' already in use",
                parsed.contract_type
            ));
        }

        let contract = Contract {
            hash,
            contract_type: parsed.contract_type,
            version: parsed.version,
            description: parsed.description,
            creator: sender.to_string(),
            template: parsed.template,
            code,
            abi_version: parsed.abi_version,
        };

        match store.create_contract(&contract).await {
            Ok(()) => {
                info!(
                    contract_type = %contract.contract_type,
                    hash = %hex::encode(hash),
                    "contract created"
                );
                self.contracts.insert(hash, contract);
                ExecutionResult::Accepted { message: None }
            }
            Err(err) if err.is_transient() => ExecutionResult::Retry,
            Err(err) => invalid(err.server_message().unwrap_or_else(|| err.to_string())),
        }
    }

    async fn execute_delete<S: ChainStore>(
        &mut self,
        store: &mut S,
        tx: &PendingTransaction,
    ) -> ExecutionResult {
        let hash = match DeleteContractPayload::parse(&tx.payload) {
            Ok(hash) => hash,
            Err(message) => return invalid(message),
        };
        if !self.contracts.contains_key(&hash) {
            return invalid("unknown contract");
        }

        match store.delete_contract(&hash).await {
            Ok(()) => {
                info!(hash = %hex::encode(hash), "contract deleted");
                self.contracts.remove(&hash);
                ExecutionResult::Accepted { message: None }
            }
            Err(err) if err.is_transient() => ExecutionResult::Retry,
            Err(err) => invalid(err.server_message().unwrap_or_else(|| err.to_string())),
        }
    }
}
