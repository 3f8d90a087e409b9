//! Test doubles for the mining loop's ports.
//!
//! [`MemoryStore`] models the pieces of store behaviour the loop depends
//! on: one connection, an outer transaction with savepoints, atomic
//! commit, and scripted contract execution keyed by contract code. Fault
//! injection covers the crash-atomicity scenarios.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use ql_01_store_gateway::{ChainStore, Connected, Result as StoreResult, StoreError};
use ql_02_contract_runtime::ContractRuntime;
use ql_03_block_mining::ports::{Clock, LoopReport, SupervisorLink};
use ql_03_block_mining::{MiningConfig, MiningService};
use shared_crypto::hashing::sha256;
use shared_crypto::ProcessorKeyPair;
use shared_types::{
    Block, Contract, Hash256, PendingTransaction, ProcessedTransaction,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

/// Sign prefix used by every harness-built transaction and service.
pub const SIGN_PREFIX: &[u8] = b"quill-test";

/// Operations a fault can be injected into (once each).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FailPoint {
    Connect,
    FetchPending,
    FetchLatestBlock,
    FetchContracts,
    FetchServerVersion,
    SetStatementTimeout,
    BeginBlock,
    SavepointRollback,
    SavepointAdvance,
    ResetRole,
    RunContract,
    CreateContract,
    DeleteContract,
    BulkUpdate,
    InsertBlock,
    CommitFast,
    CommitDurable,
    RollbackAll,
    Notify,
}

/// Scripted outcome of one `run_contract_code` call.
#[derive(Clone, Debug)]
pub enum ScriptOutcome {
    /// The script completed, returning this value.
    Return(Option<String>),
    /// The script raised an error with this SQLSTATE and message.
    Fail {
        /// Five-character SQLSTATE.
        sqlstate: String,
        /// Server error message.
        message: String,
    },
}

/// A change staged inside the open transaction.
enum Op {
    CreateContract(Contract),
    DeleteContract(Hash256),
    UpdateStatuses(Vec<ProcessedTransaction>),
    InsertBlock(Block),
}

/// The open transaction: ops released past savepoints plus ops still
/// under the current savepoint.
#[derive(Default)]
struct TxState {
    released: Vec<Op>,
    savepoint: Vec<Op>,
}

/// Shared store state; tests keep a handle for seeding and inspection.
pub struct StoreState {
    /// Whether `connect()` has succeeded.
    pub connected: bool,
    /// Reported numeric server version.
    pub server_version: i64,
    /// Last applied statement timeout.
    pub statement_timeout_ms: Option<i64>,
    /// Transactions with status `new`.
    pub pending: Vec<PendingTransaction>,
    /// Terminalised transactions by id.
    pub processed: HashMap<Uuid, ProcessedTransaction>,
    /// Committed blocks in id order.
    pub blocks: Vec<Block>,
    /// Deployed contracts.
    pub contracts: HashMap<Hash256, Contract>,
    /// Emitted notifications `(channel, payload)`.
    pub notifications: Vec<(String, String)>,
    /// Commit counters, for asserting atomicity.
    pub commits: u32,
    /// Session rollbacks issued.
    pub rollbacks: u32,
    tx: Option<TxState>,
    fail_once: HashSet<FailPoint>,
    scripts: HashMap<String, VecDeque<ScriptOutcome>>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            connected: false,
            server_version: 150_000,
            statement_timeout_ms: None,
            pending: Vec::new(),
            processed: HashMap::new(),
            blocks: Vec::new(),
            contracts: HashMap::new(),
            notifications: Vec::new(),
            commits: 0,
            rollbacks: 0,
            tx: None,
            fail_once: HashSet::new(),
            scripts: HashMap::new(),
        }
    }
}

impl StoreState {
    fn take_fault(&mut self, point: FailPoint) -> StoreResult<()> {
        if self.fail_once.remove(&point) {
            return Err(StoreError::Script {
                sqlstate: "XX000".into(),
                message: format!("injected failure at {point:?}"),
            });
        }
        Ok(())
    }

    fn tx_mut(&mut self) -> StoreResult<&mut TxState> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::BadRow("no open transaction".into()))
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::CreateContract(contract) => {
                self.contracts.insert(contract.hash, contract);
            }
            Op::DeleteContract(hash) => {
                self.contracts.remove(&hash);
            }
            Op::UpdateStatuses(rows) => {
                for row in rows {
                    self.pending.retain(|tx| tx.transaction_id != row.transaction_id);
                    self.processed.insert(row.transaction_id, row);
                }
            }
            Op::InsertBlock(block) => self.blocks.push(block),
        }
    }

    fn commit(&mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::BadRow("commit without transaction".into()))?;
        for op in tx.released {
            self.apply(op);
        }
        // Ops under an unreleased savepoint still commit with the
        // transaction.
        for op in tx.savepoint {
            self.apply(op);
        }
        self.commits += 1;
        Ok(())
    }
}

/// In-memory [`ChainStore`] double.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for seeding and inspecting state from the test.
    pub fn handle(&self) -> Arc<Mutex<StoreState>> {
        Arc::clone(&self.state)
    }

    /// Queue a pending transaction.
    pub fn add_pending(&self, tx: PendingTransaction) {
        self.state.lock().pending.push(tx);
    }

    /// Seed a deployed contract.
    pub fn seed_contract(&self, contract: Contract) {
        self.state.lock().contracts.insert(contract.hash, contract);
    }

    /// Make the next use of `point` fail once.
    pub fn fail_once(&self, point: FailPoint) {
        self.state.lock().fail_once.insert(point);
    }

    /// Queue an outcome for the next execution of `code`.
    pub fn script(&self, code: &str, outcome: ScriptOutcome) {
        self.state
            .lock()
            .scripts
            .entry(code.to_string())
            .or_default()
            .push_back(outcome);
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn connect(&mut self) -> StoreResult<Connected> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::Connect)?;
        if s.connected {
            Ok(Connected::Existing)
        } else {
            s.connected = true;
            Ok(Connected::Fresh)
        }
    }

    async fn fetch_pending(&mut self, limit: i64) -> StoreResult<Vec<PendingTransaction>> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::FetchPending)?;
        let mut txs = s.pending.clone();
        txs.sort_by(|a, b| {
            a.create_ts
                .cmp(&b.create_ts)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });
        txs.truncate(limit.max(0) as usize);
        Ok(txs)
    }

    async fn fetch_latest_block(&mut self) -> StoreResult<Option<Block>> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::FetchLatestBlock)?;
        Ok(s.blocks.last().cloned())
    }

    async fn fetch_contracts(&mut self) -> StoreResult<Vec<Contract>> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::FetchContracts)?;
        Ok(s.contracts.values().cloned().collect())
    }

    async fn fetch_server_version(&mut self) -> StoreResult<i64> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::FetchServerVersion)?;
        Ok(s.server_version)
    }

    async fn set_statement_timeout(&mut self, millis: i64) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::SetStatementTimeout)?;
        s.statement_timeout_ms = Some(millis);
        Ok(())
    }

    async fn begin_block(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::BeginBlock)?;
        s.tx = Some(TxState::default());
        Ok(())
    }

    async fn savepoint_rollback(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::SavepointRollback)?;
        s.tx_mut()?.savepoint.clear();
        Ok(())
    }

    async fn savepoint_advance(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::SavepointAdvance)?;
        let tx = s.tx_mut()?;
        let staged = std::mem::take(&mut tx.savepoint);
        tx.released.extend(staged);
        Ok(())
    }

    async fn reset_role(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::ResetRole)?;
        s.tx_mut()?;
        Ok(())
    }

    async fn run_contract_code(
        &mut self,
        code: &str,
        _bindings: &[(&'static str, String)],
    ) -> StoreResult<Option<String>> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::RunContract)?;
        s.tx_mut()?;
        let outcome = s
            .scripts
            .get_mut(code)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptOutcome::Return(None));
        match outcome {
            ScriptOutcome::Return(value) => Ok(value),
            ScriptOutcome::Fail { sqlstate, message } => {
                Err(StoreError::Script { sqlstate, message })
            }
        }
    }

    async fn create_contract(&mut self, contract: &Contract) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::CreateContract)?;
        s.tx_mut()?
            .savepoint
            .push(Op::CreateContract(contract.clone()));
        Ok(())
    }

    async fn delete_contract(&mut self, hash: &Hash256) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::DeleteContract)?;
        s.tx_mut()?.savepoint.push(Op::DeleteContract(*hash));
        Ok(())
    }

    async fn bulk_update_statuses(&mut self, rows: &[ProcessedTransaction]) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::BulkUpdate)?;
        s.tx_mut()?
            .released
            .push(Op::UpdateStatuses(rows.to_vec()));
        Ok(())
    }

    async fn insert_block(&mut self, block: &Block) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::InsertBlock)?;
        s.tx_mut()?.released.push(Op::InsertBlock(block.clone()));
        Ok(())
    }

    async fn commit_durable(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::CommitDurable)?;
        s.commit()
    }

    async fn commit_fast(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::CommitFast)?;
        s.commit()
    }

    async fn rollback_all(&mut self) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::RollbackAll)?;
        s.tx = None;
        s.rollbacks += 1;
        Ok(())
    }

    async fn notify(&mut self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut s = self.state.lock();
        s.take_fault(FailPoint::Notify)?;
        s.notifications.push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Clock whose readings can be scripted: queued values are returned in
/// order, then the last value repeats.
#[derive(Clone, Default)]
pub struct QueueClock {
    inner: Arc<Mutex<(VecDeque<i64>, i64)>>,
}

impl QueueClock {
    /// Clock pinned at `now`.
    pub fn at(now: i64) -> Self {
        let clock = Self::default();
        clock.set(now);
        clock
    }

    /// Drop any queued readings and pin the clock at `now`.
    pub fn set(&self, now: i64) {
        let mut inner = self.inner.lock();
        inner.0.clear();
        inner.1 = now;
    }

    /// Queue one reading; after the queue drains, the last reading
    /// repeats.
    pub fn push(&self, now: i64) {
        self.inner.lock().0.push_back(now);
    }
}

impl Clock for QueueClock {
    fn now_ms(&self) -> i64 {
        let mut inner = self.inner.lock();
        if let Some(next) = inner.0.pop_front() {
            inner.1 = next;
        }
        inner.1
    }
}

/// Supervisor link that records every report.
#[derive(Clone, Default)]
pub struct RecordingLink {
    /// Reports in arrival order.
    pub reports: Arc<Mutex<Vec<LoopReport>>>,
}

impl SupervisorLink for RecordingLink {
    fn send(&mut self, report: LoopReport) {
        self.reports.lock().push(report);
    }
}

/// Deterministic processor key.
pub fn processor_keypair() -> ProcessorKeyPair {
    ProcessorKeyPair::from_bytes(&[0x61u8; 32]).expect("fixed key is valid")
}

/// Deterministic backend (transaction sender) key.
pub fn backend_keypair() -> ProcessorKeyPair {
    ProcessorKeyPair::from_bytes(&[0x62u8; 32]).expect("fixed key is valid")
}

/// Build a correctly signed pending transaction.
pub fn pending_tx(
    keypair: &ProcessorKeyPair,
    id: u8,
    contract_hash: Hash256,
    payload: &str,
    create_ts: i64,
) -> PendingTransaction {
    let mut tx = PendingTransaction {
        transaction_id: Uuid::from_bytes([id; 16]),
        version: 1,
        contract_hash,
        valid_till: 0,
        payload: payload.to_string(),
        public_key: *keypair.public_key().as_bytes(),
        signature: [0u8; 64],
        create_ts,
    };
    tx.signature = *keypair.sign(&tx.signing_bytes(SIGN_PREFIX)).as_bytes();
    tx
}

/// A create-contract payload deploying `code` under `contract_type`, and
/// the hash the contract will get.
pub fn create_payload(contract_type: &str, code: &str) -> (String, Hash256) {
    let payload = serde_json::json!({
        "type": contract_type,
        "version": "1.0",
        "description": "test contract",
        "template": {"amount": {"type": "int?"}},
        "code": STANDARD.encode(code),
        "abi_version": 2,
    })
    .to_string();
    (payload, sha256(code.as_bytes()))
}

/// A deployed contract accepting `{"amount": int?}` payloads.
pub fn deployed_contract(contract_type: &str, code: &str) -> Contract {
    let code = code.as_bytes().to_vec();
    Contract {
        hash: sha256(&code),
        contract_type: contract_type.to_string(),
        version: "1.0".into(),
        description: "test contract".into(),
        creator: "1creator".into(),
        template: serde_json::json!({"amount": {"type": "int?"}}),
        code,
        abi_version: 2,
    }
}

/// The full mining stack over the in-memory doubles.
pub type TestService = MiningService<MemoryStore, QueueClock, RecordingLink>;

/// Build a service around the given doubles.
pub fn build_service(
    store: &MemoryStore,
    clock: &QueueClock,
    link: &RecordingLink,
    config: MiningConfig,
    shutdown: Arc<AtomicBool>,
) -> TestService {
    MiningService::new(
        store.clone(),
        ContractRuntime::new(SIGN_PREFIX.to_vec()),
        processor_keypair(),
        SIGN_PREFIX.to_vec(),
        config,
        clock.clone(),
        link.clone(),
        shutdown,
    )
}
