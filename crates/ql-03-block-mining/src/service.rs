//! The mining loop service.
//!
//! One instance owns the store connection, the contract runtime, the
//! in-memory chain tip and every mutable loop flag. A timer drives
//! [`MiningService::tick`]; everything else is private state.
//!
//! ## Tick outline
//!
//! 1. Pacing gate (skip silently while the block floor has not passed)
//! 2. Reentry gate (`is_mining`)
//! 3. Connect / verify the store connection
//! 4. Recovery: session `ROLLBACK` and contract-map reload when needed
//! 5. Startup checks on a fresh connection (server version, tip rebuild,
//!    statement timeout)
//! 6. Fetch pending transactions
//! 7. `BEGIN; SET LOCAL ROLE smartcontract; SAVEPOINT tx;`
//! 8. Compute the block timestamp (`max(now, previous_ts + 1)`)
//! 9. Execute each transaction under its savepoint
//! 10. `RESET ROLE;`
//! 11. Bulk status update
//! 12. Block-or-no-block decision
//! 13. Sign, insert, durably commit; advance the tip
//! 14. Clear flags, report to the supervisor
//!
//! Any store failure lands in `abort_mining`, which decides the rollback
//! flag and failure counter; the next tick then recovers the session.

use crate::config::MiningConfig;
use crate::domain::assembler;
use crate::error::MiningError;
use crate::ports::{Clock, LoopReport, SupervisorLink};
use crate::{EXIT_UNSUPPORTED_STORE, MIN_SERVER_VERSION};
use ql_01_store_gateway::{ChainStore, Connected, BLOCKS_CHANNEL};
use ql_02_contract_runtime::{ContractRuntime, ExecutionContext, ExecutionResult};
use shared_crypto::{address_from_public_key, ProcessorKeyPair};
use shared_types::{
    coerce_receiver, sanitize_message, ChainTip, PendingTransaction, ProcessedTransaction,
    BLOCK_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A failed tick, tagged with whether the failure happened inside an open
/// database transaction (and therefore needs a session `ROLLBACK`).
struct Abort {
    error: MiningError,
    in_transaction: bool,
}

impl Abort {
    fn outside(error: impl Into<MiningError>) -> Self {
        Self {
            error: error.into(),
            in_transaction: false,
        }
    }

    fn inside(error: impl Into<MiningError>) -> Self {
        Self {
            error: error.into(),
            in_transaction: true,
        }
    }
}

/// The scheduler that turns pending transactions into signed blocks.
pub struct MiningService<S, C, L> {
    store: S,
    runtime: ContractRuntime,
    keypair: ProcessorKeyPair,
    processor_address: String,
    sign_prefix: Vec<u8>,
    config: MiningConfig,
    clock: C,
    link: L,
    is_shutting_down: Arc<AtomicBool>,

    tip: ChainTip,
    is_mining: bool,
    should_rollback: bool,
    just_connected: bool,
    failures: u32,
    time_warning: bool,
    mined_first: bool,
    warned_server_version: bool,
    exit_request: Option<i32>,
}

impl<S: ChainStore, C: Clock, L: SupervisorLink> MiningService<S, C, L> {
    /// Create a mining service. The tip starts at genesis and is rebuilt
    /// from the store on the first tick.
    pub fn new(
        store: S,
        runtime: ContractRuntime,
        keypair: ProcessorKeyPair,
        sign_prefix: Vec<u8>,
        config: MiningConfig,
        clock: C,
        link: L,
        is_shutting_down: Arc<AtomicBool>,
    ) -> Self {
        let processor_address = address_from_public_key(keypair.public_key().as_bytes());
        Self {
            store,
            runtime,
            keypair,
            processor_address,
            sign_prefix,
            config,
            clock,
            link,
            is_shutting_down,
            tip: ChainTip::genesis(),
            is_mining: false,
            should_rollback: false,
            just_connected: false,
            failures: 0,
            time_warning: false,
            mined_first: false,
            warned_server_version: false,
            exit_request: None,
        }
    }

    /// The current in-memory chain tip.
    pub fn tip(&self) -> ChainTip {
        self.tip
    }

    /// Consecutive failed mining attempts.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Set when the loop wants the process to exit with a specific code
    /// (stay-down conditions).
    pub fn exit_request(&self) -> Option<i32> {
        self.exit_request
    }

    /// True while a tick is running; the worker drains it before a
    /// graceful exit.
    pub fn is_mid_tick(&self) -> bool {
        self.is_mining
    }

    /// True while inside a clock-regression episode (edge-triggered
    /// warning state).
    pub fn clock_warning_active(&self) -> bool {
        self.time_warning
    }

    /// The address the processor signs blocks under.
    pub fn processor_address(&self) -> &str {
        &self.processor_address
    }

    /// Read access to the store, for inspection in tests and tooling.
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn force_mining_flag(&mut self) {
        self.is_mining = true;
    }

    /// One scheduler tick. Never panics and never returns an error: every
    /// failure is folded into the loop flags for the next tick to recover
    /// from.
    pub async fn tick(&mut self) {
        let now = self.clock.now_ms();

        // 1. Pacing gate: after catch-up the timer can fire well before
        // the block floor has passed; skip silently to avoid bunching.
        if self.tip.previous_ts + self.config.min_interval_ms()
            > now + self.config.pacing_slack_ms
        {
            return;
        }

        // 2. Reentry gate. The running tick keeps ownership of the flag.
        if self.is_mining {
            warn!("mining tick fired while the previous one is still running (heavy load)");
            self.link.send(LoopReport::HeavyLoad);
            return;
        }
        self.is_mining = true;

        match self.mine(now).await {
            Ok(()) => {
                // 14. Success: clear flags and report liveness.
                self.failures = 0;
                self.just_connected = false;
                self.is_mining = false;
                if !self.mined_first {
                    self.mined_first = true;
                    info!(address = %self.processor_address, "processor mined its first tick");
                }
                self.link.send(LoopReport::Progress);
            }
            Err(abort) => self.abort_mining(abort),
        }
    }

    async fn mine(&mut self, now: i64) -> Result<(), Abort> {
        // 3. Acquire or verify the connection.
        if self.store.connect().await.map_err(Abort::outside)? == Connected::Fresh {
            self.just_connected = true;
        }

        // 4. Recovery. Rolling back may have crossed a contract create or
        // delete, so the map is reloaded before the flag clears; a failed
        // reload leaves the flag set and the next tick repeats both steps.
        let initializing = self.should_rollback || self.just_connected;
        if initializing {
            self.link.send(LoopReport::Init { active: true });
            self.store.rollback_all().await.map_err(Abort::inside)?;
            self.runtime
                .reload(&mut self.store)
                .await
                .map_err(Abort::inside)?;
            self.should_rollback = false;
        }

        // 5. Startup checks, only on a fresh connection.
        if self.just_connected {
            let version = self
                .store
                .fetch_server_version()
                .await
                .map_err(Abort::outside)?;
            if version < MIN_SERVER_VERSION {
                if !self.warned_server_version {
                    error!(
                        version,
                        required = MIN_SERVER_VERSION,
                        "store server version is unsupported; shutting down for good"
                    );
                    self.warned_server_version = true;
                }
                self.exit_request = Some(EXIT_UNSUPPORTED_STORE);
                self.link.send(LoopReport::Init { active: false });
                return Ok(());
            }

            self.tip = match self
                .store
                .fetch_latest_block()
                .await
                .map_err(Abort::outside)?
            {
                Some(block) => ChainTip {
                    previous_hash: assembler::block_hash(&block, &self.sign_prefix),
                    previous_ts: block.processed_ts,
                    next_block_id: block.block_id + 1,
                },
                None => ChainTip::genesis(),
            };
            info!(
                next_block_id = self.tip.next_block_id,
                previous_ts = self.tip.previous_ts,
                "chain tip rebuilt from store"
            );

            self.store
                .set_statement_timeout(self.config.statement_timeout_ms())
                .await
                .map_err(Abort::outside)?;
        }
        if initializing {
            self.link.send(LoopReport::Init { active: false });
        }

        // 6. Pending fetch, then the in-memory secondary sort that keeps
        // ordering deterministic across restarts mid-block.
        let mut pending = self
            .store
            .fetch_pending(self.config.transactions_per_block as i64)
            .await
            .map_err(Abort::outside)?;
        pending.sort_by(|a, b| {
            a.create_ts
                .cmp(&b.create_ts)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });

        // 7. Open the block transaction and the first savepoint.
        self.store.begin_block().await.map_err(Abort::inside)?;

        // 8. Block timestamp: strictly after the previous block, warned
        // once per clock-regression episode. Read the clock again - the
        // fetch above took time, and a regression between the two reads is
        // exactly what the bump covers.
        let ts_now = self.clock.now_ms();
        let block_ts = ts_now.max(self.tip.previous_ts + 1);
        if ts_now <= self.tip.previous_ts {
            if !self.time_warning {
                warn!(
                    now = ts_now,
                    previous_ts = self.tip.previous_ts,
                    "clock is not past the previous block; bumping block timestamp"
                );
                self.time_warning = true;
            }
        } else if self.time_warning {
            self.time_warning = false;
        }

        let ctx = ExecutionContext {
            block_id: self.tip.next_block_id,
            block_ts,
            processor_address: self.processor_address.clone(),
            previous_block_ts: self.tip.previous_ts,
            previous_block_hash: self.tip.previous_hash,
            strict: true,
        };

        // 9. Per-transaction loop, preserving fetch order.
        let mut processed: Vec<ProcessedTransaction> = Vec::new();
        let mut block_txs: Vec<PendingTransaction> = Vec::new();
        let mut packed_size = 0usize;

        for tx in pending {
            // 9a. Size budget: stop admitting once this transaction would
            // overflow the block.
            if packed_size + tx.packed_len() > self.config.max_block_size {
                debug!(
                    packed_size,
                    tx_size = tx.packed_len(),
                    "block size budget reached"
                );
                break;
            }

            // 9b-9c. Structural validation and execution live behind the
            // runtime; it classifies everything into one outcome.
            let result = self.runtime.execute(&mut self.store, &tx, &ctx).await;

            // 9d. Savepoint control by outcome.
            if result.keeps_side_effects() {
                self.store.savepoint_advance().await.map_err(Abort::inside)?;
            } else {
                self.store
                    .savepoint_rollback()
                    .await
                    .map_err(Abort::inside)?;
            }

            // 9e. Resolve contract type after execution, so freshly
            // created contracts resolve by name.
            let contract_type = self.runtime.contract_type(&tx.contract_hash);

            match result.status() {
                // Retry: leave the transaction untouched for a later tick.
                None => {
                    debug!(tx = %tx.transaction_id, "transient contract failure; leaving transaction pending");
                }
                Some(status) => {
                    // 9f. Into the block iff accepted, legacy-rejected, or
                    // rejected while rejected transactions are kept.
                    let in_block = match &result {
                        ExecutionResult::Accepted { .. } | ExecutionResult::V1Rejected { .. } => {
                            true
                        }
                        ExecutionResult::Rejected { .. } => !self.config.exclude_rejected,
                        _ => false,
                    };

                    // 9g. Derived metadata.
                    let sender = address_from_public_key(&tx.public_key);
                    let receiver = tx
                        .payload_object()
                        .and_then(|payload| coerce_receiver(payload.get("receiver")));
                    let message = result.message().map(sanitize_message);

                    let (block_id, position_in_block) = if in_block {
                        let position = block_txs.len() as i32;
                        packed_size += tx.packed_len();
                        (Some(self.tip.next_block_id), Some(position))
                    } else {
                        (None, None)
                    };

                    processed.push(ProcessedTransaction {
                        transaction_id: tx.transaction_id,
                        status,
                        message,
                        processed_ts: block_ts,
                        block_id,
                        position_in_block,
                        sender,
                        contract_type,
                        receiver,
                    });

                    if in_block {
                        block_txs.push(tx);
                    }
                }
            }

            // 9h. Time budget: the block must close before the interval
            // deadline. No previous block means no deadline yet.
            if self.tip.previous_ts != 0
                && self.clock.now_ms() - self.config.close_margin_ms
                    > self.tip.previous_ts + self.config.full_interval_ms()
            {
                debug!("block time budget reached");
                break;
            }
        }

        // 10. Back to the processor role for the bookkeeping statements.
        self.store.reset_role().await.map_err(Abort::inside)?;

        // 11. One statement terminalises everything that reached a
        // terminal status this tick.
        if !processed.is_empty() {
            self.store
                .bulk_update_statuses(&processed)
                .await
                .map_err(Abort::inside)?;
        }

        // 12. Block-or-no-block: emit when something was packed, when the
        // chain has no genesis yet, or when the heartbeat interval is up.
        let emit_block = !block_txs.is_empty()
            || self.tip.previous_ts == 0
            || self.tip.previous_ts + self.config.full_interval_ms()
                <= now + self.config.pacing_slack_ms;

        if !emit_block {
            if self.shutdown_requested() {
                return self.leave_uncommitted();
            }
            self.store.commit_fast().await.map_err(Abort::inside)?;

            if !processed.is_empty() {
                let payload = MiningConfig::heartbeat_payload(block_ts, processed.len());
                if let Err(e) = self.store.notify(BLOCKS_CHANNEL, &payload).await {
                    warn!(error = %e, "block notification failed");
                }
                info!(terminalised = processed.len(), "status-only tick committed");
            }
            return Ok(());
        }

        // 13. Sign, insert, durable commit, then advance the tip.
        let block = assembler::sign_block(
            &self.tip,
            &block_txs,
            block_ts,
            &self.keypair,
            &self.sign_prefix,
            BLOCK_VERSION,
        );
        self.store.insert_block(&block).await.map_err(Abort::inside)?;

        if self.shutdown_requested() {
            return self.leave_uncommitted();
        }
        self.store.commit_durable().await.map_err(Abort::inside)?;

        let block_hash = assembler::block_hash(&block, &self.sign_prefix);
        self.tip = ChainTip {
            previous_hash: block_hash,
            previous_ts: block_ts,
            next_block_id: self.tip.next_block_id + 1,
        };

        let other = processed.len() - block_txs.len();
        let payload = MiningConfig::block_payload(
            block.block_id,
            block_ts,
            block.transactions_amount,
            other,
        );
        if let Err(e) = self.store.notify(BLOCKS_CHANNEL, &payload).await {
            warn!(error = %e, "block notification failed");
        }

        info!(
            block_id = block.block_id,
            transactions = block.transactions_amount,
            other,
            hash = %hex::encode(block_hash),
            "block mined"
        );
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Shutdown arrived mid-tick: skip the commit so the store rolls the
    /// open transaction back on connection close, and flag the session for
    /// rollback in case another tick still runs.
    fn leave_uncommitted(&mut self) -> Result<(), Abort> {
        info!("shutdown requested; leaving the mining transaction uncommitted");
        self.should_rollback = true;
        Ok(())
    }

    fn abort_mining(&mut self, abort: Abort) {
        self.failures += 1;
        if abort.in_transaction {
            self.should_rollback = true;
        }
        error!(
            error = %abort.error,
            consecutive_failures = self.failures,
            "mining tick aborted"
        );
        if self.failures > 3 {
            warn!(
                consecutive_failures = self.failures,
                "mining keeps failing; the store connection may be unhealthy"
            );
        }
        self.is_mining = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::LoopReport;
    use async_trait::async_trait;
    use ql_01_store_gateway::{Result as StoreResult, StoreError};
    use shared_types::{Block, Contract, Hash256};

    /// Clock returning a fixed instant.
    struct FixedClock(i64);
    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    /// Link capturing reports.
    #[derive(Default)]
    struct CapturedLink(Vec<LoopReport>);
    impl SupervisorLink for CapturedLink {
        fn send(&mut self, report: LoopReport) {
            self.0.push(report);
        }
    }

    /// Store that panics on any use; for asserting a tick never touches
    /// the store.
    struct UntouchableStore;

    #[async_trait]
    impl ChainStore for UntouchableStore {
        async fn connect(&mut self) -> StoreResult<Connected> {
            panic!("store touched")
        }
        async fn fetch_pending(&mut self, _: i64) -> StoreResult<Vec<PendingTransaction>> {
            panic!("store touched")
        }
        async fn fetch_latest_block(&mut self) -> StoreResult<Option<Block>> {
            panic!("store touched")
        }
        async fn fetch_contracts(&mut self) -> StoreResult<Vec<Contract>> {
            panic!("store touched")
        }
        async fn fetch_server_version(&mut self) -> StoreResult<i64> {
            panic!("store touched")
        }
        async fn set_statement_timeout(&mut self, _: i64) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn begin_block(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn savepoint_rollback(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn savepoint_advance(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn reset_role(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn run_contract_code(
            &mut self,
            _: &str,
            _: &[(&'static str, String)],
        ) -> StoreResult<Option<String>> {
            panic!("store touched")
        }
        async fn create_contract(&mut self, _: &Contract) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn delete_contract(&mut self, _: &Hash256) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn bulk_update_statuses(&mut self, _: &[ProcessedTransaction]) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn insert_block(&mut self, _: &Block) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn commit_durable(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn commit_fast(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn rollback_all(&mut self) -> StoreResult<()> {
            panic!("store touched")
        }
        async fn notify(&mut self, _: &str, _: &str) -> StoreResult<()> {
            panic!("store touched")
        }
    }

    /// Store whose connect always fails.
    struct DeadStore;

    #[async_trait]
    impl ChainStore for DeadStore {
        async fn connect(&mut self) -> StoreResult<Connected> {
            Err(StoreError::NotConnected)
        }
        async fn fetch_pending(&mut self, _: i64) -> StoreResult<Vec<PendingTransaction>> {
            Err(StoreError::NotConnected)
        }
        async fn fetch_latest_block(&mut self) -> StoreResult<Option<Block>> {
            Err(StoreError::NotConnected)
        }
        async fn fetch_contracts(&mut self) -> StoreResult<Vec<Contract>> {
            Err(StoreError::NotConnected)
        }
        async fn fetch_server_version(&mut self) -> StoreResult<i64> {
            Err(StoreError::NotConnected)
        }
        async fn set_statement_timeout(&mut self, _: i64) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn begin_block(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn savepoint_rollback(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn savepoint_advance(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn reset_role(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn run_contract_code(
            &mut self,
            _: &str,
            _: &[(&'static str, String)],
        ) -> StoreResult<Option<String>> {
            Err(StoreError::NotConnected)
        }
        async fn create_contract(&mut self, _: &Contract) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn delete_contract(&mut self, _: &Hash256) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn bulk_update_statuses(&mut self, _: &[ProcessedTransaction]) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn insert_block(&mut self, _: &Block) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn commit_durable(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn commit_fast(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn rollback_all(&mut self) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
        async fn notify(&mut self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::NotConnected)
        }
    }

    fn service<S: ChainStore>(
        store: S,
        now: i64,
    ) -> MiningService<S, FixedClock, CapturedLink> {
        let keypair = ProcessorKeyPair::from_bytes(&[0x51u8; 32]).unwrap();
        MiningService::new(
            store,
            ContractRuntime::new(b"test".to_vec()),
            keypair,
            b"test".to_vec(),
            MiningConfig::default(),
            FixedClock(now),
            CapturedLink::default(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_pacing_gate_skips_silently() {
        let now = 1_700_000_000_000;
        let mut svc = service(UntouchableStore, now);
        // Previous block was just mined: the floor has not passed.
        svc.tip = ChainTip {
            previous_hash: [1; 32],
            previous_ts: now - 1_000,
            next_block_id: 5,
        };
        svc.tick().await;
        assert!(!svc.is_mid_tick());
        assert!(svc.link.0.is_empty());
    }

    #[tokio::test]
    async fn test_reentry_gate_reports_heavy_load() {
        let now = 1_700_000_000_000;
        let mut svc = service(UntouchableStore, now);
        svc.force_mining_flag();
        svc.tick().await;
        assert_eq!(svc.link.0, vec![LoopReport::HeavyLoad]);
        // The long tick still owns the flag.
        assert!(svc.is_mid_tick());
    }

    #[tokio::test]
    async fn test_connect_failure_counts_and_clears_mining_flag() {
        let now = 1_700_000_000_000;
        let mut svc = service(DeadStore, now);
        svc.tick().await;
        assert_eq!(svc.failures(), 1);
        assert!(!svc.is_mid_tick());
        // Connect failed outside a transaction: no rollback flag.
        assert!(!svc.should_rollback);

        for _ in 0..4 {
            svc.tick().await;
        }
        assert_eq!(svc.failures(), 5);
    }
}
