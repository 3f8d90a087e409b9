//! End-to-end mining scenarios.
//!
//! Each test drives the real mining service and contract runtime against
//! the in-memory store double; only the store, clock and supervisor link
//! are fakes.

use crate::harness::*;
use ql_03_block_mining::domain::assembler;
use ql_03_block_mining::ports::LoopReport;
use ql_03_block_mining::{MiningConfig, EXIT_UNSUPPORTED_STORE};
use shared_types::{TransactionStatus, CREATE_CONTRACT_HASH};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const T0: i64 = 1_700_000_000_000;

fn fast_config() -> MiningConfig {
    MiningConfig {
        block_interval_secs: 2,
        min_block_interval_secs: 1,
        ..MiningConfig::default()
    }
}

struct Setup {
    store: MemoryStore,
    clock: QueueClock,
    link: RecordingLink,
    shutdown: Arc<AtomicBool>,
    service: TestService,
}

fn setup(config: MiningConfig) -> Setup {
    let store = MemoryStore::new();
    let clock = QueueClock::at(T0);
    let link = RecordingLink::default();
    let shutdown = Arc::new(AtomicBool::new(false));
    let service = build_service(&store, &clock, &link, config, Arc::clone(&shutdown));
    Setup {
        store,
        clock,
        link,
        shutdown,
        service,
    }
}

fn tx_id(id: u8) -> Uuid {
    Uuid::from_bytes([id; 16])
}

#[tokio::test]
async fn test_simple_accepted_pair() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let (payload, contract_hash) = create_payload("Echo", "SELECT '1';");
    s.store
        .add_pending(pending_tx(&backend, 1, CREATE_CONTRACT_HASH, &payload, T0 - 100));
    s.store
        .add_pending(pending_tx(&backend, 2, contract_hash, r#"{"amount": 1}"#, T0 - 50));

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks.len(), 1);
    assert_eq!(state.blocks[0].block_id, 0);
    assert_eq!(state.blocks[0].transactions_amount, 2);
    assert!(state.pending.is_empty());
    assert!(state.contracts.contains_key(&contract_hash));

    assert_eq!(state.processed.len(), 2);
    for row in state.processed.values() {
        assert_eq!(row.status, TransactionStatus::Accepted);
        assert_eq!(row.block_id, Some(0));
    }
    let create_row = &state.processed[&tx_id(1)];
    let use_row = &state.processed[&tx_id(2)];
    assert_eq!(create_row.position_in_block, Some(0));
    assert_eq!(create_row.contract_type, "Create Contract");
    assert_eq!(use_row.position_in_block, Some(1));
    assert_eq!(use_row.contract_type, "Echo");

    // The block is signed by the processor and announced.
    assert!(assembler::verify_block(
        &state.blocks[0],
        SIGN_PREFIX,
        &processor_keypair().public_key()
    ));
    let (channel, payload) = state.notifications.last().unwrap();
    assert_eq!(channel, "blocks");
    let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(payload["block"], 0);
    assert_eq!(payload["txs"], 2);
    assert_eq!(payload["other"], 0);
}

#[tokio::test]
async fn test_block_splits_on_size() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    // Each create payload (base64-inflated code) exceeds half the block
    // size budget, so only one fits per block.
    let big_a = "-- a\n".repeat(120_000);
    let big_b = "-- b\n".repeat(120_000);
    let (payload_a, _) = create_payload("BigA", &big_a);
    let (payload_b, _) = create_payload("BigB", &big_b);
    assert!(payload_a.len() > 500_000);
    s.store
        .add_pending(pending_tx(&backend, 1, CREATE_CONTRACT_HASH, &payload_a, T0 - 20));
    s.store
        .add_pending(pending_tx(&backend, 2, CREATE_CONTRACT_HASH, &payload_b, T0 - 10));

    s.service.tick().await;
    s.clock.set(T0 + 2_000);
    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks.len(), 2);
    assert_eq!(state.blocks[0].transactions_amount, 1);
    assert_eq!(state.blocks[1].transactions_amount, 1);
    assert!(state.pending.is_empty());
    assert_eq!(state.contracts.len(), 2);
    for block in &state.blocks {
        assert!(block.transactions.len() <= MiningConfig::default().max_block_size);
    }
}

#[tokio::test]
async fn test_invalid_in_the_middle_preserves_order() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let contract = deployed_contract("Transfer", "SELECT 1;");
    let hash = contract.hash;
    s.store.seed_contract(contract);
    s.store.script("SELECT 1;", ScriptOutcome::Return(None));
    s.store.script(
        "SELECT 1;",
        ScriptOutcome::Fail {
            sqlstate: "42601".into(),
            message: "syntax error in contract".into(),
        },
    );
    s.store.script("SELECT 1;", ScriptOutcome::Return(None));

    s.store.add_pending(pending_tx(&backend, 1, hash, "{}", T0 - 30));
    s.store.add_pending(pending_tx(&backend, 2, hash, "{}", T0 - 20));
    s.store.add_pending(pending_tx(&backend, 3, hash, "{}", T0 - 10));

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.processed.len(), 3);

    let first = &state.processed[&tx_id(1)];
    let broken = &state.processed[&tx_id(2)];
    let third = &state.processed[&tx_id(3)];

    assert_eq!(first.status, TransactionStatus::Accepted);
    assert_eq!(third.status, TransactionStatus::Accepted);
    assert_eq!(first.position_in_block, Some(0));
    assert_eq!(third.position_in_block, Some(1));
    assert_ne!(first.contract_type, "Unknown");
    assert_ne!(third.contract_type, "Unknown");

    assert_eq!(broken.status, TransactionStatus::Invalid);
    assert_eq!(broken.block_id, None);
    assert_eq!(broken.position_in_block, None);

    assert_eq!(state.blocks.len(), 1);
    assert_eq!(state.blocks[0].transactions_amount, 2);
}

#[tokio::test]
async fn test_retry_does_not_consume() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let contract = deployed_contract("Flaky", "SELECT 2;");
    let hash = contract.hash;
    s.store.seed_contract(contract);
    s.store.script(
        "SELECT 2;",
        ScriptOutcome::Fail {
            sqlstate: "57014".into(),
            message: "canceling statement due to statement timeout".into(),
        },
    );
    s.store.add_pending(pending_tx(&backend, 7, hash, "{}", T0 - 10));

    s.service.tick().await;
    {
        let state = s.store.handle();
        let state = state.lock();
        // Still pending, not terminalised; the genesis heartbeat block is
        // forced but carries nothing.
        assert_eq!(state.pending.len(), 1);
        assert!(state.processed.is_empty());
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.blocks[0].transactions_amount, 0);
    }

    s.clock.set(T0 + 2_000);
    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert!(state.pending.is_empty());
    assert_eq!(state.processed[&tx_id(7)].status, TransactionStatus::Accepted);
    assert_eq!(state.blocks.len(), 2);
    assert_eq!(state.blocks[1].transactions_amount, 1);
}

#[tokio::test]
async fn test_stay_down_on_old_server_version() {
    let mut s = setup(fast_config());
    s.store.handle().lock().server_version = 90_400;

    s.service.tick().await;

    assert_eq!(s.service.exit_request(), Some(EXIT_UNSUPPORTED_STORE));
    let state = s.store.handle();
    let state = state.lock();
    assert!(state.blocks.is_empty());
    assert!(state.processed.is_empty());
}

#[tokio::test]
async fn test_clock_regression_bumps_once_per_episode() {
    let mut s = setup(fast_config());

    s.service.tick().await; // block 0 at T0
    assert!(!s.service.clock_warning_active());

    // Second tick: the pacing gate sees a healthy clock, but the clock
    // regresses to T0 before the block timestamp is computed.
    s.clock.set(T0 + 2_500);
    s.clock.push(T0 + 2_500); // pacing gate
    s.clock.push(T0); // block timestamp read
    s.service.tick().await;
    assert!(s.service.clock_warning_active());

    // Third tick: the clock is healthy again; the warning clears.
    s.clock.set(T0 + 6_000);
    s.service.tick().await;
    assert!(!s.service.clock_warning_active());

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks.len(), 3);
    assert_eq!(state.blocks[0].processed_ts, T0);
    // Bumped strictly past the previous block despite the regression.
    assert_eq!(state.blocks[1].processed_ts, T0 + 1);
    assert!(state.blocks[2].processed_ts > state.blocks[1].processed_ts);
}

#[tokio::test]
async fn test_heartbeat_only_after_interval() {
    let mut s = setup(fast_config());

    s.service.tick().await; // forced genesis
    assert_eq!(s.store.handle().lock().blocks.len(), 1);

    // Interval not yet elapsed: status-only tick, no block.
    s.clock.set(T0 + 1_600);
    s.service.tick().await;
    assert_eq!(s.store.handle().lock().blocks.len(), 1);

    // (min + block) elapsed: exactly one heartbeat block.
    s.clock.set(T0 + 3_000);
    s.service.tick().await;
    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks.len(), 2);
    assert_eq!(state.blocks[1].transactions_amount, 0);
}

#[tokio::test]
async fn test_chain_linkage_and_density() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let contract = deployed_contract("Transfer", "SELECT 1;");
    let hash = contract.hash;
    s.store.seed_contract(contract);

    s.store.add_pending(pending_tx(&backend, 1, hash, "{}", T0 - 10));
    s.service.tick().await;

    s.store.add_pending(pending_tx(&backend, 2, hash, "{}", T0 + 1_990));
    s.clock.set(T0 + 2_000);
    s.service.tick().await;

    s.clock.set(T0 + 5_000);
    s.service.tick().await; // heartbeat

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks.len(), 3);
    for (i, block) in state.blocks.iter().enumerate() {
        assert_eq!(block.block_id, i as i64);
        assert!(assembler::verify_block(
            block,
            SIGN_PREFIX,
            &processor_keypair().public_key()
        ));
        if i > 0 {
            let previous = &state.blocks[i - 1];
            assert_eq!(
                block.previous_block_hash,
                assembler::block_hash(previous, SIGN_PREFIX)
            );
            assert!(block.processed_ts > previous.processed_ts);
        } else {
            assert_eq!(block.previous_block_hash, [0u8; 32]);
        }
    }
}

#[tokio::test]
async fn test_order_is_deterministic_on_create_ts_ties() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let contract = deployed_contract("Transfer", "SELECT 1;");
    let hash = contract.hash;
    s.store.seed_contract(contract);

    // Inserted out of id order, identical create_ts: the id tiebreak must
    // decide positions.
    s.store.add_pending(pending_tx(&backend, 9, hash, "{}", T0 - 10));
    s.store.add_pending(pending_tx(&backend, 3, hash, "{}", T0 - 10));

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.processed[&tx_id(3)].position_in_block, Some(0));
    assert_eq!(state.processed[&tx_id(9)].position_in_block, Some(1));
}

#[tokio::test]
async fn test_transactions_per_block_cap() {
    let mut config = fast_config();
    config.transactions_per_block = 2;
    let mut s = setup(config);
    let backend = backend_keypair();
    let contract = deployed_contract("Transfer", "SELECT 1;");
    let hash = contract.hash;
    s.store.seed_contract(contract);
    for id in 1..=3u8 {
        s.store
            .add_pending(pending_tx(&backend, id, hash, "{}", T0 - 10 + id as i64));
    }

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    assert_eq!(state.blocks[0].transactions_amount, 2);
    assert_eq!(state.pending.len(), 1);
    assert_eq!(state.pending[0].transaction_id, tx_id(3));
}

#[tokio::test]
async fn test_exclude_rejected_keeps_terminal_but_out_of_block() {
    let mut config = fast_config();
    config.exclude_rejected = true;
    let mut s = setup(config);
    let backend = backend_keypair();
    let contract = deployed_contract("Strict", "SELECT 3;");
    let hash = contract.hash;
    s.store.seed_contract(contract);
    s.store.script(
        "SELECT 3;",
        ScriptOutcome::Fail {
            sqlstate: "P0001".into(),
            message: "reject: over the limit".into(),
        },
    );
    s.store.add_pending(pending_tx(&backend, 4, hash, "{}", T0 - 10));

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    let row = &state.processed[&tx_id(4)];
    assert_eq!(row.status, TransactionStatus::Rejected);
    assert_eq!(row.message.as_deref(), Some("over the limit"));
    assert_eq!(row.block_id, None);
    // Genesis is still forced, but carries nothing.
    assert_eq!(state.blocks[0].transactions_amount, 0);

    let (_, payload) = state.notifications.last().unwrap();
    let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(payload["other"], 1);
}

#[tokio::test]
async fn test_rejected_included_by_default() {
    let mut s = setup(fast_config());
    let backend = backend_keypair();
    let contract = deployed_contract("Strict", "SELECT 3;");
    let hash = contract.hash;
    s.store.seed_contract(contract);
    s.store.script(
        "SELECT 3;",
        ScriptOutcome::Fail {
            sqlstate: "P0001".into(),
            message: "reject: over the limit".into(),
        },
    );
    s.store.add_pending(pending_tx(&backend, 4, hash, "{}", T0 - 10));

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    let row = &state.processed[&tx_id(4)];
    assert_eq!(row.status, TransactionStatus::Rejected);
    assert_eq!(row.block_id, Some(0));
    assert_eq!(row.position_in_block, Some(0));
    assert_eq!(state.blocks[0].transactions_amount, 1);
}

#[tokio::test]
async fn test_crash_at_any_step_is_atomic() {
    use FailPoint::*;
    for point in [
        Connect,
        FetchPending,
        BeginBlock,
        SavepointAdvance,
        ResetRole,
        BulkUpdate,
        InsertBlock,
        CommitDurable,
    ] {
        let mut s = setup(fast_config());
        let backend = backend_keypair();
        let contract = deployed_contract("Transfer", "SELECT 1;");
        let hash = contract.hash;
        s.store.seed_contract(contract);
        s.store.add_pending(pending_tx(&backend, 1, hash, "{}", T0 - 10));
        s.store.fail_once(point);

        s.service.tick().await;
        {
            let state = s.store.handle();
            let state = state.lock();
            // Indistinguishable from the tick never having started.
            assert!(state.blocks.is_empty(), "leaked block after {point:?}");
            assert!(
                state.processed.is_empty(),
                "leaked status update after {point:?}"
            );
            assert_eq!(state.pending.len(), 1, "consumed pending after {point:?}");
            assert_eq!(state.commits, 0, "commit happened despite {point:?}");
        }
        assert_eq!(s.service.failures(), 1);

        // Next tick recovers and completes as if nothing happened.
        s.clock.set(T0 + 2_000);
        s.service.tick().await;
        let state = s.store.handle();
        let state = state.lock();
        assert_eq!(state.blocks.len(), 1, "no recovery after {point:?}");
        assert_eq!(
            state.processed[&tx_id(1)].status,
            TransactionStatus::Accepted,
            "transaction lost after {point:?}"
        );
        assert!(state.pending.is_empty());
        assert_eq!(s.service.failures(), 0);
    }
}

#[tokio::test]
async fn test_shutdown_skips_the_final_commit() {
    let mut s = setup(fast_config());
    s.shutdown.store(true, Ordering::SeqCst);

    s.service.tick().await;

    let state = s.store.handle();
    let state = state.lock();
    // The genesis block was staged but never committed.
    assert_eq!(state.commits, 0);
    assert!(state.blocks.is_empty());
}

#[tokio::test]
async fn test_progress_and_init_reports() {
    let mut s = setup(fast_config());
    s.service.tick().await;

    let reports = s.link.reports.lock();
    // Fresh connection: init brackets the startup work, then progress.
    assert_eq!(
        *reports,
        vec![
            LoopReport::Init { active: true },
            LoopReport::Init { active: false },
            LoopReport::Progress,
        ]
    );
}

#[tokio::test]
async fn test_statement_timeout_follows_block_interval() {
    let mut s = setup(fast_config());
    s.service.tick().await;
    assert_eq!(
        s.store.handle().lock().statement_timeout_ms,
        Some(2_000)
    );
}
