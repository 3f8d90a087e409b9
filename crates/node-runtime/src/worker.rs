//! The worker process: builds the mining stack and drives the tick timer.
//!
//! Reports go to stdout as JSON lines (see [`crate::ipc`]); logs go to
//! stderr. A `shutdown` message on stdin, SIGINT or SIGTERM sets the
//! shared shutdown flag; the loop finishes the tick it is in, skips the
//! final commit, and exits 0.

use crate::config::ProcessorConfig;
use crate::ipc::{self, MasterMessage, WorkerMessage};
use ql_01_store_gateway::PostgresGateway;
use ql_02_contract_runtime::ContractRuntime;
use ql_03_block_mining::ports::{LoopReport, SupervisorLink, SystemClock};
use ql_03_block_mining::{MiningService, EXIT_CLEAN};
use shared_crypto::ProcessorKeyPair;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sysinfo::{get_current_pid, Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Forwards loop reports to the supervisor over stdout, attaching the
/// worker's resident memory to progress reports.
struct StdoutLink {
    system: System,
    pid: Option<Pid>,
}

impl StdoutLink {
    fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().ok(),
        }
    }

    fn memory_mb(&mut self) -> u64 {
        let Some(pid) = self.pid else { return 0 };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|p| p.memory() / (1024 * 1024))
            .unwrap_or(0)
    }

    fn emit(&self, message: &WorkerMessage) {
        let mut stdout = std::io::stdout();
        let delivered = writeln!(stdout, "{}", ipc::encode(message)).and_then(|_| stdout.flush());
        if delivered.is_err() {
            warn!("could not deliver a report to the supervisor");
        }
    }
}

impl SupervisorLink for StdoutLink {
    fn send(&mut self, report: LoopReport) {
        match report {
            LoopReport::Progress => {
                let memory_mb = self.memory_mb();
                self.emit(&WorkerMessage::Report { memory_mb });
            }
            LoopReport::Init { active } => self.emit(&WorkerMessage::Init { init: active }),
            LoopReport::HeavyLoad => warn!("mining loop is under heavy load"),
        }
    }
}

fn spawn_shutdown_listeners(flag: Arc<AtomicBool>) {
    let stdin_flag = Arc::clone(&flag);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(MasterMessage::Shutdown) = ipc::decode(&line) {
                info!("shutdown message received");
                stdin_flag.store(true, Ordering::SeqCst);
            }
        }
    });

    tokio::spawn(async move {
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut int), Ok(mut term)) => {
                tokio::select! {
                    _ = int.recv() => {}
                    _ = term.recv() => {}
                }
                info!("signal received; shutting down after the current tick");
                flag.store(true, Ordering::SeqCst);
            }
            _ => warn!("cannot install worker signal handlers"),
        }
    });
}

/// Run the worker until shutdown or a stay-down condition. Returns the
/// process exit code.
pub async fn run(config: ProcessorConfig) -> i32 {
    let key_bytes = match shared_crypto::wif_decode(&config.private_key) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "private key rejected");
            return 1;
        }
    };
    let keypair = match ProcessorKeyPair::from_bytes(&key_bytes) {
        Ok(keypair) => keypair,
        Err(e) => {
            error!(error = %e, "private key rejected");
            return 1;
        }
    };

    let is_shutting_down = Arc::new(AtomicBool::new(false));
    spawn_shutdown_listeners(Arc::clone(&is_shutting_down));

    let sign_prefix = config.sign_prefix.clone().into_bytes();
    let mut service = MiningService::new(
        PostgresGateway::new(config.pg_options()),
        ContractRuntime::new(sign_prefix.clone()),
        keypair,
        sign_prefix,
        config.mining_config(),
        SystemClock,
        StdoutLink::new(),
        Arc::clone(&is_shutting_down),
    );
    info!(address = %service.processor_address(), "worker ready");

    let mut ticker = interval(Duration::from_secs(config.min_block_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if is_shutting_down.load(Ordering::SeqCst) {
            break;
        }
        service.tick().await;
        if let Some(code) = service.exit_request() {
            info!(code, "mining loop requested process exit");
            return code;
        }
        if is_shutting_down.load(Ordering::SeqCst) {
            break;
        }
    }

    info!("worker shut down cleanly");
    EXIT_CLEAN
}
