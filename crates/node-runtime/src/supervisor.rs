//! The master process: spawns the worker, watches its liveness and
//! memory, and owns the restart policy.
//!
//! Policy:
//!
//! - exit 0: restart after 1 s, unless a shutdown is in progress
//! - exit 50..60: stay down - restarting would repeat the damage
//! - any other exit: restart after 1 s; spawn failures back off
//!   exponentially up to 5 minutes
//! - a worker that misses 4 consecutive liveness checks (and is not
//!   initialising) is killed
//! - a worker whose reported memory exceeds `MAX_MEMORY` is killed
//! - SIGINT: graceful shutdown; SIGTERM: graceful with a 10 s SIGKILL
//!   timer

use crate::config::ProcessorConfig;
use crate::ipc::{self, MasterMessage, WorkerMessage};
use crate::{CONFIG_ENV, WORKER_FLAG};
use ql_03_block_mining::{is_stay_down, EXIT_CLEAN, EXIT_INCOMPLETE_SHUTDOWN};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

const RESTART_DELAY: Duration = Duration::from_secs(1);
const MAX_SPAWN_BACKOFF: Duration = Duration::from_secs(300);
const HARD_KILL_DELAY: Duration = Duration::from_secs(10);
const MISS_STREAK_LIMIT: u32 = 4;

/// What to do after a worker exit.
#[derive(Debug, PartialEq, Eq)]
enum ExitDecision {
    /// Start a new worker after the restart delay.
    Restart,
    /// Exit with the worker's code and do not restart.
    StayDown(i32),
    /// Shutdown completed cleanly.
    CleanExit,
    /// Shutdown was requested but the worker did not exit cleanly.
    Incomplete,
}

fn classify_exit(code: Option<i32>, shutting_down: bool) -> ExitDecision {
    match code {
        Some(0) if shutting_down => ExitDecision::CleanExit,
        Some(0) => ExitDecision::Restart,
        Some(code) if is_stay_down(code) => ExitDecision::StayDown(code),
        _ if shutting_down => ExitDecision::Incomplete,
        _ => ExitDecision::Restart,
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_SPAWN_BACKOFF)
}

/// Missed-tick accounting. `Init` messages pause the streak: a worker in
/// a long initialisation transaction is alive, just busy.
struct Watchdog {
    misses: u32,
    saw_report: bool,
    init_active: bool,
}

impl Watchdog {
    fn new() -> Self {
        Self {
            misses: 0,
            saw_report: false,
            init_active: false,
        }
    }

    fn on_message(&mut self, message: &WorkerMessage) {
        match message {
            WorkerMessage::Report { .. } => self.saw_report = true,
            WorkerMessage::Init { init } => {
                self.init_active = *init;
                self.misses = 0;
            }
        }
    }

    /// Periodic check; returns true when the worker should be killed.
    fn on_check(&mut self) -> bool {
        if self.init_active {
            self.saw_report = false;
            return false;
        }
        if self.saw_report {
            self.misses = 0;
        } else {
            self.misses += 1;
        }
        self.saw_report = false;
        self.misses >= MISS_STREAK_LIMIT
    }
}

fn spawn_worker(config: &ProcessorConfig) -> std::io::Result<Child> {
    let exe = std::env::current_exe()?;
    let config_json = serde_json::to_string(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Command::new(exe)
        .arg(WORKER_FLAG)
        .env(CONFIG_ENV, config_json)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

async fn send_shutdown(stdin: &mut Option<ChildStdin>) {
    if let Some(stdin) = stdin {
        let line = format!("{}\n", ipc::encode(&MasterMessage::Shutdown));
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, "could not deliver shutdown message to worker");
        }
    }
}

/// Run the supervisor until shutdown or a stay-down exit. Returns the
/// process exit code.
pub async fn run(config: ProcessorConfig) -> i32 {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(int), Ok(term)) => (int, term),
        _ => {
            error!("cannot install signal handlers");
            return 1;
        }
    };

    let mut spawn_backoff = RESTART_DELAY;
    let mut shutting_down = false;

    loop {
        let mut child = match spawn_worker(&config) {
            Ok(child) => {
                spawn_backoff = RESTART_DELAY;
                child
            }
            Err(e) => {
                error!(error = %e, backoff_secs = spawn_backoff.as_secs(), "failed to spawn worker");
                sleep(spawn_backoff).await;
                spawn_backoff = next_backoff(spawn_backoff);
                continue;
            }
        };
        info!(pid = ?child.id(), "worker started");

        let code = supervise_child(
            &mut child,
            &config,
            &mut sigint,
            &mut sigterm,
            &mut shutting_down,
        )
        .await;

        match classify_exit(code, shutting_down) {
            ExitDecision::CleanExit => {
                info!("worker exited cleanly; shutdown complete");
                return EXIT_CLEAN;
            }
            ExitDecision::Incomplete => {
                warn!(?code, "worker did not exit cleanly during shutdown");
                return EXIT_INCOMPLETE_SHUTDOWN;
            }
            ExitDecision::StayDown(code) => {
                error!(code, "worker requested stay-down; not restarting");
                return code;
            }
            ExitDecision::Restart => {
                info!(?code, "restarting worker");
                sleep(RESTART_DELAY).await;
            }
        }
    }
}

/// What a select round decided; applied after the `child.wait()` borrow
/// is released.
enum Action {
    None,
    Kill,
    Shutdown { hard: bool },
}

/// Watch one worker until it exits. Returns its exit code, if any.
async fn supervise_child(
    child: &mut Child,
    config: &ProcessorConfig,
    sigint: &mut Signal,
    sigterm: &mut Signal,
    shutting_down: &mut bool,
) -> Option<i32> {
    let mut stdin = child.stdin.take();
    let Some(stdout) = child.stdout.take() else {
        let _ = child.start_kill();
        return child.wait().await.ok().and_then(|s| s.code());
    };
    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;

    let mut watchdog = Watchdog::new();
    let mut check = interval(Duration::from_secs(config.block_interval * 2));
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    check.tick().await; // the first tick completes immediately

    let hard_kill = sleep(HARD_KILL_DELAY);
    tokio::pin!(hard_kill);
    let mut hard_armed = false;

    loop {
        let action = tokio::select! {
            status = child.wait() => {
                return status.ok().and_then(|s| s.code());
            }

            line = lines.next_line(), if stdout_open => {
                match line {
                    Ok(Some(line)) => match ipc::decode::<WorkerMessage>(&line) {
                        Some(message) => {
                            watchdog.on_message(&message);
                            match message {
                                WorkerMessage::Report { memory_mb }
                                    if memory_mb > config.max_memory =>
                                {
                                    warn!(
                                        memory_mb,
                                        limit = config.max_memory,
                                        "worker exceeded its memory limit; restarting"
                                    );
                                    Action::Kill
                                }
                                _ => Action::None,
                            }
                        }
                        None => {
                            warn!(%line, "unparseable worker message");
                            Action::None
                        }
                    },
                    _ => {
                        stdout_open = false;
                        Action::None
                    }
                }
            }

            _ = check.tick() => {
                if watchdog.on_check() {
                    warn!(
                        streak = MISS_STREAK_LIMIT,
                        "worker missed consecutive liveness checks; killing"
                    );
                    Action::Kill
                } else {
                    Action::None
                }
            }

            _ = sigint.recv(), if !*shutting_down => {
                info!("SIGINT received; asking worker to shut down");
                Action::Shutdown { hard: false }
            }

            _ = sigterm.recv() => {
                info!("SIGTERM received; shutting down with a hard deadline");
                Action::Shutdown { hard: true }
            }

            _ = &mut hard_kill, if hard_armed => {
                warn!("graceful shutdown deadline passed; killing worker");
                hard_armed = false;
                Action::Kill
            }
        };

        match action {
            Action::None => {}
            Action::Kill => {
                let _ = child.start_kill();
            }
            Action::Shutdown { hard } => {
                *shutting_down = true;
                send_shutdown(&mut stdin).await;
                if hard {
                    hard_kill.as_mut().reset(Instant::now() + HARD_KILL_DELAY);
                    hard_armed = true;
                }
            }
        }
    }
}
