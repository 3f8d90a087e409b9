//! Quill processor entry point.
//!
//! Without flags this is the supervisor (master); with `--worker` it is
//! the mining worker the supervisor spawned. Configuration comes from an
//! optional JSON file given as the last CLI argument plus environment
//! variables; the worker receives the master's validated configuration
//! through the `PROCESSOR_CONFIG` environment variable.

use node_runtime::{config::ProcessorConfig, redact, supervisor, worker, CONFIG_ENV, WORKER_FLAG};
use std::collections::HashMap;
use std::path::PathBuf;

fn load_config(is_worker: bool) -> Result<ProcessorConfig, String> {
    if is_worker {
        if let Ok(json) = std::env::var(CONFIG_ENV) {
            return serde_json::from_str(&json)
                .map_err(|e| format!("invalid {CONFIG_ENV}: {e}"));
        }
    }

    let env: HashMap<String, String> = std::env::vars().collect();
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg.as_str() != WORKER_FLAG)
        .collect();
    let file = args.last().map(PathBuf::from);
    ProcessorConfig::load(file.as_deref(), &env).map_err(|e| e.to_string())
}

fn init_tracing(config: &ProcessorConfig) {
    // stderr: the worker's stdout is the supervisor report channel.
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.level_filter())
        .with_writer(std::io::stderr);
    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() {
    let is_worker = std::env::args().any(|arg| arg == WORKER_FLAG);

    let config = match load_config(is_worker) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);
    redact::install_panic_hook(config.secrets());

    let code = if is_worker {
        worker::run(config).await
    } else {
        supervisor::run(config).await
    };
    std::process::exit(code);
}
