//! Master/worker IPC.
//!
//! Line-delimited JSON over the worker's stdio: the worker reports on
//! stdout, the master commands on the worker's stdin. Worker logs go to
//! stderr so the report channel stays clean.

use serde::{Deserialize, Serialize};

/// Messages the worker sends the master.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// A tick completed; carries the worker's resident memory.
    Report {
        /// Resident set size in MiB.
        memory_mb: u64,
    },
    /// Long-running initialisation started (`init: true`) or finished.
    Init {
        /// Whether initialisation is currently running.
        init: bool,
    },
}

/// Messages the master sends the worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterMessage {
    /// Set the shutdown flag, drain the running tick, exit 0.
    Shutdown,
}

/// Encode a message as one line.
pub fn encode<T: Serialize>(message: &T) -> String {
    // Both message enums serialize infallibly.
    serde_json::to_string(message).unwrap_or_default()
}

/// Decode one line; `None` for anything unparseable (a hostile or
/// corrupted line must not take the supervisor down).
pub fn decode<T: for<'de> Deserialize<'de>>(line: &str) -> Option<T> {
    serde_json::from_str(line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_shape() {
        let line = encode(&WorkerMessage::Report { memory_mb: 42 });
        assert_eq!(line, r#"{"type":"report","memory_mb":42}"#);
        assert_eq!(
            decode::<WorkerMessage>(&line),
            Some(WorkerMessage::Report { memory_mb: 42 })
        );
    }

    #[test]
    fn test_init_wire_shape() {
        let line = encode(&WorkerMessage::Init { init: true });
        assert_eq!(line, r#"{"type":"init","init":true}"#);
    }

    #[test]
    fn test_shutdown_round_trip() {
        let line = encode(&MasterMessage::Shutdown);
        assert_eq!(decode::<MasterMessage>(&line), Some(MasterMessage::Shutdown));
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert_eq!(decode::<WorkerMessage>("not json"), None);
        assert_eq!(decode::<WorkerMessage>(r#"{"type":"unknown"}"#), None);
        assert_eq!(decode::<WorkerMessage>(""), None);
    }
}
