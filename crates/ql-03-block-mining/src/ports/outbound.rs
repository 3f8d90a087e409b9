//! Outbound ports (driven side - SPI).

use std::time::{SystemTime, UNIX_EPOCH};

/// Port: wall-clock time in milliseconds since the UNIX epoch.
///
/// The loop never reads the clock directly; a fake clock is how the
/// timestamp-monotonicity and pacing behaviour get exercised in tests.
pub trait Clock: Send {
    /// Current time, milliseconds since epoch.
    fn now_ms(&self) -> i64;
}

/// Production clock backed by [`SystemTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Liveness signals the loop emits towards the supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopReport {
    /// A tick finished; the worker attaches memory usage and forwards it.
    Progress,
    /// A long-running initialisation started or ended; pauses the
    /// supervisor's missed-tick watchdog.
    Init {
        /// True while initialisation is running.
        active: bool,
    },
    /// A tick fired while the previous one was still running.
    HeavyLoad,
}

/// Port: the channel from the mining loop to whatever supervises it.
pub trait SupervisorLink: Send {
    /// Deliver one report. Best effort; must not block.
    fn send(&mut self, report: LoopReport);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        // Sanity: after 2001-09-09 in milliseconds.
        assert!(a > 1_000_000_000_000);
    }
}
