//! Process-global sandbox flag.
//!
//! While contract code is in control the flag is up; host facilities that
//! must not leak into contract execution (wall-clock logging, signal
//! handling, error reporting) check it and wrap themselves in
//! [`suspended`]. The SQL half of sandboxing is the `smartcontract` role;
//! this flag covers the host half.
//!
//! The worker runs a single logical task, so a plain atomic depth counter
//! is sufficient; guards nest and `suspended` restores the previous depth.

use std::sync::atomic::{AtomicUsize, Ordering};

static DEPTH: AtomicUsize = AtomicUsize::new(0);

/// True while contract code is in control.
pub fn is_active() -> bool {
    DEPTH.load(Ordering::SeqCst) > 0
}

/// Enter the sandbox; the returned guard leaves it on drop.
pub fn enter() -> SandboxGuard {
    DEPTH.fetch_add(1, Ordering::SeqCst);
    SandboxGuard { _private: () }
}

/// Run `f` with the sandbox temporarily lifted, restoring it afterwards.
pub fn suspended<T>(f: impl FnOnce() -> T) -> T {
    let depth = DEPTH.swap(0, Ordering::SeqCst);
    let result = f();
    DEPTH.store(depth, Ordering::SeqCst);
    result
}

/// RAII guard marking a sandboxed section.
pub struct SandboxGuard {
    _private: (),
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}
