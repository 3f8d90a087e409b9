//! Secret redaction for error paths.
//!
//! Anything that can end up in a log sink or crash report - panic
//! messages, unhandled errors - is scrubbed of the private key, the
//! database password and the telemetry URL first.

use std::panic;

/// Placeholder for scrubbed secrets.
pub const REDACTED: &str = "[redacted]";

/// Replace every occurrence of each secret in `text`.
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret.as_str(), REDACTED);
        }
    }
    out
}

/// Install a panic hook that logs the redacted panic message and exits
/// with code 1. The supervisor treats that as a restartable failure.
pub fn install_panic_hook(secrets: Vec<String>) {
    panic::set_hook(Box::new(move |info| {
        let message = redact(&info.to_string(), &secrets);
        // The tracing subscriber may be mid-panic itself; write straight
        // to stderr.
        eprintln!("FATAL: unhandled panic: {message}");
        std::process::exit(1);
    }));
}
