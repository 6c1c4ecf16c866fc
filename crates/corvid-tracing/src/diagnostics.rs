//! Diagnostic channel for back-end faults.
//!
//! Multi-line back-end messages (an emulator register dump, a remote
//! device's error report) are prefixed line by line so every line can be
//! traced back to the runtime when interleaved with other output.

/// Default prefix stamped on every diagnostic line.
pub const DEFAULT_PREFIX: &str = "==Corvid== ";

/// Prefix every line of `message`. A trailing newline does not produce an
/// extra empty prefixed line.
pub fn prefix_lines(prefix: &str, message: &str) -> String {
    let mut out = String::with_capacity(message.len() + prefix.len());
    for (index, line) in message.lines().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    if out.is_empty() {
        out.push_str(prefix);
    }
    out
}

/// Write `message` to the diagnostic channel, one `error` event per line.
///
/// Returns the prefixed text that was emitted.
pub fn report(prefix: &str, message: &str) -> String {
    let formatted = prefix_lines(prefix, message);
    for line in formatted.lines() {
        tracing::error!(target: "corvid::diagnostics", "{line}");
    }
    formatted
}
