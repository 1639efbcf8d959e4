//! Correlation IDs for turns and agent passes.
//!
//! Each agent pass gets a `trace_id`; iterations within it get a span id
//! derived from it. A user turn shares one trace id prefix across both of
//! its passes so log lines can be grouped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Span ID for an iteration within a pass.
pub fn generate_span_id(trace_id: &str, iteration: u32) -> String {
    format!("{trace_id}:i{iteration}")
}

/// Trace ID for one pass of a turn (`initial`, `improve`).
pub fn pass_trace_id(turn_id: &str, pass: &str) -> String {
    format!("{turn_id}/{pass}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_unique() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert_ne!(a, b);
        assert!(a.starts_with("tr-"));
    }

    #[test]
    fn span_and_pass_ids() {
        assert_eq!(generate_span_id("tr-1", 3), "tr-1:i3");
        assert_eq!(pass_trace_id("tr-1", "improve"), "tr-1/improve");
    }
}
