//! Metrics definitions for the relay session core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `operation`: 5 values (create_transport, connect_transport, produce, consume, resume_consumer)
//! - `status`: 2 values (success, error)
//! - `resource`: 3 values (transport, producer, consumer)
//! - `reason`: bounded by `RelayError::error_kind`
//! - `event`: 2 values (chat_message, typing)
//!
//! No label ever carries a peer id, thread id or message content.

use metrics::{counter, gauge};

/// Set the number of registered peer sessions.
///
/// Metric: `relay_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_sessions_active").set(count as f64);
}

/// Record a media operation outcome.
///
/// Metric: `relay_media_operations_total`
/// Labels: `operation`, `status`
pub fn record_media_operation(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("relay_media_operations_total", "operation" => operation, "status" => status)
        .increment(1);
}

/// Record a resource close that failed during teardown.
///
/// Metric: `relay_teardown_failures_total`
/// Labels: `resource`
///
/// Failures are swallowed so teardown continues; a rising rate points at the engine.
pub fn record_teardown_failure(resource: &'static str) {
    counter!("relay_teardown_failures_total", "resource" => resource).increment(1);
}

/// Record an accepted chat message.
///
/// Metric: `relay_chat_messages_total`
/// Labels: none
pub fn record_chat_message() {
    counter!("relay_chat_messages_total").increment(1);
}

/// Record a rejected chat message.
///
/// Metric: `relay_chat_rejected_total`
/// Labels: `reason`
pub fn record_chat_rejected(reason: &'static str) {
    counter!("relay_chat_rejected_total", "reason" => reason).increment(1);
}

/// Record an outbound event dropped because a mailbox was full or closed.
///
/// Metric: `relay_broadcast_dropped_total`
/// Labels: `event`
pub fn record_broadcast_dropped(event: &'static str) {
    counter!("relay_broadcast_dropped_total", "event" => event).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    fn counter_value(
        snapshot: &[(
            metrics_util::CompositeKey,
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            DebugValue,
        )],
        name: &str,
    ) -> u64 {
        snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => *v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // The metrics facade falls back to a no-op recorder.
        set_sessions_active(3);
        record_media_operation("produce", true);
        record_teardown_failure("producer");
        record_chat_message();
        record_chat_rejected("rate_limited");
        record_broadcast_dropped("typing");
    }

    #[test]
    fn test_metrics_are_captured_by_local_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_sessions_active(2);
            record_media_operation("create_transport", true);
            record_media_operation("create_transport", false);
            record_teardown_failure("transport");
            record_chat_message();
            record_chat_message();
            record_chat_rejected("empty");
            record_broadcast_dropped("chat_message");
        });

        let snapshot = snapshotter.snapshot().into_vec();

        assert_eq!(counter_value(&snapshot, "relay_media_operations_total"), 2);
        assert_eq!(counter_value(&snapshot, "relay_teardown_failures_total"), 1);
        assert_eq!(counter_value(&snapshot, "relay_chat_messages_total"), 2);
        assert_eq!(counter_value(&snapshot, "relay_chat_rejected_total"), 1);
        assert_eq!(counter_value(&snapshot, "relay_broadcast_dropped_total"), 1);
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "relay_sessions_active"));
    }
}
