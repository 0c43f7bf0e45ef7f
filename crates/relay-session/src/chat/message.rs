//! Chat message type and input normalization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An accepted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    /// Best-effort display name at send time.
    pub sender_name: String,
    /// Sanitized, length-capped text.
    pub text: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl ChatMessage {
    pub(crate) fn new(thread_id: &str, sender_id: &str, sender_name: String, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name,
            text,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Trim a thread id, returning `None` if nothing is left.
#[must_use]
pub fn normalize_thread_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Collapse whitespace runs to single spaces, trim, and cap at `max_len` characters.
///
/// Returns `None` if the result is empty.
#[must_use]
pub fn sanitize_text(raw: &str, max_len: usize) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let text = if collapsed.chars().count() > max_len {
        let truncated: String = collapsed.chars().take(max_len).collect();
        truncated.trim_end().to_string()
    } else {
        collapsed
    };

    (!text.is_empty()).then_some(text)
}
