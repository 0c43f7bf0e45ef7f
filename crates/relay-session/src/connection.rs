//! Per-connection outbound mailbox.
//!
//! Each connected peer gets one bounded channel. The relay pushes broadcast
//! events into it; the signaling layer drains the receiving half and writes the
//! events to the socket.
//!
//! Delivery never blocks the sender: a full or closed mailbox drops the event
//! and the drop is counted. A slow reader must not stall a whole chat thread.

use crate::chat::ChatMessage;
use crate::observability::metrics;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Event pushed to a connected peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// A message was accepted in a thread the peer joined.
    ChatMessage { message: ChatMessage },

    /// Another member started or stopped typing.
    #[serde(rename_all = "camelCase")]
    Typing {
        thread_id: String,
        sender_id: String,
        is_typing: bool,
    },
}

impl OutboundEvent {
    /// Returns the event name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            OutboundEvent::ChatMessage { .. } => "chat_message",
            OutboundEvent::Typing { .. } => "typing",
        }
    }
}

/// Handle to a connection's outbound mailbox.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: mpsc::Sender<OutboundEvent>,
    cancel_token: CancellationToken,
}

impl ConnectionHandle {
    /// Create a mailbox for `connection_id` holding up to `capacity` events.
    #[must_use]
    pub fn channel(
        connection_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            connection_id: connection_id.into(),
            sender,
            cancel_token: CancellationToken::new(),
        };
        (handle, receiver)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event without waiting. Returns `false` if it was dropped.
    pub fn deliver(&self, event: OutboundEvent) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    target: "relay.connection",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Outbound mailbox full, event dropped"
                );
                metrics::record_broadcast_dropped(event.name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    target: "relay.connection",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Outbound mailbox closed, event dropped"
                );
                metrics::record_broadcast_dropped(event.name());
                false
            }
        }
    }

    /// Stop accepting events (connection is going away).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the connection has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token completing when the connection is cancelled, for writer tasks to select on.
    #[must_use]
    pub fn cancelled_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn typing(is_typing: bool) -> OutboundEvent {
        OutboundEvent::Typing {
            thread_id: "room-1".to_string(),
            sender_id: "peer-2".to_string(),
            is_typing,
        }
    }

    #[tokio::test]
    async fn test_deliver_and_receive() {
        let (handle, mut rx) = ConnectionHandle::channel("conn-1", 4);
        assert_eq!(handle.connection_id(), "conn-1");

        assert!(handle.deliver(typing(true)));
        assert_eq!(rx.recv().await.unwrap(), typing(true));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_without_blocking() {
        let (handle, mut rx) = ConnectionHandle::channel("conn-1", 1);

        assert!(handle.deliver(typing(true)));
        assert!(!handle.deliver(typing(false)));

        assert_eq!(rx.recv().await.unwrap(), typing(true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_mailbox_drops() {
        let (handle, rx) = ConnectionHandle::channel("conn-1", 4);
        drop(rx);
        assert!(!handle.deliver(typing(true)));
    }

    #[tokio::test]
    async fn test_cancelled_handle_rejects_events() {
        let (handle, mut rx) = ConnectionHandle::channel("conn-1", 4);
        let token = handle.cancelled_token();

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(token.is_cancelled());
        assert!(!handle.deliver(typing(true)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_typing_event_wire_shape() {
        let value = serde_json::to_value(typing(true)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "event": "typing",
                "threadId": "room-1",
                "senderId": "peer-2",
                "isTyping": true,
            })
        );
    }
}
