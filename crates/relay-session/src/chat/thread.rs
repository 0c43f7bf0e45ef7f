//! A single chat thread: bounded history plus broadcast membership.

use super::message::ChatMessage;
use crate::connection::{ConnectionHandle, OutboundEvent};

use std::collections::{HashMap, VecDeque};

/// Chat thread state. Always accessed under the thread's lock.
#[derive(Debug)]
pub struct ChatThread {
    id: String,
    max_history: usize,
    history: VecDeque<ChatMessage>,
    members: HashMap<String, ConnectionHandle>,
}

impl ChatThread {
    pub(crate) fn new(id: impl Into<String>, max_history: usize) -> Self {
        Self {
            id: id.into(),
            max_history,
            history: VecDeque::with_capacity(max_history.min(64)),
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member. Re-joining replaces the stored handle.
    pub(crate) fn join(&mut self, member: &ConnectionHandle) {
        self.members
            .insert(member.connection_id().to_string(), member.clone());
    }

    /// Remove a member. Returns whether it was present.
    pub(crate) fn leave(&mut self, member_id: &str) -> bool {
        self.members.remove(member_id).is_some()
    }

    #[must_use]
    pub fn is_member(&self, member_id: &str) -> bool {
        self.members.contains_key(member_id)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Append a message, evicting the oldest entries beyond capacity.
    pub(crate) fn append(&mut self, message: ChatMessage) {
        self.history.push_back(message);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// The most recent `limit` messages, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Deliver `event` to every member except `except`. Returns how many accepted it.
    pub(crate) fn broadcast(&self, event: &OutboundEvent, except: Option<&str>) -> usize {
        self.members
            .iter()
            .filter(|(member_id, _)| Some(member_id.as_str()) != except)
            .filter(|(_, handle)| handle.deliver(event.clone()))
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn message(n: usize) -> ChatMessage {
        ChatMessage::new("room-1", "peer-1", "Alice".to_string(), format!("msg {n}"))
    }

    #[test]
    fn test_append_evicts_oldest_first() {
        let mut thread = ChatThread::new("room-1", 3);
        for n in 0..5 {
            thread.append(message(n));
        }

        assert_eq!(thread.history_len(), 3);
        let texts: Vec<_> = thread.recent(10).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut thread = ChatThread::new("room-1", 10);
        for n in 0..4 {
            thread.append(message(n));
        }

        let texts: Vec<_> = thread.recent(2).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["msg 2", "msg 3"]);
        assert!(thread.recent(0).is_empty());
    }

    #[tokio::test]
    async fn test_membership_and_broadcast() {
        let mut thread = ChatThread::new("room-1", 10);
        let (alice, mut alice_rx) = ConnectionHandle::channel("alice", 8);
        let (bob, mut bob_rx) = ConnectionHandle::channel("bob", 8);

        thread.join(&alice);
        thread.join(&bob);
        thread.join(&bob);
        assert_eq!(thread.member_count(), 2);

        let event = OutboundEvent::Typing {
            thread_id: "room-1".to_string(),
            sender_id: "alice".to_string(),
            is_typing: true,
        };
        assert_eq!(thread.broadcast(&event, Some("alice")), 1);
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(bob_rx.recv().await.unwrap(), event);

        assert!(thread.leave("bob"));
        assert!(!thread.leave("bob"));
        assert!(!thread.is_member("bob"));
        assert_eq!(thread.broadcast(&event, None), 1);
    }
}
