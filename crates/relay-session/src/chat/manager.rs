//! `ChatRoomManager` - thread registry, history and broadcast.
//!
//! Threads are created lazily on first reference and live for the lifetime of
//! the manager. Each thread has its own lock; appending a message and
//! broadcasting it happen under that lock, so all members observe one thread's
//! messages in acceptance order. Different threads never contend.

use super::message::{normalize_thread_id, sanitize_text, ChatMessage};
use super::names::{resolve_sender_name, DisplayNameResolver};
use super::thread::ChatThread;
use crate::config::Config;
use crate::connection::{ConnectionHandle, OutboundEvent};
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::rate_limit::RateLimiter;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Upper bound for a single history fetch.
pub const MAX_FETCH_LIMIT: i64 = 500;

/// Limits applied by the chat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    /// Messages retained per thread.
    pub max_history: usize,
    /// Characters kept from a sanitized message.
    pub max_message_len: usize,
}

impl From<&Config> for ChatSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_history: config.max_history,
            max_message_len: config.max_message_len,
        }
    }
}

/// Owns every chat thread plus the sender rate limiter.
pub struct ChatRoomManager {
    settings: ChatSettings,
    threads: DashMap<String, Arc<Mutex<ChatThread>>>,
    limiter: RateLimiter,
    resolver: Arc<dyn DisplayNameResolver>,
}

impl ChatRoomManager {
    #[must_use]
    pub fn new(
        settings: ChatSettings,
        limiter: RateLimiter,
        resolver: Arc<dyn DisplayNameResolver>,
    ) -> Self {
        Self {
            settings,
            threads: DashMap::new(),
            limiter,
            resolver,
        }
    }

    /// Join `thread_id`, returning its retained history oldest-to-newest.
    ///
    /// A member whose connection was already torn down is refused, so a join
    /// racing a disconnect cannot leave a stale membership behind.
    #[instrument(skip_all, fields(connection_id = %member.connection_id()))]
    pub async fn join_thread(
        &self,
        thread_id: &str,
        member: &ConnectionHandle,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let thread_id = normalize_thread_id(thread_id).ok_or(RelayError::InvalidId)?;

        let thread = self.thread_or_create(thread_id);
        let mut thread = thread.lock().await;
        // Checked under the thread lock: `leave_all` takes the same lock after cancelling.
        if member.is_cancelled() {
            return Err(RelayError::NotFound(format!(
                "session {}",
                member.connection_id()
            )));
        }
        thread.join(member);

        debug!(
            target: "relay.chat",
            thread_id = %thread_id,
            members = thread.member_count(),
            "Member joined thread"
        );

        Ok(thread.recent(self.settings.max_history))
    }

    /// Leave `thread_id`. Invalid ids and non-members are ignored.
    pub async fn leave_thread(&self, thread_id: &str, member_id: &str) {
        let Some(thread_id) = normalize_thread_id(thread_id) else {
            return;
        };
        let Some(thread) = self.existing_thread(thread_id) else {
            return;
        };

        if thread.lock().await.leave(member_id) {
            debug!(
                target: "relay.chat",
                thread_id = %thread_id,
                connection_id = %member_id,
                "Member left thread"
            );
        }
    }

    /// Remove `member_id` from every thread. Returns how many threads it left.
    pub async fn leave_all(&self, member_id: &str) -> usize {
        // Snapshot the handles so no shard lock is held across an await.
        let threads: Vec<Arc<Mutex<ChatThread>>> = self
            .threads
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut left = 0;
        for thread in threads {
            if thread.lock().await.leave(member_id) {
                left += 1;
            }
        }
        left
    }

    /// Validate, throttle, store and broadcast a message.
    #[instrument(skip_all, fields(sender_id = %sender_id))]
    pub async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        sender_id: &str,
        profile_hint: Option<&str>,
    ) -> Result<ChatMessage, RelayError> {
        let thread_id = normalize_thread_id(thread_id).ok_or_else(|| reject(RelayError::InvalidId))?;
        let text = sanitize_text(text, self.settings.max_message_len)
            .ok_or_else(|| reject(RelayError::EmptyMessage))?;

        if !self.limiter.allow(sender_id) {
            debug!(
                target: "relay.chat",
                thread_id = %thread_id,
                "Sender rate limited"
            );
            return Err(reject(RelayError::RateLimited));
        }

        let sender_name = resolve_sender_name(self.resolver.as_ref(), profile_hint, sender_id).await;

        let thread = self.thread_or_create(thread_id);
        let mut thread = thread.lock().await;

        let message = ChatMessage::new(thread_id, sender_id, sender_name, text);
        thread.append(message.clone());
        let delivered = thread.broadcast(
            &OutboundEvent::ChatMessage {
                message: message.clone(),
            },
            None,
        );

        metrics::record_chat_message();
        debug!(
            target: "relay.chat",
            thread_id = %thread_id,
            message_id = %message.id,
            delivered,
            "Message accepted"
        );

        Ok(message)
    }

    /// Broadcast an ephemeral typing event to the other members of `thread_id`.
    pub async fn typing_indicator(&self, thread_id: &str, is_typing: bool, sender_id: &str) {
        let Some(thread_id) = normalize_thread_id(thread_id) else {
            return;
        };
        let Some(thread) = self.existing_thread(thread_id) else {
            return;
        };

        let event = OutboundEvent::Typing {
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            is_typing,
        };
        thread.lock().await.broadcast(&event, Some(sender_id));
    }

    /// The most recent messages of `thread_id`, with `limit` clamped to `[1, 500]`.
    pub async fn fetch_history(
        &self,
        thread_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let thread_id = normalize_thread_id(thread_id).ok_or(RelayError::InvalidId)?;
        let limit = usize::try_from(limit.clamp(1, MAX_FETCH_LIMIT)).unwrap_or(1);

        let thread = self.thread_or_create(thread_id);
        let history = thread.lock().await.recent(limit);
        Ok(history)
    }

    /// Number of threads created so far.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// The sender rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn settings(&self) -> ChatSettings {
        self.settings
    }

    fn thread_or_create(&self, thread_id: &str) -> Arc<Mutex<ChatThread>> {
        let entry = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChatThread::new(
                    thread_id,
                    self.settings.max_history,
                )))
            });
        Arc::clone(entry.value())
    }

    fn existing_thread(&self, thread_id: &str) -> Option<Arc<Mutex<ChatThread>>> {
        self.threads
            .get(thread_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn reject(err: RelayError) -> RelayError {
    metrics::record_chat_rejected(err.error_kind());
    err
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::chat::names::HintNameResolver;
    use std::time::Duration;

    fn manager(max_history: usize, rate_limit: u32) -> ChatRoomManager {
        ChatRoomManager::new(
            ChatSettings {
                max_history,
                max_message_len: 2000,
            },
            RateLimiter::new(rate_limit, Duration::from_secs(10)),
            Arc::new(HintNameResolver),
        )
    }

    #[tokio::test]
    async fn test_join_empty_thread_returns_no_history() {
        let chat = manager(200, 20);
        let (member, _rx) = ConnectionHandle::channel("peer-1", 8);

        let history = chat.join_thread("room-1", &member).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(chat.thread_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_thread_ids_rejected() {
        let chat = manager(200, 20);
        let (member, _rx) = ConnectionHandle::channel("peer-1", 8);

        assert_eq!(
            chat.join_thread("   ", &member).await,
            Err(RelayError::InvalidId)
        );
        assert_eq!(
            chat.send_message("", "hi", "peer-1", None).await,
            Err(RelayError::InvalidId)
        );
        assert_eq!(
            chat.fetch_history("\t", 10).await,
            Err(RelayError::InvalidId)
        );
        assert_eq!(chat.thread_count(), 0);
    }

    #[tokio::test]
    async fn test_thread_ids_are_trimmed() {
        let chat = manager(200, 20);

        chat.send_message("  room-1 ", "hello", "peer-1", None)
            .await
            .unwrap();
        let history = chat.fetch_history("room-1", 10).await.unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].thread_id, "room-1");
    }

    #[tokio::test]
    async fn test_send_sanitizes_and_broadcasts_to_all_members() {
        let chat = manager(200, 20);
        let (alice, mut alice_rx) = ConnectionHandle::channel("alice", 8);
        let (bob, mut bob_rx) = ConnectionHandle::channel("bob", 8);
        chat.join_thread("room-1", &alice).await.unwrap();
        chat.join_thread("room-1", &bob).await.unwrap();

        let message = chat
            .send_message("room-1", "  hello   world  ", "alice", Some("Alice"))
            .await
            .unwrap();

        assert_eq!(message.text, "hello world");
        assert_eq!(message.sender_name, "Alice");

        let expected = OutboundEvent::ChatMessage {
            message: message.clone(),
        };
        assert_eq!(alice_rx.recv().await.unwrap(), expected);
        assert_eq!(bob_rx.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_and_not_stored() {
        let chat = manager(200, 20);

        assert_eq!(
            chat.send_message("room-1", "", "peer-1", None).await,
            Err(RelayError::EmptyMessage)
        );
        assert_eq!(
            chat.send_message("room-1", "  \n ", "peer-1", None).await,
            Err(RelayError::EmptyMessage)
        );
        assert!(chat.fetch_history("room-1", 10).await.unwrap().is_empty());
        // Rejected messages do not consume rate budget.
        assert_eq!(chat.rate_limiter().remaining("peer-1"), 20);
    }

    #[tokio::test]
    async fn test_history_is_bounded_fifo() {
        let chat = manager(3, 100);
        for n in 0..5 {
            chat.send_message("room-1", &format!("msg {n}"), "peer-1", None)
                .await
                .unwrap();
        }

        let texts: Vec<_> = chat
            .fetch_history("room-1", 500)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_fetch_limit_is_clamped() {
        let chat = manager(600, 1000);
        for n in 0..510 {
            chat.send_message("room-1", &format!("msg {n}"), "peer-1", None)
                .await
                .unwrap();
        }

        let all = chat.fetch_history("room-1", 1000).await.unwrap();
        assert_eq!(all.len(), 500);
        assert_eq!(all[0].text, "msg 10");
        assert_eq!(all[499].text, "msg 509");

        assert_eq!(chat.fetch_history("room-1", 0).await.unwrap().len(), 1);
        assert_eq!(chat.fetch_history("room-1", -5).await.unwrap().len(), 1);
        let last_two = chat.fetch_history("room-1", 2).await.unwrap();
        assert_eq!(last_two[1].text, "msg 509");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_applies_per_sender() {
        let chat = manager(200, 2);

        chat.send_message("room-1", "one", "alice", None).await.unwrap();
        chat.send_message("room-2", "two", "alice", None).await.unwrap();
        assert_eq!(
            chat.send_message("room-1", "three", "alice", None).await,
            Err(RelayError::RateLimited)
        );
        chat.send_message("room-1", "hi", "bob", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        chat.send_message("room-1", "four", "alice", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_typing_excludes_sender_and_is_not_stored() {
        let chat = manager(200, 20);
        let (alice, mut alice_rx) = ConnectionHandle::channel("alice", 8);
        let (bob, mut bob_rx) = ConnectionHandle::channel("bob", 8);
        chat.join_thread("room-1", &alice).await.unwrap();
        chat.join_thread("room-1", &bob).await.unwrap();

        chat.typing_indicator("room-1", true, "alice").await;
        chat.typing_indicator("  ", true, "alice").await;
        chat.typing_indicator("room-unknown", true, "alice").await;

        assert_eq!(
            bob_rx.recv().await.unwrap(),
            OutboundEvent::Typing {
                thread_id: "room-1".to_string(),
                sender_id: "alice".to_string(),
                is_typing: true,
            }
        );
        assert!(alice_rx.try_recv().is_err());
        assert!(chat.fetch_history("room-1", 10).await.unwrap().is_empty());
        assert_eq!(chat.thread_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let chat = manager(200, 20);
        let (alice, mut alice_rx) = ConnectionHandle::channel("alice", 8);
        chat.join_thread("room-1", &alice).await.unwrap();
        chat.join_thread("room-2", &alice).await.unwrap();

        chat.leave_thread("room-1", "alice").await;
        chat.leave_thread("room-1", "alice").await;
        chat.leave_thread("", "alice").await;
        chat.leave_thread("never-created", "alice").await;

        chat.send_message("room-1", "hello", "bob", None).await.unwrap();
        assert!(alice_rx.try_recv().is_err());

        assert_eq!(chat.leave_all("alice").await, 1);
        chat.send_message("room-2", "hello", "bob", None).await.unwrap();
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_with_torn_down_connection_is_rejected() {
        let chat = manager(200, 20);
        let (alice, _rx) = ConnectionHandle::channel("alice", 8);
        alice.cancel();
        chat.leave_all("alice").await;

        let result = chat.join_thread("room-1", &alice).await;

        assert!(matches!(result, Err(RelayError::NotFound(_))));
        assert_eq!(chat.leave_all("alice").await, 0);
    }

    #[tokio::test]
    async fn test_join_returns_existing_history() {
        let chat = manager(200, 20);
        chat.send_message("room-1", "first", "alice", None).await.unwrap();
        chat.send_message("room-1", "second", "alice", None).await.unwrap();

        let (bob, _rx) = ConnectionHandle::channel("bob", 8);
        let history = chat.join_thread("room-1", &bob).await.unwrap();
        let texts: Vec<_> = history.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_concurrent_senders_observe_one_order() {
        let chat = Arc::new(manager(500, 1000));
        let (alice, mut alice_rx) = ConnectionHandle::channel("alice", 512);
        let (bob, mut bob_rx) = ConnectionHandle::channel("bob", 512);
        chat.join_thread("room-1", &alice).await.unwrap();
        chat.join_thread("room-1", &bob).await.unwrap();

        let mut tasks = Vec::new();
        for sender in 0..4 {
            let chat = Arc::clone(&chat);
            tasks.push(tokio::spawn(async move {
                for n in 0..25 {
                    chat.send_message("room-1", &format!("{sender}-{n}"), &format!("s{sender}"), None)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut alice_seen = Vec::new();
        let mut bob_seen = Vec::new();
        while let Ok(OutboundEvent::ChatMessage { message }) = alice_rx.try_recv() {
            alice_seen.push(message.id);
        }
        while let Ok(OutboundEvent::ChatMessage { message }) = bob_rx.try_recv() {
            bob_seen.push(message.id);
        }
        let stored: Vec<_> = chat
            .fetch_history("room-1", 500)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(alice_seen.len(), 100);
        assert_eq!(alice_seen, bob_seen);
        assert_eq!(alice_seen, stored);
    }
}
