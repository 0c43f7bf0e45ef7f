//! `SessionRegistry` - connection id to session.
//!
//! Lookups are lock-free per shard. A session is removed from the map before
//! its resources are torn down, so any media operation that re-checks the
//! registry after an engine call sees the removal and discards what it built.

use super::session::{PeerSession, TeardownReport};
use crate::connection::{ConnectionHandle, OutboundEvent};
use crate::observability::metrics;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

/// Live sessions keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<PeerSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session for `peer_id` if absent.
    ///
    /// Idempotent: an existing session is returned unchanged. The outbound
    /// receiver is only returned when a new session (and mailbox) was created.
    pub fn create_session(
        &self,
        peer_id: &str,
        profile_hint: Option<String>,
        mailbox_capacity: usize,
    ) -> (Arc<PeerSession>, Option<mpsc::Receiver<OutboundEvent>>) {
        let mut outbound = None;
        let session = {
            let entry = self
                .sessions
                .entry(peer_id.to_string())
                .or_insert_with(|| {
                    let (connection, receiver) =
                        ConnectionHandle::channel(peer_id, mailbox_capacity);
                    outbound = Some(receiver);
                    Arc::new(PeerSession::new(peer_id, profile_hint, connection))
                });
            Arc::clone(entry.value())
        };

        if outbound.is_some() {
            metrics::set_sessions_active(self.sessions.len());
            info!(target: "relay.registry", peer_id = %peer_id, "Session created");
        } else {
            debug!(target: "relay.registry", peer_id = %peer_id, "Session already exists");
        }

        (session, outbound)
    }

    #[must_use]
    pub fn get_session(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.get(peer_id).map(|s| Arc::clone(s.value()))
    }

    /// Whether `session` is still the registered session for its id.
    #[must_use]
    pub fn is_current(&self, session: &Arc<PeerSession>) -> bool {
        self.sessions
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current.value(), session))
    }

    #[must_use]
    pub fn contains(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of every live session.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    /// Remove a session and close all of its resources.
    ///
    /// Producers close first, then consumers, then transports. Individual
    /// close failures are logged and counted, never returned. Returns `None`
    /// for an unknown id.
    #[instrument(skip_all, fields(peer_id = %peer_id))]
    pub async fn remove_peer(&self, peer_id: &str) -> Option<TeardownReport> {
        let (_, session) = self.sessions.remove(peer_id)?;
        metrics::set_sessions_active(self.sessions.len());
        session.connection().cancel();

        // Waits for any in-flight media operation on this session.
        let report = session.media().lock().await.close_all(peer_id).await;

        info!(
            target: "relay.registry",
            peer_id = %peer_id,
            producers = report.producers_closed,
            consumers = report.consumers_closed,
            transports = report.transports_closed,
            failures = report.failures,
            "Session removed"
        );

        Some(report)
    }
}
