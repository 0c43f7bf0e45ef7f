//! `PeerSession` - the resources owned by one connection.
//!
//! A session owns an ordered list of transports, at most one producer per
//! media kind, and consumers keyed by id. Every producer and consumer records
//! the transport it was created on so a transport close can evict them.

use crate::connection::ConnectionHandle;
use crate::engine::{EngineConsumer, EngineProducer, EngineTransport, MediaKind};
use crate::observability::metrics;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Transport lifecycle. `Closed` is terminal and only reached by session
/// teardown; transports the engine closes are evicted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connected,
    Closed,
}

pub(crate) struct TransportEntry {
    pub(crate) handle: Arc<dyn EngineTransport>,
    pub(crate) state: TransportState,
}

pub(crate) struct ProducerEntry {
    pub(crate) handle: Arc<dyn EngineProducer>,
    pub(crate) transport_id: String,
}

pub(crate) struct ConsumerEntry {
    pub(crate) handle: Arc<dyn EngineConsumer>,
    pub(crate) transport_id: String,
    pub(crate) paused: bool,
}

/// Counts from a cascading session teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub producers_closed: usize,
    pub consumers_closed: usize,
    pub transports_closed: usize,
    /// Closes that failed and were swallowed.
    pub failures: usize,
}

/// Resources dropped because their transport closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictedResources {
    pub transport: bool,
    pub producers: usize,
    pub consumers: usize,
}

/// Point-in-time view of a session's media resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSnapshot {
    /// Transport ids in creation order with their state.
    pub transports: Vec<(String, TransportState)>,
    /// Producer id per kind.
    pub producers: HashMap<MediaKind, String>,
    /// Consumer id to paused flag.
    pub consumers: HashMap<String, bool>,
}

impl MediaSnapshot {
    /// Whether the session holds no media resources at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty() && self.consumers.is_empty()
    }
}

/// Media resources of one session. Always accessed under the session lock.
#[derive(Default)]
pub struct MediaState {
    transports: Vec<TransportEntry>,
    producers: HashMap<MediaKind, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
    closed: bool,
}

impl MediaState {
    /// Whether the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            transports: self
                .transports
                .iter()
                .map(|t| (t.handle.id().to_string(), t.state))
                .collect(),
            producers: self
                .producers
                .iter()
                .map(|(kind, p)| (*kind, p.handle.id().to_string()))
                .collect(),
            consumers: self
                .consumers
                .iter()
                .map(|(id, c)| (id.clone(), c.paused))
                .collect(),
        }
    }

    /// The most recently created transport, used for produce and consume.
    pub(crate) fn latest_transport(&self) -> Option<Arc<dyn EngineTransport>> {
        self.transports.last().map(|t| Arc::clone(&t.handle))
    }

    pub(crate) fn push_transport(&mut self, handle: Arc<dyn EngineTransport>) {
        self.transports.push(TransportEntry {
            handle,
            state: TransportState::Created,
        });
    }

    pub(crate) fn transport_mut(&mut self, transport_id: &str) -> Option<&mut TransportEntry> {
        self.transports
            .iter_mut()
            .find(|t| t.handle.id() == transport_id)
    }

    pub(crate) fn take_producer(&mut self, kind: MediaKind) -> Option<ProducerEntry> {
        self.producers.remove(&kind)
    }

    pub(crate) fn insert_producer(&mut self, kind: MediaKind, entry: ProducerEntry) {
        self.producers.insert(kind, entry);
    }

    pub(crate) fn insert_consumer(&mut self, entry: ConsumerEntry) {
        self.consumers
            .insert(entry.handle.id().to_string(), entry);
    }

    pub(crate) fn consumer_mut(&mut self, consumer_id: &str) -> Option<&mut ConsumerEntry> {
        self.consumers.get_mut(consumer_id)
    }

    /// Drop a closed transport and everything created on it.
    pub(crate) fn evict_transport(&mut self, transport_id: &str) -> EvictedResources {
        let before = self.transports.len();
        self.transports.retain(|t| t.handle.id() != transport_id);

        let producers_before = self.producers.len();
        self.producers.retain(|_, p| p.transport_id != transport_id);

        let consumers_before = self.consumers.len();
        self.consumers.retain(|_, c| c.transport_id != transport_id);

        EvictedResources {
            transport: self.transports.len() < before,
            producers: producers_before - self.producers.len(),
            consumers: consumers_before - self.consumers.len(),
        }
    }

    /// Mark closed and close every resource, swallowing individual failures.
    pub(crate) async fn close_all(&mut self, peer_id: &str) -> TeardownReport {
        self.closed = true;
        let mut report = TeardownReport::default();

        for (kind, producer) in self.producers.drain() {
            match producer.handle.close().await {
                Ok(()) => report.producers_closed += 1,
                Err(e) => {
                    warn!(
                        target: "relay.registry",
                        peer_id = %peer_id,
                        producer_id = %producer.handle.id(),
                        kind = %kind,
                        error = %e,
                        "Failed to close producer during teardown"
                    );
                    metrics::record_teardown_failure("producer");
                    report.failures += 1;
                }
            }
        }

        for (consumer_id, consumer) in self.consumers.drain() {
            match consumer.handle.close().await {
                Ok(()) => report.consumers_closed += 1,
                Err(e) => {
                    warn!(
                        target: "relay.registry",
                        peer_id = %peer_id,
                        consumer_id = %consumer_id,
                        error = %e,
                        "Failed to close consumer during teardown"
                    );
                    metrics::record_teardown_failure("consumer");
                    report.failures += 1;
                }
            }
        }

        // Transports stay listed as `Closed` for holders of the session handle.
        for transport in &mut self.transports {
            transport.state = TransportState::Closed;
            match transport.handle.close().await {
                Ok(()) => report.transports_closed += 1,
                Err(e) => {
                    warn!(
                        target: "relay.registry",
                        peer_id = %peer_id,
                        transport_id = %transport.handle.id(),
                        error = %e,
                        "Failed to close transport during teardown"
                    );
                    metrics::record_teardown_failure("transport");
                    report.failures += 1;
                }
            }
        }

        report
    }
}

/// One connected peer.
pub struct PeerSession {
    id: String,
    profile_hint: Option<String>,
    connection: ConnectionHandle,
    media: Mutex<MediaState>,
}

impl PeerSession {
    pub(crate) fn new(
        id: impl Into<String>,
        profile_hint: Option<String>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            id: id.into(),
            profile_hint,
            connection,
            media: Mutex::new(MediaState::default()),
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Opaque profile hint supplied at connect time.
    #[must_use]
    pub fn profile_hint(&self) -> Option<&str> {
        self.profile_hint.as_deref()
    }

    /// Outbound mailbox for this connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Media state lock. Held for the full duration of a media operation.
    #[must_use]
    pub fn media(&self) -> &Mutex<MediaState> {
        &self.media
    }

    /// Snapshot of the media resources (waits for in-flight operations).
    pub async fn snapshot(&self) -> MediaSnapshot {
        self.media.lock().await.snapshot()
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("profile_hint", &self.profile_hint.as_ref().map(|_| "[REDACTED]"))
            .field("connection", &self.connection.connection_id())
            .finish_non_exhaustive()
    }
}
