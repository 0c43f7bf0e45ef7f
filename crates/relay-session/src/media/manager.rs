//! `MediaResourceManager` - per-session transports, producers and consumers.
//!
//! Every operation takes the session's media lock and holds it across the
//! engine call, so operations on one session are serialized while different
//! sessions proceed in parallel. After each engine call the session is
//! re-checked: if it was removed (or replaced) while the call was in flight,
//! the freshly created resource is closed and the caller gets `NotFound`.

use super::registry::SessionRegistry;
use super::session::{ConsumerEntry, PeerSession, ProducerEntry, TeardownReport, TransportState};
use crate::config::NetworkConfig;
use crate::engine::{
    ConsumerParams, EngineConsumer, EngineProducer, EngineTransport, MediaEngine, MediaKind,
    TransportCloseNotifier, TransportClosed, TransportParams,
};
use crate::errors::RelayError;
use crate::observability::metrics;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Owns the engine handle and mediates all media operations.
pub struct MediaResourceManager {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<SessionRegistry>,
    network: NetworkConfig,
    closed_tx: mpsc::UnboundedSender<TransportClosed>,
}

impl MediaResourceManager {
    /// Create the manager and the receiving end of transport-close events.
    ///
    /// The receiver is meant for [`super::spawn_transport_monitor`].
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        registry: Arc<SessionRegistry>,
        network: NetworkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportClosed>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let manager = Self {
            engine,
            registry,
            network,
            closed_tx,
        };
        (manager, closed_rx)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Create a transport for `peer_id` and return its connection parameters.
    #[instrument(skip_all, fields(peer_id = %peer_id))]
    pub async fn create_transport(&self, peer_id: &str) -> Result<TransportParams, RelayError> {
        let result = self.create_transport_inner(peer_id).await;
        metrics::record_media_operation("create_transport", result.is_ok());
        result
    }

    async fn create_transport_inner(&self, peer_id: &str) -> Result<TransportParams, RelayError> {
        let session = self.session(peer_id)?;
        let mut media = session.media().lock().await;
        if media.is_closed() {
            return Err(session_gone(peer_id));
        }

        let notifier = TransportCloseNotifier::new(peer_id.to_string(), self.closed_tx.clone());
        let transport = self
            .engine
            .create_transport(&self.network, notifier)
            .await
            .map_err(|e| engine_failure("create_transport", peer_id, e.into()))?;

        if !self.registry.is_current(&session) {
            discard_transport(peer_id, transport.as_ref()).await;
            return Err(session_gone(peer_id));
        }

        let params = TransportParams::from_transport(transport.as_ref());
        media.push_transport(transport);

        info!(
            target: "relay.media",
            peer_id = %peer_id,
            transport_id = %params.id,
            "Transport created"
        );

        Ok(params)
    }

    /// Finalize a transport's DTLS handshake.
    #[instrument(skip_all, fields(peer_id = %peer_id, transport_id = %transport_id))]
    pub async fn connect_transport(
        &self,
        peer_id: &str,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), RelayError> {
        let result = self
            .connect_transport_inner(peer_id, transport_id, dtls_parameters)
            .await;
        metrics::record_media_operation("connect_transport", result.is_ok());
        result
    }

    async fn connect_transport_inner(
        &self,
        peer_id: &str,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), RelayError> {
        let session = self.session(peer_id)?;
        let mut media = session.media().lock().await;
        if media.is_closed() {
            return Err(session_gone(peer_id));
        }

        let entry = media
            .transport_mut(transport_id)
            .ok_or_else(|| RelayError::NotFound(format!("transport {transport_id}")))?;

        entry
            .handle
            .connect(dtls_parameters)
            .await
            .map_err(|e| engine_failure("connect_transport", peer_id, e.into()))?;
        entry.state = TransportState::Connected;

        debug!(
            target: "relay.media",
            peer_id = %peer_id,
            transport_id = %transport_id,
            "Transport connected"
        );

        Ok(())
    }

    /// Start receiving `kind` media from the peer on its latest transport.
    ///
    /// An existing producer of the same kind is closed first and replaced.
    /// Returns the new producer id.
    #[instrument(skip_all, fields(peer_id = %peer_id, kind = %kind))]
    pub async fn create_producer(
        &self,
        peer_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, RelayError> {
        let result = self
            .create_producer_inner(peer_id, kind, rtp_parameters)
            .await;
        metrics::record_media_operation("produce", result.is_ok());
        result
    }

    async fn create_producer_inner(
        &self,
        peer_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, RelayError> {
        let session = self.session(peer_id)?;
        let mut media = session.media().lock().await;
        if media.is_closed() {
            return Err(session_gone(peer_id));
        }

        let transport = media.latest_transport().ok_or(RelayError::NoTransport)?;

        if let Some(previous) = media.take_producer(kind) {
            debug!(
                target: "relay.media",
                peer_id = %peer_id,
                producer_id = %previous.handle.id(),
                kind = %kind,
                "Replacing existing producer"
            );
            if let Err(e) = previous.handle.close().await {
                warn!(
                    target: "relay.media",
                    peer_id = %peer_id,
                    producer_id = %previous.handle.id(),
                    error = %e,
                    "Failed to close replaced producer"
                );
                metrics::record_teardown_failure("producer");
            }
        }

        let producer = transport
            .produce(kind, rtp_parameters)
            .await
            .map_err(|e| engine_failure("produce", peer_id, e.into()))?;

        if !self.registry.is_current(&session) {
            discard_producer(peer_id, producer.as_ref()).await;
            return Err(session_gone(peer_id));
        }

        let producer_id = producer.id().to_string();
        media.insert_producer(
            kind,
            ProducerEntry {
                handle: producer,
                transport_id: transport.id().to_string(),
            },
        );

        info!(
            target: "relay.media",
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = %kind,
            "Producer created"
        );

        Ok(producer_id)
    }

    /// Create a paused consumer of `producer_id` on the peer's latest transport.
    #[instrument(skip_all, fields(peer_id = %peer_id, producer_id = %producer_id))]
    pub async fn create_consumer(
        &self,
        peer_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParams, RelayError> {
        let result = self
            .create_consumer_inner(peer_id, producer_id, rtp_capabilities)
            .await;
        metrics::record_media_operation("consume", result.is_ok());
        result
    }

    async fn create_consumer_inner(
        &self,
        peer_id: &str,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerParams, RelayError> {
        let session = self.session(peer_id)?;
        let mut media = session.media().lock().await;
        if media.is_closed() {
            return Err(session_gone(peer_id));
        }

        let transport = media.latest_transport().ok_or(RelayError::NoTransport)?;

        let consumer = transport
            .consume(producer_id, rtp_capabilities, true)
            .await
            .map_err(|e| engine_failure("consume", peer_id, e.into()))?;

        if !self.registry.is_current(&session) {
            discard_consumer(peer_id, consumer.as_ref()).await;
            return Err(session_gone(peer_id));
        }

        let params = ConsumerParams::from_consumer(consumer.as_ref());
        media.insert_consumer(ConsumerEntry {
            handle: consumer,
            transport_id: transport.id().to_string(),
            paused: true,
        });

        info!(
            target: "relay.media",
            peer_id = %peer_id,
            consumer_id = %params.id,
            producer_id = %producer_id,
            kind = %params.kind,
            "Consumer created"
        );

        Ok(params)
    }

    /// Resume a paused consumer. Unknown consumer ids are a no-op.
    #[instrument(skip_all, fields(peer_id = %peer_id, consumer_id = %consumer_id))]
    pub async fn resume_consumer(&self, peer_id: &str, consumer_id: &str) -> Result<(), RelayError> {
        let result = self.resume_consumer_inner(peer_id, consumer_id).await;
        metrics::record_media_operation("resume_consumer", result.is_ok());
        result
    }

    async fn resume_consumer_inner(&self, peer_id: &str, consumer_id: &str) -> Result<(), RelayError> {
        let session = self.session(peer_id)?;
        let mut media = session.media().lock().await;

        let Some(entry) = media.consumer_mut(consumer_id) else {
            debug!(
                target: "relay.media",
                peer_id = %peer_id,
                consumer_id = %consumer_id,
                "Resume for unknown consumer ignored"
            );
            return Ok(());
        };

        entry
            .handle
            .resume()
            .await
            .map_err(|e| engine_failure("resume_consumer", peer_id, e.into()))?;
        entry.paused = false;

        Ok(())
    }

    /// Remove the peer's session and close everything it owns.
    pub async fn remove_peer(&self, peer_id: &str) -> Option<TeardownReport> {
        self.registry.remove_peer(peer_id).await
    }

    fn session(&self, peer_id: &str) -> Result<Arc<PeerSession>, RelayError> {
        self.registry
            .get_session(peer_id)
            .ok_or_else(|| session_gone(peer_id))
    }
}

fn session_gone(peer_id: &str) -> RelayError {
    RelayError::NotFound(format!("peer {peer_id}"))
}

fn engine_failure(operation: &'static str, peer_id: &str, err: RelayError) -> RelayError {
    warn!(
        target: "relay.media",
        peer_id = %peer_id,
        operation = operation,
        error = %err,
        "Media engine call failed"
    );
    err
}

async fn discard_transport(peer_id: &str, transport: &dyn EngineTransport) {
    info!(
        target: "relay.media",
        peer_id = %peer_id,
        transport_id = %transport.id(),
        "Session removed during transport creation, discarding"
    );
    if let Err(e) = transport.close().await {
        warn!(target: "relay.media", peer_id = %peer_id, error = %e, "Failed to close discarded transport");
        metrics::record_teardown_failure("transport");
    }
}

async fn discard_producer(peer_id: &str, producer: &dyn EngineProducer) {
    info!(
        target: "relay.media",
        peer_id = %peer_id,
        producer_id = %producer.id(),
        "Session removed during producer creation, discarding"
    );
    if let Err(e) = producer.close().await {
        warn!(target: "relay.media", peer_id = %peer_id, error = %e, "Failed to close discarded producer");
        metrics::record_teardown_failure("producer");
    }
}

async fn discard_consumer(peer_id: &str, consumer: &dyn EngineConsumer) {
    info!(
        target: "relay.media",
        peer_id = %peer_id,
        consumer_id = %consumer.id(),
        "Session removed during consumer creation, discarding"
    );
    if let Err(e) = consumer.close().await {
        warn!(target: "relay.media", peer_id = %peer_id, error = %e, "Failed to close discarded consumer");
        metrics::record_teardown_failure("consumer");
    }
}
