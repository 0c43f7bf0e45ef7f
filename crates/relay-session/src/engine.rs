//! Media engine capability boundary.
//!
//! The wire-level media stack (ICE, DTLS, RTP) lives behind these traits and is
//! injected into the relay service. The core only stores handles, forwards
//! engine-defined parameters, and closes resources on teardown.
//!
//! Parameters such as ICE candidates or RTP capabilities are opaque JSON
//! documents owned by the engine.

use crate::config::NetworkConfig;
use crate::errors::EngineError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of media carried by a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that the engine closed a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportClosed {
    /// Session that owned the transport.
    pub peer_id: String,
    /// Transport that closed.
    pub transport_id: String,
}

/// Observer handed to the engine when a transport is created.
///
/// The engine calls [`TransportCloseNotifier::notify`] once the transport
/// closes for any reason. Delivery is queued, so notifying never blocks and is
/// safe from inside engine callbacks.
#[derive(Debug, Clone)]
pub struct TransportCloseNotifier {
    peer_id: String,
    sender: mpsc::UnboundedSender<TransportClosed>,
}

impl TransportCloseNotifier {
    pub fn new(peer_id: String, sender: mpsc::UnboundedSender<TransportClosed>) -> Self {
        Self { peer_id, sender }
    }

    /// Session this notifier reports for.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Report that `transport_id` closed. Returns `false` if nobody is listening.
    pub fn notify(&self, transport_id: &str) -> bool {
        self.sender
            .send(TransportClosed {
                peer_id: self.peer_id.clone(),
                transport_id: transport_id.to_string(),
            })
            .is_ok()
    }
}

/// Factory for media transports.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a transport bound per `network`; the engine must invoke
    /// `on_close` when the transport closes.
    async fn create_transport(
        &self,
        network: &NetworkConfig,
        on_close: TransportCloseNotifier,
    ) -> Result<Arc<dyn EngineTransport>, EngineError>;
}

/// One secured network path between a peer and the relay.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    /// Engine-assigned transport id.
    fn id(&self) -> &str;

    /// ICE parameters for the remote peer.
    fn ice_parameters(&self) -> Value;

    /// ICE candidates for the remote peer.
    fn ice_candidates(&self) -> Value;

    /// Local DTLS parameters for the remote peer.
    fn dtls_parameters(&self) -> Value;

    /// Finalize the DTLS handshake with the remote peer's parameters.
    async fn connect(&self, dtls_parameters: Value) -> Result<(), EngineError>;

    /// Start receiving an outbound flow from the peer.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Arc<dyn EngineProducer>, EngineError>;

    /// Start sending a remote producer's flow to the peer.
    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: Value,
        paused: bool,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError>;

    /// Close the transport and everything routed over it.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Outbound media flow sent by a peer.
#[async_trait]
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Inbound media flow received by a peer.
#[async_trait]
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> &str;

    /// Producer this consumer is derived from.
    fn producer_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Negotiated RTP parameters for the receiving peer.
    fn rtp_parameters(&self) -> Value;

    /// Begin flowing media.
    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Connection parameters returned after transport creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

impl TransportParams {
    pub(crate) fn from_transport(transport: &dyn EngineTransport) -> Self {
        Self {
            id: transport.id().to_string(),
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
        }
    }
}

/// Parameters the receiving peer needs to attach a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

impl ConsumerParams {
    pub(crate) fn from_consumer(consumer: &dyn EngineConsumer) -> Self {
        Self {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        }
    }
}
