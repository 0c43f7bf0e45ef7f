//! Signaling dispatcher.
//!
//! Translates typed request messages from a connection into calls on the media
//! and chat managers, and turns every outcome into an acknowledgement. The
//! socket itself (framing, auth, liveness) belongs to the embedding server;
//! this module only defines the JSON shapes and the dispatch table.
//!
//! # Wire format
//!
//! Requests are tagged by `type` with camelCase fields:
//!
//! ```json
//! { "type": "send", "threadId": "room-1", "text": "hello" }
//! ```
//!
//! Every request yields `{ "ok": true, ... }` or `{ "ok": false, "error": "<kind>" }`.

use crate::chat::ChatMessage;
use crate::engine::{ConsumerParams, MediaKind, TransportParams};
use crate::errors::RelayError;
use crate::service::RelayService;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// History returned by `fetch` when the request carries no limit.
pub const DEFAULT_FETCH_LIMIT: i64 = 50;

/// Inbound signaling request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingRequest {
    CreateTransport,

    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: Value,
    },

    #[serde(rename_all = "camelCase")]
    Produce {
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename_all = "camelCase")]
    Consume {
        producer_id: String,
        rtp_capabilities: Value,
    },

    #[serde(rename_all = "camelCase")]
    ResumeConsumer { consumer_id: String },

    #[serde(rename_all = "camelCase")]
    JoinThread { thread_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveThread { thread_id: String },

    #[serde(rename_all = "camelCase")]
    Send { thread_id: String, text: String },

    #[serde(rename_all = "camelCase")]
    Typing { thread_id: String, is_typing: bool },

    #[serde(rename_all = "camelCase")]
    Fetch {
        thread_id: String,
        #[serde(default)]
        limit: Option<i64>,
    },

    Disconnect,
}

impl SignalingRequest {
    /// Returns the request type for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SignalingRequest::CreateTransport => "createTransport",
            SignalingRequest::ConnectTransport { .. } => "connectTransport",
            SignalingRequest::Produce { .. } => "produce",
            SignalingRequest::Consume { .. } => "consume",
            SignalingRequest::ResumeConsumer { .. } => "resumeConsumer",
            SignalingRequest::JoinThread { .. } => "joinThread",
            SignalingRequest::LeaveThread { .. } => "leaveThread",
            SignalingRequest::Send { .. } => "send",
            SignalingRequest::Typing { .. } => "typing",
            SignalingRequest::Fetch { .. } => "fetch",
            SignalingRequest::Disconnect => "disconnect",
        }
    }
}

/// Payload carried by a successful acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AckData {
    Transport(TransportParams),
    Producer { id: String },
    Consumer(ConsumerParams),
    History { history: Vec<ChatMessage> },
    Message { message: ChatMessage },
}

/// Acknowledgement for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<AckData>,
}

impl Ack {
    /// Success without payload.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(data: AckData) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    /// Failure carrying the error's wire kind.
    #[must_use]
    pub fn error(err: &RelayError) -> Self {
        Self {
            ok: false,
            error: Some(err.error_kind().to_string()),
            data: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ok
    }
}

impl From<Result<AckData, RelayError>> for Ack {
    fn from(result: Result<AckData, RelayError>) -> Self {
        match result {
            Ok(data) => Ack::with_data(data),
            Err(err) => Ack::error(&err),
        }
    }
}

impl From<Result<(), RelayError>> for Ack {
    fn from(result: Result<(), RelayError>) -> Self {
        match result {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::error(&err),
        }
    }
}

/// Routes requests from connections to the relay service.
#[derive(Clone)]
pub struct SignalingDispatcher {
    service: Arc<RelayService>,
}

impl SignalingDispatcher {
    #[must_use]
    pub fn new(service: Arc<RelayService>) -> Self {
        Self { service }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<RelayService> {
        &self.service
    }

    /// Handle one request from `peer_id`.
    ///
    /// Failures are returned in the acknowledgement, never raised.
    #[instrument(skip_all, fields(peer_id = %peer_id, request = request.name()))]
    pub async fn dispatch(&self, peer_id: &str, request: SignalingRequest) -> Ack {
        let name = request.name();

        if matches!(request, SignalingRequest::Disconnect) {
            self.disconnect(peer_id).await;
            return Ack::ok();
        }

        if let Err(err) = self.service.ensure_running() {
            return Ack::error(&err);
        }

        let ack = self.route(peer_id, request).await;

        match &ack.error {
            Some(kind) => debug!(
                target: "relay.signaling",
                peer_id = %peer_id,
                request = name,
                error = %kind,
                "Request rejected"
            ),
            None => debug!(
                target: "relay.signaling",
                peer_id = %peer_id,
                request = name,
                "Request handled"
            ),
        }

        ack
    }

    /// Tear down a connection (socket closed or explicit `disconnect`).
    pub async fn disconnect(&self, peer_id: &str) {
        if self.service.disconnect(peer_id).await.is_none() {
            warn!(
                target: "relay.signaling",
                peer_id = %peer_id,
                "Disconnect for unknown peer"
            );
        }
    }

    async fn route(&self, peer_id: &str, request: SignalingRequest) -> Ack {
        let media = self.service.media();
        let chat = self.service.chat();

        match request {
            SignalingRequest::CreateTransport => media
                .create_transport(peer_id)
                .await
                .map(AckData::Transport)
                .into(),

            SignalingRequest::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => media
                .connect_transport(peer_id, &transport_id, dtls_parameters)
                .await
                .into(),

            SignalingRequest::Produce {
                kind,
                rtp_parameters,
            } => media
                .create_producer(peer_id, kind, rtp_parameters)
                .await
                .map(|id| AckData::Producer { id })
                .into(),

            SignalingRequest::Consume {
                producer_id,
                rtp_capabilities,
            } => media
                .create_consumer(peer_id, &producer_id, rtp_capabilities)
                .await
                .map(AckData::Consumer)
                .into(),

            SignalingRequest::ResumeConsumer { consumer_id } => {
                media.resume_consumer(peer_id, &consumer_id).await.into()
            }

            SignalingRequest::JoinThread { thread_id } => {
                let result = match self.service.session(peer_id) {
                    Some(session) => chat.join_thread(&thread_id, session.connection()).await,
                    None => Err(RelayError::NotFound(format!("peer {peer_id}"))),
                };
                result.map(|history| AckData::History { history }).into()
            }

            SignalingRequest::LeaveThread { thread_id } => {
                chat.leave_thread(&thread_id, peer_id).await;
                Ack::ok()
            }

            SignalingRequest::Send { thread_id, text } => {
                let result = match self.service.session(peer_id) {
                    Some(session) => {
                        chat.send_message(&thread_id, &text, peer_id, session.profile_hint())
                            .await
                    }
                    None => Err(RelayError::NotFound(format!("peer {peer_id}"))),
                };
                result.map(|message| AckData::Message { message }).into()
            }

            SignalingRequest::Typing {
                thread_id,
                is_typing,
            } => {
                chat.typing_indicator(&thread_id, is_typing, peer_id).await;
                Ack::ok()
            }

            SignalingRequest::Fetch { thread_id, limit } => chat
                .fetch_history(&thread_id, limit.unwrap_or(DEFAULT_FETCH_LIMIT))
                .await
                .map(|history| AckData::History { history })
                .into(),

            // Handled before routing.
            SignalingRequest::Disconnect => Ack::ok(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_media_requests() {
        let request: SignalingRequest = serde_json::from_value(json!({
            "type": "connectTransport",
            "transportId": "t-1",
            "dtlsParameters": { "role": "client" },
        }))
        .unwrap();
        assert_eq!(
            request,
            SignalingRequest::ConnectTransport {
                transport_id: "t-1".to_string(),
                dtls_parameters: json!({ "role": "client" }),
            }
        );

        let request: SignalingRequest = serde_json::from_value(json!({
            "type": "produce",
            "kind": "video",
            "rtpParameters": {},
        }))
        .unwrap();
        assert_eq!(request.name(), "produce");

        let request: SignalingRequest =
            serde_json::from_value(json!({ "type": "createTransport" })).unwrap();
        assert_eq!(request, SignalingRequest::CreateTransport);
    }

    #[test]
    fn test_parse_chat_requests() {
        let request: SignalingRequest = serde_json::from_value(json!({
            "type": "typing",
            "threadId": "room-1",
            "isTyping": true,
        }))
        .unwrap();
        assert_eq!(
            request,
            SignalingRequest::Typing {
                thread_id: "room-1".to_string(),
                is_typing: true,
            }
        );

        let request: SignalingRequest =
            serde_json::from_value(json!({ "type": "fetch", "threadId": "room-1" })).unwrap();
        assert_eq!(
            request,
            SignalingRequest::Fetch {
                thread_id: "room-1".to_string(),
                limit: None,
            }
        );
    }

    #[test]
    fn test_unknown_request_type_rejected() {
        let result = serde_json::from_value::<SignalingRequest>(json!({ "type": "selfDestruct" }));
        assert!(result.is_err());

        let result =
            serde_json::from_value::<SignalingRequest>(json!({ "type": "produce", "kind": "screen", "rtpParameters": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_wire_shapes() {
        assert_eq!(serde_json::to_value(Ack::ok()).unwrap(), json!({ "ok": true }));

        assert_eq!(
            serde_json::to_value(Ack::error(&RelayError::EmptyMessage)).unwrap(),
            json!({ "ok": false, "error": "empty" })
        );

        assert_eq!(
            serde_json::to_value(Ack::with_data(AckData::History { history: vec![] })).unwrap(),
            json!({ "ok": true, "history": [] })
        );

        assert_eq!(
            serde_json::to_value(Ack::with_data(AckData::Producer {
                id: "p-1".to_string()
            }))
            .unwrap(),
            json!({ "ok": true, "id": "p-1" })
        );
    }

    #[test]
    fn test_transport_ack_flattens_params() {
        let ack = Ack::with_data(AckData::Transport(TransportParams {
            id: "t-1".to_string(),
            ice_parameters: json!({ "usernameFragment": "u" }),
            ice_candidates: json!([]),
            dtls_parameters: json!({ "fingerprints": [] }),
        }));

        assert_eq!(
            serde_json::to_value(ack).unwrap(),
            json!({
                "ok": true,
                "id": "t-1",
                "iceParameters": { "usernameFragment": "u" },
                "iceCandidates": [],
                "dtlsParameters": { "fingerprints": [] },
            })
        );
    }

    #[test]
    fn test_engine_details_not_exposed() {
        let ack: Ack = Err::<(), _>(RelayError::EngineFailure("worker 3 died".to_string())).into();
        let value = serde_json::to_value(ack).unwrap();
        assert_eq!(value, json!({ "ok": false, "error": "engine_failure" }));
    }
}
