//! Relay Session Core
//!
//! Server-side session state for a live-streaming relay: per-connection media
//! resources brokered through an injected media engine, plus lightweight chat
//! rooms with bounded history and per-sender throttling.
//!
//! - Media resource lifecycle (transports, producers, consumers) per connection
//! - Cascading teardown when a connection goes away
//! - Chat threads with ordered broadcast and capacity-bounded history
//! - Fixed-window rate limiting of chat senders
//! - Typed signaling requests and acknowledgements
//!
//! # Architecture
//!
//! ```text
//! RelayService (one per process, no globals)
//! ├── SessionRegistry        connection id -> PeerSession
//! │   └── PeerSession        transports, producer per kind, consumers
//! ├── MediaResourceManager   engine calls, re-checked against the registry
//! │   └── transport monitor  evicts transports the engine closed
//! ├── ChatRoomManager        threads, history, broadcast
//! │   └── RateLimiter        per-sender fixed window
//! └── SignalingDispatcher    request -> manager call -> Ack
//! ```
//!
//! The wire-level media stack (ICE, DTLS, RTP) stays behind the
//! [`engine::MediaEngine`] trait; the crate never touches media packets.
//!
//! # Modules
//!
//! - [`chat`] - Chat threads, messages and display names
//! - [`config`] - Configuration from environment
//! - [`connection`] - Per-connection outbound mailbox
//! - [`engine`] - Media engine capability traits
//! - [`errors`] - Error types with wire-level error kinds
//! - [`media`] - Peer sessions, registry and media manager
//! - [`observability`] - Tracing setup and metrics
//! - [`rate_limit`] - Fixed-window rate limiter
//! - [`service`] - Service assembly and lifecycle
//! - [`signaling`] - Request routing and acknowledgements

pub mod chat;
pub mod config;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod media;
pub mod observability;
pub mod rate_limit;
pub mod service;
pub mod signaling;

pub use config::Config;
pub use errors::{EngineError, RelayError, StartupError};
pub use service::{RelayService, RelayServiceBuilder};
pub use signaling::{Ack, AckData, SignalingDispatcher, SignalingRequest};
