//! Peer sessions and their media resources.
//!
//! # Modules
//!
//! - [`session`] - `PeerSession` and its lock-guarded `MediaState`
//! - [`registry`] - `SessionRegistry`, id to session, with cascading teardown
//! - [`manager`] - `MediaResourceManager`, all engine-backed operations
//! - [`monitor`] - background task evicting transports the engine closed

pub mod manager;
pub mod monitor;
pub mod registry;
pub mod session;

pub use manager::MediaResourceManager;
pub use monitor::{handle_transport_closed, spawn_transport_monitor};
pub use registry::SessionRegistry;
pub use session::{
    EvictedResources, MediaSnapshot, MediaState, PeerSession, TeardownReport, TransportState,
};
