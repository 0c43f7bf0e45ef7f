//! Pre-configured test data for relay session tests.
//!
//! Provides:
//! - Configs with small, deterministic limits
//! - A ready-to-use `RelayService` backed by [`MockMediaEngine`]
//! - A display-name resolver that records every lookup

use crate::mock_engine::MockMediaEngine;

use async_trait::async_trait;
use relay_session::chat::DisplayNameResolver;
use relay_session::{Config, RelayService};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Default config with a small mailbox.
#[must_use]
pub fn test_config() -> Config {
    Config {
        mailbox_capacity: 64,
        ..Config::default()
    }
}

/// Config with a custom history size and rate limit.
#[must_use]
pub fn test_config_with_limits(max_history: usize, rate_limit: u32, window: Duration) -> Config {
    Config {
        max_history,
        rate_limit_max: rate_limit,
        rate_limit_window: window,
        ..test_config()
    }
}

/// Build a service over `engine` with the given config.
///
/// Panics on an invalid config; must run inside a Tokio runtime.
#[must_use]
pub fn test_service(config: Config, engine: &MockMediaEngine) -> Arc<RelayService> {
    Arc::new(
        RelayService::builder(config)
            .engine(Arc::new(engine.clone()))
            .build()
            .expect("test service should build"),
    )
}

/// Random connection id.
#[must_use]
pub fn unique_peer_id() -> String {
    format!("peer-{}", Uuid::new_v4())
}

/// Placeholder DTLS parameters sent by a client.
#[must_use]
pub fn client_dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB:CC" }],
    })
}

/// Placeholder RTP parameters for a producer.
#[must_use]
pub fn rtp_parameters() -> Value {
    json!({ "codecs": [], "encodings": [{ "ssrc": 1111 }] })
}

/// Placeholder receiver RTP capabilities.
#[must_use]
pub fn rtp_capabilities() -> Value {
    json!({ "codecs": [], "headerExtensions": [] })
}

/// Resolver with fixed hint-to-name mappings that records every lookup.
#[derive(Debug, Default)]
pub struct RecordingNameResolver {
    names: HashMap<String, String>,
    lookups: Mutex<Vec<Option<String>>>,
}

impl RecordingNameResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hint` to `name`.
    #[must_use]
    pub fn with_name(mut self, hint: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(hint.into(), name.into());
        self
    }

    /// Every hint passed to the resolver, in call order.
    #[must_use]
    pub fn lookups(&self) -> Vec<Option<String>> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisplayNameResolver for RecordingNameResolver {
    async fn display_name(&self, profile_hint: Option<&str>) -> Option<String> {
        self.lookups
            .lock()
            .unwrap()
            .push(profile_hint.map(str::to_string));
        profile_hint.and_then(|hint| self.names.get(hint).cloned())
    }
}
