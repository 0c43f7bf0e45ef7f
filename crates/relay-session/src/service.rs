//! `RelayService` - owns and wires every relay component.
//!
//! One service instance holds the session registry, the media manager, the
//! chat manager and the background tasks (transport-close monitor and rate
//! limiter pruning). There are no process-wide singletons; tests build as many
//! services as they like.
//!
//! # Lifecycle
//!
//! 1. [`RelayServiceBuilder::build`] validates config and requires an engine
//! 2. [`RelayService::connect`] registers a peer and hands back its mailbox
//! 3. Signaling requests run against [`RelayService::media`] / [`RelayService::chat`]
//! 4. [`RelayService::disconnect`] tears the peer down and leaves its threads
//! 5. [`RelayService::shutdown`] rejects new work and drains every session

use crate::chat::{ChatRoomManager, ChatSettings, DisplayNameResolver, HintNameResolver};
use crate::config::Config;
use crate::connection::OutboundEvent;
use crate::engine::MediaEngine;
use crate::errors::{RelayError, StartupError};
use crate::media::{
    spawn_transport_monitor, MediaResourceManager, PeerSession, SessionRegistry, TeardownReport,
};
use crate::rate_limit::RateLimiter;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Builder for [`RelayService`].
pub struct RelayServiceBuilder {
    config: Config,
    engine: Option<Arc<dyn MediaEngine>>,
    name_resolver: Option<Arc<dyn DisplayNameResolver>>,
}

impl RelayServiceBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            name_resolver: None,
        }
    }

    /// Media engine backing every transport. Required.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Display-name resolver for chat senders. Defaults to [`HintNameResolver`].
    #[must_use]
    pub fn name_resolver(mut self, resolver: Arc<dyn DisplayNameResolver>) -> Self {
        self.name_resolver = Some(resolver);
        self
    }

    /// Assemble the service and spawn its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::MissingMediaEngine` if no engine was supplied, or
    /// `StartupError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<RelayService, StartupError> {
        self.config.validate()?;
        let engine = self.engine.ok_or(StartupError::MissingMediaEngine)?;
        let resolver = self
            .name_resolver
            .unwrap_or_else(|| Arc::new(HintNameResolver));

        let cancel_token = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new());

        let (media, closed_rx) = MediaResourceManager::new(
            engine,
            Arc::clone(&registry),
            self.config.network.clone(),
        );

        let chat = Arc::new(ChatRoomManager::new(
            ChatSettings::from(&self.config),
            RateLimiter::new(self.config.rate_limit_max, self.config.rate_limit_window),
            resolver,
        ));

        let monitor = spawn_transport_monitor(
            Arc::clone(&registry),
            closed_rx,
            cancel_token.child_token(),
        );
        let pruner = spawn_rate_limit_pruner(Arc::clone(&chat), cancel_token.child_token());

        info!(
            target: "relay.service",
            max_history = self.config.max_history,
            rate_limit = self.config.rate_limit_max,
            rate_window = ?self.config.rate_limit_window,
            "Relay service started"
        );

        Ok(RelayService {
            config: self.config,
            registry,
            media,
            chat,
            cancel_token,
            tasks: Mutex::new(vec![monitor, pruner]),
        })
    }
}

/// The relay session core.
pub struct RelayService {
    config: Config,
    registry: Arc<SessionRegistry>,
    media: MediaResourceManager,
    chat: Arc<ChatRoomManager>,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayService {
    /// Start building a service from `config`.
    #[must_use]
    pub fn builder(config: Config) -> RelayServiceBuilder {
        RelayServiceBuilder::new(config)
    }

    /// Register `peer_id` and return its outbound event mailbox.
    ///
    /// Idempotent: connecting an id that is already registered keeps the
    /// existing session and returns `Ok(None)`, since its mailbox is already
    /// owned by the first caller.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ShuttingDown` once shutdown has begun.
    #[instrument(skip_all, fields(peer_id = %peer_id))]
    pub fn connect(
        &self,
        peer_id: &str,
        profile_hint: Option<String>,
    ) -> Result<Option<mpsc::Receiver<OutboundEvent>>, RelayError> {
        self.ensure_running()?;
        let (_, outbound) =
            self.registry
                .create_session(peer_id, profile_hint, self.config.mailbox_capacity);
        if outbound.is_none() {
            warn!(target: "relay.service", peer_id = %peer_id, "Duplicate connect ignored");
        }
        Ok(outbound)
    }

    /// Tear down `peer_id`: close all media and leave every chat thread.
    ///
    /// Allowed during shutdown. Unknown ids return `None`.
    #[instrument(skip_all, fields(peer_id = %peer_id))]
    pub async fn disconnect(&self, peer_id: &str) -> Option<TeardownReport> {
        let report = self.media.remove_peer(peer_id).await;
        let threads_left = self.chat.leave_all(peer_id).await;

        debug!(
            target: "relay.service",
            peer_id = %peer_id,
            known = report.is_some(),
            threads_left,
            "Peer disconnected"
        );

        report
    }

    /// Stop accepting work, tear down every session and stop background tasks.
    ///
    /// Returns the number of sessions torn down. Calling it twice is harmless.
    pub async fn shutdown(&self) -> usize {
        self.cancel_token.cancel();
        info!(target: "relay.service", "Relay service shutting down");

        let mut drained = 0;
        for peer_id in self.registry.peer_ids() {
            if self.disconnect(&peer_id).await.is_some() {
                drained += 1;
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(target: "relay.service", error = %e, "Background task failed");
            }
        }

        info!(
            target: "relay.service",
            sessions_drained = drained,
            "Relay service shut down"
        );
        drained
    }

    /// Fail with `ShuttingDown` once shutdown has begun.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ShuttingDown` after [`RelayService::shutdown`].
    pub fn ensure_running(&self) -> Result<(), RelayError> {
        if self.cancel_token.is_cancelled() {
            Err(RelayError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn session(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.registry.get_session(peer_id)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn media(&self) -> &MediaResourceManager {
        &self.media
    }

    #[must_use]
    pub fn chat(&self) -> &ChatRoomManager {
        &self.chat
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for RelayService {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Periodically drop elapsed rate-limit windows.
fn spawn_rate_limit_pruner(
    chat: Arc<ChatRoomManager>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(chat.rate_limiter().window());
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = chat.rate_limiter().prune_expired();
                    if pruned > 0 {
                        debug!(target: "relay.service", pruned, "Pruned rate limit windows");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_without_engine_fails() {
        let result = RelayService::builder(Config::default()).build();
        assert!(matches!(result, Err(StartupError::MissingMediaEngine)));
    }

    #[tokio::test]
    async fn test_build_with_invalid_config_fails() {
        let config = Config {
            max_history: 0,
            ..Config::default()
        };
        let result = RelayService::builder(config).build();
        assert!(matches!(result, Err(StartupError::Config(_))));
    }
}
