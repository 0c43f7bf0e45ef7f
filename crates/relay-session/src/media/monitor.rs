//! Transport-close monitor.
//!
//! The engine reports closed transports through a queue instead of calling back
//! into session state directly; this task drains the queue and evicts the
//! transport plus every producer and consumer created on it.
//!
//! Each eviction runs as its own task. An eviction waits for the session lock,
//! which an in-flight engine call may hold for a long time; that must only
//! delay cleanup of the same session.

use super::registry::SessionRegistry;
use super::session::EvictedResources;
use crate::engine::TransportClosed;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn the monitor.
///
/// On cancellation, pending evictions are aborted. When every sender is
/// dropped, pending evictions finish first.
pub fn spawn_transport_monitor(
    registry: Arc<SessionRegistry>,
    mut events: mpsc::UnboundedReceiver<TransportClosed>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(target: "relay.media", "Transport monitor started");
        let mut evictions = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(target: "relay.media", pending = evictions.len(), "Transport monitor cancelled");
                    evictions.abort_all();
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!(target: "relay.media", "Transport close channel closed");
                        while let Some(result) = evictions.join_next().await {
                            log_eviction_failure(result);
                        }
                        break;
                    };
                    let registry = Arc::clone(&registry);
                    evictions.spawn(async move {
                        handle_transport_closed(&registry, &event).await;
                    });
                }
                Some(result) = evictions.join_next(), if !evictions.is_empty() => {
                    log_eviction_failure(result);
                }
            }
        }
    })
}

fn log_eviction_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            warn!(target: "relay.media", error = %e, "Transport eviction task failed");
        }
    }
}

/// Evict a closed transport from its session.
///
/// Returns `None` if the session no longer exists (teardown already ran).
pub async fn handle_transport_closed(
    registry: &SessionRegistry,
    event: &TransportClosed,
) -> Option<EvictedResources> {
    let session = registry.get_session(&event.peer_id)?;
    let evicted = session
        .media()
        .lock()
        .await
        .evict_transport(&event.transport_id);

    if evicted.transport {
        info!(
            target: "relay.media",
            peer_id = %event.peer_id,
            transport_id = %event.transport_id,
            producers = evicted.producers,
            consumers = evicted.consumers,
            "Transport closed by engine, resources evicted"
        );
    }

    Some(evicted)
}
