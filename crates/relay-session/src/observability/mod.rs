//! Observability for the relay session core.
//!
//! # Privacy by Default
//!
//! Spans use `#[instrument(skip_all)]` with explicit safe fields (peer ids,
//! thread ids, resource ids). Message text and profile hints are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_sessions_active` | Gauge | none | Registered peer sessions |
//! | `relay_media_operations_total` | Counter | `operation`, `status` | Media engine call outcomes |
//! | `relay_teardown_failures_total` | Counter | `resource` | Swallowed close failures |
//! | `relay_chat_messages_total` | Counter | none | Accepted chat messages |
//! | `relay_chat_rejected_total` | Counter | `reason` | Rejected chat messages |
//! | `relay_broadcast_dropped_total` | Counter | `event` | Events lost to full mailboxes |

pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "relay_session=info";

/// Install a global `tracing` subscriber honoring `RUST_LOG`.
///
/// Intended for the embedding binary. Returns `false` if a subscriber was
/// already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    }
}
