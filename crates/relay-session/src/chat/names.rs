//! Display-name resolution for chat senders.
//!
//! A connection may carry an opaque profile hint from the authenticated layer.
//! Resolvers turn it into a human-readable name; anything they cannot resolve
//! falls back to an anonymous name derived from the connection id.

use async_trait::async_trait;

/// Longest display name kept from a resolver.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Characters of the connection id used in anonymous names.
const ANONYMOUS_ID_PREFIX_LEN: usize = 6;

/// Maps a profile hint to a display name.
#[async_trait]
pub trait DisplayNameResolver: Send + Sync {
    /// Resolve `profile_hint` to a name, or `None` if unknown.
    async fn display_name(&self, profile_hint: Option<&str>) -> Option<String>;
}

/// Resolver that uses the profile hint itself as the name.
#[derive(Debug, Default, Clone, Copy)]
pub struct HintNameResolver;

#[async_trait]
impl DisplayNameResolver for HintNameResolver {
    async fn display_name(&self, profile_hint: Option<&str>) -> Option<String> {
        profile_hint.map(str::to_string)
    }
}

/// Name used when no resolver result is available.
#[must_use]
pub fn anonymous_name(connection_id: &str) -> String {
    let prefix: String = connection_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(ANONYMOUS_ID_PREFIX_LEN)
        .collect();
    format!("Guest-{prefix}")
}

/// Resolve a sender's name, applying length limits and the anonymous fallback.
pub async fn resolve_sender_name(
    resolver: &dyn DisplayNameResolver,
    profile_hint: Option<&str>,
    sender_id: &str,
) -> String {
    resolver
        .display_name(profile_hint)
        .await
        .map(|name| {
            name.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(MAX_DISPLAY_NAME_LEN)
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| anonymous_name(sender_id))
}
