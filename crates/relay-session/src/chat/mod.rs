//! Chat rooms: thread membership, bounded history and sender throttling.
//!
//! # Modules
//!
//! - [`manager`] - `ChatRoomManager`, the thread registry and public operations
//! - [`thread`] - `ChatThread` state guarded by a per-thread lock
//! - [`message`] - `ChatMessage` plus id/text normalization
//! - [`names`] - display-name resolution with anonymous fallback

pub mod manager;
pub mod message;
pub mod names;
pub mod thread;

pub use manager::{ChatRoomManager, ChatSettings, MAX_FETCH_LIMIT};
pub use message::{normalize_thread_id, sanitize_text, ChatMessage};
pub use names::{anonymous_name, DisplayNameResolver, HintNameResolver};
pub use thread::ChatThread;
