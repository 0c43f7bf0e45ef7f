//! # Relay Test Utilities
//!
//! Shared test utilities for the relay session core.
//!
//! This crate provides a mock media engine and test fixtures for exercising
//! the relay without a real media stack.
//!
//! ## Modules
//!
//! - `mock_engine` - In-memory `MediaEngine` with close counters, failure
//!   injection and a gate for holding transport creation in flight
//! - `fixtures` - Configs, a ready-built service, placeholder parameters and a
//!   recording display-name resolver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockMediaEngine::new();
//!     let service = test_service(test_config(), &engine);
//!
//!     let _outbound = service.connect("peer-1", None).unwrap();
//!     service.media().create_transport("peer-1").await.unwrap();
//!
//!     service.disconnect("peer-1").await;
//!     assert_eq!(engine.open_resource_count(), 0);
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;

pub use fixtures::*;
pub use mock_engine::*;
