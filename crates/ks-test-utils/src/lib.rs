//! # Key Service Test Utilities
//!
//! Shared test utilities for the key service and the key distribution cache.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed master key, seeded Ed25519 keys)
//! - Server test harness (`TestKeyServer`, a real router on a random port
//!   driven by a `MockClock`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ks_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestKeyServer::spawn().await?;
//!     let token = server.sign_token("svc-a").await?;
//!
//!     server.clock().advance(chrono::Duration::hours(2));
//!     server.manager().rotate_now(Actor::System).await?;
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
