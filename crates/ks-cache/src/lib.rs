//! Consumer-side cache of the key service's verification key set.
//!
//! Request-path code reads keys from [`cache::KeyDistributionCache`] without a
//! network round trip; a background task keeps the cache fresh and the
//! [`validator::JwtValidator`] verifies tokens against it.

pub mod cache;
pub mod config;
pub mod errors;
pub mod health;
pub mod observability;
pub mod tasks;
pub mod validator;
