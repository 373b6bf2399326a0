//! Key Service library
//!
//! Signing-key lifecycle authority: generation, time-based and manual
//! rotation with overlap windows, the verification key set, and its
//! distribution as JWKS.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
