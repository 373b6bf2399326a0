//! Common utilities and types shared by the key service and its consumers.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (validation, claims, constants)
pub mod jwt;

/// Module for the JWKS wire format served by the key service
pub mod jwks;
