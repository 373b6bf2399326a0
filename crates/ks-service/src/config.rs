use crate::models::{SigningAlgorithm, TriggerType};
use base64::{engine::general_purpose, Engine as _};
use common::secret::{clone_secret_bytes, secret_bytes, SecretBytes};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default rotation interval (weekly).
pub const DEFAULT_ROTATION_INTERVAL_HOURS: u64 = 168;

/// Default overlap window for superseded keys.
pub const DEFAULT_OVERLAP_HOURS: u64 = 24;

/// Default scheduler tick.
pub const DEFAULT_SCHEDULER_TICK_SECONDS: u64 = 60;

/// Default bound on a single key store call.
pub const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 5;

/// Default `Cache-Control: max-age` for the JWKS document.
pub const DEFAULT_JWKS_MAX_AGE_SECONDS: u64 = 3600;

/// Default HTTP drain period on shutdown.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Upper bound for interval and overlap (ten years).
pub const MAX_ROTATION_HOURS: u64 = 87_600;

pub struct Config {
    /// Postgres URL. `None` selects the in-memory key store.
    pub database_url: Option<String>,
    pub bind_address: String,
    /// AES-256-GCM key sealing private material at rest.
    pub master_key: SecretBytes,
    /// Prefix for generated key IDs.
    pub cluster_name: String,
    pub signing_algorithm: SigningAlgorithm,
    pub rotation: RotationSettings,
    pub scheduler_tick: Duration,
    pub store_timeout: Duration,
    pub jwks_max_age: Duration,
    pub drain_period: Duration,
}

/// Rotation policy used to seed `RotationConfig` at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub interval: chrono::Duration,
    pub overlap: chrono::Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_type: TriggerType::Time,
            interval: hours(DEFAULT_ROTATION_INTERVAL_HOURS),
            overlap: hours(DEFAULT_OVERLAP_HOURS),
        }
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            database_url: self.database_url.clone(),
            bind_address: self.bind_address.clone(),
            master_key: clone_secret_bytes(&self.master_key),
            cluster_name: self.cluster_name.clone(),
            signing_algorithm: self.signing_algorithm,
            rotation: self.rotation.clone(),
            scheduler_tick: self.scheduler_tick,
            store_timeout: self.store_timeout,
            jwks_max_age: self.jwks_max_age,
            drain_period: self.drain_period,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("bind_address", &self.bind_address)
            .field("master_key", &"[REDACTED]")
            .field("cluster_name", &self.cluster_name)
            .field("signing_algorithm", &self.signing_algorithm)
            .field("rotation", &self.rotation)
            .field("scheduler_tick", &self.scheduler_tick)
            .field("store_timeout", &self.store_timeout)
            .field("jwks_max_age", &self.jwks_max_age)
            .field("drain_period", &self.drain_period)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid master key format: {0}")]
    InvalidMasterKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars.get("DATABASE_URL").filter(|v| !v.is_empty()).cloned();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8082".to_string());

        let master_key_base64 = vars
            .get("KS_MASTER_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("KS_MASTER_KEY".to_string()))?;

        let master_key = general_purpose::STANDARD
            .decode(master_key_base64)
            .map_err(ConfigError::Base64Error)?;

        if master_key.len() != 32 {
            return Err(ConfigError::InvalidMasterKey(format!(
                "Expected 32 bytes, got {}",
                master_key.len()
            )));
        }

        let cluster_name = vars
            .get("CLUSTER_NAME")
            .cloned()
            .unwrap_or_else(|| "us".to_string());
        if cluster_name.is_empty() || !cluster_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("CLUSTER_NAME", "must be non-empty ASCII alphanumerics or '-'"));
        }

        let signing_algorithm = match vars.get("KS_SIGNING_ALGORITHM") {
            Some(raw) => raw
                .parse::<SigningAlgorithm>()
                .map_err(|e| invalid("KS_SIGNING_ALGORITHM", &e))?,
            None => SigningAlgorithm::EdDsa,
        };

        let enabled = match vars.get("KS_ROTATION_ENABLED") {
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|_| invalid("KS_ROTATION_ENABLED", "expected true or false"))?,
            None => true,
        };

        let trigger_type = match vars.get("KS_ROTATION_TRIGGER") {
            Some(raw) => raw
                .parse::<TriggerType>()
                .map_err(|e| invalid("KS_ROTATION_TRIGGER", &e))?,
            None => TriggerType::Time,
        };

        let interval_hours =
            parse_positive(vars, "KS_ROTATION_INTERVAL_HOURS", DEFAULT_ROTATION_INTERVAL_HOURS)?;
        let overlap_hours = parse_positive(vars, "KS_OVERLAP_HOURS", DEFAULT_OVERLAP_HOURS)?;
        for (name, value) in [
            ("KS_ROTATION_INTERVAL_HOURS", interval_hours),
            ("KS_OVERLAP_HOURS", overlap_hours),
        ] {
            if value > MAX_ROTATION_HOURS {
                return Err(invalid(name, "exceeds ten years"));
            }
        }

        if overlap_hours >= interval_hours {
            tracing::warn!(
                target: "ks.config",
                interval_hours,
                overlap_hours,
                "Overlap window is not shorter than the rotation interval; verification key set will keep growing"
            );
        }

        let scheduler_tick =
            parse_positive(vars, "KS_SCHEDULER_TICK_SECONDS", DEFAULT_SCHEDULER_TICK_SECONDS)?;
        let store_timeout =
            parse_positive(vars, "KS_STORE_TIMEOUT_SECONDS", DEFAULT_STORE_TIMEOUT_SECONDS)?;
        let jwks_max_age =
            parse_positive(vars, "KS_JWKS_MAX_AGE_SECONDS", DEFAULT_JWKS_MAX_AGE_SECONDS)?;

        let drain_secs = match vars.get("KS_DRAIN_SECONDS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| invalid("KS_DRAIN_SECONDS", "expected a non-negative integer"))?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        Ok(Config {
            database_url,
            bind_address,
            master_key: secret_bytes(master_key),
            cluster_name,
            signing_algorithm,
            rotation: RotationSettings {
                enabled,
                trigger_type,
                interval: hours(interval_hours),
                overlap: hours(overlap_hours),
            },
            scheduler_tick: Duration::from_secs(scheduler_tick),
            store_timeout: Duration::from_secs(store_timeout),
            jwks_max_age: Duration::from_secs(jwks_max_age),
            drain_period: Duration::from_secs(drain_secs),
        })
    }
}

// Callers bound `value` by MAX_ROTATION_HOURS.
#[allow(clippy::cast_possible_wrap)]
fn hours(value: u64) -> chrono::Duration {
    chrono::Duration::hours(value as i64)
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(invalid(name, "must be greater than zero")),
        Ok(value) => Ok(value),
        Err(_) => Err(invalid(name, "expected a positive integer")),
    }
}
