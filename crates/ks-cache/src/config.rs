//! Key distribution cache configuration.
//!
//! Loaded from the environment in services, built with `CacheConfig::new`
//! and the `with_*` setters in tests.

use common::jwks::Jwks;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default freshness target for the cached key set (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Default background refresh interval (30 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 1800;

/// Default per-request timeout for the distribution endpoint.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default fetch attempts per refresh cycle.
pub const DEFAULT_REFRESH_MAX_ATTEMPTS: u32 = 3;

/// Default window a cold start blocks for before falling back.
pub const DEFAULT_STARTUP_TIMEOUT_SECONDS: u64 = 30;

/// Default first retry delay; doubles per attempt.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Retry delays never exceed this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound for every configured duration (30 days). Deadlines are built
/// by adding these to `Instant::now()`, which must not overflow.
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(30 * 86_400);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Distribution endpoint, e.g. `http://ks:8082/.well-known/jwks.json`.
    pub jwks_url: String,
    pub ttl: Duration,
    /// Must be strictly shorter than `ttl`.
    pub refresh_interval: Duration,
    pub http_timeout: Duration,
    pub max_attempts: u32,
    pub startup_timeout: Duration,
    pub initial_backoff: Duration,
    /// Used only when the endpoint is unreachable at cold start.
    pub static_fallback: Option<Jwks>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid static fallback JWKS: {0}")]
    InvalidFallback(String),
}

impl CacheConfig {
    /// Defaults for everything except the endpoint.
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECONDS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            max_attempts: DEFAULT_REFRESH_MAX_ATTEMPTS,
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECONDS),
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            static_fallback: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwks_url = vars
            .get("KS_JWKS_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("KS_JWKS_URL".to_string()))?;

        let ttl = parse_positive(vars, "KS_CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECONDS)?;
        let refresh =
            parse_positive(vars, "KS_CACHE_REFRESH_SECONDS", DEFAULT_REFRESH_INTERVAL_SECONDS)?;
        let http_timeout =
            parse_positive(vars, "KS_HTTP_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT_SECONDS)?;
        let max_attempts = parse_positive(
            vars,
            "KS_REFRESH_MAX_ATTEMPTS",
            u64::from(DEFAULT_REFRESH_MAX_ATTEMPTS),
        )?;
        let startup_timeout =
            parse_positive(vars, "KS_STARTUP_TIMEOUT_SECONDS", DEFAULT_STARTUP_TIMEOUT_SECONDS)?;

        let static_fallback = match vars.get("KS_STATIC_FALLBACK_JWKS").filter(|v| !v.is_empty()) {
            Some(raw) => {
                let jwks: Jwks = serde_json::from_str(raw)
                    .map_err(|e| ConfigError::InvalidFallback(e.to_string()))?;
                if jwks.is_empty() {
                    return Err(ConfigError::InvalidFallback("key set is empty".to_string()));
                }
                Some(jwks)
            }
            None => None,
        };

        let config = Self {
            jwks_url: jwks_url.clone(),
            ttl: Duration::from_secs(ttl),
            refresh_interval: Duration::from_secs(refresh),
            http_timeout: Duration::from_secs(http_timeout),
            max_attempts: u32::try_from(max_attempts)
                .map_err(|_| invalid("KS_REFRESH_MAX_ATTEMPTS", "too large"))?,
            startup_timeout: Duration::from_secs(startup_timeout),
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            static_fallback,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwks_url.is_empty() {
            return Err(ConfigError::MissingEnvVar("KS_JWKS_URL".to_string()));
        }
        if self.ttl.is_zero() || self.http_timeout.is_zero() || self.startup_timeout.is_zero() {
            return Err(invalid("durations", "must be greater than zero"));
        }
        if self.refresh_interval.is_zero() || self.refresh_interval >= self.ttl {
            return Err(invalid(
                "KS_CACHE_REFRESH_SECONDS",
                "must be greater than zero and shorter than the cache TTL",
            ));
        }
        for (name, value) in [
            ("KS_CACHE_TTL_SECONDS", self.ttl),
            ("KS_CACHE_REFRESH_SECONDS", self.refresh_interval),
            ("KS_HTTP_TIMEOUT_SECONDS", self.http_timeout),
            ("KS_STARTUP_TIMEOUT_SECONDS", self.startup_timeout),
            ("initial_backoff", self.initial_backoff),
        ] {
            if value > MAX_CONFIG_DURATION {
                return Err(invalid(name, "must not exceed 30 days"));
            }
        }
        if self.max_attempts == 0 {
            return Err(invalid("KS_REFRESH_MAX_ATTEMPTS", "must be at least 1"));
        }
        Ok(())
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_http_timeout(mut self, http_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_static_fallback(mut self, jwks: Jwks) -> Self {
        self.static_fallback = Some(jwks);
        self
    }
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
