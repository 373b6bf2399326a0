//! Key Distribution Cache.
//!
//! Holds the last verification key set fetched from the key service's
//! `/.well-known/jwks.json` endpoint.
//!
//! # Read path
//!
//! - Fresh cache: returned immediately.
//! - Stale cache: returned immediately; one background refresh is kicked off.
//! - Empty cache (cold start): the first caller blocks, retrying with backoff
//!   for at most `startup_timeout`, then falls back to the static key set,
//!   then fails with `NoKeysAvailable`. Later cold callers make a single
//!   bounded attempt instead of waiting out the window again.
//!
//! Readers share a `tokio::sync::RwLock`; the write lock is only taken to
//! swap in a new `Arc<CachedKeys>`, never across a network call.

use crate::config::{CacheConfig, MAX_BACKOFF};
use crate::errors::CacheError;
use crate::observability::metrics::{record_cache_read, record_cache_refresh, set_cache_keys};
use common::jwks::{JsonWebKey, Jwks};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Minimum spacing between forced refreshes triggered by unknown `kid`s.
pub const FORCED_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Distribution,
    StaticFallback,
    None,
}

/// One immutable snapshot of the key set.
#[derive(Debug, Clone)]
pub struct CachedKeys {
    pub jwks: Jwks,
    pub fetched_at: Instant,
    pub source: KeySource,
}

impl CachedKeys {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.jwks.find(kid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Freshness report for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub source: KeySource,
    pub key_count: usize,
    pub age_seconds: Option<u64>,
    /// Failed refresh cycles since the last success.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RefreshStats {
    consecutive_failures: u32,
    last_error: Option<String>,
}

pub struct KeyDistributionCache {
    config: CacheConfig,
    http_client: reqwest::Client,
    current: RwLock<Option<Arc<CachedKeys>>>,
    cold_start: Mutex<()>,
    startup_window_spent: AtomicBool,
    background_refresh: AtomicBool,
    last_forced_refresh: Mutex<Option<Instant>>,
    stats: Mutex<RefreshStats>,
    shutdown: CancellationToken,
}

impl KeyDistributionCache {
    /// Create an empty cache. Nothing is fetched until the first `get` or
    /// refresh.
    ///
    /// # Errors
    ///
    /// `Configuration` if the config fails validation.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "ks_cache.refresh", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Ok(Self {
            config,
            http_client,
            current: RwLock::new(None),
            cold_start: Mutex::new(()),
            startup_window_spent: AtomicBool::new(false),
            background_refresh: AtomicBool::new(false),
            last_forced_refresh: Mutex::new(None),
            stats: Mutex::new(RefreshStats::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stop starting background refreshes from stale reads. Reads keep
    /// serving the cached set; a refresh already in flight completes.
    ///
    /// The refresh task calls this when its token is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Current key set.
    ///
    /// Never blocks on the network once a key set is cached, whether or not
    /// later refreshes succeed.
    pub async fn get(self: &Arc<Self>) -> Result<Arc<CachedKeys>, CacheError> {
        if let Some(cached) = self.snapshot().await {
            match cached.source {
                KeySource::Distribution if cached.age() < self.config.ttl => {
                    record_cache_read("fresh");
                }
                KeySource::StaticFallback => {
                    record_cache_read("fallback");
                    self.spawn_background_refresh();
                }
                _ => {
                    record_cache_read("stale");
                    tracing::debug!(
                        target: "ks_cache.refresh",
                        age_secs = cached.age().as_secs(),
                        "Serving stale key set while refreshing"
                    );
                    self.spawn_background_refresh();
                }
            }
            return Ok(cached);
        }

        record_cache_read("cold");
        self.cold_start().await
    }

    /// Latest snapshot without triggering any fetch.
    pub async fn snapshot(&self) -> Option<Arc<CachedKeys>> {
        self.current.read().await.clone()
    }

    /// One refresh cycle: up to `max_attempts` fetches with exponential
    /// backoff. On failure the previous key set stays in place.
    #[instrument(skip_all, fields(url = %self.config.jwks_url))]
    pub async fn refresh_once(&self) -> Result<Arc<CachedKeys>, CacheError> {
        self.refresh_with_attempts(self.config.max_attempts).await
    }

    /// Single-attempt refresh for an unknown `kid`, at most once per
    /// [`FORCED_REFRESH_COOLDOWN`]. Returns whether new keys were installed.
    pub async fn refresh_if_cooled_down(&self) -> bool {
        {
            let mut last = self.last_forced_refresh.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < FORCED_REFRESH_COOLDOWN {
                    tracing::debug!(target: "ks_cache.refresh", "Forced refresh suppressed by cooldown");
                    return false;
                }
            }
            *last = Some(Instant::now());
        }

        self.refresh_with_attempts(1).await.is_ok()
    }

    pub async fn health(&self) -> CacheHealth {
        let snapshot = self.snapshot().await;
        let stats = self.stats.lock().await;

        let Some(cached) = snapshot else {
            return CacheHealth {
                status: HealthStatus::Unhealthy,
                source: KeySource::None,
                key_count: 0,
                age_seconds: None,
                consecutive_failures: stats.consecutive_failures,
                last_error: stats.last_error.clone(),
            };
        };

        let age = cached.age();
        let status = match cached.source {
            KeySource::Distribution if age < self.config.ttl && stats.consecutive_failures == 0 => {
                HealthStatus::Healthy
            }
            _ => HealthStatus::Degraded,
        };

        CacheHealth {
            status,
            source: cached.source,
            key_count: cached.jwks.len(),
            age_seconds: Some(age.as_secs()),
            consecutive_failures: stats.consecutive_failures,
            last_error: stats.last_error.clone(),
        }
    }

    async fn refresh_with_attempts(&self, attempts: u32) -> Result<Arc<CachedKeys>, CacheError> {
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch().await {
                Ok(jwks) => {
                    let cached = self.install(jwks, KeySource::Distribution).await;
                    self.record_success().await;
                    tracing::info!(
                        target: "ks_cache.refresh",
                        attempt,
                        key_count = cached.jwks.len(),
                        "Verification keys refreshed"
                    );
                    return Ok(cached);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "ks_cache.refresh",
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "JWKS fetch failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }

        let error = last_error
            .unwrap_or_else(|| CacheError::DistributionUnavailable("no fetch attempted".to_string()));
        let failures = self.record_failure(&error).await;
        tracing::warn!(
            target: "ks_cache.refresh",
            consecutive_failures = failures,
            "Refresh cycle failed; keeping previous key set"
        );
        Err(error)
    }

    async fn cold_start(&self) -> Result<Arc<CachedKeys>, CacheError> {
        let _guard = self.cold_start.lock().await;

        // Another caller may have populated the cache while we waited.
        if let Some(cached) = self.snapshot().await {
            return Ok(cached);
        }

        let window = if self.startup_window_spent.load(Ordering::Acquire) {
            self.config.http_timeout
        } else {
            self.config.startup_timeout
        };
        let deadline = Instant::now() + window;
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.fetch()).await {
                Ok(Ok(jwks)) => {
                    let cached = self.install(jwks, KeySource::Distribution).await;
                    self.record_success().await;
                    tracing::info!(
                        target: "ks_cache.refresh",
                        key_count = cached.jwks.len(),
                        "Initial verification keys fetched"
                    );
                    return Ok(cached);
                }
                Ok(Err(e)) => {
                    tracing::warn!(target: "ks_cache.refresh", error = %e, "Initial JWKS fetch failed, retrying");
                    last_error = Some(e);
                }
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = next_backoff(backoff);
        }

        self.startup_window_spent.store(true, Ordering::Release);
        let error = last_error.unwrap_or_else(|| {
            CacheError::DistributionUnavailable("startup window elapsed".to_string())
        });
        self.record_failure(&error).await;

        if let Some(fallback) = &self.config.static_fallback {
            tracing::warn!(
                target: "ks_cache.refresh",
                key_count = fallback.len(),
                error = %error,
                "Key distribution unreachable at startup, using static fallback keys"
            );
            return Ok(self.install(fallback.clone(), KeySource::StaticFallback).await);
        }

        tracing::error!(
            target: "ks_cache.refresh",
            error = %error,
            "No verification keys available: distribution unreachable and no static fallback"
        );
        Err(CacheError::NoKeysAvailable)
    }

    fn spawn_background_refresh(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.background_refresh.swap(true, Ordering::AcqRel) {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cache.refresh_once().await {
                tracing::debug!(target: "ks_cache.refresh", error = %e, "Background refresh failed");
            }
            cache.background_refresh.store(false, Ordering::Release);
        });
    }

    async fn fetch(&self) -> Result<Jwks, CacheError> {
        let request = async {
            let response = self
                .http_client
                .get(&self.config.jwks_url)
                .send()
                .await
                .map_err(|e| CacheError::DistributionUnavailable(format!("request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(CacheError::DistributionUnavailable(format!(
                    "endpoint returned {}",
                    response.status()
                )));
            }

            let jwks: Jwks = response
                .json()
                .await
                .map_err(|e| CacheError::DistributionUnavailable(format!("malformed JWKS: {}", e)))?;

            if jwks.is_empty() {
                return Err(CacheError::DistributionUnavailable(
                    "endpoint returned an empty key set".to_string(),
                ));
            }
            Ok(jwks)
        };

        tokio::time::timeout(self.config.http_timeout, request)
            .await
            .map_err(|_| CacheError::DistributionUnavailable("request timed out".to_string()))?
    }

    async fn install(&self, jwks: Jwks, source: KeySource) -> Arc<CachedKeys> {
        let cached = Arc::new(CachedKeys {
            jwks,
            fetched_at: Instant::now(),
            source,
        });
        set_cache_keys(cached.jwks.len());
        *self.current.write().await = Some(Arc::clone(&cached));
        cached
    }

    async fn record_success(&self) {
        let mut stats = self.stats.lock().await;
        stats.consecutive_failures = 0;
        stats.last_error = None;
        record_cache_refresh("success");
    }

    async fn record_failure(&self, error: &CacheError) -> u32 {
        let mut stats = self.stats.lock().await;
        stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
        stats.last_error = Some(error.to_string());
        record_cache_refresh("error");
        stats.consecutive_failures
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}
