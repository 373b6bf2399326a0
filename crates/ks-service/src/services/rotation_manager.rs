//! Rotation manager: policy evaluation, the exclusive rotation section,
//! bootstrap and status.
//!
//! Every rotation (bootstrap, scheduled, manual) runs under one
//! `tokio::sync::Mutex`. Scheduled and manual callers use `try_lock`; a
//! loser is rejected instead of queued.

use crate::clock::Clock;
use crate::config::{Config, RotationSettings};
use crate::errors::KsError;
use crate::models::{
    Actor, KeyRecord, RotationConfig, RotationOutcome, RotationState, RotationStatus,
    SigningAlgorithm, TriggerType, REASON_INITIAL, REASON_MANUAL, REASON_TIME_INTERVAL,
};
use crate::observability::metrics::{
    record_key_rotation, set_key_rotation_last_success, set_signing_key_age_seconds,
    set_verification_keys,
};
use crate::repositories::KeyStore;
use crate::services::audit::{AuditEmitter, AuditEvent};
use crate::services::bounded;
use crate::services::key_generator::KeyGenerator;
use crate::services::key_resolver::ActiveKeyResolver;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

const STATE_IDLE: u8 = 0;
const STATE_EVALUATING: u8 = 1;
const STATE_ROTATING: u8 = 2;

/// Knobs the manager needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct RotationOptions {
    pub algorithm: SigningAlgorithm,
    /// Seeds `RotationConfig` when the store has none.
    pub settings: RotationSettings,
    pub store_timeout: Duration,
}

impl RotationOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            algorithm: config.signing_algorithm,
            settings: config.rotation.clone(),
            store_timeout: config.store_timeout,
        }
    }
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::EdDsa,
            settings: RotationSettings::default(),
            store_timeout: Duration::from_secs(crate::config::DEFAULT_STORE_TIMEOUT_SECONDS),
        }
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotDue,
    /// Another rotation held the lock.
    Busy,
    Rotated(RotationOutcome),
}

/// Which path asked for the rotation; used for audit reasons and metrics.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Initial,
    Scheduled,
    Manual,
}

impl Trigger {
    fn label(self) -> &'static str {
        match self {
            Trigger::Initial => "initial",
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Trigger::Initial => REASON_INITIAL,
            Trigger::Scheduled => REASON_TIME_INTERVAL,
            Trigger::Manual => REASON_MANUAL,
        }
    }
}

/// Resets the state to `Idle` however the critical section exits.
struct StateGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a AtomicU8, value: u8) -> Self {
        state.store(value, Ordering::SeqCst);
        Self { state }
    }

    fn set(&self, value: u8) {
        self.state.store(value, Ordering::SeqCst);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.state.store(STATE_IDLE, Ordering::SeqCst);
    }
}

pub struct RotationManager {
    store: Arc<dyn KeyStore>,
    generator: Arc<dyn KeyGenerator>,
    audit: Arc<dyn AuditEmitter>,
    clock: Arc<dyn Clock>,
    resolver: ActiveKeyResolver,
    options: RotationOptions,
    rotation_lock: Mutex<()>,
    state: AtomicU8,
}

impl RotationManager {
    pub fn new(
        store: Arc<dyn KeyStore>,
        generator: Arc<dyn KeyGenerator>,
        audit: Arc<dyn AuditEmitter>,
        clock: Arc<dyn Clock>,
        options: RotationOptions,
    ) -> Self {
        let resolver = ActiveKeyResolver::new(Arc::clone(&store), options.store_timeout);
        Self {
            store,
            generator,
            audit,
            clock,
            resolver,
            options,
            rotation_lock: Mutex::new(()),
            state: AtomicU8::new(STATE_IDLE),
        }
    }

    pub fn resolver(&self) -> &ActiveKeyResolver {
        &self.resolver
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn state(&self) -> RotationState {
        match self.state.load(Ordering::SeqCst) {
            STATE_EVALUATING => RotationState::Evaluating,
            STATE_ROTATING => RotationState::Rotating,
            _ => RotationState::Idle,
        }
    }

    /// Ensure a signing key and a rotation config exist.
    ///
    /// Waits for the rotation lock instead of rejecting.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<KeyRecord, KsError> {
        let _lock = self.rotation_lock.lock().await;
        let now = self.clock.now();

        let stored_config = self.load_config().await?;
        let active = bounded(self.options.store_timeout, "load_active", self.store.load_active()).await?;

        if let Some(active) = active {
            if stored_config.is_none() {
                let config = RotationConfig::from_settings(&self.options.settings, Some(active.created_at));
                self.save_config(&config).await?;
            }
            tracing::info!(
                target: "ks.rotation",
                key_id = %active.key_id,
                "Existing signing key found"
            );
            return Ok(active);
        }

        let _state = StateGuard::enter(&self.state, STATE_ROTATING);
        let record = match self.generator.generate(self.options.algorithm, now) {
            Ok(record) => record.activated(),
            Err(e) => {
                self.report_failure(Trigger::Initial, Actor::System, None, &e, now);
                return Err(e);
            }
        };

        if let Err(e) = bounded(self.options.store_timeout, "save", self.store.save(&record)).await {
            self.report_failure(Trigger::Initial, Actor::System, None, &e, now);
            return Err(e);
        }

        let mut config = stored_config
            .unwrap_or_else(|| RotationConfig::from_settings(&self.options.settings, None));
        config.last_rotation_at = Some(now);
        if let Err(e) = self.save_config(&config).await {
            tracing::error!(
                target: "ks.rotation",
                error = %e,
                "Failed to record bootstrap time; next tick will rotate early"
            );
        }

        let outcome = RotationOutcome {
            new_key_id: record.key_id.clone(),
            previous_key_id: None,
            rotated_at: now,
        };
        self.report_success(Trigger::Initial, Actor::System, &outcome);

        tracing::info!(target: "ks.rotation", key_id = %record.key_id, "Bootstrapped signing key");
        Ok(record)
    }

    /// Rotate immediately on behalf of `actor`.
    ///
    /// Works for every trigger type and when scheduled rotation is disabled.
    /// Returns `RotationInProgress` if another rotation holds the lock.
    #[instrument(skip_all, fields(actor = %actor))]
    pub async fn rotate_now(&self, actor: Actor) -> Result<RotationOutcome, KsError> {
        let Ok(lock) = self.rotation_lock.try_lock() else {
            tracing::info!(target: "ks.rotation", "Manual rotation rejected: rotation in progress");
            record_key_rotation("rejected", Trigger::Manual.label());
            return Err(KsError::RotationInProgress);
        };

        let state = StateGuard::enter(&self.state, STATE_ROTATING);
        self.rotate_locked(&lock, &state, Trigger::Manual, actor).await
    }

    /// One scheduler evaluation: rotate if the time rule says so.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<TickOutcome, KsError> {
        let Ok(lock) = self.rotation_lock.try_lock() else {
            tracing::debug!(target: "ks.scheduler", "Rotation in progress, skipping tick");
            return Ok(TickOutcome::Busy);
        };

        let state = StateGuard::enter(&self.state, STATE_EVALUATING);
        let now = self.clock.now();
        let config = self
            .load_config()
            .await?
            .unwrap_or_else(|| RotationConfig::from_settings(&self.options.settings, None));

        if config.enabled && config.trigger_type == TriggerType::Usage {
            tracing::debug!(target: "ks.scheduler", "Usage-based trigger is not evaluated");
        }

        if !config.is_due(now) {
            return Ok(TickOutcome::NotDue);
        }

        tracing::info!(
            target: "ks.scheduler",
            last_rotation_at = ?config.last_rotation_at,
            "Rotation interval exceeded"
        );
        state.set(STATE_ROTATING);
        self.rotate_locked(&lock, &state, Trigger::Scheduled, Actor::System)
            .await
            .map(TickOutcome::Rotated)
    }

    /// Steps 1-5 of a rotation. Caller holds the rotation lock.
    async fn rotate_locked(
        &self,
        _lock: &MutexGuard<'_, ()>,
        _state: &StateGuard<'_>,
        trigger: Trigger,
        actor: Actor,
    ) -> Result<RotationOutcome, KsError> {
        let now = self.clock.now();

        let (previous, mut config) = match self.load_rotation_inputs().await {
            Ok(inputs) => inputs,
            Err(e) => {
                self.report_failure(trigger, actor, None, &e, now);
                return Err(e);
            }
        };
        let previous_key_id = Some(previous.key_id.clone());

        // (1) generate
        let new_key = match self.generator.generate(self.options.algorithm, now) {
            Ok(record) => record,
            Err(e) => {
                self.report_failure(trigger, actor, previous_key_id, &e, now);
                return Err(e);
            }
        };

        // (2) + (3) persist the new active key and supersede the old one
        let superseded = previous.superseded(now, config.overlap, trigger.reason());
        if let Err(e) = bounded(
            self.options.store_timeout,
            "rotate",
            self.store.rotate(&new_key, &superseded),
        )
        .await
        {
            self.report_failure(trigger, actor, previous_key_id, &e, now);
            return Err(e);
        }

        // (4) scheduling hint; the key swap above already committed
        config.last_rotation_at = Some(now);
        if let Err(e) = self.save_config(&config).await {
            tracing::error!(
                target: "ks.rotation",
                error = %e,
                new_key_id = %new_key.key_id,
                "Rotated but failed to record last rotation time"
            );
        }

        // (5) audit
        let outcome = RotationOutcome {
            new_key_id: new_key.key_id,
            previous_key_id,
            rotated_at: now,
        };
        self.report_success(trigger, actor, &outcome);

        tracing::info!(
            target: "ks.rotation",
            trigger = trigger.label(),
            new_key_id = %outcome.new_key_id,
            previous_key_id = outcome.previous_key_id.as_deref().unwrap_or(""),
            overlap_secs = config.overlap.num_seconds(),
            "Signing key rotated"
        );

        Ok(outcome)
    }

    async fn load_rotation_inputs(&self) -> Result<(KeyRecord, RotationConfig), KsError> {
        let previous = bounded(self.options.store_timeout, "load_active", self.store.load_active())
            .await?
            .ok_or(KsError::NoActiveKey)?;
        let config = self
            .load_config()
            .await?
            .unwrap_or_else(|| RotationConfig::from_settings(&self.options.settings, None));
        Ok((previous, config))
    }

    /// Snapshot for health endpoints. Takes no lock.
    pub async fn status(&self) -> Result<RotationStatus, KsError> {
        let now = self.clock.now();
        let config = self
            .load_config()
            .await?
            .unwrap_or_else(|| RotationConfig::from_settings(&self.options.settings, None));
        let active = bounded(self.options.store_timeout, "load_active", self.store.load_active()).await?;
        let verification_key_count = self.resolver.verification_keys(now).await?.len();

        #[allow(clippy::cast_precision_loss)]
        let days_since_last_rotation = config
            .last_rotation_at
            .map(|last| (now - last).num_seconds() as f64 / 86_400.0);

        if let Some(active) = &active {
            #[allow(clippy::cast_precision_loss)]
            set_signing_key_age_seconds((now - active.created_at).num_seconds() as f64);
        }
        set_verification_keys(verification_key_count);

        Ok(RotationStatus {
            enabled: config.enabled,
            trigger_type: config.trigger_type,
            state: self.state(),
            current_key_id: active.map(|k| k.key_id),
            last_rotation_at: config.last_rotation_at,
            days_since_last_rotation,
            next_rotation_due: config.next_rotation_due(now),
            verification_key_count,
        })
    }

    async fn load_config(&self) -> Result<Option<RotationConfig>, KsError> {
        bounded(
            self.options.store_timeout,
            "load_rotation_config",
            self.store.load_rotation_config(),
        )
        .await
    }

    async fn save_config(&self, config: &RotationConfig) -> Result<(), KsError> {
        bounded(
            self.options.store_timeout,
            "save_rotation_config",
            self.store.save_rotation_config(config),
        )
        .await
    }

    fn report_success(&self, trigger: Trigger, actor: Actor, outcome: &RotationOutcome) {
        record_key_rotation("success", trigger.label());
        set_key_rotation_last_success(outcome.rotated_at.timestamp());
        set_signing_key_age_seconds(0.0);

        self.audit.emit(AuditEvent {
            actor,
            reason: trigger.reason().to_string(),
            key_id: Some(outcome.new_key_id.clone()),
            previous_key_id: outcome.previous_key_id.clone(),
            success: true,
            error_detail: None,
            occurred_at: outcome.rotated_at,
        });
    }

    fn report_failure(
        &self,
        trigger: Trigger,
        actor: Actor,
        previous_key_id: Option<String>,
        error: &KsError,
        now: DateTime<Utc>,
    ) {
        record_key_rotation("error", trigger.label());
        tracing::error!(
            target: "ks.rotation",
            trigger = trigger.label(),
            error = %error,
            "Key rotation failed; previous key remains active"
        );

        self.audit.emit(AuditEvent {
            actor,
            reason: trigger.reason().to_string(),
            key_id: None,
            previous_key_id,
            success: false,
            error_detail: Some(error.to_string()),
            occurred_at: now,
        });
    }
}
