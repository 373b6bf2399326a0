use crate::config::RotationSettings;
use crate::crypto::EncryptedKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rotation reason recorded on the bootstrap audit event.
pub const REASON_INITIAL: &str = "initial";

/// Scheduled rotation after the configured interval elapsed.
pub const REASON_TIME_INTERVAL: &str = "time_interval_exceeded";

/// Operator-triggered rotation.
pub const REASON_MANUAL: &str = "manual";

/// Asymmetric signing algorithm of a key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[serde(rename = "EdDSA")]
    EdDsa,
    #[serde(rename = "ES256")]
    Es256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::EdDsa => "EdDSA",
            SigningAlgorithm::Es256 => "ES256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EdDSA" | "eddsa" | "Ed25519" => Ok(SigningAlgorithm::EdDsa),
            "ES256" | "es256" => Ok(SigningAlgorithm::Es256),
            other => Err(format!("unsupported signing algorithm '{}'", other)),
        }
    }
}

/// What drives scheduled rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Time,
    /// Parsed and persisted, never evaluated as due.
    Usage,
    ManualOnly,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Time => "time",
            TriggerType::Usage => "usage",
            TriggerType::ManualOnly => "manual_only",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(TriggerType::Time),
            "usage" => Ok(TriggerType::Usage),
            "manual" | "manual_only" | "manual-only" => Ok(TriggerType::ManualOnly),
            other => Err(format!("unknown rotation trigger '{}'", other)),
        }
    }
}

/// A signing key and its lifecycle metadata.
///
/// The private half is only ever held sealed; see [`crate::crypto`].
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub key_id: String,
    pub algorithm: SigningAlgorithm,
    /// Raw Ed25519 key or uncompressed P-256 point.
    pub public_key: Vec<u8>,
    pub private_key: EncryptedKey,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Set when superseded: `rotated_at + overlap`.
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_reason: Option<String>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Whether this key belongs to the verification key set at `now`.
    pub fn is_verifiable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active || self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    /// The activated copy of a freshly generated record.
    pub fn activated(&self) -> KeyRecord {
        KeyRecord {
            is_active: true,
            ..self.clone()
        }
    }

    /// The superseded copy of the current active record.
    pub fn superseded(&self, now: DateTime<Utc>, overlap: Duration, reason: &str) -> KeyRecord {
        KeyRecord {
            is_active: false,
            rotated_at: Some(now),
            expires_at: Some(now + overlap),
            rotation_reason: Some(reason.to_string()),
            ..self.clone()
        }
    }
}

/// Persisted rotation policy plus the scheduling hint `last_rotation_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub interval: Duration,
    pub overlap: Duration,
    pub last_rotation_at: Option<DateTime<Utc>>,
}

impl RotationConfig {
    pub fn from_settings(settings: &RotationSettings, last_rotation_at: Option<DateTime<Utc>>) -> Self {
        Self {
            enabled: settings.enabled,
            trigger_type: settings.trigger_type,
            interval: settings.interval,
            overlap: settings.overlap,
            last_rotation_at,
        }
    }

    /// When the scheduler will next rotate, if it rotates at all.
    ///
    /// A time-based policy that has never rotated is due immediately.
    pub fn next_rotation_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.enabled || self.trigger_type != TriggerType::Time {
            return None;
        }
        Some(match self.last_rotation_at {
            Some(last) => last + self.interval,
            None => now,
        })
    }

    /// Time-based rule: due when `now - last_rotation_at >= interval`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rotation_due(now).is_some_and(|due| now >= due)
    }
}

/// Rotation manager state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Idle,
    Evaluating,
    Rotating,
}

/// Who asked for a rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    System,
    Admin(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Admin(identity) => write!(f, "admin:{}", identity),
        }
    }
}

/// Outcome of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub new_key_id: String,
    pub previous_key_id: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Snapshot returned by `RotationManager::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationStatus {
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub state: RotationState,
    pub current_key_id: Option<String>,
    pub last_rotation_at: Option<DateTime<Utc>>,
    pub days_since_last_rotation: Option<f64>,
    pub next_rotation_due: Option<DateTime<Utc>>,
    pub verification_key_count: usize,
}

/// Body of `POST /internal/rotate-keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKeysResponse {
    pub rotated: bool,
    pub new_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_key_id: Option<String>,
}
