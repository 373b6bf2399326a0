//! Postgres-backed key store. Schema lives in `migrations/`.

use crate::crypto::EncryptedKey;
use crate::errors::KsError;
use crate::models::{KeyRecord, RotationConfig, SigningAlgorithm, TriggerType};
use crate::repositories::KeyStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::secret::{secret_bytes, ExposeSecret};
use sqlx::{FromRow, PgPool};

/// Row of the `signing_keys` table.
#[derive(Debug, Clone, FromRow)]
struct SigningKeyRow {
    key_id: String,
    algorithm: String,
    public_key: Vec<u8>,
    private_key_encrypted: Vec<u8>,
    encryption_nonce: Vec<u8>,
    encryption_tag: Vec<u8>,
    is_active: bool,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    rotation_reason: Option<String>,
    rotated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SigningKeyRow> for KeyRecord {
    type Error = KsError;

    fn try_from(row: SigningKeyRow) -> Result<Self, Self::Error> {
        let algorithm = row
            .algorithm
            .parse::<SigningAlgorithm>()
            .map_err(|e| KsError::Persistence(format!("Corrupt key {}: {}", row.key_id, e)))?;

        Ok(KeyRecord {
            key_id: row.key_id,
            algorithm,
            public_key: row.public_key,
            private_key: EncryptedKey {
                encrypted_data: secret_bytes(row.private_key_encrypted),
                nonce: row.encryption_nonce,
                tag: row.encryption_tag,
            },
            is_active: row.is_active,
            created_at: row.created_at,
            expires_at: row.expires_at,
            rotation_reason: row.rotation_reason,
            rotated_at: row.rotated_at,
        })
    }
}

/// Row of the single-row `rotation_config` table.
#[derive(Debug, Clone, FromRow)]
struct RotationConfigRow {
    enabled: bool,
    trigger_type: String,
    interval_seconds: i64,
    overlap_seconds: i64,
    last_rotation_at: Option<DateTime<Utc>>,
}

impl TryFrom<RotationConfigRow> for RotationConfig {
    type Error = KsError;

    fn try_from(row: RotationConfigRow) -> Result<Self, Self::Error> {
        let trigger_type = row
            .trigger_type
            .parse::<TriggerType>()
            .map_err(|e| KsError::Persistence(format!("Corrupt rotation config: {}", e)))?;
        let seconds = |value: i64| {
            Duration::try_seconds(value)
                .filter(|d| *d > Duration::zero())
                .ok_or_else(|| KsError::Persistence(format!("Corrupt duration: {}s", value)))
        };

        Ok(RotationConfig {
            enabled: row.enabled,
            trigger_type,
            interval: seconds(row.interval_seconds)?,
            overlap: seconds(row.overlap_seconds)?,
            last_rotation_at: row.last_rotation_at,
        })
    }
}

const SELECT_KEY_COLUMNS: &str = r#"
    SELECT
        key_id, algorithm, public_key, private_key_encrypted, encryption_nonce,
        encryption_tag, is_active, created_at, expires_at, rotation_reason, rotated_at
    FROM signing_keys
"#;

pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert<'e, E>(executor: E, record: &KeyRecord) -> Result<(), KsError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO signing_keys (
                key_id, algorithm, public_key, private_key_encrypted, encryption_nonce,
                encryption_tag, is_active, created_at, expires_at, rotation_reason, rotated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.key_id)
        .bind(record.algorithm.as_str())
        .bind(&record.public_key)
        .bind(record.private_key.encrypted_data.expose_secret())
        .bind(&record.private_key.nonce)
        .bind(&record.private_key.tag)
        .bind(record.is_active)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(&record.rotation_reason)
        .bind(record.rotated_at)
        .execute(executor)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to insert signing key: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn save(&self, record: &KeyRecord) -> Result<(), KsError> {
        // Duplicate key_id and a second active row are rejected by the
        // primary key and the partial unique index on is_active.
        Self::insert(&self.pool, record).await
    }

    async fn load_active(&self) -> Result<Option<KeyRecord>, KsError> {
        let row = sqlx::query_as::<_, SigningKeyRow>(&format!(
            "{} WHERE is_active = true LIMIT 1",
            SELECT_KEY_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to fetch active key: {}", e)))?;

        row.map(KeyRecord::try_from).transpose()
    }

    async fn load_all(&self) -> Result<Vec<KeyRecord>, KsError> {
        let rows = sqlx::query_as::<_, SigningKeyRow>(&format!(
            "{} ORDER BY created_at ASC, key_id ASC",
            SELECT_KEY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to fetch signing keys: {}", e)))?;

        rows.into_iter().map(KeyRecord::try_from).collect()
    }

    async fn rotate(&self, new_active: &KeyRecord, superseded: &KeyRecord) -> Result<(), KsError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KsError::Persistence(format!("Failed to start transaction: {}", e)))?;

        // Supersede first so the partial unique index never sees two active rows.
        let updated = sqlx::query(
            r#"
            UPDATE signing_keys
            SET is_active = false, rotated_at = $2, expires_at = $3, rotation_reason = $4
            WHERE key_id = $1 AND is_active = true
            "#,
        )
        .bind(&superseded.key_id)
        .bind(superseded.rotated_at)
        .bind(superseded.expires_at)
        .bind(&superseded.rotation_reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to supersede active key: {}", e)))?;

        if updated.rows_affected() != 1 {
            return Err(KsError::Persistence(format!(
                "Key {} is no longer the active key",
                superseded.key_id
            )));
        }

        let activated = new_active.activated();
        Self::insert(&mut *tx, &activated).await?;

        tx.commit()
            .await
            .map_err(|e| KsError::Persistence(format!("Failed to commit rotation: {}", e)))?;

        Ok(())
    }

    async fn save_rotation_config(&self, config: &RotationConfig) -> Result<(), KsError> {
        sqlx::query(
            r#"
            INSERT INTO rotation_config (
                id, enabled, trigger_type, interval_seconds, overlap_seconds, last_rotation_at
            )
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                trigger_type = EXCLUDED.trigger_type,
                interval_seconds = EXCLUDED.interval_seconds,
                overlap_seconds = EXCLUDED.overlap_seconds,
                last_rotation_at = EXCLUDED.last_rotation_at,
                updated_at = NOW()
            "#,
        )
        .bind(config.enabled)
        .bind(config.trigger_type.as_str())
        .bind(config.interval.num_seconds())
        .bind(config.overlap.num_seconds())
        .bind(config.last_rotation_at)
        .execute(&self.pool)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to save rotation config: {}", e)))?;

        Ok(())
    }

    async fn load_rotation_config(&self) -> Result<Option<RotationConfig>, KsError> {
        let row = sqlx::query_as::<_, RotationConfigRow>(
            r#"
            SELECT enabled, trigger_type, interval_seconds, overlap_seconds, last_rotation_at
            FROM rotation_config
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KsError::Persistence(format!("Failed to fetch rotation config: {}", e)))?;

        row.map(RotationConfig::try_from).transpose()
    }
}
