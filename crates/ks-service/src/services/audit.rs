//! Audit trail for key lifecycle events.
//!
//! Emission is fire-and-forget: a broken audit sink never blocks or fails a
//! rotation.

use crate::models::Actor;
use crate::observability::metrics::record_audit_emit_failure;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: Actor,
    pub reason: String,
    /// New key on success; attempted-from key (if any) on failure.
    pub key_id: Option<String>,
    pub previous_key_id: Option<String>,
    pub success: bool,
    pub error_detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

pub trait AuditEmitter: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes events as structured logs on the `ks.audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditEmitter;

impl AuditEmitter for TracingAuditEmitter {
    fn emit(&self, event: AuditEvent) {
        if event.success {
            tracing::info!(
                target: "ks.audit",
                actor = %event.actor,
                reason = %event.reason,
                key_id = event.key_id.as_deref().unwrap_or(""),
                previous_key_id = event.previous_key_id.as_deref().unwrap_or(""),
                occurred_at = %event.occurred_at,
                "Key rotation succeeded"
            );
        } else {
            tracing::warn!(
                target: "ks.audit",
                actor = %event.actor,
                reason = %event.reason,
                previous_key_id = event.previous_key_id.as_deref().unwrap_or(""),
                error = event.error_detail.as_deref().unwrap_or(""),
                occurred_at = %event.occurred_at,
                "Key rotation failed"
            );
        }
    }
}

/// Inserts events into `key_audit_events` on a detached task.
#[derive(Clone)]
pub struct PgAuditEmitter {
    pool: PgPool,
}

impl PgAuditEmitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(pool: &PgPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO key_audit_events (
                actor, reason, key_id, previous_key_id, success, error_detail, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.actor.to_string())
        .bind(&event.reason)
        .bind(&event.key_id)
        .bind(&event.previous_key_id)
        .bind(event.success)
        .bind(&event.error_detail)
        .bind(event.occurred_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl AuditEmitter for PgAuditEmitter {
    fn emit(&self, event: AuditEvent) {
        TracingAuditEmitter.emit(event.clone());

        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::insert(&pool, &event).await {
                record_audit_emit_failure();
                tracing::warn!(target: "ks.audit", error = %e, "Failed to persist audit event");
            }
        });
    }
}

/// Test doubles for audit emission.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every emitted event in memory.
    #[derive(Debug, Default)]
    pub struct RecordingAuditEmitter {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingAuditEmitter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<AuditEvent> {
            match self.events.lock() {
                Ok(events) => events.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        pub fn failures(&self) -> Vec<AuditEvent> {
            self.events().into_iter().filter(|e| !e.success).collect()
        }
    }

    impl AuditEmitter for RecordingAuditEmitter {
        fn emit(&self, event: AuditEvent) {
            match self.events.lock() {
                Ok(mut events) => events.push(event),
                Err(poisoned) => poisoned.into_inner().push(event),
            }
        }
    }
}
