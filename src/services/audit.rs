//! Append-only audit trail for state-changing operations.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, Set};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::{entities::audit_log, errors::ServiceError};

#[derive(Clone)]
pub struct AuditService {
    db: Arc<DatabaseConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append one audit row.
    pub async fn record<C: ConnectionTrait>(
        &self,
        conn: &C,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let entry = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(action.to_string()),
            entity_type: Set(entity_type.to_string()),
            entity_id: Set(entity_id.to_string()),
            details: Set(Some(details)),
            created_at: Set(Utc::now()),
        };
        entry.insert(conn).await?;
        Ok(())
    }

    /// Append one audit row outside any transaction, logging instead of
    /// failing: audit writes are a non-critical side effect and must not
    /// abort the primary state transition.
    pub async fn record_best_effort(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) {
        if let Err(e) = self
            .record(&*self.db, action, entity_type, entity_id, details)
            .await
        {
            warn!(error = %e, action, entity_type, "failed to append audit entry");
        }
    }
}
