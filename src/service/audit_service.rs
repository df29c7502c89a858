//! Audit Trail
//!
//! Append-only record of security-relevant actions.

use std::sync::Arc;

use log::debug;

use crate::models::{AuditAction, AuditLogEntry, ClientMeta, NewAuditEntry};
use crate::store::{AuditStore, StoreResult};

/// Write-only handle over the audit store
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let record = self.store.append_audit(entry).await?;
        debug!(
            "audit #{}: {} user={:?} ip={}",
            record.id, record.action, record.user_id, record.ip
        );
        Ok(record)
    }

    /// Append `action` attributed to `user_id` from the given client
    pub async fn record(
        &self,
        action: AuditAction,
        user_id: Option<i64>,
        meta: &ClientMeta,
    ) -> StoreResult<AuditLogEntry> {
        let mut entry = NewAuditEntry::new(action).with_client(meta);
        if let Some(user_id) = user_id {
            entry = entry.with_user_id(user_id);
        }
        self.append(entry).await
    }
}
