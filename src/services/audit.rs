//! Audit trail queries

use crate::{
    error::AppResult,
    models::{AuditEvent, EntityType},
};

use super::LedgerContext;

#[derive(Clone)]
pub struct AuditService {
    ctx: LedgerContext,
}

impl AuditService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Every recorded event for one entity, oldest first
    pub async fn history(&self, entity_type: EntityType, entity_id: i32) -> AppResult<Vec<AuditEvent>> {
        self.ctx.repository.audit_trail(entity_type, entity_id).await
    }
}
