//! Notification and audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{EntityType, NotificationKind};

/// Per-recipient message, append-only apart from `read_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i32,
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Notification waiting to be written with its state transition
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: i32,
    pub occurred_at: DateTime<Utc>,
    /// `None` for system sweeps
    pub actor_id: Option<i32>,
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub action: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub actor_id: Option<i32>,
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub action: &'static str,
    pub detail: serde_json::Value,
}
