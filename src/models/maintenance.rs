//! Maintenance ticket model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{TicketSeverity, TicketStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MaintenanceTicket {
    pub id: i32,
    pub asset_id: i32,
    /// Loan whose return raised the ticket, if any
    pub loan_id: Option<i32>,
    pub opened_by: i32,
    /// Must hold the technician role
    pub assigned_to: Option<i32>,
    pub severity: TicketSeverity,
    pub status: TicketStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Open ticket request
#[derive(Debug, Clone, Deserialize)]
pub struct OpenTicket {
    pub asset_id: i32,
    pub loan_id: Option<i32>,
    pub severity: TicketSeverity,
    pub description: String,
}
