//! Reservation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::ReservationStatus;

/// A time-windowed request to borrow one asset over `[start_at, end_at)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i32,
    pub asset_id: i32,
    pub requester_id: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub decided_by: Option<i32>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Half-open interval intersection
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at < end && start < self.end_at
    }
}

/// New reservation request
#[derive(Debug, Clone, Deserialize)]
pub struct RequestReservation {
    pub requester_id: i32,
    pub asset_id: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}
