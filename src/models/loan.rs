//! Loan and penalty models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An active or completed borrowing of an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i32,
    pub asset_id: i32,
    pub borrower_id: i32,
    /// Originating reservation, absent for walk-up loans
    pub reservation_id: Option<i32>,
    pub checkout_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub return_at: Option<DateTime<Utc>>,
    pub damaged: bool,
    pub return_condition: Option<String>,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        self.return_at.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_at < now
    }
}

/// Return request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReturnLoan {
    pub damaged: bool,
    pub condition_notes: Option<String>,
}

/// Late-return fee, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Penalty {
    pub id: i32,
    pub loan_id: i32,
    pub borrower_id: i32,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
