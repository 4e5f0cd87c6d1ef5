//! Shared domain enums, stored as PostgreSQL enum types

use serde::{Deserialize, Serialize};

macro_rules! impl_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

// ---------------------------------------------------------------------------
// AssetStatus
// ---------------------------------------------------------------------------

/// Ledger status of a physical asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Available,
    CheckedOut,
    OutOfService,
    Retired,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Available => "available",
            AssetStatus::CheckedOut => "checked_out",
            AssetStatus::OutOfService => "out_of_service",
            AssetStatus::Retired => "retired",
        }
    }
}

// ---------------------------------------------------------------------------
// ReservationStatus
// ---------------------------------------------------------------------------

/// Reservation lifecycle state.
///
/// `pending -> {approved, denied, cancelled, expired}`,
/// `approved -> {confirmed, cancelled, expired}`. Everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Denied,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Denied => "denied",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }

    /// Statuses that hold the asset for their interval
    pub fn blocks_interval(&self) -> bool {
        matches!(self, ReservationStatus::Approved | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Denied
                | ReservationStatus::Confirmed
                | ReservationStatus::Cancelled
                | ReservationStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Denied)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Approved, Confirmed)
                | (Approved, Cancelled)
                | (Approved, Expired)
        )
    }
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TicketSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketSeverity::Low => "low",
            TicketSeverity::Medium => "medium",
            TicketSeverity::High => "high",
            TicketSeverity::Critical => "critical",
        }
    }
}

/// Maintenance ticket state; `closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    OnHold,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::OnHold => "on_hold",
            TicketStatus::Closed => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Staff,
    Technician,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Staff => "staff",
            UserRole::Technician => "technician",
            UserRole::Admin => "admin",
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications and audit
// ---------------------------------------------------------------------------

/// Type tag carried by every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReservationRequested,
    ReservationApproved,
    ReservationDenied,
    ReservationCancelled,
    ReservationExpired,
    LoanCheckedOut,
    LoanReturned,
    PenaltyAssessed,
    TicketAssigned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReservationRequested => "reservation_requested",
            NotificationKind::ReservationApproved => "reservation_approved",
            NotificationKind::ReservationDenied => "reservation_denied",
            NotificationKind::ReservationCancelled => "reservation_cancelled",
            NotificationKind::ReservationExpired => "reservation_expired",
            NotificationKind::LoanCheckedOut => "loan_checked_out",
            NotificationKind::LoanReturned => "loan_returned",
            NotificationKind::PenaltyAssessed => "penalty_assessed",
            NotificationKind::TicketAssigned => "ticket_assigned",
        }
    }
}

/// Entity family an audit event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_entity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Asset,
    Reservation,
    Loan,
    Penalty,
    MaintenanceTicket,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Asset => "asset",
            EntityType::Reservation => "reservation",
            EntityType::Loan => "loan",
            EntityType::Penalty => "penalty",
            EntityType::MaintenanceTicket => "maintenance_ticket",
        }
    }
}

impl_display!(
    AssetStatus,
    ReservationStatus,
    TicketSeverity,
    TicketStatus,
    UserRole,
    NotificationKind,
    EntityType,
);
