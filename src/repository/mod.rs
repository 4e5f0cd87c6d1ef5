//! Repository layer: the ledger store seam and its change sets

pub mod memory;
pub mod postgres;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        notification::{NewAuditEvent, NewNotification},
        Asset, AssetStatus, AuditEvent, EntityType, Loan, MaintenanceTicket, Notification,
        NotificationKind, Penalty, Reservation, ReservationStatus, TicketStatus, User,
    },
};

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Id sequences, one per table whose rows are referenced before they are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    User,
    Asset,
    Reservation,
    Loan,
    Penalty,
    MaintenanceTicket,
}

impl Sequence {
    pub fn table(&self) -> &'static str {
        match self {
            Sequence::User => "users",
            Sequence::Asset => "assets",
            Sequence::Reservation => "reservations",
            Sequence::Loan => "loans",
            Sequence::Penalty => "penalties",
            Sequence::MaintenanceTicket => "maintenance_tickets",
        }
    }
}

/// Compare-and-set on an asset's ledger status
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStatusChange {
    pub asset_id: i32,
    pub from: AssetStatus,
    pub to: AssetStatus,
}

/// Compare-and-set on a reservation's status
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationTransition {
    pub reservation_id: i32,
    pub asset_id: i32,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    /// Decision metadata; `None` leaves the stored value untouched
    pub decided_by: Option<i32>,
    pub decision_reason: Option<String>,
}

/// Closes an open loan; fails if the loan was already returned
#[derive(Debug, Clone, PartialEq)]
pub struct LoanReturn {
    pub loan_id: i32,
    pub asset_id: i32,
    pub return_at: DateTime<Utc>,
    pub damaged: bool,
    pub return_condition: Option<String>,
}

/// Compare-and-set on a ticket's status, optionally (re)assigning it
#[derive(Debug, Clone, PartialEq)]
pub struct TicketUpdate {
    pub ticket_id: i32,
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub assign_to: Option<i32>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Every write of one lifecycle operation. A store applies all of it or none of it.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub at: DateTime<Utc>,
    pub new_assets: Vec<Asset>,
    pub asset_changes: Vec<AssetStatusChange>,
    pub assets_serviced: Vec<i32>,
    pub new_reservations: Vec<Reservation>,
    pub reservation_transitions: Vec<ReservationTransition>,
    pub new_loans: Vec<Loan>,
    pub loan_returns: Vec<LoanReturn>,
    pub new_penalties: Vec<Penalty>,
    /// Deduplicated per (loan, asset) when a loan is set
    pub new_tickets: Vec<MaintenanceTicket>,
    pub ticket_updates: Vec<TicketUpdate>,
    pub audit: Vec<NewAuditEvent>,
    pub notifications: Vec<NewNotification>,
}

impl ChangeSet {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            new_assets: Vec::new(),
            asset_changes: Vec::new(),
            assets_serviced: Vec::new(),
            new_reservations: Vec::new(),
            reservation_transitions: Vec::new(),
            new_loans: Vec::new(),
            loan_returns: Vec::new(),
            new_penalties: Vec::new(),
            new_tickets: Vec::new(),
            ticket_updates: Vec::new(),
            audit: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn audit(
        &mut self,
        actor_id: Option<i32>,
        entity_type: EntityType,
        entity_id: i32,
        action: &'static str,
        detail: Value,
    ) -> &mut Self {
        self.audit.push(NewAuditEvent {
            actor_id,
            entity_type,
            entity_id,
            action,
            detail,
        });
        self
    }

    pub fn notify(&mut self, recipient_id: i32, kind: NotificationKind, payload: Value) -> &mut Self {
        self.notifications.push(NewNotification {
            recipient_id,
            kind,
            payload,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_assets.is_empty()
            && self.asset_changes.is_empty()
            && self.assets_serviced.is_empty()
            && self.new_reservations.is_empty()
            && self.reservation_transitions.is_empty()
            && self.new_loans.is_empty()
            && self.loan_returns.is_empty()
            && self.new_penalties.is_empty()
            && self.new_tickets.is_empty()
            && self.ticket_updates.is_empty()
            && self.audit.is_empty()
            && self.notifications.is_empty()
    }
}

/// Persistence seam for the lifecycle services.
///
/// Reads return owned snapshots. All mutations of entities go through
/// [`LedgerStore::commit`]; a failed compare-and-set inside a commit is
/// reported as [`crate::AppError::Conflict`] and nothing is written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    /// Reserve the next id of a sequence
    async fn next_id(&self, sequence: Sequence) -> AppResult<i32>;

    async fn insert_user(&self, user: &User) -> AppResult<()>;
    async fn get_user(&self, id: i32) -> AppResult<Option<User>>;

    async fn get_asset(&self, id: i32) -> AppResult<Option<Asset>>;
    async fn list_assets(&self) -> AppResult<Vec<Asset>>;

    async fn get_reservation(&self, id: i32) -> AppResult<Option<Reservation>>;
    async fn reservations_for_asset(&self, asset_id: i32) -> AppResult<Vec<Reservation>>;
    async fn reservations_for_requester(&self, requester_id: i32) -> AppResult<Vec<Reservation>>;
    /// Approved or confirmed reservations on the asset intersecting `[start, end)`
    async fn blocking_reservations(
        &self,
        asset_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>>;
    /// Pending or approved reservations whose end is at or before `now`
    async fn stale_reservations(&self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>>;

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>>;
    async fn open_loan_for_asset(&self, asset_id: i32) -> AppResult<Option<Loan>>;
    async fn loan_for_reservation(&self, reservation_id: i32) -> AppResult<Option<Loan>>;
    async fn loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Loan>>;
    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<Loan>>;
    async fn penalties_for_loan(&self, loan_id: i32) -> AppResult<Vec<Penalty>>;
    async fn penalties_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Penalty>>;

    async fn get_ticket(&self, id: i32) -> AppResult<Option<MaintenanceTicket>>;
    async fn ticket_for_loan(&self, loan_id: i32, asset_id: i32) -> AppResult<Option<MaintenanceTicket>>;
    async fn tickets_for_asset(&self, asset_id: i32) -> AppResult<Vec<MaintenanceTicket>>;

    async fn notifications_for(&self, recipient_id: i32, unread_only: bool) -> AppResult<Vec<Notification>>;
    /// Returns `false` when no such notification belongs to the recipient
    async fn mark_notification_read(
        &self,
        recipient_id: i32,
        notification_id: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;
    async fn audit_trail(&self, entity_type: EntityType, entity_id: i32) -> AppResult<Vec<AuditEvent>>;

    /// Apply a change set atomically
    async fn commit(&self, changes: ChangeSet) -> AppResult<()>;
}

/// Shared handle on the configured ledger store
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn LedgerStore>,
}

impl Repository {
    /// Create a repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::from_store(Arc::new(PgLedgerStore::new(pool)))
    }

    /// Create a repository backed by the in-process store
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryLedgerStore::new()))
    }

    pub fn from_store(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

impl Deref for Repository {
    type Target = dyn LedgerStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}
