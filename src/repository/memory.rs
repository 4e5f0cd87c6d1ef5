//! In-process ledger store
//!
//! Holds every table in ordered maps behind one `RwLock`. `commit` checks each
//! compare-and-set and re-validates the two exclusion rules the PostgreSQL
//! schema enforces (no overlapping approved/confirmed reservations per asset,
//! at most one open loan per asset) before writing anything.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ChangeSet, LedgerStore, Sequence};
use crate::{
    error::{AppError, AppResult},
    models::{
        Asset, AuditEvent, EntityType, Loan, MaintenanceTicket, Notification, Penalty,
        Reservation, ReservationStatus, TicketStatus, User,
    },
};

#[derive(Default)]
struct MemoryState {
    sequences: HashMap<Sequence, i32>,
    users: BTreeMap<i32, User>,
    assets: BTreeMap<i32, Asset>,
    reservations: BTreeMap<i32, Reservation>,
    loans: BTreeMap<i32, Loan>,
    penalties: BTreeMap<i32, Penalty>,
    tickets: BTreeMap<i32, MaintenanceTicket>,
    notifications: BTreeMap<i32, Notification>,
    audit: Vec<AuditEvent>,
}

impl MemoryState {
    fn bump(&mut self, sequence: Sequence) -> i32 {
        let next = self.sequences.entry(sequence).or_insert(0);
        *next += 1;
        *next
    }

    /// Reject the change set if any compare-and-set or exclusion rule fails
    fn validate(&self, changes: &ChangeSet) -> AppResult<()> {
        for asset in &changes.new_assets {
            if self.assets.values().any(|a| a.tag == asset.tag) {
                return Err(AppError::Validation(format!("Asset tag {} already exists", asset.tag)));
            }
        }

        for change in &changes.asset_changes {
            let asset = self
                .assets
                .get(&change.asset_id)
                .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", change.asset_id)))?;
            if asset.status != change.from {
                return Err(AppError::Conflict(format!(
                    "asset {} is {}, expected {}",
                    asset.id, asset.status, change.from
                )));
            }
        }

        for asset_id in &changes.assets_serviced {
            if !self.assets.contains_key(asset_id) {
                return Err(AppError::NotFound(format!("Asset {} not found", asset_id)));
            }
        }

        for transition in &changes.reservation_transitions {
            let current = self
                .reservations
                .get(&transition.reservation_id)
                .ok_or(AppError::ReservationNotFound(transition.reservation_id))?;
            if current.status != transition.from {
                return Err(AppError::Conflict(format!(
                    "reservation {} is {}, expected {}",
                    current.id, current.status, transition.from
                )));
            }
        }

        for ret in &changes.loan_returns {
            let loan = self.loans.get(&ret.loan_id).ok_or(AppError::LoanNotFound(ret.loan_id))?;
            if !loan.is_open() {
                return Err(AppError::Conflict(format!("loan {} is already closed", loan.id)));
            }
        }

        for ticket in &changes.new_tickets {
            let duplicate = ticket.loan_id.is_some()
                && self
                    .tickets
                    .values()
                    .any(|t| t.loan_id == ticket.loan_id && t.asset_id == ticket.asset_id);
            if duplicate {
                return Err(AppError::Conflict(format!(
                    "loan {:?} already has a ticket on asset {}",
                    ticket.loan_id, ticket.asset_id
                )));
            }
        }

        for update in &changes.ticket_updates {
            let ticket = self
                .tickets
                .get(&update.ticket_id)
                .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", update.ticket_id)))?;
            if ticket.status != update.from {
                return Err(AppError::Conflict(format!(
                    "ticket {} is {}, expected {}",
                    ticket.id, ticket.status, update.from
                )));
            }
        }

        self.validate_reservation_exclusion(changes)?;
        self.validate_loan_exclusion(changes)
    }

    fn validate_reservation_exclusion(&self, changes: &ChangeSet) -> AppResult<()> {
        let pending: HashMap<i32, ReservationStatus> = changes
            .reservation_transitions
            .iter()
            .map(|t| (t.reservation_id, t.to))
            .collect();

        // Prospective state: stored rows with in-flight transitions applied, plus inserts
        let prospective: Vec<Reservation> = self
            .reservations
            .values()
            .cloned()
            .map(|mut r| {
                if let Some(status) = pending.get(&r.id) {
                    r.status = *status;
                }
                r
            })
            .chain(changes.new_reservations.iter().cloned())
            .collect();

        let touched = changes
            .reservation_transitions
            .iter()
            .filter(|t| t.to.blocks_interval())
            .map(|t| t.reservation_id)
            .chain(
                changes
                    .new_reservations
                    .iter()
                    .filter(|r| r.status.blocks_interval())
                    .map(|r| r.id),
            );

        for id in touched {
            let Some(candidate) = prospective.iter().find(|r| r.id == id) else {
                continue;
            };
            let clash = prospective.iter().any(|other| {
                other.id != candidate.id
                    && other.asset_id == candidate.asset_id
                    && other.status.blocks_interval()
                    && other.overlaps(candidate.start_at, candidate.end_at)
            });
            if clash {
                return Err(AppError::ReservationOverlap {
                    reservation_id: candidate.id,
                    asset_id: candidate.asset_id,
                });
            }
        }
        Ok(())
    }

    fn validate_loan_exclusion(&self, changes: &ChangeSet) -> AppResult<()> {
        let closing: HashSet<i32> = changes.loan_returns.iter().map(|r| r.loan_id).collect();
        let mut opened: HashSet<i32> = self
            .loans
            .values()
            .filter(|l| l.is_open() && !closing.contains(&l.id))
            .map(|l| l.asset_id)
            .collect();

        for loan in &changes.new_loans {
            if !opened.insert(loan.asset_id) {
                return Err(AppError::ItemUnavailable(loan.asset_id));
            }
            if let Some(reservation_id) = loan.reservation_id {
                if self.loans.values().any(|l| l.reservation_id == Some(reservation_id)) {
                    return Err(AppError::transition("reservation", "confirmed", "check out"));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        let at = changes.at;

        for asset in changes.new_assets {
            self.assets.insert(asset.id, asset);
        }
        for change in changes.asset_changes {
            if let Some(asset) = self.assets.get_mut(&change.asset_id) {
                asset.status = change.to;
                asset.updated_at = at;
            }
        }
        for asset_id in changes.assets_serviced {
            if let Some(asset) = self.assets.get_mut(&asset_id) {
                asset.last_serviced_at = Some(at);
                asset.updated_at = at;
            }
        }
        for reservation in changes.new_reservations {
            self.reservations.insert(reservation.id, reservation);
        }
        for transition in changes.reservation_transitions {
            if let Some(reservation) = self.reservations.get_mut(&transition.reservation_id) {
                reservation.status = transition.to;
                if transition.decided_by.is_some() {
                    reservation.decided_by = transition.decided_by;
                }
                if transition.decision_reason.is_some() {
                    reservation.decision_reason = transition.decision_reason;
                }
                reservation.updated_at = at;
            }
        }
        for loan in changes.new_loans {
            self.loans.insert(loan.id, loan);
        }
        for ret in changes.loan_returns {
            if let Some(loan) = self.loans.get_mut(&ret.loan_id) {
                loan.return_at = Some(ret.return_at);
                loan.damaged = ret.damaged;
                loan.return_condition = ret.return_condition;
            }
        }
        for penalty in changes.new_penalties {
            self.penalties.insert(penalty.id, penalty);
        }
        for ticket in changes.new_tickets {
            self.tickets.insert(ticket.id, ticket);
        }
        for update in changes.ticket_updates {
            if let Some(ticket) = self.tickets.get_mut(&update.ticket_id) {
                ticket.status = update.to;
                if update.assign_to.is_some() {
                    ticket.assigned_to = update.assign_to;
                }
                if update.closed_at.is_some() {
                    ticket.closed_at = update.closed_at;
                }
                ticket.updated_at = at;
            }
        }
        for event in changes.audit {
            let id = self.audit.len() as i32 + 1;
            self.audit.push(AuditEvent {
                id,
                occurred_at: at,
                actor_id: event.actor_id,
                entity_type: event.entity_type,
                entity_id: event.entity_id,
                action: event.action.to_string(),
                detail: event.detail,
            });
        }
        for notification in changes.notifications {
            let id = self.notifications.len() as i32 + 1;
            self.notifications.insert(
                id,
                Notification {
                    id,
                    recipient_id: notification.recipient_id,
                    kind: notification.kind,
                    payload: notification.payload,
                    created_at: at,
                    read_at: None,
                },
            );
        }
    }
}

/// Ledger store kept entirely in process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn next_id(&self, sequence: Sequence) -> AppResult<i32> {
        Ok(self.state.write().await.bump(sequence))
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Validation(format!("Email {} already registered", user.email)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_asset(&self, id: i32) -> AppResult<Option<Asset>> {
        Ok(self.state.read().await.assets.get(&id).cloned())
    }

    async fn list_assets(&self) -> AppResult<Vec<Asset>> {
        let state = self.state.read().await;
        let mut assets: Vec<Asset> = state.assets.values().cloned().collect();
        assets.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(assets)
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn reservations_for_asset(&self, asset_id: i32) -> AppResult<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.start_at, r.id));
        Ok(rows)
    }

    async fn reservations_for_requester(&self, requester_id: i32) -> AppResult<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.start_at, r.id));
        Ok(rows)
    }

    async fn blocking_reservations(
        &self,
        asset_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| r.asset_id == asset_id && r.status.blocks_interval() && r.overlaps(start, end))
            .cloned()
            .collect())
    }

    async fn stale_reservations(&self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| {
                matches!(r.status, ReservationStatus::Pending | ReservationStatus::Approved)
                    && r.end_at <= now
            })
            .cloned()
            .collect())
    }

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>> {
        Ok(self.state.read().await.loans.get(&id).cloned())
    }

    async fn open_loan_for_asset(&self, asset_id: i32) -> AppResult<Option<Loan>> {
        let state = self.state.read().await;
        Ok(state
            .loans
            .values()
            .find(|l| l.asset_id == asset_id && l.is_open())
            .cloned())
    }

    async fn loan_for_reservation(&self, reservation_id: i32) -> AppResult<Option<Loan>> {
        let state = self.state.read().await;
        Ok(state
            .loans
            .values()
            .find(|l| l.reservation_id == Some(reservation_id))
            .cloned())
    }

    async fn loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Loan>> {
        let state = self.state.read().await;
        let mut rows: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.borrower_id == borrower_id)
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.checkout_at, l.id));
        Ok(rows)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let state = self.state.read().await;
        let mut rows: Vec<Loan> = state.loans.values().filter(|l| l.is_overdue(now)).cloned().collect();
        rows.sort_by_key(|l| (l.due_at, l.id));
        Ok(rows)
    }

    async fn penalties_for_loan(&self, loan_id: i32) -> AppResult<Vec<Penalty>> {
        let state = self.state.read().await;
        Ok(state.penalties.values().filter(|p| p.loan_id == loan_id).cloned().collect())
    }

    async fn penalties_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Penalty>> {
        let state = self.state.read().await;
        Ok(state
            .penalties
            .values()
            .filter(|p| p.borrower_id == borrower_id)
            .cloned()
            .collect())
    }

    async fn get_ticket(&self, id: i32) -> AppResult<Option<MaintenanceTicket>> {
        Ok(self.state.read().await.tickets.get(&id).cloned())
    }

    async fn ticket_for_loan(&self, loan_id: i32, asset_id: i32) -> AppResult<Option<MaintenanceTicket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .find(|t| t.loan_id == Some(loan_id) && t.asset_id == asset_id)
            .cloned())
    }

    async fn tickets_for_asset(&self, asset_id: i32) -> AppResult<Vec<MaintenanceTicket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| t.asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn notifications_for(&self, recipient_id: i32, unread_only: bool) -> AppResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && (!unread_only || n.read_at.is_none()))
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        recipient_id: i32,
        notification_id: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.notifications.get_mut(&notification_id) {
            Some(n) if n.recipient_id == recipient_id => {
                n.read_at.get_or_insert(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn audit_trail(&self, entity_type: EntityType, entity_id: i32) -> AppResult<Vec<AuditEvent>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: ChangeSet) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.validate(&changes)?;
        state.apply(changes);
        Ok(())
    }
}
