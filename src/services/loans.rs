//! Loan lifecycle service: checkout and return

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{Loan, Penalty, ReturnLoan},
        AssetStatus, EntityType, MaintenanceTicket, NotificationKind, ReservationStatus,
        TicketSeverity, TicketStatus,
    },
    repository::{AssetStatusChange, ChangeSet, LoanReturn, ReservationTransition, Sequence},
};

use super::{penalties, LedgerContext};

const DAMAGED_ON_RETURN: &str = "Damaged on return";

/// Everything a return produced
#[derive(Debug, Clone, Serialize)]
pub struct ReturnOutcome {
    pub loan: Loan,
    pub penalty: Option<Penalty>,
    /// Maintenance ticket raised (or already raised) for a damaged return
    pub ticket: Option<MaintenanceTicket>,
}

#[derive(Clone)]
pub struct LoansService {
    ctx: LedgerContext,
}

impl LoansService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Get loan by ID
    pub async fn get(&self, loan_id: i32) -> AppResult<Loan> {
        self.ctx
            .repository
            .get_loan(loan_id)
            .await?
            .ok_or(AppError::LoanNotFound(loan_id))
    }

    /// Get loans for a borrower in checkout order
    pub async fn list_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Loan>> {
        self.ctx.repository.loans_for_borrower(borrower_id).await
    }

    /// Open loans past their due date
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        self.ctx.repository.overdue_loans(now).await
    }

    pub async fn penalties_for_loan(&self, loan_id: i32) -> AppResult<Vec<Penalty>> {
        self.ctx.repository.penalties_for_loan(loan_id).await
    }

    pub async fn penalties_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Penalty>> {
        self.ctx.repository.penalties_for_borrower(borrower_id).await
    }

    /// Hand over the asset of an approved reservation to its requester.
    ///
    /// The reservation becomes `confirmed` and the asset `checked_out` in the
    /// same commit that opens the loan.
    pub async fn checkout_from_reservation(&self, actor_id: i32, reservation_id: i32) -> AppResult<Loan> {
        let asset_id = self
            .ctx
            .repository
            .get_reservation(reservation_id)
            .await?
            .ok_or(AppError::ReservationNotFound(reservation_id))?
            .asset_id;
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("checkout_from_reservation", || {
                self.checkout_from_reservation_once(actor_id, reservation_id)
            })
            .await
    }

    async fn checkout_from_reservation_once(&self, actor_id: i32, reservation_id: i32) -> AppResult<Loan> {
        let reservation = self
            .ctx
            .repository
            .get_reservation(reservation_id)
            .await?
            .ok_or(AppError::ReservationNotFound(reservation_id))?;
        if !matches!(
            reservation.status,
            ReservationStatus::Approved | ReservationStatus::Confirmed
        ) {
            return Err(AppError::transition("reservation", reservation.status, "check out"));
        }
        if self.ctx.repository.loan_for_reservation(reservation_id).await?.is_some() {
            return Err(AppError::transition("reservation", ReservationStatus::Confirmed, "check out"));
        }

        let mut changes = self
            .prepare_checkout(actor_id, reservation.requester_id, reservation.asset_id, Some(reservation_id))
            .await?;
        if reservation.status == ReservationStatus::Approved {
            changes.reservation_transitions.push(ReservationTransition {
                reservation_id,
                asset_id: reservation.asset_id,
                from: ReservationStatus::Approved,
                to: ReservationStatus::Confirmed,
                decided_by: None,
                decision_reason: None,
            });
            changes.audit(
                Some(actor_id),
                EntityType::Reservation,
                reservation_id,
                "confirmed",
                json!({}),
            );
        }

        self.commit_checkout(changes).await
    }

    /// Walk-up loan with no reservation behind it
    pub async fn checkout_adhoc(&self, actor_id: i32, borrower_id: i32, asset_id: i32) -> AppResult<Loan> {
        if self.ctx.repository.get_user(borrower_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", borrower_id)));
        }
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("checkout_adhoc", || async move {
                let changes = self.prepare_checkout(actor_id, borrower_id, asset_id, None).await?;
                self.commit_checkout(changes).await
            })
            .await
    }

    /// Build the common part of a checkout: the loan, the ledger flip, its audit
    /// event and the borrower's notification.
    async fn prepare_checkout(
        &self,
        actor_id: i32,
        borrower_id: i32,
        asset_id: i32,
        reservation_id: Option<i32>,
    ) -> AppResult<ChangeSet> {
        let asset = self
            .ctx
            .repository
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", asset_id)))?;
        if asset.status != AssetStatus::Available {
            tracing::warn!(asset_id, status = %asset.status, "Checkout rejected: asset not available");
            return Err(AppError::ItemUnavailable(asset_id));
        }
        if self.ctx.repository.open_loan_for_asset(asset_id).await?.is_some() {
            tracing::warn!(asset_id, "Checkout rejected: asset already on loan");
            return Err(AppError::ItemUnavailable(asset_id));
        }

        let now = self.ctx.clock.now();
        let loan = Loan {
            id: self.ctx.repository.next_id(Sequence::Loan).await?,
            asset_id,
            borrower_id,
            reservation_id,
            checkout_at: now,
            due_at: now + self.ctx.policy.loan_duration,
            return_at: None,
            damaged: false,
            return_condition: None,
        };

        let mut changes = ChangeSet::new(now);
        changes.asset_changes.push(AssetStatusChange {
            asset_id,
            from: AssetStatus::Available,
            to: AssetStatus::CheckedOut,
        });
        changes
            .audit(
                Some(actor_id),
                EntityType::Loan,
                loan.id,
                "checked_out",
                json!({
                    "asset_id": asset_id,
                    "borrower_id": borrower_id,
                    "reservation_id": reservation_id,
                    "due_at": loan.due_at,
                }),
            )
            .notify(
                borrower_id,
                NotificationKind::LoanCheckedOut,
                json!({ "loan_id": loan.id, "asset_id": asset_id, "due_at": loan.due_at }),
            );
        changes.new_loans.push(loan);
        Ok(changes)
    }

    async fn commit_checkout(&self, changes: ChangeSet) -> AppResult<Loan> {
        let loan = changes
            .new_loans
            .first()
            .cloned()
            .ok_or_else(|| AppError::Internal("checkout without a loan".to_string()))?;
        self.ctx.repository.commit(changes).await?;

        tracing::info!(
            loan_id = loan.id,
            asset_id = loan.asset_id,
            borrower_id = loan.borrower_id,
            due_at = %loan.due_at,
            "Loan checked out"
        );
        Ok(loan)
    }

    /// Close an open loan.
    ///
    /// In one commit: stamps the return, puts the asset back to `available`
    /// (or `out_of_service` when damaged), assesses a late penalty and opens a
    /// maintenance ticket for a damaged return unless this loan already has one.
    pub async fn return_loan(&self, actor_id: i32, loan_id: i32, data: ReturnLoan) -> AppResult<ReturnOutcome> {
        let loan = self.get(loan_id).await?;
        if !loan.is_open() {
            return Err(AppError::AlreadyReturned(loan_id));
        }
        let _guard = self.ctx.locks.lock(loan.asset_id).await;

        self.ctx
            .with_retry("return_loan", || self.return_loan_once(actor_id, loan_id, &data))
            .await
    }

    async fn return_loan_once(&self, actor_id: i32, loan_id: i32, data: &ReturnLoan) -> AppResult<ReturnOutcome> {
        let mut loan = self.get(loan_id).await?;
        if !loan.is_open() {
            return Err(AppError::AlreadyReturned(loan_id));
        }
        let asset = self
            .ctx
            .repository
            .get_asset(loan.asset_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", loan.asset_id)))?;

        let now = self.ctx.clock.now();
        let condition = data
            .condition_notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);
        let next_status = if data.damaged {
            AssetStatus::OutOfService
        } else {
            AssetStatus::Available
        };

        let mut changes = ChangeSet::new(now);
        changes.loan_returns.push(LoanReturn {
            loan_id,
            asset_id: loan.asset_id,
            return_at: now,
            damaged: data.damaged,
            return_condition: condition.clone(),
        });
        if asset.status != next_status {
            changes.asset_changes.push(AssetStatusChange {
                asset_id: asset.id,
                from: asset.status,
                to: next_status,
            });
        }
        changes
            .audit(
                Some(actor_id),
                EntityType::Loan,
                loan_id,
                "returned",
                json!({ "damaged": data.damaged, "condition": condition }),
            )
            .notify(
                loan.borrower_id,
                NotificationKind::LoanReturned,
                json!({ "loan_id": loan_id, "asset_id": loan.asset_id, "returned_at": now }),
            );

        let amount = penalties::compute_penalty(loan.due_at, now, self.ctx.policy.penalty_per_day);
        let penalty = if amount > rust_decimal::Decimal::ZERO {
            let days = penalties::days_late(loan.due_at, now);
            let penalty = Penalty {
                id: self.ctx.repository.next_id(Sequence::Penalty).await?,
                loan_id,
                borrower_id: loan.borrower_id,
                amount,
                reason: format!("Returned {} day(s) late", days),
                created_at: now,
            };
            changes
                .audit(
                    Some(actor_id),
                    EntityType::Penalty,
                    penalty.id,
                    "assessed",
                    json!({ "loan_id": loan_id, "amount": amount, "days_late": days }),
                )
                .notify(
                    loan.borrower_id,
                    NotificationKind::PenaltyAssessed,
                    json!({ "loan_id": loan_id, "penalty_id": penalty.id, "amount": amount, "days_late": days }),
                );
            changes.new_penalties.push(penalty.clone());
            Some(penalty)
        } else {
            None
        };

        let ticket = if data.damaged {
            match self.ctx.repository.ticket_for_loan(loan_id, loan.asset_id).await? {
                Some(existing) => Some(existing),
                None => {
                    let ticket = MaintenanceTicket {
                        id: self.ctx.repository.next_id(Sequence::MaintenanceTicket).await?,
                        asset_id: loan.asset_id,
                        loan_id: Some(loan_id),
                        opened_by: actor_id,
                        assigned_to: None,
                        severity: TicketSeverity::Medium,
                        status: TicketStatus::Open,
                        description: condition.clone().unwrap_or_else(|| DAMAGED_ON_RETURN.to_string()),
                        created_at: now,
                        updated_at: now,
                        closed_at: None,
                    };
                    changes.audit(
                        Some(actor_id),
                        EntityType::MaintenanceTicket,
                        ticket.id,
                        "opened",
                        json!({ "asset_id": ticket.asset_id, "loan_id": loan_id, "severity": ticket.severity }),
                    );
                    changes.new_tickets.push(ticket.clone());
                    Some(ticket)
                }
            }
        } else {
            None
        };

        self.ctx.repository.commit(changes).await?;

        tracing::info!(
            loan_id,
            asset_id = loan.asset_id,
            damaged = data.damaged,
            penalty = %amount,
            "Loan returned"
        );
        loan.return_at = Some(now);
        loan.damaged = data.damaged;
        loan.return_condition = condition;
        Ok(ReturnOutcome { loan, penalty, ticket })
    }
}
