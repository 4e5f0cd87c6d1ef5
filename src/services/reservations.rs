//! Reservation lifecycle service

use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{
        reservation::{Reservation, RequestReservation},
        EntityType, NotificationKind, ReservationStatus,
    },
    repository::{ChangeSet, ReservationTransition, Sequence},
};

use super::LedgerContext;

#[derive(Clone)]
pub struct ReservationsService {
    ctx: LedgerContext,
}

impl ReservationsService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Get reservation by ID
    pub async fn get(&self, reservation_id: i32) -> AppResult<Reservation> {
        self.ctx
            .repository
            .get_reservation(reservation_id)
            .await?
            .ok_or(AppError::ReservationNotFound(reservation_id))
    }

    pub async fn list_for_asset(&self, asset_id: i32) -> AppResult<Vec<Reservation>> {
        self.ctx.repository.reservations_for_asset(asset_id).await
    }

    pub async fn list_for_requester(&self, requester_id: i32) -> AppResult<Vec<Reservation>> {
        self.ctx.repository.reservations_for_requester(requester_id).await
    }

    /// File a reservation request. Overlap with other requests is only checked
    /// at approval, so any number of pending requests may cover the same window.
    pub async fn request(&self, data: RequestReservation) -> AppResult<Reservation> {
        if data.start_at >= data.end_at {
            return Err(AppError::InvalidInterval);
        }
        if self.ctx.repository.get_asset(data.asset_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Asset {} not found", data.asset_id)));
        }

        let now = self.ctx.clock.now();
        let reservation = Reservation {
            id: self.ctx.repository.next_id(Sequence::Reservation).await?,
            asset_id: data.asset_id,
            requester_id: data.requester_id,
            start_at: data.start_at,
            end_at: data.end_at,
            status: ReservationStatus::Pending,
            decided_by: None,
            decision_reason: None,
            created_at: now,
            updated_at: now,
        };

        let mut changes = ChangeSet::new(now);
        changes.new_reservations.push(reservation.clone());
        changes
            .audit(
                Some(data.requester_id),
                EntityType::Reservation,
                reservation.id,
                "requested",
                json!({
                    "asset_id": reservation.asset_id,
                    "start_at": reservation.start_at,
                    "end_at": reservation.end_at,
                }),
            )
            .notify(
                reservation.requester_id,
                NotificationKind::ReservationRequested,
                json!({
                    "reservation_id": reservation.id,
                    "asset_id": reservation.asset_id,
                    "start_at": reservation.start_at,
                    "end_at": reservation.end_at,
                }),
            );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(
            reservation_id = reservation.id,
            asset_id = reservation.asset_id,
            requester_id = reservation.requester_id,
            "Reservation requested"
        );
        Ok(reservation)
    }

    /// Approve a reservation.
    ///
    /// Fails with `ReservationOverlap` if another approved or confirmed
    /// reservation on the same asset intersects its interval. Approving an
    /// already approved reservation re-runs the overlap check and refreshes the
    /// decision; approving a confirmed one is a no-op.
    pub async fn approve(&self, approver_id: i32, reservation_id: i32, reason: Option<String>) -> AppResult<Reservation> {
        let asset_id = self.get(reservation_id).await?.asset_id;
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("approve_reservation", || {
                self.approve_once(approver_id, reservation_id, reason.as_deref())
            })
            .await
    }

    async fn approve_once(&self, approver_id: i32, reservation_id: i32, reason: Option<&str>) -> AppResult<Reservation> {
        let mut reservation = self.get(reservation_id).await?;
        match reservation.status {
            ReservationStatus::Pending | ReservationStatus::Approved => {}
            ReservationStatus::Confirmed => return Ok(reservation),
            other => return Err(AppError::transition("reservation", other, "approve")),
        }

        let conflicting = self
            .ctx
            .repository
            .blocking_reservations(reservation.asset_id, reservation.start_at, reservation.end_at)
            .await?;
        if let Some(other) = conflicting.iter().find(|r| r.id != reservation.id) {
            tracing::warn!(
                reservation_id,
                conflicting_id = other.id,
                asset_id = reservation.asset_id,
                "Approval rejected: overlapping reservation"
            );
            return Err(AppError::ReservationOverlap {
                reservation_id,
                asset_id: reservation.asset_id,
            });
        }

        let now = self.ctx.clock.now();
        let reason = reason.map(str::to_string);
        let first_approval = reservation.status == ReservationStatus::Pending;

        let mut changes = ChangeSet::new(now);
        changes.reservation_transitions.push(ReservationTransition {
            reservation_id,
            asset_id: reservation.asset_id,
            from: reservation.status,
            to: ReservationStatus::Approved,
            decided_by: Some(approver_id),
            decision_reason: reason.clone(),
        });
        changes.audit(
            Some(approver_id),
            EntityType::Reservation,
            reservation_id,
            if first_approval { "approved" } else { "reapproved" },
            json!({ "reason": reason }),
        );
        if first_approval {
            changes.notify(
                reservation.requester_id,
                NotificationKind::ReservationApproved,
                json!({
                    "reservation_id": reservation_id,
                    "asset_id": reservation.asset_id,
                    "start_at": reservation.start_at,
                    "end_at": reservation.end_at,
                    "reason": reason,
                }),
            );
        }
        self.ctx.repository.commit(changes).await?;

        tracing::info!(reservation_id, approver_id, "Reservation approved");
        reservation.status = ReservationStatus::Approved;
        reservation.decided_by = Some(approver_id);
        if reason.is_some() {
            reservation.decision_reason = reason;
        }
        reservation.updated_at = now;
        Ok(reservation)
    }

    /// Deny a pending reservation; a non-blank reason is mandatory
    pub async fn deny(&self, approver_id: i32, reservation_id: i32, reason: &str) -> AppResult<Reservation> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::MissingReason);
        }

        let asset_id = self.get(reservation_id).await?.asset_id;
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("deny_reservation", || self.deny_once(approver_id, reservation_id, reason))
            .await
    }

    async fn deny_once(&self, approver_id: i32, reservation_id: i32, reason: &str) -> AppResult<Reservation> {
        let mut reservation = self.get(reservation_id).await?;
        if !reservation.status.can_transition_to(ReservationStatus::Denied) {
            return Err(AppError::transition("reservation", reservation.status, "deny"));
        }

        let now = self.ctx.clock.now();
        let mut changes = ChangeSet::new(now);
        changes.reservation_transitions.push(ReservationTransition {
            reservation_id,
            asset_id: reservation.asset_id,
            from: reservation.status,
            to: ReservationStatus::Denied,
            decided_by: Some(approver_id),
            decision_reason: Some(reason.to_string()),
        });
        changes
            .audit(
                Some(approver_id),
                EntityType::Reservation,
                reservation_id,
                "denied",
                json!({ "reason": reason }),
            )
            .notify(
                reservation.requester_id,
                NotificationKind::ReservationDenied,
                json!({ "reservation_id": reservation_id, "reason": reason }),
            );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(reservation_id, approver_id, "Reservation denied");
        reservation.status = ReservationStatus::Denied;
        reservation.decided_by = Some(approver_id);
        reservation.decision_reason = Some(reason.to_string());
        reservation.updated_at = now;
        Ok(reservation)
    }

    /// Cancel a reservation. Only its requester may do so, and only before it starts.
    pub async fn cancel(&self, actor_id: i32, reservation_id: i32) -> AppResult<Reservation> {
        let asset_id = self.get(reservation_id).await?.asset_id;
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("cancel_reservation", || self.cancel_once(actor_id, reservation_id))
            .await
    }

    async fn cancel_once(&self, actor_id: i32, reservation_id: i32) -> AppResult<Reservation> {
        let mut reservation = self.get(reservation_id).await?;
        if reservation.requester_id != actor_id {
            return Err(AppError::Ownership(reservation_id));
        }
        let now = self.ctx.clock.now();
        if now >= reservation.start_at {
            return Err(AppError::AlreadyStarted(reservation_id));
        }
        if !reservation.status.can_transition_to(ReservationStatus::Cancelled) {
            return Err(AppError::transition("reservation", reservation.status, "cancel"));
        }

        let mut changes = ChangeSet::new(now);
        changes.reservation_transitions.push(ReservationTransition {
            reservation_id,
            asset_id: reservation.asset_id,
            from: reservation.status,
            to: ReservationStatus::Cancelled,
            decided_by: None,
            decision_reason: None,
        });
        changes
            .audit(
                Some(actor_id),
                EntityType::Reservation,
                reservation_id,
                "cancelled",
                json!({ "previous_status": reservation.status }),
            )
            .notify(
                reservation.requester_id,
                NotificationKind::ReservationCancelled,
                json!({ "reservation_id": reservation_id }),
            );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(reservation_id, actor_id, "Reservation cancelled");
        reservation.status = ReservationStatus::Cancelled;
        reservation.updated_at = now;
        Ok(reservation)
    }

    /// Expire every pending or approved reservation whose window has ended.
    ///
    /// Returns how many were expired; a second call right after returns 0.
    pub async fn expire_stale(&self) -> AppResult<usize> {
        self.ctx.with_retry("expire_stale_reservations", || self.expire_stale_once()).await
    }

    async fn expire_stale_once(&self) -> AppResult<usize> {
        let now = self.ctx.clock.now();
        let stale = self.ctx.repository.stale_reservations(now).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut changes = ChangeSet::new(now);
        for reservation in &stale {
            changes.reservation_transitions.push(ReservationTransition {
                reservation_id: reservation.id,
                asset_id: reservation.asset_id,
                from: reservation.status,
                to: ReservationStatus::Expired,
                decided_by: None,
                decision_reason: None,
            });
            changes
                .audit(
                    None,
                    EntityType::Reservation,
                    reservation.id,
                    "expired",
                    json!({ "previous_status": reservation.status, "end_at": reservation.end_at }),
                )
                .notify(
                    reservation.requester_id,
                    NotificationKind::ReservationExpired,
                    json!({ "reservation_id": reservation.id, "asset_id": reservation.asset_id }),
                );
        }
        self.ctx.repository.commit(changes).await?;

        tracing::info!(count = stale.len(), "Expired stale reservations");
        Ok(stale.len())
    }
}
