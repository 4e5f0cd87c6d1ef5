//! Maintenance tickets

use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{
        maintenance::{MaintenanceTicket, OpenTicket},
        AssetStatus, EntityType, NotificationKind, TicketStatus,
    },
    repository::{AssetStatusChange, ChangeSet, Sequence, TicketUpdate},
};

use super::LedgerContext;

#[derive(Clone)]
pub struct MaintenanceService {
    ctx: LedgerContext,
}

impl MaintenanceService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, ticket_id: i32) -> AppResult<MaintenanceTicket> {
        self.ctx
            .repository
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))
    }

    pub async fn list_for_asset(&self, asset_id: i32) -> AppResult<Vec<MaintenanceTicket>> {
        self.ctx.repository.tickets_for_asset(asset_id).await
    }

    /// Open a ticket by hand. When a loan is given and it already has a ticket
    /// for this asset, that ticket is returned instead of a new one.
    pub async fn open_ticket(&self, opened_by: i32, data: OpenTicket) -> AppResult<MaintenanceTicket> {
        let description = data.description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("description is required".to_string()));
        }
        if self.ctx.repository.get_asset(data.asset_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Asset {} not found", data.asset_id)));
        }
        if let Some(loan_id) = data.loan_id {
            let loan = self
                .ctx
                .repository
                .get_loan(loan_id)
                .await?
                .ok_or(AppError::LoanNotFound(loan_id))?;
            if loan.asset_id != data.asset_id {
                return Err(AppError::Validation(format!(
                    "loan {} is not for asset {}",
                    loan_id, data.asset_id
                )));
            }
        }

        let _guard = self.ctx.locks.lock(data.asset_id).await;

        self.ctx
            .with_retry("open_ticket", || self.open_ticket_once(opened_by, &data, description))
            .await
    }

    async fn open_ticket_once(
        &self,
        opened_by: i32,
        data: &OpenTicket,
        description: &str,
    ) -> AppResult<MaintenanceTicket> {
        if let Some(loan_id) = data.loan_id {
            if let Some(existing) = self.ctx.repository.ticket_for_loan(loan_id, data.asset_id).await? {
                tracing::debug!(ticket_id = existing.id, loan_id, "Ticket already open for loan");
                return Ok(existing);
            }
        }

        let now = self.ctx.clock.now();
        let ticket = MaintenanceTicket {
            id: self.ctx.repository.next_id(Sequence::MaintenanceTicket).await?,
            asset_id: data.asset_id,
            loan_id: data.loan_id,
            opened_by,
            assigned_to: None,
            severity: data.severity,
            status: TicketStatus::Open,
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        };

        let mut changes = ChangeSet::new(now);
        changes.new_tickets.push(ticket.clone());
        changes.audit(
            Some(opened_by),
            EntityType::MaintenanceTicket,
            ticket.id,
            "opened",
            json!({ "asset_id": ticket.asset_id, "loan_id": ticket.loan_id, "severity": ticket.severity }),
        );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(ticket_id = ticket.id, asset_id = ticket.asset_id, severity = %ticket.severity, "Ticket opened");
        Ok(ticket)
    }

    /// Assign a ticket to a technician and notify them
    pub async fn assign_ticket(&self, actor_id: i32, ticket_id: i32, assignee_id: i32) -> AppResult<MaintenanceTicket> {
        let assignee = self
            .ctx
            .repository
            .get_user(assignee_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", assignee_id)))?;
        if !assignee.is_technician() {
            return Err(AppError::NotTechnician(assignee_id));
        }

        self.ctx
            .with_retry("assign_ticket", || async move {
                let mut ticket = self.get(ticket_id).await?;
                if ticket.status == TicketStatus::Closed {
                    return Err(AppError::transition("maintenance ticket", ticket.status, "assign"));
                }

                let now = self.ctx.clock.now();
                let mut changes = ChangeSet::new(now);
                changes.ticket_updates.push(TicketUpdate {
                    ticket_id,
                    from: ticket.status,
                    to: ticket.status,
                    assign_to: Some(assignee_id),
                    closed_at: None,
                });
                changes
                    .audit(
                        Some(actor_id),
                        EntityType::MaintenanceTicket,
                        ticket_id,
                        "assigned",
                        json!({ "assignee_id": assignee_id, "previous_assignee_id": ticket.assigned_to }),
                    )
                    .notify(
                        assignee_id,
                        NotificationKind::TicketAssigned,
                        json!({
                            "ticket_id": ticket_id,
                            "asset_id": ticket.asset_id,
                            "severity": ticket.severity,
                        }),
                    );
                self.ctx.repository.commit(changes).await?;

                tracing::info!(ticket_id, assignee_id, "Ticket assigned");
                ticket.assigned_to = Some(assignee_id);
                ticket.updated_at = now;
                Ok(ticket)
            })
            .await
    }

    /// Move a ticket between statuses; `closed` is terminal.
    ///
    /// Closing stamps the asset's service time and brings an `out_of_service`
    /// asset back to `available` once none of its tickets remain open.
    pub async fn update_ticket_status(
        &self,
        actor_id: i32,
        ticket_id: i32,
        status: TicketStatus,
    ) -> AppResult<MaintenanceTicket> {
        let asset_id = self.get(ticket_id).await?.asset_id;
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("update_ticket_status", || self.update_status_once(actor_id, ticket_id, status))
            .await
    }

    async fn update_status_once(&self, actor_id: i32, ticket_id: i32, status: TicketStatus) -> AppResult<MaintenanceTicket> {
        let mut ticket = self.get(ticket_id).await?;
        if ticket.status == TicketStatus::Closed {
            return Err(AppError::transition("maintenance ticket", ticket.status, "update"));
        }
        if ticket.status == status {
            return Ok(ticket);
        }

        let now = self.ctx.clock.now();
        let closing = status == TicketStatus::Closed;
        let mut changes = ChangeSet::new(now);
        changes.ticket_updates.push(TicketUpdate {
            ticket_id,
            from: ticket.status,
            to: status,
            assign_to: None,
            closed_at: closing.then_some(now),
        });
        changes.audit(
            Some(actor_id),
            EntityType::MaintenanceTicket,
            ticket_id,
            "status_changed",
            json!({ "from": ticket.status, "to": status }),
        );

        if closing {
            changes.assets_serviced.push(ticket.asset_id);
            let asset = self
                .ctx
                .repository
                .get_asset(ticket.asset_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", ticket.asset_id)))?;
            let others_open = self
                .ctx
                .repository
                .tickets_for_asset(ticket.asset_id)
                .await?
                .iter()
                .any(|t| t.id != ticket_id && t.status != TicketStatus::Closed);
            if asset.status == AssetStatus::OutOfService && !others_open {
                changes.asset_changes.push(AssetStatusChange {
                    asset_id: asset.id,
                    from: AssetStatus::OutOfService,
                    to: AssetStatus::Available,
                });
                changes.audit(
                    Some(actor_id),
                    EntityType::Asset,
                    asset.id,
                    "status_changed",
                    json!({ "from": AssetStatus::OutOfService, "to": AssetStatus::Available, "ticket_id": ticket_id }),
                );
            }
        }

        self.ctx.repository.commit(changes).await?;

        tracing::info!(ticket_id, from = %ticket.status, to = %status, "Ticket status changed");
        ticket.status = status;
        ticket.updated_at = now;
        if closing {
            ticket.closed_at = Some(now);
        }
        Ok(ticket)
    }
}
