//! PostgreSQL ledger store
//!
//! Each commit runs in one transaction. Row transitions are conditional
//! updates guarded by the expected prior state; the schema's exclusion
//! constraints catch any overlap that slips past the in-process asset locks
//! (e.g. a second server instance).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use super::{ChangeSet, LedgerStore, Sequence};
use crate::{
    error::{AppError, AppResult},
    models::{
        Asset, AuditEvent, EntityType, Loan, MaintenanceTicket, Notification, Penalty,
        Reservation, User,
    },
};

const RESERVATION_OVERLAP: &str = "reservations_no_overlap";
const LOAN_OVERLAP: &str = "loans_no_overlap";
const LOAN_RESERVATION_UNIQUE: &str = "loans_reservation_id_key";
const ASSET_TAG_UNIQUE: &str = "assets_tag_key";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Pool<Postgres>,
}

impl PgLedgerStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Translate constraint violations raised during a commit into domain errors
fn map_commit_error(err: sqlx::Error, changes: &ChangeSet) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(RESERVATION_OVERLAP) => {
                if let Some(t) = changes
                    .reservation_transitions
                    .iter()
                    .find(|t| t.to.blocks_interval())
                {
                    return AppError::ReservationOverlap {
                        reservation_id: t.reservation_id,
                        asset_id: t.asset_id,
                    };
                }
            }
            Some(LOAN_OVERLAP) => {
                if let Some(loan) = changes.new_loans.first() {
                    return AppError::ItemUnavailable(loan.asset_id);
                }
            }
            Some(LOAN_RESERVATION_UNIQUE) => {
                return AppError::transition("reservation", "confirmed", "check out");
            }
            Some(ASSET_TAG_UNIQUE) => {
                if let Some(asset) = changes.new_assets.first() {
                    return AppError::Validation(format!("Asset tag {} already exists", asset.tag));
                }
            }
            _ => {}
        }
    }
    AppError::Database(err)
}

fn map_unique(err: sqlx::Error, message: String) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Validation(message);
        }
    }
    AppError::Database(err)
}

fn expect_one(rows: u64, what: String) -> AppResult<()> {
    if rows == 0 {
        return Err(AppError::Conflict(what));
    }
    Ok(())
}

impl PgLedgerStore {
    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, changes: &ChangeSet) -> Result<(), CommitFailure> {
        let at = changes.at;

        for asset in &changes.new_assets {
            sqlx::query(
                r#"
                INSERT INTO assets (
                    id, tag, name, category, location, status, last_serviced_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(asset.id)
            .bind(&asset.tag)
            .bind(&asset.name)
            .bind(&asset.category)
            .bind(&asset.location)
            .bind(asset.status)
            .bind(asset.last_serviced_at)
            .bind(asset.created_at)
            .bind(asset.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        for change in &changes.asset_changes {
            let rows = sqlx::query(
                "UPDATE assets SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
            )
            .bind(change.asset_id)
            .bind(change.from)
            .bind(change.to)
            .bind(at)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            expect_one(rows, format!("asset {} is no longer {}", change.asset_id, change.from))?;
        }

        for asset_id in &changes.assets_serviced {
            sqlx::query("UPDATE assets SET last_serviced_at = $2, updated_at = $2 WHERE id = $1")
                .bind(asset_id)
                .bind(at)
                .execute(&mut **tx)
                .await?;
        }

        for r in &changes.new_reservations {
            sqlx::query(
                r#"
                INSERT INTO reservations (
                    id, asset_id, requester_id, start_at, end_at, status,
                    decided_by, decision_reason, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(r.id)
            .bind(r.asset_id)
            .bind(r.requester_id)
            .bind(r.start_at)
            .bind(r.end_at)
            .bind(r.status)
            .bind(r.decided_by)
            .bind(&r.decision_reason)
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        for t in &changes.reservation_transitions {
            let rows = sqlx::query(
                r#"
                UPDATE reservations
                SET status = $3,
                    decided_by = COALESCE($4, decided_by),
                    decision_reason = COALESCE($5, decision_reason),
                    updated_at = $6
                WHERE id = $1 AND status = $2
                "#,
            )
            .bind(t.reservation_id)
            .bind(t.from)
            .bind(t.to)
            .bind(t.decided_by)
            .bind(&t.decision_reason)
            .bind(at)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            expect_one(rows, format!("reservation {} is no longer {}", t.reservation_id, t.from))?;
        }

        for ret in &changes.loan_returns {
            let rows = sqlx::query(
                r#"
                UPDATE loans SET return_at = $2, damaged = $3, return_condition = $4
                WHERE id = $1 AND return_at IS NULL
                "#,
            )
            .bind(ret.loan_id)
            .bind(ret.return_at)
            .bind(ret.damaged)
            .bind(&ret.return_condition)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            expect_one(rows, format!("loan {} is already closed", ret.loan_id))?;
        }

        for loan in &changes.new_loans {
            sqlx::query(
                r#"
                INSERT INTO loans (
                    id, asset_id, borrower_id, reservation_id, checkout_at, due_at,
                    return_at, damaged, return_condition
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(loan.id)
            .bind(loan.asset_id)
            .bind(loan.borrower_id)
            .bind(loan.reservation_id)
            .bind(loan.checkout_at)
            .bind(loan.due_at)
            .bind(loan.return_at)
            .bind(loan.damaged)
            .bind(&loan.return_condition)
            .execute(&mut **tx)
            .await?;
        }

        for p in &changes.new_penalties {
            sqlx::query(
                r#"
                INSERT INTO penalties (id, loan_id, borrower_id, amount, reason, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(p.id)
            .bind(p.loan_id)
            .bind(p.borrower_id)
            .bind(p.amount)
            .bind(&p.reason)
            .bind(p.created_at)
            .execute(&mut **tx)
            .await?;
        }

        for t in &changes.new_tickets {
            let rows = sqlx::query(
                r#"
                INSERT INTO maintenance_tickets (
                    id, asset_id, loan_id, opened_by, assigned_to, severity, status,
                    description, created_at, updated_at, closed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (loan_id, asset_id) WHERE loan_id IS NOT NULL DO NOTHING
                "#,
            )
            .bind(t.id)
            .bind(t.asset_id)
            .bind(t.loan_id)
            .bind(t.opened_by)
            .bind(t.assigned_to)
            .bind(t.severity)
            .bind(t.status)
            .bind(&t.description)
            .bind(t.created_at)
            .bind(t.updated_at)
            .bind(t.closed_at)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            // A skipped duplicate would leave this change set's audit rows pointing nowhere
            expect_one(rows, format!("loan {:?} already has a ticket on asset {}", t.loan_id, t.asset_id))?;
        }

        for u in &changes.ticket_updates {
            let rows = sqlx::query(
                r#"
                UPDATE maintenance_tickets
                SET status = $3,
                    assigned_to = COALESCE($4, assigned_to),
                    closed_at = COALESCE($5, closed_at),
                    updated_at = $6
                WHERE id = $1 AND status = $2
                "#,
            )
            .bind(u.ticket_id)
            .bind(u.from)
            .bind(u.to)
            .bind(u.assign_to)
            .bind(u.closed_at)
            .bind(at)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            expect_one(rows, format!("ticket {} is no longer {}", u.ticket_id, u.from))?;
        }

        for event in &changes.audit {
            sqlx::query(
                r#"
                INSERT INTO audit_events (occurred_at, actor_id, entity_type, entity_id, action, detail)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(at)
            .bind(event.actor_id)
            .bind(event.entity_type)
            .bind(event.entity_id)
            .bind(event.action)
            .bind(&event.detail)
            .execute(&mut **tx)
            .await?;
        }

        for n in &changes.notifications {
            sqlx::query(
                r#"
                INSERT INTO notifications (recipient_id, kind, payload, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(n.recipient_id)
            .bind(n.kind)
            .bind(&n.payload)
            .bind(at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

/// Why a commit's statements were abandoned
enum CommitFailure {
    Sql(sqlx::Error),
    Rejected(AppError),
}

impl From<sqlx::Error> for CommitFailure {
    fn from(err: sqlx::Error) -> Self {
        CommitFailure::Sql(err)
    }
}

impl From<AppError> for CommitFailure {
    fn from(err: AppError) -> Self {
        CommitFailure::Rejected(err)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn next_id(&self, sequence: Sequence) -> AppResult<i32> {
        let id: i32 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence($1, 'id'))::int4")
            .bind(sequence.table())
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, role, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("Email {} already registered", user.email)))?;
        Ok(())
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_asset(&self, id: i32) -> AppResult<Option<Asset>> {
        Ok(sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_assets(&self) -> AppResult<Vec<Asset>> {
        Ok(sqlx::query_as::<_, Asset>("SELECT * FROM assets ORDER BY tag")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Option<Reservation>> {
        Ok(sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn reservations_for_asset(&self, asset_id: i32) -> AppResult<Vec<Reservation>> {
        Ok(sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE asset_id = $1 ORDER BY start_at, id",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn reservations_for_requester(&self, requester_id: i32) -> AppResult<Vec<Reservation>> {
        Ok(sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE requester_id = $1 ORDER BY start_at, id",
        )
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn blocking_reservations(
        &self,
        asset_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Reservation>> {
        Ok(sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE asset_id = $1
              AND status IN ('approved', 'confirmed')
              AND start_at < $3 AND $2 < end_at
            ORDER BY start_at
            "#,
        )
        .bind(asset_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn stale_reservations(&self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        Ok(sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status IN ('pending', 'approved') AND end_at <= $1
            ORDER BY id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>> {
        Ok(sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn open_loan_for_asset(&self, asset_id: i32) -> AppResult<Option<Loan>> {
        Ok(sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE asset_id = $1 AND return_at IS NULL",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn loan_for_reservation(&self, reservation_id: i32) -> AppResult<Option<Loan>> {
        Ok(sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE reservation_id = $1")
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Loan>> {
        Ok(sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE borrower_id = $1 ORDER BY checkout_at, id",
        )
        .bind(borrower_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        Ok(sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE return_at IS NULL AND due_at < $1 ORDER BY due_at, id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn penalties_for_loan(&self, loan_id: i32) -> AppResult<Vec<Penalty>> {
        Ok(sqlx::query_as::<_, Penalty>("SELECT * FROM penalties WHERE loan_id = $1 ORDER BY id")
            .bind(loan_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn penalties_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<Penalty>> {
        Ok(sqlx::query_as::<_, Penalty>(
            "SELECT * FROM penalties WHERE borrower_id = $1 ORDER BY id",
        )
        .bind(borrower_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_ticket(&self, id: i32) -> AppResult<Option<MaintenanceTicket>> {
        Ok(sqlx::query_as::<_, MaintenanceTicket>("SELECT * FROM maintenance_tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn ticket_for_loan(&self, loan_id: i32, asset_id: i32) -> AppResult<Option<MaintenanceTicket>> {
        Ok(sqlx::query_as::<_, MaintenanceTicket>(
            "SELECT * FROM maintenance_tickets WHERE loan_id = $1 AND asset_id = $2",
        )
        .bind(loan_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn tickets_for_asset(&self, asset_id: i32) -> AppResult<Vec<MaintenanceTicket>> {
        Ok(sqlx::query_as::<_, MaintenanceTicket>(
            "SELECT * FROM maintenance_tickets WHERE asset_id = $1 ORDER BY id",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn notifications_for(&self, recipient_id: i32, unread_only: bool) -> AppResult<Vec<Notification>> {
        Ok(sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1 AND ($2 = FALSE OR read_at IS NULL)
            ORDER BY id
            "#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_notification_read(
        &self,
        recipient_id: i32,
        notification_id: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE notifications SET read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND recipient_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(recipient_id)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn audit_trail(&self, entity_type: EntityType, entity_id: i32) -> AppResult<Vec<AuditEvent>> {
        Ok(sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events WHERE entity_type = $1 AND entity_id = $2 ORDER BY id",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn commit(&self, changes: ChangeSet) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        match self.apply(&mut tx, &changes).await {
            Ok(()) => {
                tx.commit().await.map_err(|e| map_commit_error(e, &changes))?;
                Ok(())
            }
            // Dropping the transaction rolls it back
            Err(CommitFailure::Rejected(err)) => Err(err),
            Err(CommitFailure::Sql(err)) => Err(map_commit_error(err, &changes)),
        }
    }
}
