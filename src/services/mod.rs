//! Business logic services: the reservation and loan lifecycle core

pub mod audit;
pub mod clock;
pub mod inventory;
pub mod loans;
pub mod locks;
pub mod maintenance;
pub mod notifications;
pub mod penalties;
pub mod reservations;
pub mod sweeper;
pub mod users;

use std::{future::Future, sync::Arc};

use chrono::Duration;
use rust_decimal::Decimal;

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    repository::Repository,
};

use clock::{Clock, SystemClock};
use locks::AssetLocks;

/// Loan rules consumed by the lifecycle operations
#[derive(Debug, Clone)]
pub struct LoanPolicy {
    pub loan_duration: Duration,
    pub penalty_per_day: Decimal,
    pub max_conflict_retries: u32,
}

impl From<&LoansConfig> for LoanPolicy {
    fn from(config: &LoansConfig) -> Self {
        Self {
            loan_duration: Duration::days(config.default_loan_days),
            penalty_per_day: config.penalty_per_day,
            max_conflict_retries: config.max_conflict_retries,
        }
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self::from(&LoansConfig::default())
    }
}

/// Collaborators shared by every lifecycle service
#[derive(Clone)]
pub struct LedgerContext {
    pub repository: Repository,
    pub clock: Arc<dyn Clock>,
    pub locks: AssetLocks,
    pub policy: LoanPolicy,
}

impl LedgerContext {
    /// Run one read-decide-commit attempt, re-running it when the store
    /// reports a concurrent update. Any other outcome is returned as is.
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(AppError::Conflict(reason)) if retries < self.policy.max_conflict_retries => {
                    retries += 1;
                    tracing::debug!(operation, retries, %reason, "Retrying after concurrent update");
                }
                outcome => return outcome,
            }
        }
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub users: users::UsersService,
    pub inventory: inventory::InventoryService,
    pub reservations: reservations::ReservationsService,
    pub loans: loans::LoansService,
    pub maintenance: maintenance::MaintenanceService,
    pub notifications: notifications::NotificationsService,
    pub audit: audit::AuditService,
}

impl Services {
    /// Create all services over the given repository, on the wall clock
    pub fn new(repository: Repository, loans_config: &LoansConfig) -> Self {
        Self::with_clock(repository, LoanPolicy::from(loans_config), Arc::new(SystemClock))
    }

    pub fn with_clock(repository: Repository, policy: LoanPolicy, clock: Arc<dyn Clock>) -> Self {
        let ctx = LedgerContext {
            repository,
            clock,
            locks: AssetLocks::new(),
            policy,
        };

        Self {
            users: users::UsersService::new(ctx.clone()),
            inventory: inventory::InventoryService::new(ctx.clone()),
            reservations: reservations::ReservationsService::new(ctx.clone()),
            loans: loans::LoansService::new(ctx.clone()),
            maintenance: maintenance::MaintenanceService::new(ctx.clone()),
            notifications: notifications::NotificationsService::new(ctx.clone()),
            audit: audit::AuditService::new(ctx),
        }
    }
}
