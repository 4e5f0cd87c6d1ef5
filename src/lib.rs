//! Campus equipment loan management
//!
//! The reservation and loan lifecycle core: an inventory ledger, the
//! reservation and loan state machines, late penalties, maintenance tickets,
//! and the audit and notification records every transition writes.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    pub repository: repository::Repository,
}
