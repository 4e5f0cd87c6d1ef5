//! Data models for the loan ledger

pub mod asset;
pub mod enums;
pub mod loan;
pub mod maintenance;
pub mod notification;
pub mod reservation;
pub mod user;

// Re-export commonly used types
pub use asset::Asset;
pub use enums::{
    AssetStatus, EntityType, NotificationKind, ReservationStatus, TicketSeverity, TicketStatus,
    UserRole,
};
pub use loan::{Loan, Penalty};
pub use maintenance::MaintenanceTicket;
pub use notification::{AuditEvent, Notification};
pub use reservation::Reservation;
pub use user::User;
