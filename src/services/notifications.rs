//! Recipient-facing view of the notification sink

use crate::{
    error::{AppError, AppResult},
    models::Notification,
};

use super::LedgerContext;

#[derive(Clone)]
pub struct NotificationsService {
    ctx: LedgerContext,
}

impl NotificationsService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Notifications for a recipient, oldest first
    pub async fn list_for_recipient(&self, recipient_id: i32, unread_only: bool) -> AppResult<Vec<Notification>> {
        self.ctx.repository.notifications_for(recipient_id, unread_only).await
    }

    /// Mark one of the recipient's notifications as read. Marking it again keeps
    /// the first read time.
    pub async fn mark_read(&self, recipient_id: i32, notification_id: i32) -> AppResult<()> {
        let now = self.ctx.clock.now();
        let found = self
            .ctx
            .repository
            .mark_notification_read(recipient_id, notification_id, now)
            .await?;
        if !found {
            return Err(AppError::NotFound(format!(
                "Notification {} not found",
                notification_id
            )));
        }
        Ok(())
    }
}
