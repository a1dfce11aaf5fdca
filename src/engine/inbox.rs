use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::validate_user_id;
use super::{Engine, EngineError};

impl Engine {
    pub async fn store_notification(&self, notification: Notification) -> Result<Ulid, EngineError> {
        validate_user_id("user_id", &notification.user_id)?;
        let id = notification.id;
        self.persist_record(&Event::NotificationCreated { notification })
            .await?;
        Ok(id)
    }

    /// Newest first, capped at `MAX_NOTIFICATIONS_PER_QUERY`.
    pub fn list_notifications(&self, user_id: &str, unread_only: bool) -> Vec<Notification> {
        let ids = self
            .inboxes
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .rev()
            .filter_map(|id| self.notifications.get(id).map(|e| e.value().clone()))
            .filter(|n| !unread_only || !n.read)
            .take(MAX_NOTIFICATIONS_PER_QUERY)
            .collect()
    }

    /// Only the recipient may mark a notification read. Marking twice is fine.
    pub async fn mark_notification_read(&self, id: Ulid, user_id: &str) -> Result<(), EngineError> {
        let (owner, read) = self
            .notifications
            .get(&id)
            .map(|n| (n.user_id.clone(), n.read))
            .ok_or_else(|| EngineError::NotFound(format!("notification {id}")))?;
        if owner != user_id {
            return Err(EngineError::Unauthorized(format!(
                "notification {id} belongs to another user"
            )));
        }
        if read {
            return Ok(());
        }
        self.persist_record(&Event::NotificationRead { id }).await
    }
}
