//! Notification service

use crate::db::repositories::NotificationRepository;
use crate::models::{ListParams, NewNotification, Notification, PagedResult};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum NotificationServiceError {
    #[error("Notification not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// Store a notification. A failure here never fails the operation that
    /// triggered it, so it is only logged.
    pub async fn notify(&self, notification: NewNotification) {
        if let Err(e) = self.repo.create(&notification).await {
            tracing::warn!(
                user_id = notification.user_id,
                kind = %notification.kind,
                "Failed to store notification: {:#}",
                e
            );
        }
    }

    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<PagedResult<Notification>, NotificationServiceError> {
        let (items, total) = self
            .repo
            .list(user_id, unread_only, params.limit(), params.offset())
            .await
            .context("Failed to list notifications")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, NotificationServiceError> {
        Ok(self
            .repo
            .unread_count(user_id)
            .await
            .context("Failed to count notifications")?)
    }

    pub async fn mark_read(&self, user_id: i64, id: i64) -> Result<(), NotificationServiceError> {
        if self.repo.mark_read(user_id, id).await.context("Failed to mark read")? {
            Ok(())
        } else {
            Err(NotificationServiceError::NotFound)
        }
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, NotificationServiceError> {
        Ok(self
            .repo
            .mark_all_read(user_id)
            .await
            .context("Failed to mark notifications read")?)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), NotificationServiceError> {
        if self.repo.delete(user_id, id).await.context("Failed to delete notification")? {
            Ok(())
        } else {
            Err(NotificationServiceError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::db::repositories::SqlxNotificationRepository;
    use crate::models::{NotificationKind, UserRole};

    #[tokio::test]
    async fn test_notify_and_manage() {
        let db = setup_db().await;
        let alice = insert_user(&db, "alice", UserRole::Student).await;
        let bob = insert_user(&db, "bob", UserRole::Student).await;
        let service = NotificationService::new(SqlxNotificationRepository::boxed(db));

        service
            .notify(NewNotification::new(alice, NotificationKind::System, "Welcome").link("/courses"))
            .await;
        service
            .notify(NewNotification::new(alice, NotificationKind::Quiz, "Quiz passed"))
            .await;
        assert_eq!(service.unread_count(alice).await.unwrap(), 2);

        let page = service.list(alice, false, &ListParams::new(1, 1)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_pages(), 2);

        let id = page.items[0].id;
        assert!(matches!(
            service.mark_read(bob, id).await,
            Err(NotificationServiceError::NotFound)
        ));
        service.mark_read(alice, id).await.unwrap();
        assert_eq!(service.unread_count(alice).await.unwrap(), 1);

        assert_eq!(service.mark_all_read(alice).await.unwrap(), 1);
        service.delete(alice, id).await.unwrap();
        assert!(matches!(
            service.delete(alice, id).await,
            Err(NotificationServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_notify_for_unknown_user_is_swallowed() {
        let db = setup_db().await;
        let service = NotificationService::new(SqlxNotificationRepository::boxed(db));
        // Foreign key failure is logged, not raised
        service
            .notify(NewNotification::new(4242, NotificationKind::System, "ghost"))
            .await;
    }
}
