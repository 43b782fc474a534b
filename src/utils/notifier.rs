use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;

use crate::model::announcement::Audience;

/// What a delivery channel needs to know about a published announcement.
#[derive(Debug, Clone)]
pub struct AnnouncementNotice {
    pub announcement_id: u64,
    pub title: String,
    pub audience: Audience,
    pub target_classes: Vec<u64>,
    pub target_individuals: Vec<u64>,
}

/// Push/email delivery seam. Delivery is best effort and never awaited by
/// the request that triggered it.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notice: AnnouncementNotice) -> BoxFuture<'static, Result<()>>;
}

/// Dispatcher that only records the notice in the application log.
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notice: AnnouncementNotice) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            tracing::info!(
                announcement_id = notice.announcement_id,
                audience = %notice.audience,
                classes = ?notice.target_classes,
                individuals = notice.target_individuals.len(),
                title = %notice.title,
                "Announcement notification queued"
            );
            Ok(())
        })
    }
}

pub type Notifier = Arc<dyn NotificationDispatcher>;

/// Fire and forget. Failures are logged, never returned.
pub fn spawn_dispatch(notifier: &Notifier, notice: AnnouncementNotice) {
    let id = notice.announcement_id;
    let fut = notifier.dispatch(notice);
    actix_web::rt::spawn(async move {
        if let Err(e) = fut.await {
            tracing::warn!(error = %e, announcement_id = id, "Notification dispatch failed");
        }
    });
}
