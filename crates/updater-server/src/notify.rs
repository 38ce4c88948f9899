use async_trait::async_trait;
use tracing::{info, warn};

use updater_core::Result;
use updater_core::proto::Notification;

/// Receives status messages about backups, the server and updates.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let data = notification
            .data
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        if notification.event.is_failure() {
            warn!(event = %notification.event, "{} {data}", notification.message);
        } else {
            info!(event = %notification.event, "{} {data}", notification.message);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: Notification) -> Result<()> {
        Ok(())
    }
}

/// Deliver a notification; a failing notifier is logged and otherwise ignored.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let event = notification.event;
    if let Err(err) = notifier.notify(notification).await {
        warn!("failed to deliver {event} notification: {err}");
    }
}
