//! Update orchestration: back up, stop, apply, start, back up again, and roll back to
//! the pre-update snapshot if any step after the first backup fails.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use updater_core::proto::{BackupInfo, Notification, NotifyEvent};
use updater_core::{CoreError, Result};

use crate::backup::BackupManager;
use crate::notify::{Notifier, notify_best_effort};
use crate::supervisor::MinecraftServer;

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub stop_timeout: Duration,
    /// Minutes of in-game warning before stopping. Zero skips the countdown.
    pub countdown_minutes: u32,
    pub restore_on_failure: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(60),
            countdown_minutes: 0,
            restore_on_failure: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub version: String,
    pub pre_update: BackupInfo,
    /// `None` if the post-update backup failed; the update itself still succeeded.
    pub post_update: Option<BackupInfo>,
    pub restarted: bool,
}

/// Run `apply` against a stopped server. A server that was running beforehand is
/// started again afterwards; a stopped one is left stopped.
pub async fn run_update<F, Fut>(
    server: &MinecraftServer,
    backups: &BackupManager,
    notifier: &dyn Notifier,
    version: &str,
    options: &UpdateOptions,
    apply: F,
) -> Result<UpdateReport>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!("starting update to {version}");
    notify_best_effort(
        notifier,
        Notification::new(NotifyEvent::UpdateStarted, format!("updating server to {version}"))
            .with("version", version),
    )
    .await;

    let was_running = server.is_running().await;
    if was_running {
        if let Err(err) = server.save_world().await {
            warn!("save-all before backup failed: {err}");
        }
    }

    let pre_update = match backups.create_pre_update_backup(version).await {
        Ok(info) => {
            notify_backup_created(notifier, &info).await;
            info
        }
        Err(err) => {
            notify_best_effort(
                notifier,
                Notification::new(NotifyEvent::BackupFailed, "pre-update backup failed")
                    .with("error", &err),
            )
            .await;
            notify_update_failed(notifier, version, &err).await;
            return Err(err);
        }
    };

    if let Err(err) = apply_update(server, notifier, options, was_running, apply).await {
        error!("update to {version} failed: {err}");
        if options.restore_on_failure {
            roll_back(server, backups, notifier, &pre_update, was_running).await;
        }
        notify_update_failed(notifier, version, &err).await;
        return Err(err);
    }

    let post_update = match backups.create_post_update_backup(version).await {
        Ok(info) => {
            notify_backup_created(notifier, &info).await;
            Some(info)
        }
        Err(err) => {
            warn!("post-update backup failed: {err}");
            notify_best_effort(
                notifier,
                Notification::new(NotifyEvent::BackupFailed, "post-update backup failed")
                    .with("error", &err),
            )
            .await;
            None
        }
    };

    info!("update to {version} completed");
    notify_best_effort(
        notifier,
        Notification::new(NotifyEvent::UpdateCompleted, format!("server updated to {version}"))
            .with("version", version),
    )
    .await;

    Ok(UpdateReport {
        version: version.to_string(),
        pre_update,
        post_update,
        restarted: was_running,
    })
}

async fn apply_update<F, Fut>(
    server: &MinecraftServer,
    notifier: &dyn Notifier,
    options: &UpdateOptions,
    was_running: bool,
    apply: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if was_running {
        if options.countdown_minutes > 0 {
            if let Err(err) = server
                .notify_players_before_shutdown(options.countdown_minutes)
                .await
            {
                warn!("shutdown countdown interrupted: {err}");
            }
        }
        if let Err(err) = server.stop(options.stop_timeout).await {
            if server.is_running().await {
                return Err(err);
            }
            warn!("server stopped uncleanly: {err}");
        }
        notify_best_effort(
            notifier,
            Notification::new(NotifyEvent::ServerStopped, "server stopped for update"),
        )
        .await;
    }

    apply().await?;

    if was_running {
        server.start().await?;
        notify_best_effort(
            notifier,
            Notification::new(NotifyEvent::ServerStarted, "server started after update"),
        )
        .await;
    }
    Ok(())
}

async fn roll_back(
    server: &MinecraftServer,
    backups: &BackupManager,
    notifier: &dyn Notifier,
    pre_update: &BackupInfo,
    was_running: bool,
) {
    warn!("rolling back to {}", pre_update.name);
    if server.is_running().await {
        if let Err(err) = server.stop(Duration::from_secs(30)).await {
            warn!("stopping server for rollback: {err}");
        }
    }

    match backups.restore_backup(&pre_update.name).await {
        Ok(_) => {
            notify_best_effort(
                notifier,
                Notification::new(NotifyEvent::BackupRestored, "restored pre-update backup")
                    .with("name", &pre_update.name),
            )
            .await;
        }
        Err(err) => {
            error!("rollback restore of {} failed: {err}", pre_update.name);
            return;
        }
    }

    if was_running {
        match server.start().await {
            Ok(()) => {
                notify_best_effort(
                    notifier,
                    Notification::new(NotifyEvent::ServerStarted, "server started after rollback"),
                )
                .await;
            }
            Err(err) => error!("server did not start after rollback: {err}"),
        }
    }
}

async fn notify_backup_created(notifier: &dyn Notifier, info: &BackupInfo) {
    notify_best_effort(
        notifier,
        Notification::new(NotifyEvent::BackupCreated, format!("backup {} created", info.name))
            .with("name", &info.name)
            .with("kind", info.kind)
            .with("size_bytes", info.size_bytes),
    )
    .await;
}

async fn notify_update_failed(notifier: &dyn Notifier, version: &str, err: &CoreError) {
    notify_best_effort(
        notifier,
        Notification::new(NotifyEvent::UpdateFailed, format!("update to {version} failed"))
            .with("version", version)
            .with("error", err)
            .with("code", err.code()),
    )
    .await;
}
