//! Backup engine: snapshots of the server directory as zip archives or plain copies,
//! plus listing, restore, validation and age-based retention.
//!
//! Filesystem work runs on the blocking pool. Operations that read or replace the
//! server tree hold the directory lock from [`crate::lock`] for their whole duration.

mod ops;
mod restore;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use tokio::task;
use tracing::info;

use updater_core::proto::{BackupInfo, BackupKind};
use updater_core::{CoreError, Result};

pub use ops::should_skip;

/// Directory names never included in a backup.
pub const SKIPPED_DIRS: [&str; 4] = ["logs", "cache", "tmp", "temp"];

/// Age-based retention. Zero or negative days disables cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days: i64,
}

impl RetentionPolicy {
    pub fn days(days: i64) -> Self {
        Self { days }
    }

    pub fn disabled() -> Self {
        Self { days: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.days > 0
    }

    /// Backups created strictly before this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_enabled() {
            return None;
        }
        ChronoDuration::try_days(self.days).and_then(|age| now.checked_sub_signed(age))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(7)
    }
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    server_path: PathBuf,
    backup_path: PathBuf,
    compression: bool,
    retention: RetentionPolicy,
}

impl BackupManager {
    pub fn new(server_path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            server_path: server_path.into(),
            backup_path: backup_path.into(),
            compression: true,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn set_retention_days(&mut self, days: i64) {
        info!("backup retention set to {days} days");
        self.retention = RetentionPolicy::days(days);
    }

    pub fn set_compression(&mut self, enabled: bool) {
        info!("backup compression {}", if enabled { "enabled" } else { "disabled" });
        self.compression = enabled;
    }

    /// Snapshot the server directory. An empty `name` gets a timestamped default; a
    /// kind with a tag appends `_<tag>` to the name.
    pub async fn create_backup(&self, name: &str, kind: Option<BackupKind>) -> Result<BackupInfo> {
        let name = compose_name(name, kind)?;
        self.run_blocking(move |this| this.create_blocking(&name)).await
    }

    pub async fn create_pre_update_backup(&self, version: &str) -> Result<BackupInfo> {
        let name = format!("pre_update_{}_{}", sanitize_label(version), timestamp());
        self.create_backup(&name, Some(BackupKind::PreUpdate)).await
    }

    pub async fn create_post_update_backup(&self, version: &str) -> Result<BackupInfo> {
        let name = format!("post_update_{}_{}", sanitize_label(version), timestamp());
        self.create_backup(&name, Some(BackupKind::PostUpdate)).await
    }

    pub async fn create_manual_backup(&self, label: &str) -> Result<BackupInfo> {
        let label = sanitize_label(label);
        let name = if label.is_empty() {
            format!("manual_{}", timestamp())
        } else {
            format!("manual_{label}_{}", timestamp())
        };
        self.create_backup(&name, Some(BackupKind::Manual)).await
    }

    /// All backups, newest first. An absent backup directory yields an empty list.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.run_blocking(|this| this.list_blocking()).await
    }

    pub async fn get_backup_info(&self, name: &str) -> Result<BackupInfo> {
        let name = name.to_string();
        self.run_blocking(move |this| this.find_blocking(&name)).await
    }

    pub async fn get_latest_backup(&self) -> Result<Option<BackupInfo>> {
        Ok(self.list_backups().await?.into_iter().next())
    }

    /// Replace the server directory with the contents of a backup. The server must be
    /// stopped by the caller.
    pub async fn restore_backup(&self, name: &str) -> Result<BackupInfo> {
        let name = name.to_string();
        self.run_blocking(move |this| this.restore_blocking(&name)).await
    }

    pub async fn delete_backup(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run_blocking(move |this| this.delete_blocking(&name)).await
    }

    /// Delete backups older than the retention window. Returns the removed names.
    pub async fn cleanup_old_backups(&self) -> Result<Vec<String>> {
        self.run_blocking(|this| this.cleanup_blocking(Utc::now())).await
    }

    pub async fn validate_backup(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run_blocking(move |this| this.validate_blocking(&name)).await
    }

    /// Total bytes used by the backup directory.
    pub async fn backup_space(&self) -> Result<u64> {
        self.run_blocking(|this| this.space_blocking()).await
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(BackupManager) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        task::spawn_blocking(move || op(this))
            .await
            .map_err(|err| CoreError::Internal(format!("backup task failed: {err}")))?
    }
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Keep a caller-supplied label usable as part of a file name.
fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

pub(crate) fn compose_name(name: &str, kind: Option<BackupKind>) -> Result<String> {
    let base = name.trim();
    let base = base.strip_suffix(".zip").unwrap_or(base);
    let base = if base.is_empty() {
        format!("backup_{}", timestamp())
    } else {
        base.to_string()
    };
    validate_name(&base)?;
    Ok(match kind.and_then(BackupKind::name_tag) {
        Some(tag) => format!("{base}_{tag}"),
        None => base,
    })
}

/// Rejects names that could leave the backup directory. `..` is caught by the
/// leading-dot rule.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let reason = if name.starts_with('.') {
        Some("names may not start with '.'")
    } else if name.contains(['/', '\\']) {
        Some("names may not contain path separators")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::invalid_backup(name, reason)),
        None => Ok(()),
    }
}

/// Strip an optional `.zip` so lookups accept either spelling.
pub(crate) fn logical_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_suffix(".zip").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_get_kind_tags() {
        assert_eq!(
            compose_name("nightly", Some(BackupKind::PreUpdate)).unwrap(),
            "nightly_pre_update"
        );
        assert_eq!(compose_name("nightly.zip", None).unwrap(), "nightly");
        assert_eq!(
            compose_name("world", Some(BackupKind::Automatic)).unwrap(),
            "world"
        );
        assert!(compose_name("", None).unwrap().starts_with("backup_"));
    }

    #[test]
    fn unsafe_names_are_rejected() {
        for name in ["../escape", "a/b", ".hidden", "x\\y"] {
            let err = compose_name(name, None).unwrap_err();
            assert!(matches!(err, CoreError::InvalidBackup { .. }), "{name}");
        }
    }

    #[test]
    fn dotted_versions_are_allowed() {
        assert_eq!(
            compose_name("pre_update_1.20..rc_20240101_120000", Some(BackupKind::PreUpdate))
                .unwrap(),
            "pre_update_1.20..rc_20240101_120000_pre_update"
        );
        assert!(compose_name("..", None).is_err());
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_label(" 1.20 / snapshot "), "1.20___snapshot");
        assert_eq!(logical_name("manual_x.zip"), "manual_x");
    }

    #[test]
    fn retention_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let cutoff = RetentionPolicy::days(7).cutoff(now).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap());
        assert!(RetentionPolicy::days(0).cutoff(now).is_none());
        assert!(RetentionPolicy::days(-3).cutoff(now).is_none());
    }
}
