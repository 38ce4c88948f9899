use anyhow::{Context, Result};
use chrono::Local;
use updater_core::proto::{BackupInfo, BackupKind};
use updater_server::UpdaterConfig;

use super::format_size;

pub async fn create(
    config: &UpdaterConfig,
    name: Option<String>,
    kind: Option<BackupKind>,
    plain: bool,
) -> Result<()> {
    let manager = config.build_backups().with_compression(config.backup.compression && !plain);
    let info = manager
        .create_backup(name.as_deref().unwrap_or_default(), kind)
        .await
        .context("backup failed")?;
    println!(
        "Created backup {} ({})",
        info.name,
        format_size(info.size_bytes)
    );
    println!("  {}", info.path.display());
    Ok(())
}

pub async fn list(config: &UpdaterConfig) -> Result<()> {
    let backups = config
        .build_backups()
        .list_backups()
        .await
        .context("failed to list backups")?;
    if backups.is_empty() {
        println!("No backups in {}", config.backup_path.display());
        return Ok(());
    }
    println!("{:<48} {:<12} {:>10}  {}", "NAME", "KIND", "SIZE", "CREATED");
    for backup in &backups {
        println!(
            "{:<48} {:<12} {:>10}  {}",
            backup.name,
            backup.kind,
            format_size(backup.size_bytes),
            created(backup)
        );
    }
    Ok(())
}

pub async fn info(config: &UpdaterConfig, name: &str) -> Result<()> {
    let backup = config
        .build_backups()
        .get_backup_info(name)
        .await
        .with_context(|| format!("failed to look up backup {name}"))?;
    println!("Name:       {}", backup.name);
    println!("Kind:       {}", backup.kind);
    println!("Path:       {}", backup.path.display());
    println!("Size:       {}", format_size(backup.size_bytes));
    println!("Created:    {}", created(&backup));
    println!("Compressed: {}", if backup.is_compressed { "yes" } else { "no" });
    Ok(())
}

pub async fn restore(config: &UpdaterConfig, name: &str) -> Result<()> {
    let backup = config
        .build_backups()
        .restore_backup(name)
        .await
        .with_context(|| format!("failed to restore backup {name}"))?;
    println!(
        "Restored {} into {}",
        backup.name,
        config.server_path.display()
    );
    Ok(())
}

pub async fn delete(config: &UpdaterConfig, name: &str) -> Result<()> {
    config
        .build_backups()
        .delete_backup(name)
        .await
        .with_context(|| format!("failed to delete backup {name}"))?;
    println!("Deleted {name}");
    Ok(())
}

pub async fn validate(config: &UpdaterConfig, name: &str) -> Result<()> {
    config
        .build_backups()
        .validate_backup(name)
        .await
        .with_context(|| format!("backup {name} failed validation"))?;
    println!("Backup {name} is valid");
    Ok(())
}

pub async fn cleanup(config: &UpdaterConfig, days: Option<i64>) -> Result<()> {
    let mut manager = config.build_backups();
    if let Some(days) = days {
        manager.set_retention_days(days);
    }
    if !manager.retention().is_enabled() {
        println!("Retention is disabled; nothing removed");
        return Ok(());
    }
    let deleted = manager
        .cleanup_old_backups()
        .await
        .context("backup cleanup failed")?;
    if deleted.is_empty() {
        println!(
            "No backups older than {} days",
            manager.retention().days
        );
    }
    for name in &deleted {
        println!("Removed {name}");
    }
    Ok(())
}

pub async fn space(config: &UpdaterConfig) -> Result<()> {
    let bytes = config
        .build_backups()
        .backup_space()
        .await
        .context("failed to measure backup directory")?;
    println!(
        "{} used by backups in {}",
        format_size(bytes),
        config.backup_path.display()
    );
    Ok(())
}

fn created(backup: &BackupInfo) -> String {
    backup
        .created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
