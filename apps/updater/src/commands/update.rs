use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use updater_core::CoreError;
use updater_server::{TracingNotifier, UpdateOptions, UpdaterConfig, run_update};

use super::format_size;

/// Install `jar` as the server jar, bracketed by pre- and post-update backups.
pub async fn exec(config: &UpdaterConfig, version: &str, jar: PathBuf, countdown: u32) -> Result<()> {
    if !jar.is_file() {
        bail!("{} is not a file", jar.display());
    }
    let server = config.build_server();
    let backups = config.build_backups();
    let options = UpdateOptions {
        stop_timeout: config.shutdown_timeout(),
        countdown_minutes: countdown,
        restore_on_failure: true,
    };

    let target = server.jar_path();
    let report = run_update(&server, &backups, &TracingNotifier, version, &options, || async move {
        tokio::fs::copy(&jar, &target)
            .await
            .map(|_| ())
            .map_err(|err| CoreError::fs("install server jar", &target, err))
    })
    .await
    .with_context(|| format!("update to {version} failed"))?;

    println!("Updated server to {}", report.version);
    println!(
        "  pre-update backup:  {} ({})",
        report.pre_update.name,
        format_size(report.pre_update.size_bytes)
    );
    match &report.post_update {
        Some(post) => println!(
            "  post-update backup: {} ({})",
            post.name,
            format_size(post.size_bytes)
        ),
        None => println!("  post-update backup: failed, see log"),
    }
    Ok(())
}
