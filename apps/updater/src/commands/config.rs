use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use updater_server::UpdaterConfig;

pub fn init(path: &Path) -> Result<()> {
    UpdaterConfig::write_default(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Print server.properties, or merge `KEY=VALUE` pairs into it.
pub fn properties(config: &UpdaterConfig, updates: &[String]) -> Result<()> {
    let server = config.build_server();
    if updates.is_empty() {
        let properties = server
            .server_properties()
            .context("failed to read server.properties")?;
        for (key, value) in properties {
            println!("{key}={value}");
        }
        return Ok(());
    }

    let parsed = parse_updates(updates)?;
    server
        .update_server_properties(&parsed)
        .context("failed to update server.properties")?;
    for (key, value) in &parsed {
        println!("Set {key}={value}");
    }
    Ok(())
}

pub fn server_version(config: &UpdaterConfig) -> Result<()> {
    let version = config
        .build_server()
        .server_version()
        .context("failed to determine server version")?;
    println!("{version}");
    Ok(())
}

fn parse_updates(updates: &[String]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for update in updates {
        let Some((key, value)) = update.split_once('=') else {
            bail!("expected KEY=VALUE, got '{update}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty property name in '{update}'");
        }
        parsed.insert(key.to_string(), value.trim().to_string());
    }
    Ok(parsed)
}
