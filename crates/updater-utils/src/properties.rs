//! `server.properties` helpers: plain `key=value` lines, `#` comments and blanks ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use updater_core::{CoreError, Result};

use crate::atomic_write;

pub const PROPERTIES_FILE: &str = "server.properties";

pub fn properties_path(server_dir: &Path) -> PathBuf {
    server_dir.join(PROPERTIES_FILE)
}

pub fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    properties
}

pub fn get_property(contents: &str, key: &str) -> Option<String> {
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((k, value)) = trimmed.split_once('=') {
            if k.trim() == key {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Replace `key` in place if present, otherwise append it. Comments are kept.
pub fn set_property(contents: &str, key: &str, value: &str) -> String {
    let mut lines = Vec::new();
    let mut replaced = false;
    for line in contents.lines() {
        let trimmed = line.trim_start();
        let matches_key = !trimmed.starts_with('#')
            && trimmed
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key);
        if matches_key {
            lines.push(format!("{key}={value}"));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(format!("{key}={value}"));
    }
    format!("{}\n", lines.join("\n"))
}

pub fn read_properties(server_dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = properties_path(server_dir);
    let contents =
        fs::read_to_string(&path).map_err(|err| CoreError::fs("read", &path, err))?;
    Ok(parse_properties(&contents))
}

/// Merge `updates` into the server's properties file, creating it if missing.
pub fn update_properties(server_dir: &Path, updates: &BTreeMap<String, String>) -> Result<()> {
    let path = properties_path(server_dir);
    let mut contents = match fs::read_to_string(&path) {
        Ok(value) => value,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(CoreError::fs("read", &path, err)),
    };
    for (key, value) in updates {
        contents = set_property(&contents, key, value);
    }
    atomic_write(&path, contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "#Minecraft server properties\n\nmotd=A Server\nmax-players = 20\nlevel-name=world\n";

    #[test]
    fn parse_skips_comments_and_trims() {
        let props = parse_properties(SAMPLE);
        assert_eq!(props.len(), 3);
        assert_eq!(props["max-players"], "20");
        assert_eq!(get_property(SAMPLE, "motd").as_deref(), Some("A Server"));
        assert_eq!(get_property(SAMPLE, "missing"), None);
    }

    #[test]
    fn set_property_replaces_in_place_and_appends_new_keys() {
        let updated = set_property(SAMPLE, "max-players", "40");
        let updated = set_property(&updated, "white-list", "true");
        assert!(updated.starts_with("#Minecraft server properties\n"));
        assert!(updated.contains("max-players=40\n"));
        assert!(!updated.contains("max-players = 20"));
        assert!(updated.ends_with("white-list=true\n"));
    }

    #[test]
    fn update_properties_merges_on_disk() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PROPERTIES_FILE), SAMPLE).unwrap();

        let updates = BTreeMap::from([
            ("motd".to_string(), "Updated".to_string()),
            ("difficulty".to_string(), "hard".to_string()),
        ]);
        update_properties(tmp.path(), &updates).unwrap();

        let props = read_properties(tmp.path()).unwrap();
        assert_eq!(props["motd"], "Updated");
        assert_eq!(props["difficulty"], "hard");
        assert_eq!(props["level-name"], "world");
    }

    #[test]
    fn update_properties_creates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let updates = BTreeMap::from([("online-mode".to_string(), "false".to_string())]);
        update_properties(tmp.path(), &updates).unwrap();
        assert_eq!(read_properties(tmp.path()).unwrap()["online-mode"], "false");
    }
}
