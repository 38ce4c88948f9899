use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use updater_core::{CoreError, Result};
use updater_utils::is_sub_path;

use crate::backup::{BackupManager, RetentionPolicy};
use crate::supervisor::{LaunchOptions, MinecraftServer};

/// File names tried in the working directory, in order.
pub const CONFIG_CANDIDATES: [&str; 3] = ["config.toml", "mc-updater.toml", ".mc-updater.toml"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub server_path: PathBuf,
    pub backup_path: PathBuf,
    pub server_jar_name: String,
    pub java_path: PathBuf,
    pub max_memory: String,
    pub min_memory: String,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub compression: bool,
    pub retention_days: i64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            server_path: PathBuf::from("./server"),
            backup_path: PathBuf::from("./backups"),
            server_jar_name: "server.jar".to_string(),
            java_path: PathBuf::from("java"),
            max_memory: "2G".to_string(),
            min_memory: "1G".to_string(),
            shutdown_timeout_secs: 60,
            log_level: "info".to_string(),
            backup: BackupConfig::default(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compression: true,
            retention_days: 7,
        }
    }
}

impl UpdaterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| CoreError::fs("read config", path, err))?;
        Self::from_toml(&content)
            .map_err(|err| CoreError::InvalidConfig(format!("{}: {err}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|err| CoreError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit path if given, else the first candidate that exists, else
    /// defaults. Returns the file actually used.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let candidates = CONFIG_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .chain(user_config_path());
        for candidate in candidates {
            if candidate.is_file() {
                debug!("using config {}", candidate.display());
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }
        debug!("no config file found; using defaults");
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig("server_path must not be empty".into()));
        }
        if self.backup_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig("backup_path must not be empty".into()));
        }
        if is_sub_path(&self.server_path, &self.backup_path) {
            return Err(CoreError::InvalidConfig(
                "backup_path must not be inside server_path".into(),
            ));
        }
        if self.server_jar_name.trim().is_empty() {
            return Err(CoreError::InvalidConfig("server_jar_name must not be empty".into()));
        }
        if self.java_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig("java_path must not be empty".into()));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "shutdown_timeout_secs must be greater than zero".into(),
            ));
        }
        for (key, value) in [("max_memory", &self.max_memory), ("min_memory", &self.min_memory)] {
            if !is_memory_size(value) {
                return Err(CoreError::InvalidConfig(format!(
                    "{key} must look like 512M or 2G, got '{value}'"
                )));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            java_path: self.java_path.clone(),
            max_memory: self.max_memory.clone(),
            min_memory: self.min_memory.clone(),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.backup.retention_days)
    }

    pub fn build_server(&self) -> MinecraftServer {
        MinecraftServer::new(&self.server_path, self.server_jar_name.clone())
            .with_launch_options(self.launch_options())
    }

    pub fn build_backups(&self) -> BackupManager {
        BackupManager::new(&self.server_path, &self.backup_path)
            .with_compression(self.backup.compression)
            .with_retention(self.retention())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| CoreError::Internal(err.to_string()))
    }

    /// Scaffold a config file with default values. Refuses to overwrite.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(CoreError::InvalidConfig(format!(
                "{} already exists",
                path.display()
            )));
        }
        let content = Self::default().to_toml()?;
        updater_utils::atomic_write(path, content.as_bytes())
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("mc-updater").join("config.toml"))
}

fn is_memory_size(value: &str) -> bool {
    let digits = value.strip_suffix(['K', 'k', 'M', 'm', 'G', 'g']).unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = UpdaterConfig::from_toml(
            r#"
server_path = "/srv/mc"
max_memory = "6G"

[backup]
retention_days = 14
"#,
        )
        .unwrap();
        assert_eq!(config.server_path, PathBuf::from("/srv/mc"));
        assert_eq!(config.backup_path, PathBuf::from("./backups"));
        assert_eq!(config.max_memory, "6G");
        assert!(config.backup.compression);
        assert_eq!(config.retention().days, 14);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = UpdaterConfig::default();
        config.shutdown_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let mut config = UpdaterConfig::default();
        config.server_jar_name = " ".into();
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.backup_path = config.server_path.join("backups");
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.max_memory = "lots".into();
        assert!(config.validate().is_err());

        assert!(UpdaterConfig::from_toml("shutdown_timeout_secs = \"soon\"").is_err());
    }

    #[test]
    fn memory_sizes() {
        assert!(is_memory_size("2G"));
        assert!(is_memory_size("512m"));
        assert!(is_memory_size("1024"));
        assert!(!is_memory_size("G"));
        assert!(!is_memory_size("2GB"));
    }

    #[test]
    fn write_default_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mc-updater.toml");
        UpdaterConfig::write_default(&path).unwrap();
        assert!(UpdaterConfig::write_default(&path).is_err());

        let (loaded, used) = UpdaterConfig::discover(Some(&path)).unwrap();
        assert_eq!(loaded, UpdaterConfig::default());
        assert_eq!(used.as_deref(), Some(path.as_path()));
    }
}
