use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub type UnixMillis = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of server output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at_ms: UnixMillis,
    pub source: LogStream,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum ServerStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_path: PathBuf,
    pub jar_name: String,
    pub running: bool,
    pub uptime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Automatic,
    Manual,
    PreUpdate,
    PostUpdate,
}

impl BackupKind {
    /// Suffix appended to a backup name (`<name>_<tag>`). Automatic backups carry no tag.
    pub fn name_tag(self) -> Option<&'static str> {
        match self {
            BackupKind::Automatic => None,
            BackupKind::Manual => Some("manual"),
            BackupKind::PreUpdate => Some("pre_update"),
            BackupKind::PostUpdate => Some("post_update"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Automatic => "automatic",
            BackupKind::Manual => "manual",
            BackupKind::PreUpdate => "pre-update",
            BackupKind::PostUpdate => "post-update",
        }
    }

    /// Infer the kind from a stored backup name. Tags may appear anywhere in the name.
    pub fn from_backup_name(name: &str) -> Self {
        for kind in [BackupKind::PreUpdate, BackupKind::PostUpdate, BackupKind::Manual] {
            if let Some(tag) = kind.name_tag() {
                if has_tag(name, tag) {
                    return kind;
                }
            }
        }
        BackupKind::Automatic
    }
}

fn has_tag(name: &str, tag: &str) -> bool {
    name.contains(&format!("_{tag}")) || name.contains(&format!("_{}", tag.replace('_', "-")))
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(BackupKind::Automatic),
            "manual" => Ok(BackupKind::Manual),
            "pre-update" | "pre_update" => Ok(BackupKind::PreUpdate),
            "post-update" | "post_update" => Ok(BackupKind::PostUpdate),
            other => Err(format!(
                "unknown backup kind '{other}' (expected automatic, manual, pre-update or post-update)"
            )),
        }
    }
}

/// View of one stored backup, recomputed from the filesystem on every listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup name without the `.zip` extension.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub is_compressed: bool,
    pub kind: BackupKind,
}
