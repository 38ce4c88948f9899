use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-readable error codes. Keep variants append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ServerAlreadyRunning,
    ServerNotRunning,
    MissingExecutable,
    MissingDirectory,
    ForcedShutdown,
    ProcessExited,

    BackupNotFound,
    BackupExists,
    InvalidBackup,

    FilesystemError,
    IoError,
    Busy,
    InvalidConfig,

    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ServerAlreadyRunning => "server_already_running",
            ErrorCode::ServerNotRunning => "server_not_running",
            ErrorCode::MissingExecutable => "missing_executable",
            ErrorCode::MissingDirectory => "missing_directory",
            ErrorCode::ForcedShutdown => "forced_shutdown",
            ErrorCode::ProcessExited => "process_exited",
            ErrorCode::BackupNotFound => "backup_not_found",
            ErrorCode::BackupExists => "backup_exists",
            ErrorCode::InvalidBackup => "invalid_backup",
            ErrorCode::FilesystemError => "filesystem_error",
            ErrorCode::IoError => "io_error",
            ErrorCode::Busy => "busy",
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
