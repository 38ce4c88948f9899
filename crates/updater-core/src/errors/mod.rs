use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::proto::ErrorCode;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("server jar not found: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("server directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("server did not stop gracefully within {timeout:?}, killed")]
    ForcedShutdown { timeout: Duration },

    #[error("server process exited with {status}")]
    ProcessExited { status: String },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("backup already exists: {0}")]
    BackupExists(String),

    #[error("backup {name} appears to be invalid: {reason}")]
    InvalidBackup { name: String, reason: String },

    #[error("failed to {op} {}: {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn invalid_backup(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBackup {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Map internal errors -> stable codes.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::AlreadyRunning => ErrorCode::ServerAlreadyRunning,
            CoreError::NotRunning => ErrorCode::ServerNotRunning,
            CoreError::MissingExecutable(_) => ErrorCode::MissingExecutable,
            CoreError::MissingDirectory(_) => ErrorCode::MissingDirectory,
            CoreError::ForcedShutdown { .. } => ErrorCode::ForcedShutdown,
            CoreError::ProcessExited { .. } => ErrorCode::ProcessExited,
            CoreError::BackupNotFound(_) => ErrorCode::BackupNotFound,
            CoreError::BackupExists(_) => ErrorCode::BackupExists,
            CoreError::InvalidBackup { .. } => ErrorCode::InvalidBackup,
            CoreError::Filesystem { .. } => ErrorCode::FilesystemError,
            CoreError::Io { .. } => ErrorCode::IoError,
            CoreError::Busy(_) => ErrorCode::Busy,
            CoreError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            CoreError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_error_names_operation_and_path() {
        let err = CoreError::fs(
            "remove directory",
            "/srv/minecraft",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("remove directory"));
        assert!(message.contains("/srv/minecraft"));
        assert_eq!(err.code(), ErrorCode::FilesystemError);
    }

    #[test]
    fn forced_shutdown_reports_timeout() {
        let err = CoreError::ForcedShutdown {
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30s"));
        assert_eq!(err.code().as_str(), "forced_shutdown");
    }
}
