mod error;
mod event;
mod types;

pub use error::ErrorCode;
pub use event::{Notification, NotifyEvent};
pub use types::{
    BackupInfo, BackupKind, LogEntry, LogStream, ServerInfo, ServerStatus, UnixMillis,
};
