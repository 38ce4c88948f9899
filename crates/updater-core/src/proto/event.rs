use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    BackupCreated,
    BackupFailed,
    BackupRestored,
    ServerStarted,
    ServerStopped,
    UpdateStarted,
    UpdateCompleted,
    UpdateFailed,
}

impl NotifyEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyEvent::BackupCreated => "backup_created",
            NotifyEvent::BackupFailed => "backup_failed",
            NotifyEvent::BackupRestored => "backup_restored",
            NotifyEvent::ServerStarted => "server_started",
            NotifyEvent::ServerStopped => "server_stopped",
            NotifyEvent::UpdateStarted => "update_started",
            NotifyEvent::UpdateCompleted => "update_completed",
            NotifyEvent::UpdateFailed => "update_failed",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, NotifyEvent::BackupFailed | NotifyEvent::UpdateFailed)
    }
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status message handed to a notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotifyEvent,
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(event: NotifyEvent, message: impl Into<String>) -> Self {
        Self {
            event,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.data.insert(key.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_event_and_data() {
        let note = Notification::new(NotifyEvent::BackupCreated, "backup done")
            .with("name", "nightly")
            .with("size_bytes", 42);
        let json = serde_json::to_value(&note).expect("serialize notification");
        assert_eq!(json["event"], "backup_created");
        assert_eq!(json["data"]["size_bytes"], "42");
    }
}
