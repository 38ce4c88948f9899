use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::ChildStdin;
use tokio::sync::{Mutex, oneshot, watch};

use updater_core::proto::{ServerStatus, UnixMillis};

/// How a server process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExitOutcome {
    pub(crate) success: bool,
    pub(crate) description: String,
}

impl ExitOutcome {
    pub(crate) fn from_wait(result: std::io::Result<std::process::ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                success: status.success(),
                description: status.to_string(),
            },
            Err(err) => Self {
                success: false,
                description: format!("wait failed: {err}"),
            },
        }
    }

    pub(crate) fn unknown() -> Self {
        Self {
            success: false,
            description: "unknown exit status".to_string(),
        }
    }
}

/// Handles to the currently running process. The child itself is owned by its exit
/// monitor task.
pub(crate) struct ProcessHandle {
    pub(crate) pid: Option<u32>,
    pub(crate) generation: u64,
    pub(crate) stdin: Arc<Mutex<ChildStdin>>,
    pub(crate) kill_tx: Option<oneshot::Sender<()>>,
    pub(crate) exited: watch::Receiver<Option<ExitOutcome>>,
    /// Set once `stop` has taken responsibility for reporting how the process ends.
    pub(crate) stop_requested: bool,
}

impl ProcessHandle {
    pub(crate) fn request_kill(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

pub(crate) struct ServerState {
    pub(crate) status: ServerStatus,
    pub(crate) process: Option<ProcessHandle>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) started_at_ms: Option<UnixMillis>,
    /// Bumped on every start so a stale exit cannot clobber a newer process.
    pub(crate) generation: u64,
}

impl ServerState {
    pub(crate) fn new() -> Self {
        Self {
            status: ServerStatus::Stopped,
            process: None,
            started_at: None,
            started_at_ms: None,
            generation: 0,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.status, ServerStatus::Running) && self.process.is_some()
    }

    pub(crate) fn uptime(&self) -> Duration {
        match (self.is_running(), self.started_at) {
            (true, Some(started)) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn mark_running(&mut self, process: ProcessHandle, started_at_ms: UnixMillis) {
        self.status = ServerStatus::Running;
        self.process = Some(process);
        self.started_at = Some(Instant::now());
        self.started_at_ms = Some(started_at_ms);
    }

    /// The handle for `generation`, if that is still the current process.
    pub(crate) fn current_process(&mut self, generation: u64) -> Option<&mut ProcessHandle> {
        self.process
            .as_mut()
            .filter(|process| process.generation == generation)
    }

    /// Flip to stopped if `generation` is still the current process, returning its handle.
    pub(crate) fn mark_exited(&mut self, generation: u64) -> Option<ProcessHandle> {
        self.current_process(generation)?;
        self.status = ServerStatus::Stopped;
        self.started_at = None;
        self.started_at_ms = None;
        self.process.take()
    }
}
