use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use updater_core::CoreError;
use updater_core::proto::LogStream;

use super::logs::LogChannel;
use super::state::{ExitOutcome, ServerState};

/// Capacity of the asynchronous error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Own `child` until it exits, or kill it when `kill_rx` fires (or its sender is
/// dropped). The outcome is published on `exit_tx` after the shared state is updated.
pub(crate) fn spawn_exit_monitor(
    mut child: Child,
    generation: u64,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    state: Arc<RwLock<ServerState>>,
    errors: mpsc::Sender<CoreError>,
) {
    tokio::spawn(async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = kill_rx => None,
        };
        let (outcome, killed) = match exited {
            Some(status) => (ExitOutcome::from_wait(status), false),
            None => {
                if let Err(err) = child.start_kill() {
                    warn!("failed to kill server process: {err}");
                }
                (ExitOutcome::from_wait(child.wait().await), true)
            }
        };

        // An exit that `stop` is waiting on is reported by `stop` itself.
        let unattended = state
            .write()
            .await
            .mark_exited(generation)
            .is_some_and(|process| !process.stop_requested);
        if killed {
            info!("server process killed ({})", outcome.description);
        } else if outcome.success {
            info!("server process exited ({})", outcome.description);
        } else {
            warn!("server process exited unexpectedly ({})", outcome.description);
            if unattended {
                let err = CoreError::ProcessExited {
                    status: outcome.description.clone(),
                };
                if errors.try_send(err).is_err() {
                    warn!("error channel full; dropping process exit error");
                }
            }
        }

        let _ = exit_tx.send(Some(outcome));
    });
}

/// Forward each line of `reader` into the log channel until EOF. Invalid UTF-8 is
/// replaced rather than ending the stream, so the pipe never backs up.
pub(crate) fn spawn_output_monitor<R>(reader: R, source: LogStream, logs: LogChannel)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    logs.push(source, line.trim_end_matches(['\r', '\n']));
                }
                Err(err) => {
                    warn!("reading server {source} failed: {err}");
                    break;
                }
            }
        }
        debug!("server {source} closed");
    });
}
