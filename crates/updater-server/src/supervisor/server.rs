use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, MutexGuard, RwLock, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use updater_core::proto::{LogStream, ServerInfo, ServerStatus};
use updater_core::{CoreError, Result};
use updater_utils::{dir_exists, file_exists, now_millis};

use super::logs::{LOG_CHANNEL_CAPACITY, LogChannel};
use super::monitor::{ERROR_CHANNEL_CAPACITY, spawn_exit_monitor, spawn_output_monitor};
use super::state::{ExitOutcome, ProcessHandle, ServerState};

const LIFECYCLE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(10);
const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(2);
pub(crate) const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(60);

/// How the JVM is invoked: `<java> -Xmx<max> -Xms<min> -jar <jar> nogui`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub java_path: PathBuf,
    pub max_memory: String,
    pub min_memory: String,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            java_path: PathBuf::from("java"),
            max_memory: "2G".to_string(),
            min_memory: "1G".to_string(),
        }
    }
}

impl LaunchOptions {
    pub fn args(&self, jar_name: &str) -> Vec<String> {
        vec![
            format!("-Xmx{}", self.max_memory),
            format!("-Xms{}", self.min_memory),
            "-jar".to_string(),
            jar_name.to_string(),
            "nogui".to_string(),
        ]
    }
}

/// Supervises one Minecraft server process: start, graceful stop with a forced
/// fallback, console commands over stdin, and output capture.
pub struct MinecraftServer {
    server_path: PathBuf,
    jar_name: String,
    launch: LaunchOptions,
    state: Arc<RwLock<ServerState>>,
    // Serializes start/stop/restart.
    lifecycle_lock: Mutex<()>,
    logs: LogChannel,
    errors_tx: mpsc::Sender<CoreError>,
    errors_rx: Mutex<mpsc::Receiver<CoreError>>,
    pub(crate) countdown_interval: Duration,
    restart_delay: Duration,
}

impl MinecraftServer {
    pub fn new(server_path: impl Into<PathBuf>, jar_name: impl Into<String>) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            server_path: server_path.into(),
            jar_name: jar_name.into(),
            launch: LaunchOptions::default(),
            state: Arc::new(RwLock::new(ServerState::new())),
            lifecycle_lock: Mutex::new(()),
            logs: LogChannel::new(LOG_CHANNEL_CAPACITY),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
            countdown_interval: COUNTDOWN_INTERVAL,
            restart_delay: RESTART_SETTLE_DELAY,
        }
    }

    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    /// Spacing between shutdown countdown broadcasts.
    pub fn with_countdown_interval(mut self, interval: Duration) -> Self {
        self.countdown_interval = interval;
        self
    }

    /// Pause between the stop and start halves of a restart.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    pub fn jar_name(&self) -> &str {
        &self.jar_name
    }

    pub fn jar_path(&self) -> PathBuf {
        self.server_path.join(&self.jar_name)
    }

    pub fn launch_options(&self) -> &LaunchOptions {
        &self.launch
    }

    /// Server output, stdout and stderr interleaved in arrival order.
    pub fn logs(&self) -> LogChannel {
        self.logs.clone()
    }

    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle_guard().await?;
        self.start_locked().await
    }

    /// Ask the server to stop, and kill it if it has not exited within `timeout`.
    /// A kill still leaves the server stopped, but returns [`CoreError::ForcedShutdown`].
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let _lifecycle = self.lifecycle_guard().await?;
        self.stop_locked(timeout).await
    }

    /// Stop (if running), wait briefly, start again.
    pub async fn restart(&self, timeout: Duration) -> Result<()> {
        let _lifecycle = self.lifecycle_guard().await?;
        if self.is_running().await {
            if let Err(err) = self.stop_locked(timeout).await {
                if self.is_running().await {
                    return Err(err);
                }
                warn!("restarting after unclean stop: {err}");
            }
            tokio::time::sleep(self.restart_delay).await;
        }
        self.start_locked().await
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_running()
    }

    pub async fn status(&self) -> ServerStatus {
        self.state.read().await.status
    }

    pub async fn uptime(&self) -> Duration {
        self.state.read().await.uptime()
    }

    pub async fn pid(&self) -> Option<u32> {
        let state = self.state.read().await;
        state.process.as_ref().and_then(|process| process.pid)
    }

    pub async fn info(&self) -> ServerInfo {
        let state = self.state.read().await;
        ServerInfo {
            server_path: self.server_path.clone(),
            jar_name: self.jar_name.clone(),
            running: state.is_running(),
            uptime: state.uptime(),
        }
    }

    /// Write one console command line to the server's stdin.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let stdin = self.current_stdin().await?;
        let command = command.trim_end_matches(['\r', '\n']);
        debug!("sending command: {command}");
        write_line(&stdin, command).await
    }

    /// Resolve once the current process has exited. Returns at once if nothing runs.
    pub async fn wait_for_shutdown(&self) {
        let exited = {
            let state = self.state.read().await;
            state.process.as_ref().map(|process| process.exited.clone())
        };
        if let Some(mut exited) = exited {
            wait_for_exit(&mut exited).await;
        }
    }

    /// Next asynchronous error (for example an unexpected process exit), waiting for one.
    /// The receiver is held for the whole wait, so a concurrent [`try_next_error`]
    /// sees nothing until this returns.
    ///
    /// [`try_next_error`]: MinecraftServer::try_next_error
    pub async fn next_error(&self) -> Option<CoreError> {
        self.errors_rx.lock().await.recv().await
    }

    /// Next asynchronous error if one is queued. Returns `None` while another task is
    /// parked in [`next_error`](MinecraftServer::next_error), even if errors are queued;
    /// use one of the two per server.
    pub fn try_next_error(&self) -> Option<CoreError> {
        self.errors_rx.try_lock().ok()?.try_recv().ok()
    }

    async fn lifecycle_guard(&self) -> Result<MutexGuard<'_, ()>> {
        tokio::time::timeout(LIFECYCLE_LOCK_TIMEOUT, self.lifecycle_lock.lock())
            .await
            .map_err(|_| CoreError::Busy("another lifecycle operation in progress".into()))
    }

    async fn start_locked(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_running() {
            return Err(CoreError::AlreadyRunning);
        }
        if !dir_exists(&self.server_path) {
            return Err(CoreError::MissingDirectory(self.server_path.clone()));
        }
        let jar = self.jar_path();
        if !file_exists(&jar) {
            return Err(CoreError::MissingExecutable(jar));
        }

        let mut cmd = Command::new(&self.launch.java_path);
        cmd.args(self.launch.args(&self.jar_name))
            .current_dir(&self.server_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| CoreError::io("spawning server process", err))?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::Internal("server stdin was not piped".into()))?;
        if let Some(stdout) = child.stdout.take() {
            spawn_output_monitor(stdout, LogStream::Stdout, self.logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_monitor(stderr, LogStream::Stderr, self.logs.clone());
        }

        state.generation += 1;
        let generation = state.generation;
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        spawn_exit_monitor(
            child,
            generation,
            kill_rx,
            exit_tx,
            self.state.clone(),
            self.errors_tx.clone(),
        );

        state.mark_running(
            ProcessHandle {
                pid,
                generation,
                stdin: Arc::new(Mutex::new(stdin)),
                kill_tx: Some(kill_tx),
                exited: exit_rx,
                stop_requested: false,
            },
            now_millis(),
        );
        info!(
            "server started: pid={} jar={} dir={}",
            pid.map(|pid| pid.to_string()).unwrap_or_else(|| "?".into()),
            self.jar_name,
            self.server_path.display()
        );
        Ok(())
    }

    async fn stop_locked(&self, timeout: Duration) -> Result<()> {
        let (mut exited, stdin, generation) = {
            let mut state = self.state.write().await;
            if !state.is_running() {
                return Err(CoreError::NotRunning);
            }
            match state.process.as_mut() {
                Some(process) => {
                    process.stop_requested = true;
                    (
                        process.exited.clone(),
                        process.stdin.clone(),
                        process.generation,
                    )
                }
                None => return Err(CoreError::NotRunning),
            }
        };

        info!("stopping server (timeout {timeout:?})");
        if let Err(err) = write_line(&stdin, "stop").await {
            warn!("failed to send stop command: {err}");
        }

        if let Ok(outcome) = tokio::time::timeout(timeout, wait_for_exit(&mut exited)).await {
            self.ensure_stopped(generation).await;
            return exit_result(outcome);
        }

        let kill_sent = {
            let mut state = self.state.write().await;
            state
                .current_process(generation)
                .is_some_and(|process| process.request_kill())
        };
        if kill_sent {
            warn!("server did not stop within {timeout:?}; killing it");
        } else {
            debug!("server exited as the stop timeout fired");
        }
        let waited = tokio::time::timeout(KILL_GRACE, wait_for_exit(&mut exited))
            .await
            .ok();
        if waited.is_none() {
            warn!("server process did not report exit after kill");
        }
        self.ensure_stopped(generation).await;
        timed_out_stop_result(waited, kill_sent, timeout)
    }

    /// The exit monitor normally does this; covers a monitor that died.
    async fn ensure_stopped(&self, generation: u64) {
        let mut state = self.state.write().await;
        if state.mark_exited(generation).is_some() {
            debug!("marked server stopped after exit");
        }
    }

    async fn current_stdin(&self) -> Result<Arc<Mutex<ChildStdin>>> {
        let state = self.state.read().await;
        match state.process.as_ref().filter(|_| state.is_running()) {
            Some(process) => Ok(process.stdin.clone()),
            None => Err(CoreError::NotRunning),
        }
    }
}

impl Drop for MinecraftServer {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_write() {
            if let Some(process) = state.process.as_mut() {
                process.request_kill();
            }
        }
    }
}

fn exit_result(outcome: ExitOutcome) -> Result<()> {
    if outcome.success {
        info!("server stopped");
        Ok(())
    } else {
        Err(CoreError::ProcessExited {
            status: outcome.description,
        })
    }
}

/// Result of a stop whose timeout elapsed. Only a kill we actually sent counts as
/// forced; a process that exited on its own in the meantime reports its own status.
fn timed_out_stop_result(
    waited: Option<ExitOutcome>,
    kill_sent: bool,
    timeout: Duration,
) -> Result<()> {
    match waited {
        Some(outcome) if !kill_sent => exit_result(outcome),
        _ => Err(CoreError::ForcedShutdown { timeout }),
    }
}

async fn write_line(stdin: &Mutex<ChildStdin>, line: &str) -> Result<()> {
    let mut stdin = stdin.lock().await;
    stdin
        .write_all(format!("{line}\n").as_bytes())
        .await
        .map_err(|err| CoreError::io("writing to server stdin", err))?;
    stdin
        .flush()
        .await
        .map_err(|err| CoreError::io("flushing server stdin", err))
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<ExitOutcome>>) -> ExitOutcome {
    match exited.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or_else(ExitOutcome::unknown),
        Err(_) => ExitOutcome::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn launch_args_follow_jvm_conventions() {
        let launch = LaunchOptions {
            max_memory: "4G".into(),
            min_memory: "512M".into(),
            ..LaunchOptions::default()
        };
        assert_eq!(
            launch.args("paper.jar"),
            ["-Xmx4G", "-Xms512M", "-jar", "paper.jar", "nogui"]
        );
    }

    #[test]
    fn timed_out_stop_without_kill_reports_real_exit() {
        let timeout = Duration::from_secs(1);
        let clean = ExitOutcome {
            success: true,
            description: "exit status: 0".into(),
        };
        let failed = ExitOutcome {
            success: false,
            description: "exit status: 5".into(),
        };

        assert!(timed_out_stop_result(Some(clean.clone()), false, timeout).is_ok());
        assert!(matches!(
            timed_out_stop_result(Some(failed), false, timeout),
            Err(CoreError::ProcessExited { status }) if status == "exit status: 5"
        ));
        assert!(matches!(
            timed_out_stop_result(Some(clean), true, timeout),
            Err(CoreError::ForcedShutdown { .. })
        ));
        assert!(matches!(
            timed_out_stop_result(None, false, timeout),
            Err(CoreError::ForcedShutdown { .. })
        ));
    }

    #[tokio::test]
    async fn start_requires_directory_and_jar() {
        let tmp = TempDir::new().unwrap();
        let missing = MinecraftServer::new(tmp.path().join("absent"), "server.jar");
        assert!(matches!(
            missing.start().await,
            Err(CoreError::MissingDirectory(_))
        ));

        let no_jar = MinecraftServer::new(tmp.path(), "server.jar");
        assert!(matches!(
            no_jar.start().await,
            Err(CoreError::MissingExecutable(path)) if path.ends_with("server.jar")
        ));
        assert!(!no_jar.is_running().await);
    }

    #[tokio::test]
    async fn stopped_server_rejects_commands() {
        let tmp = TempDir::new().unwrap();
        let server = MinecraftServer::new(tmp.path(), "server.jar");
        assert!(matches!(
            server.stop(Duration::from_secs(1)).await,
            Err(CoreError::NotRunning)
        ));
        assert!(matches!(
            server.send_command("list").await,
            Err(CoreError::NotRunning)
        ));
        assert_eq!(server.uptime().await, Duration::ZERO);
        assert!(server.try_next_error().is_none());

        let info = server.info().await;
        assert!(!info.running);
        assert_eq!(info.jar_name, "server.jar");
    }
}
