#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tempfile::TempDir;
use updater_core::CoreError;
use updater_core::proto::{LogStream, ServerStatus};
use updater_server::{LaunchOptions, LogChannel, MinecraftServer};

const WAIT: Duration = Duration::from_secs(10);

/// Exits when it reads `stop`, echoes everything else.
const COOPERATIVE: &str = r#"#!/bin/sh
echo "Starting minecraft server $*"
echo "loading libraries" >&2
while IFS= read -r line; do
  case "$line" in
    stop) echo "Stopping server"; exit 0 ;;
    *) echo "got: $line" ;;
  esac
done
"#;

/// Ignores `stop`; only a kill ends it.
const STUBBORN: &str = r#"#!/bin/sh
echo "Starting stubborn server"
while IFS= read -r line; do
  echo "ignoring: $line"
done
sleep 600
"#;

const CRASHING: &str = r#"#!/bin/sh
echo "Starting doomed server"
sleep 1
exit 3
"#;

/// Exits with status 5 when asked to stop.
const FAILING_STOP: &str = r#"#!/bin/sh
while IFS= read -r line; do
  [ "$line" = stop ] && exit 5
done
"#;

/// Prints 1000 lines as fast as it can, then waits for `stop`.
const FLOOD: &str = r#"#!/bin/sh
i=1
while [ "$i" -le 1000 ]; do
  echo "line $i"
  i=$((i + 1))
done
while IFS= read -r line; do
  [ "$line" = stop ] && exit 0
done
"#;

/// Fake `java` binaries, written once before any test spawns a process.
fn scripts() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().expect("script dir").keep();
        for (name, body) in [
            ("cooperative", COOPERATIVE),
            ("stubborn", STUBBORN),
            ("crashing", CRASHING),
            ("failing-stop", FAILING_STOP),
            ("flood", FLOOD),
        ] {
            let path = dir.join(name);
            fs::write(&path, body).expect("write script");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        }
        dir
    })
}

fn server_with(script: &str) -> (TempDir, MinecraftServer) {
    let java = scripts().join(script);
    let dir = TempDir::new().expect("server dir");
    fs::write(dir.path().join("server.jar"), b"").expect("write jar");
    let server = MinecraftServer::new(dir.path(), "server.jar")
        .with_launch_options(LaunchOptions {
            java_path: java,
            ..LaunchOptions::default()
        })
        .with_countdown_interval(Duration::from_millis(10))
        .with_restart_delay(Duration::from_millis(10));
    (dir, server)
}

/// Read log lines until one satisfies `pred`.
async fn wait_for_line(logs: &LogChannel, pred: impl Fn(&str) -> bool) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            let entry = logs.recv().await;
            if pred(&entry.text) {
                return entry.text;
            }
        }
    })
    .await
    .expect("expected log line never arrived")
}

#[tokio::test]
async fn start_command_stop_lifecycle() {
    let (_dir, server) = server_with("cooperative");
    let logs = server.logs();

    server.start().await.expect("start");
    assert!(server.is_running().await);
    assert_eq!(server.status().await, ServerStatus::Running);
    assert!(server.pid().await.is_some());
    assert!(matches!(server.start().await, Err(CoreError::AlreadyRunning)));

    let banner = wait_for_line(&logs, |line| line.starts_with("Starting minecraft server")).await;
    assert_eq!(banner, "Starting minecraft server -Xmx2G -Xms1G -jar server.jar nogui");

    server.send_command("say hello").await.expect("send command");
    wait_for_line(&logs, |line| line == "got: say hello").await;

    server.stop(WAIT).await.expect("graceful stop");
    assert!(!server.is_running().await);
    assert_eq!(server.uptime().await, Duration::ZERO);
    assert!(matches!(server.stop(WAIT).await, Err(CoreError::NotRunning)));
    assert!(matches!(
        server.send_command("list").await,
        Err(CoreError::NotRunning)
    ));
    assert!(server.try_next_error().is_none());
}

#[tokio::test]
async fn stderr_lines_are_tagged() {
    let (_dir, server) = server_with("cooperative");
    let logs = server.logs();
    server.start().await.unwrap();

    let entry = tokio::time::timeout(WAIT, async {
        loop {
            let entry = logs.recv().await;
            if entry.source == LogStream::Stderr {
                return entry;
            }
        }
    })
    .await
    .expect("stderr line");
    assert_eq!(entry.text, "loading libraries");

    server.stop(WAIT).await.unwrap();
}

#[tokio::test]
async fn unresponsive_server_is_killed() {
    let (_dir, server) = server_with("stubborn");
    server.start().await.unwrap();

    let err = server.stop(Duration::from_millis(300)).await.unwrap_err();
    assert!(
        matches!(err, CoreError::ForcedShutdown { timeout } if timeout == Duration::from_millis(300))
    );
    assert!(!server.is_running().await);
    // A requested kill is not an unexpected exit.
    assert!(server.try_next_error().is_none());

    server.start().await.expect("start again after forced shutdown");
    server.stop(Duration::from_millis(100)).await.unwrap_err();
}

#[tokio::test]
async fn crash_is_reported_on_error_channel() {
    let (_dir, server) = server_with("crashing");
    server.start().await.unwrap();

    tokio::time::timeout(WAIT, server.wait_for_shutdown())
        .await
        .expect("process should exit");
    assert!(!server.is_running().await);

    let err = tokio::time::timeout(WAIT, server.next_error())
        .await
        .expect("error should be queued")
        .expect("channel open");
    match err {
        CoreError::ProcessExited { status } => assert!(status.contains('3'), "{status}"),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn failed_stop_is_reported_once() {
    let (_dir, server) = server_with("failing-stop");
    server.start().await.unwrap();

    match server.stop(WAIT).await {
        Err(CoreError::ProcessExited { status }) => assert!(status.contains('5'), "{status}"),
        other => panic!("expected ProcessExited, got {other:?}"),
    }
    assert!(!server.is_running().await);
    // `stop` already returned the failure; it must not surface again as a crash.
    assert!(server.try_next_error().is_none());
}

#[tokio::test]
async fn log_flood_keeps_newest_lines() {
    let (_dir, server) = server_with("flood");
    let logs = server.logs();
    server.start().await.unwrap();

    tokio::time::timeout(WAIT, async {
        while logs.dropped() < 900 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all lines should be read");
    server.stop(WAIT).await.expect("stop after flood");

    let kept = logs.drain();
    assert_eq!(logs.dropped(), 900);
    assert_eq!(kept.len(), 100);
    assert_eq!(kept[0].text, "line 901");
    assert_eq!(kept[99].text, "line 1000");
    assert!(kept.iter().all(|entry| entry.source == LogStream::Stdout));
}

#[tokio::test]
async fn restart_replaces_process() {
    let (_dir, server) = server_with("cooperative");
    server.start().await.unwrap();
    let first = server.pid().await;

    server.restart(WAIT).await.expect("restart");
    assert!(server.is_running().await);
    assert_ne!(server.pid().await, first);

    server.stop(WAIT).await.unwrap();
}

#[tokio::test]
async fn concurrent_starts_launch_one_process() {
    let (_dir, server) = server_with("cooperative");
    let (a, b) = tokio::join!(server.start(), server.start());

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|result| matches!(result, Err(CoreError::AlreadyRunning)))
    );
    server.stop(WAIT).await.unwrap();
}

#[tokio::test]
async fn shutdown_countdown_broadcasts() {
    let (_dir, server) = server_with("cooperative");
    let logs = server.logs();
    server.start().await.unwrap();

    server.notify_players_before_shutdown(2).await.unwrap();
    wait_for_line(&logs, |line| {
        line == "got: say Server will be shutting down in 2 minutes"
    })
    .await;
    wait_for_line(&logs, |line| {
        line == "got: say Server will be shutting down for maintenance in 1 minute"
    })
    .await;
    wait_for_line(&logs, |line| {
        line == "got: say Server is shutting down now for maintenance"
    })
    .await;

    server.kick_all_players("").await.unwrap();
    wait_for_line(&logs, |line| line == "got: kick @a Server maintenance").await;
    server.set_weather("clear").await.unwrap();
    wait_for_line(&logs, |line| line == "got: weather clear").await;
    server.check_health().await.unwrap();

    server.stop(WAIT).await.unwrap();
}
