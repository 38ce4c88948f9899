use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use updater_core::CoreError;
use updater_core::proto::LogStream;
use updater_server::UpdaterConfig;

/// Run the server in the foreground until it exits or Ctrl-C is pressed.
pub async fn exec(config: &UpdaterConfig) -> Result<()> {
    let server = config.build_server();
    server.start().await.context("failed to start server")?;
    println!(
        "Server started from {}. Type console commands; Ctrl-C stops the server.",
        config.server_path.display()
    );

    let logs = server.logs();
    let printer = tokio::spawn(async move {
        loop {
            let entry = logs.recv().await;
            match entry.source {
                LogStream::Stdout => println!("{}", entry.text),
                LogStream::Stderr => eprintln!("{}", entry.text),
            }
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping server...");
                break;
            }
            _ = server.wait_for_shutdown() => {
                println!("Server exited.");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Err(err) = server.send_command(line).await {
                        eprintln!("command failed: {err}");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("stdin closed: {err}");
                    stdin_open = false;
                }
            },
        }
    }

    if server.is_running().await {
        match server.stop(config.shutdown_timeout()).await {
            Ok(()) => println!("Server stopped."),
            Err(err @ CoreError::ForcedShutdown { .. }) => eprintln!("{err}"),
            Err(err) => return Err(err).context("failed to stop server"),
        }
    }
    while let Some(err) = server.try_next_error() {
        eprintln!("server error: {err}");
    }
    // Lines the printer task has not picked up yet.
    for entry in server.logs().drain() {
        println!("{}", entry.text);
    }
    printer.abort();
    Ok(())
}
