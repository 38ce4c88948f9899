use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use updater_core::proto::BackupKind;
use updater_server::UpdaterConfig;

mod commands;

#[derive(Parser)]
#[command(name = "mc-updater", version)]
#[command(about = "Supervise a Minecraft server and manage its backups", long_about = None)]
struct Cli {
    /// Config file (defaults to config.toml, mc-updater.toml or .mc-updater.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with default values
    Init {
        #[arg(default_value = "mc-updater.toml")]
        path: PathBuf,
    },
    /// Back up the server directory
    Backup {
        /// Backup name (defaults to backup_<timestamp>)
        #[arg(short, long)]
        name: Option<String>,
        /// automatic, manual, pre-update or post-update
        #[arg(short, long)]
        kind: Option<BackupKind>,
        /// Copy the tree instead of writing a zip archive
        #[arg(long)]
        plain: bool,
    },
    /// List backups, newest first
    List,
    /// Show details of one backup
    Info { name: String },
    /// Replace the server directory with a backup
    Restore { name: String },
    /// Delete a backup
    Delete { name: String },
    /// Check that a backup looks restorable
    Validate { name: String },
    /// Delete backups older than the retention window
    Cleanup {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Show disk space used by backups
    Space,
    /// Show server.properties, or set KEY=VALUE pairs
    Properties {
        #[arg(value_name = "KEY=VALUE")]
        updates: Vec<String>,
    },
    /// Print the server version from server.properties or the jar name
    ServerVersion,
    /// Run the server in the foreground; stdin lines are sent as console commands
    Run,
    /// Install a new server jar, with backups before and after
    Update {
        /// Version label used in backup names
        version: String,
        /// The new server jar
        #[arg(long)]
        jar: PathBuf,
        /// Warn players for this many minutes before stopping
        #[arg(long, default_value_t = 0)]
        countdown: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        init_tracing("info");
        return commands::config::init(path);
    }

    let (config, source) =
        UpdaterConfig::discover(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level);
    match source {
        Some(path) => tracing::debug!("loaded config from {}", path.display()),
        None => tracing::debug!("no config file found, using defaults"),
    }

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Backup { name, kind, plain } => {
            commands::backup::create(&config, name, kind, plain).await?;
        }
        Commands::List => commands::backup::list(&config).await?,
        Commands::Info { name } => commands::backup::info(&config, &name).await?,
        Commands::Restore { name } => commands::backup::restore(&config, &name).await?,
        Commands::Delete { name } => commands::backup::delete(&config, &name).await?,
        Commands::Validate { name } => commands::backup::validate(&config, &name).await?,
        Commands::Cleanup { days } => commands::backup::cleanup(&config, days).await?,
        Commands::Space => commands::backup::space(&config).await?,
        Commands::Properties { updates } => commands::config::properties(&config, &updates)?,
        Commands::ServerVersion => commands::config::server_version(&config)?,
        Commands::Run => commands::run::exec(&config).await?,
        Commands::Update {
            version,
            jar,
            countdown,
        } => commands::update::exec(&config, &version, jar, countdown).await?,
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
