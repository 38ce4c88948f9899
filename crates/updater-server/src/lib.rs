//! Minecraft server supervision and backup engine.

pub mod backup;
pub mod config;
pub mod lock;
pub mod notify;
pub mod supervisor;
pub mod workflow;

pub use backup::{BackupManager, RetentionPolicy};
pub use config::UpdaterConfig;
pub use notify::{NoopNotifier, Notifier, TracingNotifier};
pub use supervisor::{LaunchOptions, LogChannel, MinecraftServer};
pub use workflow::{UpdateOptions, UpdateReport, run_update};
