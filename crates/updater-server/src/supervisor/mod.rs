mod commands;
mod logs;
mod monitor;
mod server;
mod state;

pub use commands::{DEFAULT_KICK_REASON, UNKNOWN_VERSION, countdown_message};
pub use logs::{LOG_CHANNEL_CAPACITY, LogChannel};
pub use monitor::ERROR_CHANNEL_CAPACITY;
pub use server::{LaunchOptions, MinecraftServer};
