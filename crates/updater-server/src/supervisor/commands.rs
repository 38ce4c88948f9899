//! Console command helpers layered over [`MinecraftServer::send_command`].

use std::collections::BTreeMap;

use tracing::info;

use updater_core::{CoreError, Result};
use updater_utils::properties::{read_properties, update_properties};
use updater_utils::{dir_exists, file_exists};

use super::server::MinecraftServer;

pub const DEFAULT_KICK_REASON: &str = "Server maintenance";
const FINAL_SHUTDOWN_MESSAGE: &str = "Server is shutting down now for maintenance";
pub const UNKNOWN_VERSION: &str = "unknown";

/// Broadcast text for `minutes` left on a shutdown countdown.
pub fn countdown_message(minutes: u32) -> String {
    match minutes {
        1 => "Server will be shutting down for maintenance in 1 minute".to_string(),
        2 => "Server will be shutting down in 2 minutes".to_string(),
        3 => "Server shutdown in 3 minutes".to_string(),
        n => format!("Server will be shutting down in {n} minutes"),
    }
}

impl MinecraftServer {
    pub async fn broadcast_message(&self, message: &str) -> Result<()> {
        self.send_command(&format!("say {message}")).await
    }

    /// Count down from `minutes`, one broadcast per interval, then announce the
    /// shutdown. Blocks for the whole countdown.
    pub async fn notify_players_before_shutdown(&self, minutes: u32) -> Result<()> {
        info!("notifying players of shutdown in {minutes} minutes");
        for remaining in (1..=minutes).rev() {
            self.broadcast_message(&countdown_message(remaining)).await?;
            tokio::time::sleep(self.countdown_interval).await;
        }
        self.broadcast_message(FINAL_SHUTDOWN_MESSAGE).await
    }

    /// Kick every player. An empty reason uses [`DEFAULT_KICK_REASON`].
    pub async fn kick_all_players(&self, reason: &str) -> Result<()> {
        let reason = match reason.trim() {
            "" => DEFAULT_KICK_REASON,
            reason => reason,
        };
        self.send_command(&format!("kick @a {reason}")).await
    }

    pub async fn save_world(&self) -> Result<()> {
        self.send_command("save-all").await
    }

    /// `time set <time>`, e.g. `day`, `night` or a tick count.
    pub async fn set_world_time(&self, time: &str) -> Result<()> {
        self.send_command(&format!("time set {time}")).await
    }

    /// `weather <weather>`: `clear`, `rain` or `thunder`.
    pub async fn set_weather(&self, weather: &str) -> Result<()> {
        self.send_command(&format!("weather {weather}")).await
    }

    pub async fn reload_server(&self) -> Result<()> {
        self.send_command("reload").await
    }

    /// Ask the server to print its player list. The reply arrives on the log channel.
    pub async fn list_players(&self) -> Result<()> {
        self.send_command("list").await
    }

    /// Running, and the directory and jar are still on disk.
    pub async fn check_health(&self) -> Result<()> {
        if !self.is_running().await {
            return Err(CoreError::NotRunning);
        }
        if !dir_exists(self.server_path()) {
            return Err(CoreError::MissingDirectory(self.server_path().to_path_buf()));
        }
        let jar = self.jar_path();
        if !file_exists(&jar) {
            return Err(CoreError::MissingExecutable(jar));
        }
        Ok(())
    }

    pub fn server_properties(&self) -> Result<BTreeMap<String, String>> {
        read_properties(self.server_path())
    }

    /// `version` from server.properties, else the first `-`-separated jar name segment
    /// starting with a digit (`paper-1.20.4-499.jar` gives `1.20.4`), else
    /// [`UNKNOWN_VERSION`].
    pub fn server_version(&self) -> Result<String> {
        let properties = self.server_properties()?;
        if let Some(version) = properties.get("version") {
            return Ok(version.clone());
        }
        Ok(version_from_jar_name(self.jar_name())
            .unwrap_or(UNKNOWN_VERSION)
            .to_string())
    }

    /// Merge `updates` into `server.properties`. Takes effect on the next start.
    pub fn update_server_properties(&self, updates: &BTreeMap<String, String>) -> Result<()> {
        update_properties(self.server_path(), updates)?;
        info!("updated {} server properties", updates.len());
        Ok(())
    }
}

fn version_from_jar_name(jar_name: &str) -> Option<&str> {
    let stem = jar_name.strip_suffix(".jar").unwrap_or(jar_name);
    stem.split('-')
        .find(|part| part.starts_with(|c: char| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn countdown_wording() {
        assert_eq!(
            countdown_message(1),
            "Server will be shutting down for maintenance in 1 minute"
        );
        assert_eq!(countdown_message(3), "Server shutdown in 3 minutes");
        assert_eq!(
            countdown_message(10),
            "Server will be shutting down in 10 minutes"
        );
    }

    #[tokio::test]
    async fn helpers_require_running_server() {
        let tmp = TempDir::new().unwrap();
        let server = MinecraftServer::new(tmp.path(), "server.jar");
        assert!(matches!(server.save_world().await, Err(CoreError::NotRunning)));
        assert!(matches!(
            server.kick_all_players("").await,
            Err(CoreError::NotRunning)
        ));
        assert!(matches!(server.check_health().await, Err(CoreError::NotRunning)));
    }

    #[test]
    fn properties_round_trip_through_server_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("server.properties"), "motd=Hello\n").unwrap();
        let server = MinecraftServer::new(tmp.path(), "server.jar");

        let updates = BTreeMap::from([("max-players".to_string(), "5".to_string())]);
        server.update_server_properties(&updates).unwrap();

        let props = server.server_properties().unwrap();
        assert_eq!(props["motd"], "Hello");
        assert_eq!(props["max-players"], "5");
    }

    #[test]
    fn version_comes_from_properties_first() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("server.properties"),
            "motd=Hello\nversion=1.21.1\n",
        )
        .unwrap();
        let server = MinecraftServer::new(tmp.path(), "paper-1.20.4-499.jar");
        assert_eq!(server.server_version().unwrap(), "1.21.1");
    }

    #[test]
    fn version_falls_back_to_jar_name() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("server.properties"), "motd=Hello\n").unwrap();

        let paper = MinecraftServer::new(tmp.path(), "paper-1.20.4-499.jar");
        assert_eq!(paper.server_version().unwrap(), "1.20.4");
        let vanilla = MinecraftServer::new(tmp.path(), "minecraft_server-1.19.jar");
        assert_eq!(vanilla.server_version().unwrap(), "1.19");
    }

    #[test]
    fn version_unknown_without_hints() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("server.properties"), "motd=Hello\n").unwrap();
        let server = MinecraftServer::new(tmp.path(), "server.jar");
        assert_eq!(server.server_version().unwrap(), UNKNOWN_VERSION);

        let missing = MinecraftServer::new(tmp.path().join("absent"), "server-1.20.jar");
        assert!(missing.server_version().is_err());
    }
}
