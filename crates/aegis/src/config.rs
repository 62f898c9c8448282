//! TOML configuration.
//!
//! One file describes the fleet, the stores and the tuning knobs; CLI flags
//! override the few operator-facing values. `validate()` runs before any
//! component is wired so a bad file fails the boot, not a request.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_rcon_port() -> u16 {
    21114
}

fn default_execute_timeout_secs() -> u64 {
    30
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_feeds_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_identity_rebuild_secs() -> u64 {
    300
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Game servers to manage
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    /// RCON pool tuning
    #[serde(default)]
    pub rcon: RconSettings,
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Live feed settings
    #[serde(default)]
    pub feeds: FeedSettings,
    /// Identity materialization settings
    #[serde(default)]
    pub identity: IdentitySettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// One managed game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Stable server id (uuid); generated when omitted
    pub id: Option<String>,
    pub name: String,
    pub host: String,
    pub game_port: u16,
    /// RCON host when it differs from the game host
    pub rcon_host: Option<String>,
    #[serde(default = "default_rcon_port")]
    pub rcon_port: u16,
    pub rcon_password: String,
}

/// RCON pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RconSettings {
    /// Per-command response deadline in seconds
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
    /// Keepalive probe cadence in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            execute_timeout_secs: default_execute_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
        }
    }
}

/// Database connection settings.
///
/// Both URLs empty selects the in-memory backend (state lost on exit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Relational store URL (postgres://...)
    #[serde(default)]
    pub url: String,
    /// Columnar store URL; falls back to `url` when empty
    #[serde(default)]
    pub columnar_url: String,
}

/// Live feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// WebSocket bind address for the feeds endpoint
    #[serde(default = "default_feeds_bind")]
    pub bind_address: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            bind_address: default_feeds_bind(),
        }
    }
}

/// Identity materialization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Interval between identity-table rebuilds in seconds (0 disables)
    #[serde(default = "default_identity_rebuild_secs")]
    pub rebuild_interval_secs: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            rebuild_interval_secs: default_identity_rebuild_secs(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Reads the TOML config at `path`.
    ///
    /// A missing file is not an error: a default template is written there
    /// and returned, so a first run leaves something to edit.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            let defaults = AppConfig::default();
            tokio::fs::write(path, toml::to_string_pretty(&defaults)?).await?;
            info!("No config at {}; wrote a default template", path.display());
            return Ok(defaults);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&raw)?)
    }

    /// RCON pool tuning derived from the settings.
    pub fn rcon_manager_config(&self) -> rcon_manager::RconManagerConfig {
        rcon_manager::RconManagerConfig {
            execute_timeout: Duration::from_secs(self.rcon.execute_timeout_secs),
            keepalive_interval: Duration::from_secs(self.rcon.keepalive_interval_secs),
            ..Default::default()
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .feeds
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid feeds bind address: {}",
                self.feeds.bind_address
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        for server in &self.servers {
            if server.name.is_empty() {
                return Err("Server name cannot be empty".to_string());
            }
            if server.host.is_empty() {
                return Err(format!("Server '{}' has an empty host", server.name));
            }
            if server.rcon_password.is_empty() {
                return Err(format!(
                    "Server '{}' has an empty RCON password",
                    server.name
                ));
            }
            if let Some(id) = &server.id {
                if id.parse::<aegis_types::ServerId>().is_err() {
                    return Err(format!("Server '{}' has a malformed id: {id}", server.name));
                }
            }
        }

        if self.rcon.execute_timeout_secs == 0 {
            return Err("rcon.execute_timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_feed_address_is_rejected() {
        let mut config = AppConfig::default();
        config.feeds.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_with_empty_password_is_rejected() {
        let mut config = AppConfig::default();
        config.servers.push(ServerEntry {
            id: None,
            name: "one".to_string(),
            host: "127.0.0.1".to_string(),
            game_port: 7787,
            rcon_host: None,
            rcon_port: 21114,
            rcon_password: String::new(),
        });
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert!(config.servers.is_empty());

        // A second load reads the file it just wrote.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.logging.level, "info");
    }

    #[tokio::test]
    async fn parses_server_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
            [[servers]]
            name = "main"
            host = "203.0.113.10"
            game_port = 7787
            rcon_password = "secret"

            [logging]
            level = "debug"
            "#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].rcon_port, 21114);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
