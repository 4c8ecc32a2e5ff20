use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::session::MAX_HISTORY;
use crate::storage::MAX_VOLUME;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Nodo de audio
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,
    pub lavalink_secure: bool,
    pub node_request_timeout_secs: u64,
    pub node_reconnect_max_attempts: u32,
    pub node_reconnect_base_delay_ms: u64,
    pub search_prefix: String,

    // Reproducción
    pub default_volume: u16, // Porcentaje 0-200
    pub max_queue_size: usize,
    pub history_capacity: usize,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Nodo de audio
            lavalink_host: std::env::var("LAVALINK_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            lavalink_port: std::env::var("LAVALINK_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()?,
            lavalink_password: std::env::var("LAVALINK_PASSWORD")
                .unwrap_or_else(|_| "youshallnotpass".to_string()),
            lavalink_secure: std::env::var("LAVALINK_SECURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            node_request_timeout_secs: std::env::var("NODE_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            node_reconnect_max_attempts: std::env::var("NODE_RECONNECT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            node_reconnect_base_delay_ms: std::env::var("NODE_RECONNECT_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            search_prefix: std::env::var("SEARCH_PREFIX")
                .unwrap_or_else(|_| "ytsearch".to_string()),

            // Reproducción
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            history_capacity: std::env::var("HISTORY_CAPACITY")
                .unwrap_or_else(|_| MAX_HISTORY.to_string())
                .parse()?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
        };

        std::fs::create_dir_all(&config.data_dir)?;

        if config.application_id == 0 {
            anyhow::bail!("APPLICATION_ID cannot be 0");
        }
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0 and 200
    /// - Node request timeout must be between 10 and 30 seconds
    /// - Queue size must be greater than 0
    /// - History capacity must be between 1 and 100
    /// - Development guild id, when set, must not be 0
    pub fn validate(&self) -> Result<()> {
        if self.guild_id == Some(0) {
            anyhow::bail!("GUILD_ID cannot be 0");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!("Default volume must be between 0 and {}, got: {}", MAX_VOLUME, self.default_volume);
        }

        if !(10..=30).contains(&self.node_request_timeout_secs) {
            anyhow::bail!(
                "Node request timeout must be between 10 and 30 seconds, got: {}",
                self.node_request_timeout_secs
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY {
            anyhow::bail!(
                "History capacity must be between 1 and {}, got: {}",
                MAX_HISTORY,
                self.history_capacity
            );
        }

        if self.search_prefix.trim().is_empty() {
            anyhow::bail!("Search prefix cannot be empty");
        }

        Ok(())
    }

    pub fn node_request_timeout(&self) -> Duration {
        Duration::from_secs(self.node_request_timeout_secs)
    }

    pub fn node_reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.node_reconnect_base_delay_ms)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token and the node password.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Node: {}://{}:{} (timeout {}s, {} reconnect attempts)\n  \
            Playback: {}% vol, {} queue, {} history\n  \
            Data: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            if self.lavalink_secure { "https" } else { "http" },
            self.lavalink_host,
            self.lavalink_port,
            self.node_request_timeout_secs,
            self.node_reconnect_max_attempts,
            self.default_volume,
            self.max_queue_size,
            self.history_capacity,
            self.data_dir.display()
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            lavalink_host: "localhost".to_string(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".to_string(),
            lavalink_secure: false,
            node_request_timeout_secs: 15,
            node_reconnect_max_attempts: 5,
            node_reconnect_base_delay_ms: 1000,
            search_prefix: "ytsearch".to_string(),

            default_volume: 100,
            max_queue_size: 1000,
            history_capacity: MAX_HISTORY,

            data_dir: "./data".into(),
        }
    }
}
