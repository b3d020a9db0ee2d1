//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::fetch::OsuClientConfig;
use crate::models::{GameMode, PlayerRef};
use crate::notify::DiscordConfig;
use crate::render::RenderConfig;
use crate::storage::{default_database_file, StorageConfig, DEFAULT_RETENTION};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// osu! API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsuConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_osu_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Results requested per (player, mode)
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,

    #[serde(default)]
    pub include_fails: bool,
}

fn default_osu_base_url() -> String {
    "https://osu.ppy.sh".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_recent_limit() -> u32 {
    5
}

impl Default for OsuConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: default_osu_base_url(),
            timeout_seconds: default_timeout(),
            recent_limit: default_recent_limit(),
            include_fails: false,
        }
    }
}

/// Discord configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSettings {
    #[serde(default)]
    pub token: String,

    /// Channel new scores are posted to
    #[serde(default)]
    pub channel_id: String,

    #[serde(default = "default_discord_api_base")]
    pub api_base: String,

    /// Where grade and mode icons are served from
    #[serde(default)]
    pub asset_base_url: Option<String>,
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            channel_id: String::new(),
            api_base: default_discord_api_base(),
            asset_base_url: None,
        }
    }
}

/// Polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds budgeted per upstream request; the tick period is
    /// `roster × modes × seconds_per_request`
    #[serde(default = "default_seconds_per_request")]
    pub seconds_per_request: u64,

    /// Fixed interval (e.g. "90s", "5m") overriding the computed cadence
    #[serde(default)]
    pub interval: Option<String>,
}

fn default_seconds_per_request() -> u64 {
    2
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            seconds_per_request: default_seconds_per_request(),
            interval: None,
        }
    }
}

/// Dedup store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Records kept per (player, mode)
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Database file name inside the data directory
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            database_file: default_database_file(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Players to watch, by id or username
    #[serde(default)]
    pub roster: Vec<PlayerRef>,

    #[serde(default)]
    pub osu: OsuConfig,

    #[serde(default)]
    pub discord: DiscordSettings,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub storage: StorageSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            roster: Vec::new(),
            osu: OsuConfig::default(),
            discord: DiscordSettings::default(),
            poll: PollConfig::default(),
            storage: StorageSettings::default(),
        }
    }
}

/// Longest tick period accepted, explicit or computed.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Tick period for a roster: one slot of `seconds_per_request` per
/// (player, mode) request. `None` if the product overflows.
pub fn sweep_interval(roster_size: usize, seconds_per_request: u64) -> Option<Duration> {
    (roster_size as u64)
        .checked_mul(GameMode::COUNT as u64)?
        .checked_mul(seconds_per_request)
        .map(Duration::from_secs)
}

/// Log filter to start with: the command line wins over the config file,
/// which wins over the built-in default. `RUST_LOG` is applied on top by the
/// caller.
pub fn log_level(cli: Option<&str>, file: Option<&AppConfig>) -> String {
    cli.map(str::to_string)
        .or_else(|| file.map(|config| config.log_level.clone()))
        .unwrap_or_else(default_log_level)
}

impl AppConfig {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overlay secrets from the environment. `lookup` is injected so tests do
    /// not touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut String); 4] = [
            ("OSU_CLIENT_ID", &mut self.osu.client_id),
            ("OSU_CLIENT_SECRET", &mut self.osu.client_secret),
            ("DISCORD_TOKEN", &mut self.discord.token),
            ("DISCORD_CHANNEL_ID", &mut self.discord.channel_id),
        ];

        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.osu.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("osu.client_id"));
        }
        if self.osu.client_secret.trim().is_empty() {
            return Err(ConfigError::Missing("osu.client_secret"));
        }
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::Missing("discord.token"));
        }
        if self.discord.channel_id.trim().is_empty() {
            return Err(ConfigError::Missing("discord.channel_id"));
        }
        if self.roster.is_empty() {
            return Err(ConfigError::Missing("roster"));
        }

        if self.osu.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "osu.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.osu.recent_limit == 0 || self.osu.recent_limit > 100 {
            return Err(ConfigError::ValidationError(
                "osu.recent_limit must be between 1 and 100".to_string(),
            ));
        }

        if self.storage.retention == 0 {
            return Err(ConfigError::ValidationError(
                "storage.retention must be greater than 0".to_string(),
            ));
        }

        self.interval()?;
        parse_url("osu.base_url", &self.osu.base_url)?;
        parse_url("discord.api_base", &self.discord.api_base)?;
        if let Some(base) = &self.discord.asset_base_url {
            parse_url("discord.asset_base_url", base)?;
        }

        Ok(())
    }

    /// Tick period: the explicit override if set, otherwise the cadence
    /// computed from the roster size.
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        let interval = match &self.poll.interval {
            Some(raw) => crate::parse_duration(raw).ok_or_else(|| {
                ConfigError::ValidationError(format!("poll.interval is not a duration: {}", raw))
            })?,
            None => sweep_interval(self.roster.len(), self.poll.seconds_per_request)
                .ok_or_else(|| {
                    ConfigError::ValidationError(
                        "poll.seconds_per_request is too large for the roster".to_string(),
                    )
                })?,
        };

        if interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if interval > MAX_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "poll interval must be at most {}s",
                MAX_INTERVAL.as_secs()
            )));
        }

        Ok(interval)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::new(self.data_dir.clone())
            .with_database_file(self.storage.database_file.clone())
    }

    pub fn osu_client_config(&self) -> Result<OsuClientConfig, ConfigError> {
        Ok(OsuClientConfig {
            base_url: parse_url("osu.base_url", &self.osu.base_url)?,
            timeout: Duration::from_secs(self.osu.timeout_seconds),
            recent_limit: self.osu.recent_limit,
            include_fails: self.osu.include_fails,
            ..OsuClientConfig::new(&self.osu.client_id, &self.osu.client_secret)
        })
    }

    pub fn discord_config(&self) -> Result<DiscordConfig, ConfigError> {
        Ok(DiscordConfig {
            api_base: parse_url("discord.api_base", &self.discord.api_base)?,
            ..DiscordConfig::new(&self.discord.token)
        })
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            asset_base_url: self.discord.asset_base_url.clone(),
        }
    }
}

/// Parse a base URL, forcing a trailing slash so relative joins append.
fn parse_url(setting: &str, raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| ConfigError::ValidationError(format!("{} is not a valid URL: {}", setting, e)))
}
