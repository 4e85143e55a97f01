//! Server configuration file.
//!
//! One JSON document holds detection tuning, the OneBot notifier and logging.
//! Every section and field is optional; omitted values take their defaults.

use glidewatch_core::logging::TracingConfig;
use glidewatch_core::{ConfigError, DetectionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/glidewatch.json";
pub const CONFIG_PATH_ENV: &str = "GLIDEWATCH_CONFIG";

/// Longest accepted OneBot connect timeout, in seconds
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 300;

/// Config file location: `GLIDEWATCH_CONFIG` or the default path.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub onebot: OneBotConfig,
    pub logging: TracingConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotConfig {
    pub enabled: bool,
    pub ws_url: String,
    /// Sent as `Authorization: Bearer <token>` when set
    pub access_token: Option<String>,
    /// Group chats to notify; ids <= 0 are ignored
    pub group_ids: Vec<i64>,
    /// Private chats to notify; ids <= 0 are ignored
    pub private_ids: Vec<i64>,
    pub connect_timeout_secs: u64,
    /// Pending notification jobs; a full queue drops new ones
    pub queue_capacity: usize,
    /// Concurrent outbound requests
    pub max_in_flight: usize,
    pub messages: OneBotMessages,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ws_url: "ws://localhost:6700".to_string(),
            access_token: None,
            group_ids: Vec::new(),
            private_ids: Vec::new(),
            connect_timeout_secs: 10,
            queue_capacity: 256,
            max_in_flight: 4,
            messages: OneBotMessages::default(),
        }
    }
}

/// Chat templates. When a list holds several entries one is picked at random
/// per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotMessages {
    pub detection: Vec<String>,
    pub ban: Vec<String>,
}

impl Default for OneBotMessages {
    fn default() -> Self {
        Self {
            detection: vec![
                "Actor [%player%] reached the map-running threshold: %chunks% chunks generated in %time%s, consecutive count %count%".to_string(),
            ],
            ban: vec![
                "Actor [%player%] was temporarily banned for repeatedly reaching the map-running threshold".to_string(),
            ],
        }
    }
}

impl OneBotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        // No TLS stack is linked; put wss endpoints behind a local proxy
        if !self.ws_url.starts_with("ws://") {
            return Err(ConfigError::invalid(
                "onebot.ws_url",
                format!("expected a ws:// url, got `{}`", self.ws_url),
            ));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "onebot.connect_timeout_secs",
                format!("must be between 1 and {MAX_CONNECT_TIMEOUT_SECS}"),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("onebot.queue_capacity", "must be greater than 0"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("onebot.max_in_flight", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }

    /// Configured group and private targets with positive ids.
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        let groups = self
            .group_ids
            .iter()
            .filter(|id| **id > 0)
            .map(|id| Target::Group(*id));
        let users = self
            .private_ids
            .iter()
            .filter(|id| **id > 0)
            .map(|id| Target::Private(*id));
        groups.chain(users)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Group(i64),
    Private(i64),
}

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.validate()?;
        self.onebot.validate()?;
        if self.http.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "http.bind",
                format!("not a socket address: `{}`", self.http.bind),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults. An
    /// existing but invalid file is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }
        Ok((Self::load(path)?, ConfigSource::File))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
