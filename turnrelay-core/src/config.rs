//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/turnrelay/config.toml`, or
//! injected by the host as a plugin-config object. Host configs use
//! camelCase option names and the TOML file uses snake_case; serde aliases
//! accept both.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/turnrelay/` (~/.config/turnrelay/)
//! - State/Logs/Queue: `$XDG_STATE_HOME/turnrelay/` (~/.local/state/turnrelay/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Relay pipeline configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Collector endpoint for the HTTP sink
    #[serde(default = "default_api_url", alias = "apiUrl")]
    pub api_url: String,

    /// Durable-queue directory; defaults to the XDG state queue dir
    #[serde(default, alias = "queueRoot")]
    pub queue_root: Option<PathBuf>,

    /// Settle delay after a terminal event, in milliseconds; zero or
    /// negative disables the wait
    #[serde(default = "default_settle_ms", alias = "settleMs")]
    pub settle_ms: i64,

    /// Maximum age at which a stored snapshot still counts as recent
    #[serde(default = "default_freshness_ms", alias = "freshnessMs")]
    pub freshness_ms: i64,

    /// Operator override for the project tag
    #[serde(default, alias = "projectTag")]
    pub project_tag: String,

    /// Operator override for the user identity
    #[serde(default, alias = "userId")]
    pub user_id: String,

    /// External command for delivery; when set, the command transport is
    /// used instead of the HTTP sink
    #[serde(default, alias = "skillPath")]
    pub skill_path: Option<PathBuf>,

    /// Retry backoff schedule in milliseconds; attempt count equals its
    /// length
    #[serde(default = "default_backoff_ms", alias = "backoffMs")]
    pub backoff_ms: Vec<u64>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Workspace root used to derive the default project tag; defaults to
    /// the process working directory
    #[serde(default, alias = "workspaceRoot")]
    pub workspace_root: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            queue_root: None,
            settle_ms: default_settle_ms(),
            freshness_ms: default_freshness_ms(),
            project_tag: String::new(),
            user_id: String::new(),
            skill_path: None,
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            workspace_root: None,
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:18730/api/activity".to_string()
}

fn default_settle_ms() -> i64 {
    250
}

fn default_freshness_ms() -> i64 {
    60_000
}

fn default_backoff_ms() -> Vec<u64> {
    crate::deliver::DEFAULT_BACKOFF_MS.to_vec()
}

fn default_timeout_secs() -> u64 {
    5
}

impl RelayConfig {
    /// Parse a host-provided plugin-config object.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid plugin config: {}", e)))
    }

    /// Validate configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("relay.api_url must not be empty".to_string()));
        }
        if self.freshness_ms < 0 {
            return Err(Error::Config(
                "relay.freshness_ms must not be negative".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "relay.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved durable-queue directory
    pub fn queue_root(&self) -> PathBuf {
        self.queue_root
            .clone()
            .unwrap_or_else(Config::default_queue_dir)
    }

    /// Base name of the workspace root, the default project tag when the
    /// context carries no workspace of its own
    pub fn workspace_tag(&self) -> String {
        let root = self
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        root.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.relay.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/turnrelay/config.toml` (~/.config/turnrelay/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("turnrelay").join("config.toml")
    }

    /// Returns the state directory path (for logs and the queue)
    ///
    /// `$XDG_STATE_HOME/turnrelay/` (~/.local/state/turnrelay/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("turnrelay")
    }

    /// Returns the default durable-queue directory
    ///
    /// `$XDG_STATE_HOME/turnrelay/queue/` (~/.local/state/turnrelay/queue/)
    pub fn default_queue_dir() -> PathBuf {
        Self::state_dir().join("queue")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/turnrelay/turnrelay.log` (~/.local/state/turnrelay/turnrelay.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("turnrelay.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.api_url, "http://localhost:18730/api/activity");
        assert_eq!(config.relay.settle_ms, 250);
        assert_eq!(config.relay.freshness_ms, 60_000);
        assert_eq!(config.relay.backoff_ms, vec![1000, 2000, 4000]);
        assert!(config.relay.skill_path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
[relay]
api_url = "http://collector.example.com/api/activity"
settle_ms = 0
project_tag = "relay-lab"
backoff_ms = [10, 20]

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.relay.api_url,
            "http://collector.example.com/api/activity"
        );
        assert_eq!(config.relay.settle_ms, 0);
        assert_eq!(config.relay.project_tag, "relay-lab");
        assert_eq!(config.relay.backoff_ms, vec![10, 20]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_plugin_config_accepts_camel_case_options() {
        let value = json!({
            "apiUrl": "http://localhost:9999/api/activity",
            "queueRoot": "/tmp/relay-queue",
            "settleMs": 100,
            "projectTag": "ops",
            "userId": "operator",
            "freshnessMs": 30000
        });
        let config = RelayConfig::from_value(&value).unwrap();
        assert_eq!(config.api_url, "http://localhost:9999/api/activity");
        assert_eq!(config.queue_root, Some(PathBuf::from("/tmp/relay-queue")));
        assert_eq!(config.settle_ms, 100);
        assert_eq!(config.project_tag, "ops");
        assert_eq!(config.user_id, "operator");
        assert_eq!(config.freshness_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RelayConfig {
            api_url: "  ".to_string(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            freshness_ms: -1,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_workspace_tag_uses_configured_root() {
        let config = RelayConfig {
            workspace_root: Some(PathBuf::from("/home/dev/projects/relay-lab")),
            ..RelayConfig::default()
        };
        assert_eq!(config.workspace_tag(), "relay-lab");
    }
}
