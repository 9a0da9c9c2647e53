//! Configuration loading for steamspeed.
//!
//! Loads `~/.steamspeed/config.toml` with per-section defaults. All sections
//! use `#[serde(default)]` so a minimal, empty, or missing config file is
//! valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::monitor::MonitorSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// steamcmd invocation and the app under test.
    #[serde(default)]
    pub steam: SteamConfig,

    /// Log following behaviour.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// steamcmd invocation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SteamConfig {
    /// Path or name of the steamcmd executable.
    #[serde(default = "default_steamcmd")]
    pub steamcmd: PathBuf,

    /// Steam application ID to download (https://store.steampowered.com/app/<id>).
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Steam account name.
    #[serde(default = "default_username")]
    pub username: String,

    /// Steam account password. Empty for anonymous logins.
    #[serde(default)]
    pub password: String,

    /// Platform whose depots are downloaded.
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Content log to follow. Defaults to `~/.steam/logs/content_log.txt`.
    #[serde(default)]
    pub content_log: Option<PathBuf>,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            steamcmd: default_steamcmd(),
            app_id: default_app_id(),
            username: default_username(),
            password: String::new(),
            platform: default_platform(),
            content_log: None,
        }
    }
}

/// Log following settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Milliseconds between polls of an idle log.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds without log activity before giving up. Unset waits forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Echo every raw log line at debug level.
    #[serde(default)]
    pub echo_lines: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            idle_timeout_secs: None,
            echo_lines: false,
        }
    }
}

impl MonitorConfig {
    /// Monitor loop settings derived from this section.
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            echo_lines: self.echo_lines,
        }
    }
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (10..=60_000).contains(&self.monitor.poll_interval_ms),
            "monitor.poll_interval_ms must be in [10, 60000]"
        );
        anyhow::ensure!(
            self.monitor.idle_timeout_secs != Some(0),
            "monitor.idle_timeout_secs must be positive when set"
        );
        anyhow::ensure!(
            !self.steam.app_id.is_empty() && self.steam.app_id.chars().all(|c| c.is_ascii_digit()),
            "steam.app_id must be numeric"
        );
        anyhow::ensure!(
            !self.steam.username.is_empty() && !self.steam.username.contains(char::is_whitespace),
            "steam.username must be a single non-empty word"
        );
        anyhow::ensure!(
            !self.steam.password.contains(char::is_whitespace),
            "steam.password must not contain whitespace"
        );
        anyhow::ensure!(
            matches!(self.steam.platform.as_str(), "windows" | "macos" | "linux"),
            "steam.platform must be 'windows', 'macos' or 'linux'"
        );
        Ok(())
    }

    /// The content log to follow, falling back to Steam's default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory cannot
    /// be determined.
    pub fn content_log(&self) -> anyhow::Result<PathBuf> {
        match &self.steam.content_log {
            Some(path) => Ok(path.clone()),
            None => default_content_log(),
        }
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration, using defaults when `path` does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

/// Root directory for steamspeed state (`~/.steamspeed/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".steamspeed"))
}

/// Default config file path (`~/.steamspeed/config.toml`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Steam's content log (`~/.steam/logs/content_log.txt`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_content_log() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home
        .home_dir()
        .join(".steam")
        .join("logs")
        .join("content_log.txt"))
}

// Default value functions for serde.

fn default_steamcmd() -> PathBuf {
    PathBuf::from("steamcmd")
}

fn default_app_id() -> String {
    "232370".to_owned()
}

fn default_username() -> String {
    "anonymous".to_owned()
}

fn default_platform() -> String {
    "windows".to_owned()
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_monitor_values() {
        let monitor = MonitorConfig::default();
        assert_eq!(monitor.poll_interval_ms, 500);
        assert_eq!(monitor.idle_timeout_secs, None);
        assert!(!monitor.echo_lines);
    }

    #[test]
    fn config_dir_resolves() {
        let dir = config_dir();
        assert!(dir.is_ok());
        let path = dir.expect("already checked");
        assert!(path.ends_with(".steamspeed"));
    }

    #[test]
    fn default_content_log_under_steam_logs() {
        let path = default_content_log().expect("home directory");
        assert!(path.ends_with(".steam/logs/content_log.txt"));
    }

    #[test]
    fn settings_convert_units() {
        let monitor = MonitorConfig {
            poll_interval_ms: 250,
            idle_timeout_secs: Some(90),
            echo_lines: true,
        };
        let settings = monitor.settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(90)));
        assert!(settings.echo_lines);
    }
}
