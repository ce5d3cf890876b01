//! Configuration loading and persistence.
//!
//! Resolution order: command-line flags (applied by the caller) over
//! `HERALD_*` environment variables over the JSON config file over built-in
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Configuration for the herald daemon.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Path to the Murmur server log file.
    pub log_file: PathBuf,
    /// IRC server hostname.
    pub irc_server: String,
    /// IRC server port.
    pub irc_port: u16,
    /// Nickname to register with.
    pub irc_nick: String,
    /// Optional IRC server password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irc_password: Option<String>,
    /// Channel announcements are sent to.
    pub channel: String,
    /// Minimum delay in seconds between announcements.
    pub min_delay: u64,
    /// Log raw IRC protocol frames at debug level.
    #[serde(default)]
    pub verbose_protocol: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/mumble-server/mumble-server.log"),
            irc_server: "irc.libera.chat".to_string(),
            irc_port: 6667,
            irc_nick: "herald".to_string(),
            irc_password: None,
            channel: "#mumble".to_string(),
            min_delay: 300,
            verbose_protocol: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `HERALD_CONFIG_DIR` overrides the platform config dir; unit tests use
    /// the repo's `tmp/` directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/herald-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("HERALD_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("could not determine config directory")?
                        .join("murmur-herald")
                }
            }
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        config.expand_log_path();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(log_file) = std::env::var("HERALD_LOG_FILE") {
            self.log_file = PathBuf::from(log_file);
        }
        if let Ok(server) = std::env::var("HERALD_IRC_SERVER") {
            self.irc_server = server;
        }
        if let Ok(port) = std::env::var("HERALD_IRC_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.irc_port = port;
            }
        }
        if let Ok(nick) = std::env::var("HERALD_IRC_NICK") {
            self.irc_nick = nick;
        }
        if let Ok(password) = std::env::var("HERALD_IRC_PASSWORD") {
            self.irc_password = Some(password);
        }
        if let Ok(channel) = std::env::var("HERALD_CHANNEL") {
            self.channel = channel;
        }
        if let Ok(min_delay) = std::env::var("HERALD_MIN_DELAY") {
            if let Ok(delay) = min_delay.parse::<u64>() {
                self.min_delay = delay;
            }
        }
    }

    /// Expand a leading tilde in the log path.
    pub fn expand_log_path(&mut self) {
        let expanded = shellexpand::tilde(&self.log_file.to_string_lossy().into_owned()).into_owned();
        self.log_file = PathBuf::from(expanded);
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
