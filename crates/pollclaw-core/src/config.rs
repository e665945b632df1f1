//! PollClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PollClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollClawConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
}

fn default_db_path() -> String {
    "~/.pollclaw/polls.db".into()
}

impl Default for PollClawConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            discord: DiscordConfig::default(),
            reminder: ReminderConfig::default(),
        }
    }
}

impl PollClawConfig {
    /// Load config from the default path (~/.pollclaw/config.toml), or
    /// defaults when no file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PollClawError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| PollClawError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PollClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Environment overrides — the bot token is usually injected rather
    /// than written to disk.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("POLLCLAW_BOT_TOKEN") {
            if !token.is_empty() {
                self.discord.bot_token = token;
            }
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PollClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pollclaw")
    }

    /// Resolved database path (expands the leading `~`).
    pub fn db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest)
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// Discord REST API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".into()
}
fn default_request_timeout() -> u64 {
    10
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Reminder engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// How often the periodic trigger fires, in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Concurrent sends per reminder batch.
    #[serde(default = "default_reminder_batch")]
    pub reminder_batch_size: usize,
    /// Concurrent closures per closure batch.
    #[serde(default = "default_close_batch")]
    pub close_batch_size: usize,
    /// Advisory pause between batches, milliseconds. 0 disables.
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
    /// Retries per failed item before it is recorded as permanent.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Deadline query window: how far back to look for missed closures.
    #[serde(default = "default_lookbehind")]
    pub lookbehind_days: i64,
    /// Deadline query window: how far ahead to look for upcoming reminders.
    #[serde(default = "default_lookahead")]
    pub lookahead_days: i64,
    /// Member cache lifetime for mention resolution, seconds.
    #[serde(default = "default_member_cache_ttl")]
    pub member_cache_ttl_secs: u64,
    /// Wall-clock budget for one pass, seconds. 0 disables.
    #[serde(default = "default_pass_budget")]
    pub pass_budget_secs: u64,
}

fn default_tick_interval() -> u64 {
    300
}
fn default_reminder_batch() -> usize {
    20
}
fn default_close_batch() -> usize {
    15
}
fn default_batch_delay() -> u64 {
    100
}
fn default_max_retries() -> usize {
    2
}
fn default_lookbehind() -> i64 {
    7
}
fn default_lookahead() -> i64 {
    3
}
fn default_member_cache_ttl() -> u64 {
    300
}
fn default_pass_budget() -> u64 {
    0
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            reminder_batch_size: default_reminder_batch(),
            close_batch_size: default_close_batch(),
            batch_delay_ms: default_batch_delay(),
            max_retries: default_max_retries(),
            lookbehind_days: default_lookbehind(),
            lookahead_days: default_lookahead(),
            member_cache_ttl_secs: default_member_cache_ttl(),
            pass_budget_secs: default_pass_budget(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PollClawConfig::default();
        assert_eq!(config.reminder.reminder_batch_size, 20);
        assert_eq!(config.reminder.close_batch_size, 15);
        assert_eq!(config.reminder.batch_delay_ms, 100);
        assert_eq!(config.reminder.max_retries, 2);
        assert!(config.discord.bot_token.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            db_path = "/tmp/polls.db"

            [discord]
            bot_token = "abc123"

            [reminder]
            reminder_batch_size = 5
            max_retries = 1
        "#;

        let config: PollClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, "/tmp/polls.db");
        assert_eq!(config.discord.bot_token, "abc123");
        assert_eq!(config.reminder.reminder_batch_size, 5);
        assert_eq!(config.reminder.max_retries, 1);
        // Untouched fields fall back to defaults
        assert_eq!(config.reminder.close_batch_size, 15);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: PollClawConfig = toml::from_str("").unwrap();
        assert_eq!(config.reminder.tick_interval_secs, 300);
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
    }

    #[test]
    fn test_home_dir() {
        let home = PollClawConfig::home_dir();
        assert!(home.to_string_lossy().contains("pollclaw"));
    }
}
