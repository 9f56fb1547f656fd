use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use galleria_core::config::DiscordConfig;
use galleria_core::storage::R2Config;
use galleria_core::SyncConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<galleria_core::Error> for ConfigError {
    fn from(error: galleria_core::Error) -> Self {
        Self::Invalid(error.to_string())
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Interval of the background sync timer; zero disables it.
    pub sync_interval: Duration,
    /// Bearer secret required on webhook calls when set.
    pub webhook_secret: Option<String>,
    pub rate_limit_window: Duration,
    pub force_sync_rate_limit_per_window: u32,
    pub webhook_rate_limit_per_window: u32,
    pub sync: SyncConfig,
    pub discord: Option<DiscordConfig>,
    pub r2: Option<R2Config>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("sync_interval", &self.sync_interval)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "force_sync_rate_limit_per_window",
                &self.force_sync_rate_limit_per_window,
            )
            .field(
                "webhook_rate_limit_per_window",
                &self.webhook_rate_limit_per_window,
            )
            .field("sync", &self.sync)
            .field("discord", &self.discord)
            .field("r2", &self.r2)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "GALLERIA_BIND_ADDR", "127.0.0.1:8080");

        let sync_interval_secs = value_or_default(&lookup, "SYNC_INTERVAL_SECS", "300")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SYNC_INTERVAL_SECS must be an integer in [0, 86400]".to_string(),
                )
            })?;
        if sync_interval_secs > 86_400 {
            return Err(ConfigError::Invalid(
                "SYNC_INTERVAL_SECS must be in [0, 86400]".to_string(),
            ));
        }

        let webhook_secret = optional_trimmed(&lookup, "WEBHOOK_SECRET");

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let force_sync_rate_limit_per_window =
            value_or_default(&lookup, "FORCE_SYNC_RATE_LIMIT_PER_WINDOW", "6")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "FORCE_SYNC_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]"
                            .to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&force_sync_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "FORCE_SYNC_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let webhook_rate_limit_per_window =
            value_or_default(&lookup, "WEBHOOK_RATE_LIMIT_PER_WINDOW", "30")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "WEBHOOK_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]"
                            .to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&webhook_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "WEBHOOK_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        let sync = SyncConfig::from_lookup(&lookup)?;
        let discord = DiscordConfig::from_lookup(&lookup)?;
        if discord.is_some() && sync.approved_role_ids.is_empty() {
            return Err(ConfigError::MissingVar("APPROVED_ROLE_IDS"));
        }
        let r2 = R2Config::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            sync_interval: Duration::from_secs(sync_interval_secs),
            webhook_secret,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            force_sync_rate_limit_per_window,
            webhook_rate_limit_per_window,
            sync,
            discord,
            r2,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
pub(crate) fn test_config(pairs: &[(&str, &str)]) -> AppConfig {
    let map: HashMap<&str, &str> = pairs.iter().copied().collect();
    AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap()
}
