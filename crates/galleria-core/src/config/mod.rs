//! Runtime configuration for the synchronizer and the Discord source.
//!
//! Values come from environment variables through a lookup function so
//! parsing can be tested without touching the process environment.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::models::ItemLabels;
use crate::retry::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const DEFAULT_DISCORD_API_URL: &str = "https://discord.com/api/v10";
const DEFAULT_APPROVAL_EMOJI: &str = "\u{1F451}";

/// Tunables of the gallery synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum interval between cheap message-id polls.
    pub quick_check_ttl: Duration,
    /// Maximum age of the last full sync before one is forced.
    pub full_sync_ttl: Duration,
    /// Minimum interval between stored-asset existence audits.
    pub asset_audit_ttl: Duration,
    /// How long a role-approval lookup is trusted.
    pub role_cache_ttl: Duration,
    /// Age after which a held processing lock is treated as abandoned.
    pub lock_max_duration: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub storage_timeout: Duration,
    pub download_retry: RetryPolicy,
    /// Object key of the persisted snapshot document.
    pub cache_key: String,
    /// Key prefix under which gallery assets are stored.
    pub object_prefix: String,
    pub orphan_list_limit: usize,
    pub approval_emoji: String,
    pub approved_role_ids: BTreeSet<String>,
    pub labels: ItemLabels,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quick_check_ttl: Duration::from_secs(30),
            full_sync_ttl: Duration::from_secs(300),
            asset_audit_ttl: Duration::from_secs(6 * 3_600),
            role_cache_ttl: Duration::from_secs(600),
            lock_max_duration: Duration::from_secs(120),
            batch_size: 5,
            batch_pause: Duration::from_millis(250),
            storage_timeout: Duration::from_secs(15),
            download_retry: RetryPolicy::default(),
            cache_key: "gallery.json".to_string(),
            object_prefix: "gallery".to_string(),
            orphan_list_limit: 1_000,
            approval_emoji: DEFAULT_APPROVAL_EMOJI.to_string(),
            approved_role_ids: BTreeSet::new(),
            labels: ItemLabels::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let quick_check_ttl = secs(&lookup, "QUICK_CHECK_TTL_SECS", 30, 0..=86_400)?;
        let full_sync_ttl = secs(&lookup, "FULL_SYNC_TTL_SECS", 300, 0..=604_800)?;
        let asset_audit_ttl = secs(&lookup, "ASSET_AUDIT_TTL_SECS", 21_600, 0..=2_592_000)?;
        let role_cache_ttl = secs(&lookup, "ROLE_CACHE_TTL_SECS", 600, 0..=86_400)?;
        let lock_max_duration = secs(&lookup, "LOCK_MAX_DURATION_SECS", 120, 10..=3_600)?;
        let storage_timeout = secs(&lookup, "STORAGE_TIMEOUT_SECS", 15, 1..=300)?;

        let batch_size = ranged(&lookup, "BATCH_SIZE", 5_usize, 1..=50)?;
        let batch_pause = Duration::from_millis(ranged(&lookup, "BATCH_PAUSE_MS", 250, 0..=10_000)?);

        let download_retry = RetryPolicy {
            max_attempts: ranged(&lookup, "DOWNLOAD_MAX_ATTEMPTS", 3, 2..=10)?,
            base_delay: Duration::from_millis(ranged(
                &lookup,
                "DOWNLOAD_RETRY_BASE_MS",
                500,
                0..=30_000,
            )?),
            max_delay: defaults.download_retry.max_delay,
        };

        let cache_key = value_or_default(&lookup, "GALLERY_CACHE_KEY", &defaults.cache_key)
            .trim_matches('/')
            .to_string();
        if cache_key.is_empty() || cache_key.contains("..") {
            return Err(Error::Config(
                "GALLERY_CACHE_KEY must be a non-empty object key without `..`".to_string(),
            ));
        }

        let object_prefix =
            value_or_default(&lookup, "GALLERY_OBJECT_PREFIX", &defaults.object_prefix)
                .trim_matches('/')
                .to_string();
        if object_prefix.is_empty() || object_prefix.contains("..") {
            return Err(Error::Config(
                "GALLERY_OBJECT_PREFIX must be a non-empty key prefix without `..`".to_string(),
            ));
        }
        if cache_key.starts_with(&format!("{object_prefix}/")) {
            return Err(Error::Config(
                "GALLERY_CACHE_KEY must live outside GALLERY_OBJECT_PREFIX".to_string(),
            ));
        }

        let orphan_list_limit = ranged(&lookup, "ORPHAN_LIST_LIMIT", 1_000_usize, 1..=10_000)?;
        let approval_emoji = value_or_default(&lookup, "APPROVAL_EMOJI", DEFAULT_APPROVAL_EMOJI);
        let approved_role_ids = parse_id_list(lookup("APPROVED_ROLE_IDS").as_deref());

        let labels = ItemLabels {
            alt_prefix: value_or_default(&lookup, "ALT_TEXT_PREFIX", &defaults.labels.alt_prefix),
            untitled: value_or_default(&lookup, "UNTITLED_LABEL", &defaults.labels.untitled),
        };

        Ok(Self {
            quick_check_ttl,
            full_sync_ttl,
            asset_audit_ttl,
            role_cache_ttl,
            lock_max_duration,
            batch_size,
            batch_pause,
            storage_timeout,
            download_retry,
            cache_key,
            object_prefix,
            orphan_list_limit,
            approval_emoji,
            approved_role_ids,
            labels,
        })
    }
}

/// Discord REST API access for the gallery channel.
#[derive(Clone, PartialEq, Eq)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub guild_id: String,
    pub channel_id: String,
    pub api_url: String,
    /// Page size for the channel message listing (Discord caps it at 100).
    pub message_limit: u32,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DiscordConfig")
            .field("bot_token", &"[REDACTED]")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("api_url", &self.api_url)
            .field("message_limit", &self.message_limit)
            .field("request_timeout", &self.request_timeout)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

impl DiscordConfig {
    /// Returns `Ok(None)` when none of the Discord variables are set and an
    /// error when only part of them is.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let bot_token = optional_trimmed(&lookup, "DISCORD_BOT_TOKEN");
        let guild_id = optional_trimmed(&lookup, "DISCORD_GUILD_ID");
        let channel_id = optional_trimmed(&lookup, "GALLERY_CHANNEL_ID");

        if bot_token.is_none() && guild_id.is_none() && channel_id.is_none() {
            return Ok(None);
        }

        let mut missing = Vec::new();
        if bot_token.is_none() {
            missing.push("DISCORD_BOT_TOKEN");
        }
        if guild_id.is_none() {
            missing.push("DISCORD_GUILD_ID");
        }
        if channel_id.is_none() {
            missing.push("GALLERY_CHANNEL_ID");
        }
        let (Some(bot_token), Some(guild_id), Some(channel_id)) = (bot_token, guild_id, channel_id)
        else {
            return Err(Error::Config(format!(
                "Discord configuration is incomplete. Missing: {}",
                missing.join(", ")
            )));
        };

        let api_url = value_or_default(&lookup, "DISCORD_API_URL", DEFAULT_DISCORD_API_URL)
            .trim_end_matches('/')
            .to_string();
        if !is_http_url(&api_url) {
            return Err(Error::Config(
                "DISCORD_API_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Some(Self {
            bot_token,
            guild_id,
            channel_id,
            api_url,
            message_limit: ranged(&lookup, "MESSAGE_FETCH_LIMIT", 100, 1..=100)?,
            request_timeout: secs(&lookup, "DISCORD_TIMEOUT_SECS", 8, 1..=120)?,
            download_timeout: secs(&lookup, "DOWNLOAD_TIMEOUT_SECS", 20, 1..=300)?,
        }))
    }
}

/// Split a comma/whitespace separated id list into a set.
pub fn parse_id_list(raw: Option<&str>) -> BTreeSet<String> {
    raw.unwrap_or_default()
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn secs(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration> {
    ranged(lookup, name, default, range).map(Duration::from_secs)
}

fn ranged<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: std::ops::RangeInclusive<T>,
) -> Result<T>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| {
        Error::Config(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(Error::Config(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
