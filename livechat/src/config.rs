//! Configuration values for each component.
//!
//! Every struct has named fields with sensible defaults and can be loaded from
//! JSON; missing fields fall back to [`Default`].

use eyre::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Parts requested from the live chat endpoints unless configured otherwise.
pub const DEFAULT_PARTS: &str = "id,snippet,authorDetails";

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay for the first retry (attempt 0).
    pub base: Duration,
    /// Upper bound on the un-jittered delay.
    pub max: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Fraction of the capped delay by which the result may be perturbed in
    /// either direction. `0.0` disables jitter.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// The default schedule with jitter turned off.
    pub fn without_jitter() -> Self {
        Self {
            jitter: 0.0,
            ..Self::default()
        }
    }
}

/// Settings for the interval-polling transport (`liveChatMessages.list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub live_chat_id: String,
    /// Comma-separated resource parts to request.
    pub parts: String,
    /// Page-size hint, sent as `maxResults`.
    pub page_size: u32,
    /// Lower clamp for the server-suggested polling interval.
    pub min_interval: Duration,
    /// Upper clamp for the server-suggested polling interval.
    pub max_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            live_chat_id: String::new(),
            parts: DEFAULT_PARTS.to_string(),
            page_size: 200,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

impl PollConfig {
    pub fn new(live_chat_id: impl Into<String>) -> Self {
        Self {
            live_chat_id: live_chat_id.into(),
            ..Self::default()
        }
    }
}

/// Settings for the persistent-connection transport (`liveChatMessages.streamList`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub live_chat_id: String,
    pub parts: String,
    /// Page-size hint, sent as `maxResults`.
    pub max_results: u32,
    /// Hard ceiling on any reconnect delay, including server `retry:` hints.
    ///
    /// Never lower than `backoff.max`; see [`StreamConfig::reconnect_ceiling`].
    pub max_reconnect_delay: Duration,
    pub backoff: BackoffConfig,
    /// Drop the first batch of a session started without a cursor, which
    /// replays recent history. Reconnects within the session never skip.
    pub skip_initial_batch: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            live_chat_id: String::new(),
            parts: DEFAULT_PARTS.to_string(),
            max_results: 2000,
            max_reconnect_delay: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            skip_initial_batch: false,
        }
    }
}

impl StreamConfig {
    pub fn new(live_chat_id: impl Into<String>) -> Self {
        Self {
            live_chat_id: live_chat_id.into(),
            ..Self::default()
        }
    }

    /// The effective reconnect cap, which is at least the backoff cap.
    pub fn reconnect_ceiling(&self) -> Duration {
        self.max_reconnect_delay.max(self.backoff.max)
    }
}

/// Settings for the TTL response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            capacity: 1000,
        }
    }
}

/// Settings for the daily quota ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u64,
    /// IANA time zone whose midnight resets the budget.
    pub reset_time_zone: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            reset_time_zone: "America/Los_Angeles".to_string(),
        }
    }
}

/// Which transport the facade should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Poll,
    Stream,
}

/// Settings for the bot facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub live_chat_id: String,
    /// How often the credential-refresh worker fetches a new token.
    pub refresh_interval: Duration,
    /// Deadline for a single token fetch.
    pub refresh_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            live_chat_id: String::new(),
            refresh_interval: Duration::from_secs(45 * 60),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl BotConfig {
    pub fn new(live_chat_id: impl Into<String>) -> Self {
        Self {
            live_chat_id: live_chat_id.into(),
            ..Self::default()
        }
    }
}

/// Everything the command-line runner needs, as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: Transport,
    pub bot: BotConfig,
    pub poll: PollConfig,
    pub stream: StreamConfig,
    pub quota: QuotaConfig,
}

impl Settings {
    /// Loads settings from a JSON file.
    ///
    /// The top-level `bot.live_chat_id` is copied into the transport configs
    /// when they do not name a chat of their own.
    pub async fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read settings from {}", path.display()))?;
        let mut settings: Self = serde_json::from_str(&raw).context("parse settings JSON")?;
        settings.propagate_chat_id();
        Ok(settings)
    }

    fn propagate_chat_id(&mut self) {
        if self.poll.live_chat_id.is_empty() {
            self.poll.live_chat_id = self.bot.live_chat_id.clone();
        }
        if self.stream.live_chat_id.is_empty() {
            self.stream.live_chat_id = self.bot.live_chat_id.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_use_defaults() {
        let mut settings: Settings = serde_json::from_str(
            r#"{"transport": "stream", "bot": {"live_chat_id": "chat-1"}, "poll": {"page_size": 50}}"#,
        )
        .unwrap();
        settings.propagate_chat_id();

        assert_eq!(settings.transport, Transport::Stream);
        assert_eq!(settings.poll.page_size, 50);
        assert_eq!(settings.poll.min_interval, Duration::from_secs(1));
        assert_eq!(settings.poll.live_chat_id, "chat-1");
        assert_eq!(settings.stream.live_chat_id, "chat-1");
        assert_eq!(settings.quota, QuotaConfig::default());
    }

    #[test]
    fn reconnect_ceiling_never_below_backoff_cap() {
        let mut config = StreamConfig::default();
        config.max_reconnect_delay = Duration::from_secs(5);
        assert_eq!(config.reconnect_ceiling(), config.backoff.max);
    }
}
