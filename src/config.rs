//! Configuration file parser for `config.toml`.
//!
//! The config file is optional. A missing file yields `Config::default()`,
//! though a config without any feeds fails validation unless feeds are
//! supplied on the command line. Unknown keys are accepted and logged.
use crate::feed::SourceDescriptor;
use crate::monitor::{MonitorConfig, RecencyWindow, MAX_WORKERS};
use crate::util::{validate_feed_url, UrlValidationError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Refresh interval used when neither the CLI nor the config sets one.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
/// How far back the recency window reaches by default.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_WORKERS: usize = 2;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config: no news feeds")]
    NoFeeds,

    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidFeedUrl {
        url: String,
        #[source]
        reason: UrlValidationError,
    },

    #[error("Invalid date '{0}': expected YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339")]
    InvalidDate(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One `[[feeds]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Display title; defaults to the URL's host.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub color: String,
}

impl FeedConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            color: String::new(),
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        let title = match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => url::Url::parse(&self.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
                .unwrap_or_else(|| self.url.clone()),
        };
        SourceDescriptor::new(self.url.as_str(), title, self.color.as_str())
    }
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between refresh cycles. 0 falls back to the default.
    pub refresh_interval_secs: u64,

    /// Concurrent fetch workers (clamped to 1..=8).
    pub workers: usize,

    /// Oldest publication date to keep. `None` = seven days before startup.
    #[serde(deserialize_with = "deserialize_last_date")]
    pub last_date: Option<DateTime<Utc>>,

    /// How far past the fetch time an article may be dated and still be kept.
    pub clock_skew_secs: u64,

    /// Write debug logs to a dated file in the working directory.
    pub debug: bool,

    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            workers: DEFAULT_WORKERS,
            last_date: None,
            clock_skew_secs: 0,
            debug: false,
            feeds: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub feeds: Vec<String>,
    pub refresh_interval_secs: Option<u64>,
    pub last_date: Option<DateTime<Utc>>,
    pub workers: Option<usize>,
    pub debug: bool,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "refresh_interval_secs",
        "workers",
        "last_date",
        "clock_skew_secs",
        "debug",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Find the config file when none was given explicitly.
    ///
    /// Checks `$XDG_CONFIG_HOME/feedwatch/config.toml`,
    /// `~/.config/feedwatch/config.toml`, then `~/.feedwatch.toml`.
    pub fn discover() -> Option<PathBuf> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let xdg = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
        Self::candidate_paths(home.as_deref(), xdg.as_deref())
            .into_iter()
            .find(|p| p.is_file())
    }

    fn candidate_paths(home: Option<&Path>, xdg_config_home: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(xdg) = xdg_config_home {
            paths.push(xdg.join("feedwatch").join("config.toml"));
        }
        if let Some(home) = home {
            paths.push(home.join(".config").join("feedwatch").join("config.toml"));
            paths.push(home.join(".feedwatch.toml"));
        }
        paths
    }

    /// Fold command-line values in. CLI feeds are appended to the file's.
    pub fn apply(&mut self, overrides: Overrides) {
        self.feeds
            .extend(overrides.feeds.into_iter().map(FeedConfig::from_url));
        self.refresh_interval_secs =
            effective_interval(overrides.refresh_interval_secs, self.refresh_interval_secs);
        if let Some(last_date) = overrides.last_date {
            self.last_date = Some(last_date);
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        self.debug |= overrides.debug;
    }

    /// Reject configs the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        for feed in &self.feeds {
            validate_feed_url(&feed.url).map_err(|reason| ConfigError::InvalidFeedUrl {
                url: feed.url.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Build the monitor's runtime settings, resolving defaults against `now`.
    pub fn monitor_config(&self, now: DateTime<Utc>) -> MonitorConfig {
        let lower_bound = self
            .last_date
            .unwrap_or_else(|| now - TimeDelta::days(DEFAULT_LOOKBACK_DAYS));
        let sources: Arc<[SourceDescriptor]> =
            self.feeds.iter().map(FeedConfig::descriptor).collect();

        MonitorConfig {
            sources,
            refresh_interval: Duration::from_secs(effective_interval(
                None,
                self.refresh_interval_secs,
            )),
            window: RecencyWindow::new(lower_bound)
                .with_skew_tolerance(Duration::from_secs(self.clock_skew_secs)),
            workers: self.workers.clamp(1, MAX_WORKERS),
        }
    }
}

/// CLI value if positive, else config value if positive, else the default.
fn effective_interval(option: Option<u64>, configured: u64) -> u64 {
    match option {
        Some(secs) if secs > 0 => secs,
        _ if configured > 0 => configured,
        _ => DEFAULT_REFRESH_INTERVAL_SECS,
    }
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` (both UTC) or RFC 3339.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, ConfigError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(ConfigError::InvalidDate(s.to_string()))
}

fn deserialize_last_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_date(&s).map_err(serde::de::Error::custom))
        .transpose()
}

// ============================================================================
// Tests
// ============================================================================
