use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::recovery::{Backoff, RetryPolicy};

/// Configuration for the pause overlay controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint and credential settings
    pub server: ServerConfig,

    /// Page-state selectors
    pub selectors: SelectorConfig,

    /// Timer thresholds and guards
    pub timing: TimingConfig,

    /// Metadata fetch behaviour
    pub fetch: FetchConfig,

    /// Initialization retry settings
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the metadata endpoint
    pub base_url: String,

    /// Header name carrying the credential token
    pub auth_header: String,

    /// Key of the persisted credential record
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Selector matching the tracked video element
    pub video: String,

    /// Selectors probed for the active item id, first match wins
    pub item_id: Vec<String>,

    /// Attribute holding the item id on a matched control
    pub item_id_attribute: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Quiet period before the overlay may appear (ms)
    pub inactivity_threshold_ms: u64,

    /// Window inside which a burst of move events counts once (ms)
    pub activity_debounce_ms: u64,

    /// Ceiling releasing a stuck show/hide transition guard (ms)
    pub transition_ceiling_ms: u64,

    /// Interval of the session liveness re-scan (ms)
    pub liveness_interval_ms: u64,

    /// Ignore a pause landing this soon after attach, to swallow the
    /// spurious pause some players raise while seeking on startup.
    /// `None` disables the grace window.
    pub startup_pause_grace_ms: Option<u64>,
}

/// What to render when the metadata fetch has exhausted its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFallback {
    /// Show the generic "information unavailable" content
    Degraded,
    /// Keep the overlay suppressed for that item
    Suppress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Total fetch attempts per item
    pub max_attempts: u32,

    /// Base delay between fetch attempts (ms)
    pub base_delay_ms: u64,

    /// Delay growth between attempts
    pub backoff: Backoff,

    /// Per-request timeout (seconds)
    pub request_timeout_seconds: u64,

    /// Degradation policy after exhausted retries
    pub fallback: FetchFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Credential discovery at initialization
    pub credentials: RetrySettings,

    /// Mutation feed subscription
    pub observer: RetrySettings,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff,
        )
    }
}

impl FetchConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff,
        )
    }
}

impl TimingConfig {
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.inactivity_threshold_ms)
    }

    pub fn activity_debounce(&self) -> Duration {
        Duration::from_millis(self.activity_debounce_ms)
    }

    pub fn transition_ceiling(&self) -> Duration {
        Duration::from_millis(self.transition_ceiling_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn startup_pause_grace(&self) -> Option<Duration> {
        self.startup_pause_grace_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from the usual file locations, falling back
    /// to environment overrides
    pub fn load() -> Result<Self> {
        let config_paths = [
            "pause-overlay.toml",
            "config/pause-overlay.toml",
            "~/.config/pause-overlay/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path.display(), e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Cannot parse config file {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Defaults with environment variable overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("PAUSE_OVERLAY_BASE_URL") {
            config.server.base_url = base_url;
        }

        if let Ok(threshold) = std::env::var("PAUSE_OVERLAY_INACTIVITY_MS") {
            config.timing.inactivity_threshold_ms = threshold.parse().unwrap_or(10_000);
        }

        if let Ok(attempts) = std::env::var("PAUSE_OVERLAY_FETCH_ATTEMPTS") {
            config.fetch.max_attempts = attempts.parse().unwrap_or(3);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.is_empty() {
            return Err(anyhow!("server.base_url must not be empty"));
        }

        if self.selectors.video.is_empty() {
            return Err(anyhow!("selectors.video must not be empty"));
        }

        if self.selectors.item_id.is_empty() {
            return Err(anyhow!("selectors.item_id must list at least one selector"));
        }

        if self.timing.inactivity_threshold_ms == 0 {
            return Err(anyhow!("timing.inactivity_threshold_ms must be greater than 0"));
        }

        if self.fetch.max_attempts == 0 {
            return Err(anyhow!("fetch.max_attempts must be greater than 0"));
        }

        Ok(())
    }

    /// Runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Pause Overlay Configuration:\n\
            - Endpoint: {}\n\
            - Video selector: {}\n\
            - Inactivity threshold: {}ms\n\
            - Fetch attempts: {} ({:?} backoff, base {}ms)\n\
            - Fallback: {:?}\n\
            - Startup pause grace: {}",
            self.server.base_url,
            self.selectors.video,
            self.timing.inactivity_threshold_ms,
            self.fetch.max_attempts,
            self.fetch.backoff,
            self.fetch.base_delay_ms,
            self.fetch.fallback,
            match self.timing.startup_pause_grace_ms {
                Some(ms) => format!("{}ms", ms),
                None => "off".to_string(),
            }
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            selectors: SelectorConfig::default(),
            timing: TimingConfig::default(),
            fetch: FetchConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8096".to_string(),
            auth_header: "X-Emby-Token".to_string(),
            storage_key: "jellyfin_credentials".to_string(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            video: ".videoPlayerContainer video".to_string(),
            item_id: vec![
                ".btnUserRating".to_string(),
                ".videoOsdBottom [data-itemid]".to_string(),
            ],
            item_id_attribute: "data-id".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_ms: 10_000,
            activity_debounce_ms: 150,
            transition_ceiling_ms: 300,
            liveness_interval_ms: 2_000,
            startup_pause_grace_ms: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff: Backoff::Linear,
            request_timeout_seconds: 10,
            fallback: FetchFallback::Degraded,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff: Backoff::Exponential,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            credentials: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 1_000,
                backoff: Backoff::Exponential,
            },
            observer: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 2_000,
                backoff: Backoff::Exponential,
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.server.base_url = base_url.into();
        self
    }

    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.config.timing.inactivity_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_fetch_attempts(mut self, attempts: u32) -> Self {
        self.config.fetch.max_attempts = attempts;
        self
    }

    pub fn with_fetch_base_delay(mut self, delay: Duration) -> Self {
        self.config.fetch.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_fallback(mut self, fallback: FetchFallback) -> Self {
        self.config.fetch.fallback = fallback;
        self
    }

    pub fn with_startup_pause_grace(mut self, grace: Option<Duration>) -> Self {
        self.config.timing.startup_pause_grace_ms = grace.map(|g| g.as_millis() as u64);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
