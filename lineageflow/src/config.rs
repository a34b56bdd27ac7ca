//! Configuration types for the lineage pipeline.
//!
//! Every field has a serde default, so a partial JSON document is a valid
//! configuration. Values can be overridden from `LINEAGE_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::RedeliveryBackoff;
use crate::errors::ConfigError;

/// Configuration for one durable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name used in logs and errors.
    #[serde(default = "default_channel_name")]
    pub name: String,
    /// Maximum number of buffered messages, in flight included.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Maximum number of messages handed out per receive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a receive waits for a full batch, in seconds.
    #[serde(default = "default_batch_window")]
    pub batch_window_seconds: f64,
    /// How long a delivered message stays hidden, in seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: f64,
    /// Deliveries allowed before a message is dead-lettered.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

/// Largest accepted duration setting: one year.
const MAX_DURATION_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

fn check_seconds(field: impl Into<String>, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if value.is_finite() && lower_ok && value <= MAX_DURATION_SECONDS {
        return Ok(());
    }
    let lower = if allow_zero { "non-negative" } else { "positive" };
    Err(ConfigError::invalid(
        field,
        format!("must be a {lower} number of at most {MAX_DURATION_SECONDS} seconds"),
    ))
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn default_channel_name() -> String {
    "lineage-events".to_string()
}

fn default_capacity() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_window() -> f64 {
    1.0
}

fn default_visibility_timeout() -> f64 {
    30.0
}

fn default_max_receive_count() -> u32 {
    3
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
            capacity: default_capacity(),
            batch_size: default_batch_size(),
            batch_window_seconds: default_batch_window(),
            visibility_timeout_seconds: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

impl ChannelConfig {
    /// Creates a channel configuration with defaults and the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Defaults for the retrace channel: one request per receive and a
    /// visibility window of several minutes.
    #[must_use]
    pub fn retrace_defaults() -> Self {
        Self {
            name: "lineage-retrace".to_string(),
            capacity: 1_000,
            batch_size: 1,
            batch_window_seconds: 0.0,
            visibility_timeout_seconds: 300.0,
            max_receive_count: default_max_receive_count(),
        }
    }

    /// Sets the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the batching window.
    #[must_use]
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window_seconds = window.as_secs_f64();
        self
    }

    /// Sets the visibility timeout.
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the maximum receive count.
    #[must_use]
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count;
        self
    }

    /// Gets the batching window as a Duration.
    #[must_use]
    pub fn batch_window(&self) -> Duration {
        seconds(self.batch_window_seconds)
    }

    /// Gets the visibility timeout as a Duration.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        seconds(self.visibility_timeout_seconds)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let field = |f: &str| format!("{}.{f}", self.name);
        if self.capacity == 0 {
            return Err(ConfigError::invalid(field("capacity"), "must be at least 1"));
        }
        if self.batch_size == 0 || self.batch_size > self.capacity {
            return Err(ConfigError::invalid(
                field("batch_size"),
                format!("must be between 1 and capacity ({})", self.capacity),
            ));
        }
        check_seconds(field("batch_window_seconds"), self.batch_window_seconds, true)?;
        check_seconds(
            field("visibility_timeout_seconds"),
            self.visibility_timeout_seconds,
            false,
        )?;
        if self.max_receive_count == 0 {
            return Err(ConfigError::invalid(
                field("max_receive_count"),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for the lineage store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lifetime of a record after it was published; 0 disables expiry.
    #[serde(default = "default_record_ttl")]
    pub record_ttl_seconds: u64,
    /// How often the pipeline purges expired records, in seconds.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: f64,
    /// Delay before a failed write is redelivered.
    #[serde(default)]
    pub redelivery: RedeliveryBackoff,
}

fn default_record_ttl() -> u64 {
    30 * 24 * 3600
}

fn default_purge_interval() -> f64 {
    60.0
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            record_ttl_seconds: default_record_ttl(),
            purge_interval_seconds: default_purge_interval(),
            redelivery: RedeliveryBackoff::default(),
        }
    }
}

impl StoreConfig {
    /// Gets the purge interval as a Duration.
    #[must_use]
    pub fn purge_interval(&self) -> Duration {
        seconds(self.purge_interval_seconds)
    }
}

/// Configuration for the trace reconstructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetraceConfig {
    /// Upper bound on one reconstruction attempt, in seconds.
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_seconds: f64,
    /// Delete a tree's records once it is archived.
    #[serde(default)]
    pub purge_after_archive: bool,
    /// Actions to traverse; `None` traverses every action.
    #[serde(default)]
    pub traverse_actions: Option<Vec<String>>,
    /// Delay before a failed request is redelivered.
    #[serde(default)]
    pub redelivery: RedeliveryBackoff,
}

fn default_processing_timeout() -> f64 {
    60.0
}

impl Default for RetraceConfig {
    fn default() -> Self {
        Self {
            processing_timeout_seconds: default_processing_timeout(),
            purge_after_archive: false,
            traverse_actions: None,
            redelivery: RedeliveryBackoff::default(),
        }
    }
}

impl RetraceConfig {
    /// Gets the processing timeout as a Duration.
    #[must_use]
    pub fn processing_timeout(&self) -> Duration {
        seconds(self.processing_timeout_seconds)
    }
}

/// Configuration for the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory for archived trees; `None` keeps them in memory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Top-level configuration of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The channel between the ingress and the store writer.
    #[serde(default)]
    pub event_channel: ChannelConfig,
    /// The channel carrying retrace requests.
    #[serde(default = "ChannelConfig::retrace_defaults")]
    pub retrace_channel: ChannelConfig,
    /// Lineage store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Reconstructor settings.
    #[serde(default)]
    pub retrace: RetraceConfig,
    /// Archive settings.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_channel: ChannelConfig::default(),
            retrace_channel: ChannelConfig::retrace_defaults(),
            store: StoreConfig::default(),
            retrace: RetraceConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file, applies environment overrides and validates.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `LINEAGE_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars().filter(|(k, _)| k.starts_with("LINEAGE_")))
    }

    /// Applies overrides from key/value pairs. Unknown keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "LINEAGE_EVENT_BATCH_SIZE" => self.event_channel.batch_size = parse(key, value)?,
                "LINEAGE_EVENT_BATCH_WINDOW_SECONDS" => {
                    self.event_channel.batch_window_seconds = parse(key, value)?;
                }
                "LINEAGE_EVENT_VISIBILITY_TIMEOUT_SECONDS" => {
                    self.event_channel.visibility_timeout_seconds = parse(key, value)?;
                }
                "LINEAGE_EVENT_MAX_RECEIVE_COUNT" => {
                    self.event_channel.max_receive_count = parse(key, value)?;
                }
                "LINEAGE_EVENT_CAPACITY" => self.event_channel.capacity = parse(key, value)?,
                "LINEAGE_RETRACE_VISIBILITY_TIMEOUT_SECONDS" => {
                    self.retrace_channel.visibility_timeout_seconds = parse(key, value)?;
                }
                "LINEAGE_RETRACE_MAX_RECEIVE_COUNT" => {
                    self.retrace_channel.max_receive_count = parse(key, value)?;
                }
                "LINEAGE_RECORD_TTL_SECONDS" => self.store.record_ttl_seconds = parse(key, value)?,
                "LINEAGE_PROCESSING_TIMEOUT_SECONDS" => {
                    self.retrace.processing_timeout_seconds = parse(key, value)?;
                }
                "LINEAGE_PURGE_AFTER_ARCHIVE" => {
                    self.retrace.purge_after_archive = parse(key, value)?;
                }
                "LINEAGE_ARCHIVE_DIR" => {
                    self.archive.directory = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.event_channel.validate()?;
        self.retrace_channel.validate()?;

        let timeout = self.retrace.processing_timeout_seconds;
        check_seconds("retrace.processing_timeout_seconds", timeout, false)?;
        // A request must not reappear while its first attempt is still running.
        if self.retrace_channel.visibility_timeout_seconds < timeout {
            return Err(ConfigError::invalid(
                "retrace_channel.visibility_timeout_seconds",
                format!("must be at least the processing timeout ({timeout}s)"),
            ));
        }
        check_seconds(
            "store.purge_interval_seconds",
            self.store.purge_interval_seconds,
            false,
        )
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{value}'")))
}
