//! Exporter configuration, loadable from TOML.

use serde::Deserialize;
use std::path::Path;

/// Pending statements that trigger an automatic flush.
pub const DEFAULT_BATCH_THRESHOLD: usize = 200_000;

/// Store cache size in bytes (800 MiB).
pub const DEFAULT_CACHE_SIZE: u64 = 800 * 1024 * 1024;

/// Store page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// How statements reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementMode {
    /// Prepared statements with bound parameters.
    #[default]
    Prepared,
    /// Textual statements with every value rendered as an escaped literal.
    Literal,
}

/// Exporter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Number of pending statements that triggers a flush.
    pub batch_threshold: usize,

    /// Store cache size in bytes.
    pub cache_size: u64,

    /// Store page size in bytes. Only takes effect on a new store.
    pub page_size: u32,

    /// Trade durability for throughput (see
    /// [`SessionStore::enable_performance_mode`](crate::SessionStore::enable_performance_mode)).
    pub performance_mode: bool,

    pub statement_mode: StatementMode,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            cache_size: DEFAULT_CACHE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            performance_mode: false,
            statement_mode: StatementMode::Prepared,
        }
    }
}

impl ExportConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold;
        self
    }

    pub fn with_statement_mode(mut self, mode: StatementMode) -> Self {
        self.statement_mode = mode;
        self
    }

    pub fn with_performance_mode(mut self, enabled: bool) -> Self {
        self.performance_mode = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_threshold == 0 {
            return Err(ConfigError::Invalid(
                "batch_threshold must be at least 1".to_string(),
            ));
        }
        if !self.page_size.is_power_of_two() || !(512..=65536).contains(&self.page_size) {
            return Err(ConfigError::Invalid(format!(
                "page_size must be a power of two between 512 and 65536, got {}",
                self.page_size
            )));
        }
        Ok(())
    }

    /// The cache size expressed in pages, as the store expects it.
    pub fn cache_pages(&self) -> u64 {
        self.cache_size / u64::from(self.page_size)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
