use crate::error::{EventBusError, EventBusErrorExt};
use crate::history::HistoryConfig;
use crate::leak::LeakDetectionOptions;
use crate::options::DEFAULT_PUBLISH_TIMEOUT;
use crate::recursion::DEFAULT_MAX_RECURSION_DEPTH;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Prefix of environment overrides, e.g. `COURIER__MAX_RECURSION_DEPTH=5`.
pub const ENV_PREFIX: &str = "COURIER";

/// Construction settings of an [`crate::EventBus`].
///
/// Missing keys fall back to their defaults; absent sections leave the feature disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_recursion_depth: usize,
    /// Handler timeout used when a publish call does not set one.
    pub default_timeout_ms: u64,
    pub history: Option<HistoryConfig>,
    pub leak_detection: Option<LeakDetectionOptions>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            default_timeout_ms: u64::try_from(DEFAULT_PUBLISH_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            history: None,
            leak_detection: None,
        }
    }
}

impl BusConfig {
    /// Loads settings from `path` (any format the `config` crate detects from the extension),
    /// overlaid with `COURIER__`-prefixed environment variables.
    ///
    /// Nested keys use double underscores: `COURIER__HISTORY__MAX_LENGTH=500`.
    ///
    /// # Errors
    /// Returns [`EventBusError::Config`] if the file is missing or malformed, or if the merged
    /// values do not deserialize.
    ///
    /// # Example
    /// ```rust,no_run
    /// use courier_event_bus::{BusConfig, EventBus};
    ///
    /// # fn main() -> Result<(), courier_event_bus::EventBusError> {
    /// let config = BusConfig::load("config/bus.toml")?;
    /// let bus = EventBus::from_config(&config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EventBusError> {
        let path = path.as_ref();
        info!("Loading event bus config from {}", path.display());

        Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()
            .context("Failed to build config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize config")
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
