use crate::bus::EventBus;
use crate::config::BusConfig;
use crate::error::EventBusError;
use crate::history::HistoryConfig;
use crate::leak::LeakDetectionOptions;
use std::time::Duration;

/// Fluent construction of an [`EventBus`]; see [`EventBus::builder`].
#[derive(Debug, Clone, Default)]
#[must_use = "A builder does nothing until `build` is called"]
pub struct EventBusBuilder {
    config: BusConfig,
}

impl EventBusBuilder {
    pub const fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.config.max_recursion_depth = depth;
        self
    }

    /// Handler timeout for publish calls that do not set their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables history recording with room for `max_length` entries.
    pub const fn history(mut self, max_length: usize) -> Self {
        self.config.history = Some(HistoryConfig { max_length });
        self
    }

    pub const fn leak_detection(mut self, options: LeakDetectionOptions) -> Self {
        self.config.leak_detection = Some(options);
        self
    }

    /// Replaces every setting with a loaded [`BusConfig`].
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] for a zero recursion depth or history length.
    pub fn build(self) -> Result<EventBus, EventBusError> {
        EventBus::from_config(&self.config)
    }
}
