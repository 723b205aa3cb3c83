use crate::error::EventBusError;
use crate::pattern::matches;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Capacity used by `enable_history(None)`.
pub const DEFAULT_HISTORY_LENGTH: usize = 100;

/// A delivered event as recorded by the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// History settings as they appear in [`crate::BusConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_length: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_length: DEFAULT_HISTORY_LENGTH }
    }
}

/// Bounded FIFO of resolved `(event, data)` pairs.
#[derive(Debug)]
pub(crate) struct HistoryBuffer {
    enabled: bool,
    max_length: usize,
    entries: VecDeque<HistoryEntry>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self { enabled: false, max_length: DEFAULT_HISTORY_LENGTH, entries: VecDeque::new() }
    }
}

impl HistoryBuffer {
    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] if `max_length` is zero.
    pub(crate) fn enable(&mut self, max_length: Option<usize>) -> Result<(), EventBusError> {
        let max_length = max_length.unwrap_or(DEFAULT_HISTORY_LENGTH);
        if max_length == 0 {
            return Err(EventBusError::InvalidCapacity {
                message: "history length must be >= 1".into(),
                context: None,
            });
        }
        self.enabled = true;
        self.max_length = max_length;
        self.trim();
        Ok(())
    }

    pub(crate) const fn disable(&mut self) {
        self.enabled = false;
    }

    pub(crate) const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record(&mut self, event: &str, data: &Value) {
        if !self.enabled {
            return;
        }
        self.entries.push_back(HistoryEntry {
            event: event.to_owned(),
            data: data.clone(),
            timestamp: Utc::now(),
        });
        self.trim();
    }

    pub(crate) fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Recorded entries selected by `pattern`, oldest first.
    pub(crate) fn matching(&self, pattern: &str) -> Vec<HistoryEntry> {
        self.entries.iter().filter(|e| matches(pattern, &e.event)).cloned().collect()
    }

    pub(crate) fn last_matching(&self, pattern: &str) -> Option<HistoryEntry> {
        self.entries.iter().rev().find(|e| matches(pattern, &e.event)).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_length {
            self.entries.pop_front();
        }
    }
}
