use crate::handler::{Filter, Schema, Transform};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout applied to each handler invocation of a publish call.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(5000);

/// Delivery priority. Higher values run first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGH: Self = Self(100);
    pub const NORMAL: Self = Self(0);
    pub const LOW: Self = Self(-100);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// How failures inside a fan-out are propagated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorPolicy {
    /// Discard the failure and continue with the next subscription.
    Silent,
    /// Log the failure and continue with the next subscription.
    #[default]
    LogAndContinue,
    /// Log the failure, stop the fan-out and resolve `false`.
    CancelOnError,
    /// Stop the fan-out and return the failure from `publish`.
    Throw,
}

/// Per-call options of [`crate::EventBus::publish`].
///
/// A bare `u64` converts into options with that timeout in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub cancelable: bool,
    /// Falls back to the bus default when `None`.
    pub timeout: Option<Duration>,
    pub error_policy: ErrorPolicy,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

impl From<u64> for PublishOptions {
    fn from(timeout_ms: u64) -> Self {
        Self::default().timeout(Duration::from_millis(timeout_ms))
    }
}

impl From<Duration> for PublishOptions {
    fn from(timeout: Duration) -> Self {
        Self::default().timeout(timeout)
    }
}

impl From<ErrorPolicy> for PublishOptions {
    fn from(policy: ErrorPolicy) -> Self {
        Self::default().error_policy(policy)
    }
}

impl From<()> for PublishOptions {
    fn from((): ()) -> Self {
        Self::default()
    }
}

/// Per-subscription behaviour modifiers.
///
/// # Examples
/// ```rust
/// use courier_event_bus::{Filter, Priority, SubscribeOptions};
/// use std::time::Duration;
///
/// let options = SubscribeOptions::new()
///     .priority(Priority::HIGH)
///     .filter(Filter::sync(|data| data["active"] == true))
///     .throttle(Duration::from_millis(250))
///     .once();
/// assert!(options.is_once());
/// ```
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub(crate) priority: Priority,
    pub(crate) filters: Vec<Filter>,
    pub(crate) transform: Option<Transform>,
    pub(crate) schema: Option<Schema>,
    pub(crate) schema_error_policy: ErrorPolicy,
    pub(crate) once: bool,
    pub(crate) debounce: Option<Duration>,
    pub(crate) throttle: Option<Duration>,
    pub(crate) replay_last_event: bool,
    pub(crate) replay_history: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            filters: Vec::new(),
            transform: None,
            schema: None,
            schema_error_policy: ErrorPolicy::CancelOnError,
            once: false,
            debounce: None,
            throttle: None,
            replay_last_event: false,
            replay_history: false,
        }
    }
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Adds a filter; all filters must pass for a delivery.
    #[must_use = "Options must be passed to subscribe to take effect"]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Policy applied when the schema rejects a payload. Defaults to `CancelOnError`.
    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn schema_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.schema_error_policy = policy;
        self
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// A zero duration disables debouncing.
    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn debounce(mut self, window: Duration) -> Self {
        self.debounce = if window.is_zero() { None } else { Some(window) };
        self
    }

    /// A zero duration disables throttling.
    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn throttle(mut self, window: Duration) -> Self {
        self.throttle = if window.is_zero() { None } else { Some(window) };
        self
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn replay_last_event(mut self) -> Self {
        self.replay_last_event = true;
        self
    }

    #[must_use = "Options must be passed to subscribe to take effect"]
    pub const fn replay_history(mut self) -> Self {
        self.replay_history = true;
        self
    }

    #[must_use]
    pub const fn is_once(&self) -> bool {
        self.once
    }
}
