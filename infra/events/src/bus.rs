use crate::builder::EventBusBuilder;
use crate::config::BusConfig;
use crate::dispatch::Call;
use crate::error::EventBusError;
use crate::handler::{Handler, Middleware};
use crate::history::{HistoryBuffer, HistoryEntry};
use crate::leak::{LeakDetectionOptions, LeakDetector};
use crate::middleware::{self, MiddlewareEntry, MiddlewareId, Pipeline};
use crate::options::{DEFAULT_PUBLISH_TIMEOUT, Priority, PublishOptions, SubscribeOptions};
use crate::pattern::matches;
use crate::recursion::{DEFAULT_MAX_RECURSION_DEPTH, RecursionGuard};
use crate::registry::{Registry, Subscription, SubscriptionId};
use crate::timers::TimerCoordinator;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A read-only description of one live subscription or registered middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: String,
    pub pattern: String,
    pub is_middleware: bool,
    /// Only set for subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// State owned by one bus; shared by every clone of the handle and weakly by timer tasks.
#[derive(Debug)]
pub(crate) struct BusInner {
    pub(crate) registry: RwLock<Registry>,
    pub(crate) pipeline: RwLock<Pipeline>,
    pub(crate) history: Mutex<HistoryBuffer>,
    pub(crate) leaks: Mutex<LeakDetector>,
    pub(crate) timers: TimerCoordinator,
    pub(crate) recursion: RecursionGuard,
    pub(crate) default_timeout: Duration,
}

impl BusInner {
    fn new(max_recursion_depth: usize, default_timeout: Duration) -> Self {
        Self {
            registry: RwLock::default(),
            pipeline: RwLock::default(),
            history: Mutex::default(),
            leaks: Mutex::default(),
            timers: TimerCoordinator::default(),
            recursion: RecursionGuard::new(max_recursion_depth),
            default_timeout,
        }
    }

    /// Unregisters the subscription with `id`, returning whether it was live.
    pub(crate) fn retire(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(removed) = registry.remove_id(id) else {
            return false;
        };
        let live = registry.count(&removed.pattern);
        drop(registry);

        self.released(&removed, live);
        true
    }

    fn released(&self, subscription: &Subscription, live: usize) {
        self.timers.release(&subscription.id);
        self.leaks.lock().on_unsubscribe(&subscription.pattern, live);
        trace!(pattern = %subscription.pattern, subscription = %subscription.id, "Unsubscribed");
    }
}

/// An in-process publish/subscribe bus with pattern routing.
///
/// Events are dot-separated names (`user.created`); subscriptions use patterns where a `*` segment
/// matches any single segment and a lone `*` matches everything. Each `publish` call runs the
/// matching middleware, records the resolved event in the optional history, then delivers to
/// every matching subscription one after another, highest priority first.
///
/// The handle is cheap to clone; clones share the same subscriptions.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH)
    }

    /// Creates a bus allowing `depth` nested publishes of the same event (at least one).
    #[must_use]
    pub fn with_max_recursion_depth(depth: usize) -> Self {
        Self { inner: Arc::new(BusInner::new(depth.max(1), DEFAULT_PUBLISH_TIMEOUT)) }
    }

    /// Starts a fluent [`EventBusBuilder`].
    ///
    /// # Examples
    /// ```rust
    /// use courier_event_bus::EventBus;
    /// use std::time::Duration;
    ///
    /// # fn main() -> Result<(), courier_event_bus::EventBusError> {
    /// let bus = EventBus::builder()
    ///     .max_recursion_depth(5)
    ///     .default_timeout(Duration::from_secs(1))
    ///     .history(50)
    ///     .build()?;
    /// assert!(bus.is_history_enabled());
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Creates a bus from a loaded [`BusConfig`].
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] for a zero recursion depth or history length.
    pub fn from_config(config: &BusConfig) -> Result<Self, EventBusError> {
        if config.max_recursion_depth == 0 {
            return Err(EventBusError::InvalidCapacity {
                message: "max recursion depth must be >= 1".into(),
                context: None,
            });
        }

        let inner = BusInner::new(config.max_recursion_depth, config.default_timeout());
        if let Some(history) = config.history {
            inner.history.lock().enable(Some(history.max_length))?;
        }
        if let Some(options) = config.leak_detection {
            inner.leaks.lock().enable(options);
        }
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Registers `handler` for every event matching `pattern`.
    ///
    /// When the options ask for a replay, matching history entries are delivered to `handler`
    /// before this returns.
    ///
    /// # Errors
    /// Returns [`EventBusError::EmptyName`] if `pattern` is empty.
    ///
    /// # Examples
    /// ```rust
    /// use courier_event_bus::{EventBus, Handler, SubscribeOptions, Priority};
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), courier_event_bus::EventBusError> {
    /// let bus = EventBus::new();
    /// let handler = Handler::sync(|envelope| {
    ///     assert_eq!(envelope.event(), "user.created");
    ///     Ok(())
    /// });
    /// let id = bus.subscribe("user.*", handler, SubscribeOptions::new().priority(Priority::HIGH)).await?;
    /// assert!(bus.has_subscription(&id));
    /// assert!(bus.publish("user.created", json!({"id": 1}), ()).await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, EventBusError> {
        if pattern.is_empty() {
            return Err(EventBusError::empty_name("Pattern cannot be empty."));
        }

        let subscription = {
            let mut registry = self.inner.registry.write();
            let subscription = registry.insert(pattern, handler, &options);
            self.inner.leaks.lock().on_subscribe(&subscription.pattern, registry.subscriptions(pattern));
            subscription
        };
        trace!(pattern, subscription = %subscription.id, priority = subscription.priority.0, "Subscribed");

        if options.replay_history || options.replay_last_event {
            let entries = {
                let history = self.inner.history.lock();
                if options.replay_history {
                    history.matching(pattern)
                } else {
                    history.last_matching(pattern).into_iter().collect()
                }
            };
            self.inner.replay(&subscription, entries).await;
        }

        Ok(subscription.id.clone())
    }

    /// Same as [`EventBus::subscribe`] with the subscription removed after its first delivery.
    ///
    /// # Errors
    /// Returns [`EventBusError::EmptyName`] if `pattern` is empty.
    pub async fn subscribe_once(
        &self,
        pattern: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, EventBusError> {
        self.subscribe(pattern, handler, options.once()).await
    }

    /// Removes the first subscription under exactly `pattern` registered with `handler`.
    ///
    /// Returns `false` when nothing was removed; an unknown pattern is logged, not an error.
    ///
    /// # Errors
    /// Returns [`EventBusError::EmptyName`] if `pattern` is empty.
    pub fn unsubscribe(&self, pattern: &str, handler: &Handler) -> Result<bool, EventBusError> {
        if pattern.is_empty() {
            return Err(EventBusError::empty_name("Pattern cannot be empty."));
        }

        let mut registry = self.inner.registry.write();
        let Some(removed) = registry.remove_handler(pattern, handler) else {
            drop(registry);
            warn!(pattern, "No subscriptions found for pattern");
            return Ok(false);
        };
        let live = registry.count(pattern);
        drop(registry);

        let Some(subscription) = removed else {
            return Ok(false);
        };
        self.inner.released(&subscription, live);
        Ok(true)
    }

    /// Removes the subscription with `id`, cancelling its pending timers.
    ///
    /// # Errors
    /// Returns [`EventBusError::EmptyId`] if `id` is empty.
    pub fn unsubscribe_by_id(&self, id: impl AsRef<str>) -> Result<bool, EventBusError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(EventBusError::empty_id());
        }

        let removed = self.inner.retire(id);
        if !removed {
            warn!(subscription = id, "No subscription found for id");
        }
        Ok(removed)
    }

    /// Publishes `data` under `event`.
    ///
    /// `options` accepts a [`PublishOptions`], a bare `u64` timeout in milliseconds, a
    /// [`Duration`], an [`ErrorPolicy`](crate::ErrorPolicy) or `()` for the defaults.
    ///
    /// Resolves `Ok(false)` when the call was canceled: by middleware, by a handler through
    /// [`Envelope::cancel`](crate::Envelope::cancel), or by a failure under
    /// [`ErrorPolicy::CancelOnError`](crate::ErrorPolicy::CancelOnError).
    ///
    /// # Errors
    /// * [`EventBusError::EmptyName`] if `event` is empty.
    /// * [`EventBusError::RecursionLimit`] if handlers re-published `event` too deeply.
    /// * Under [`ErrorPolicy::Throw`](crate::ErrorPolicy::Throw), the first handler or transform
    ///   failure ([`EventBusError::Handler`]) or schema rejection
    ///   ([`EventBusError::SchemaValidation`]).
    ///
    /// # Examples
    /// ```rust
    /// use courier_event_bus::{EventBus, Handler, PublishOptions, SubscribeOptions};
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), courier_event_bus::EventBusError> {
    /// let bus = EventBus::new();
    /// bus.subscribe("order.*", Handler::sync(|envelope| {
    ///     envelope.cancel();
    ///     Ok(())
    /// }), SubscribeOptions::new()).await?;
    ///
    /// assert!(!bus.publish("order.placed", json!({}), PublishOptions::new().cancelable()).await?);
    /// assert!(bus.publish("order.placed", json!({}), 1_000).await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn publish(
        &self,
        event: &str,
        data: Value,
        options: impl Into<PublishOptions>,
    ) -> Result<bool, EventBusError> {
        if event.is_empty() {
            return Err(EventBusError::empty_name("Event name cannot be empty."));
        }
        let call = Call::new(options.into(), self.inner.default_timeout);
        let _depth = self.inner.recursion.enter(event)?;

        let selected = self.inner.pipeline.read().select(event);
        let Some((event, data)) = middleware::run(selected, event.to_owned(), data).await else {
            return Ok(false);
        };

        self.inner.history.lock().record(&event, &data);
        let subscriptions = self.inner.registry.read().select(&event);

        self.inner.fan_out(Arc::from(event), data, subscriptions, &call).await
    }

    /// Appends a middleware; a bare [`Middleware`] applies to every event.
    pub fn use_middleware(&self, entry: impl Into<MiddlewareEntry>) -> MiddlewareId {
        let id = self.inner.pipeline.write().push(entry.into());
        trace!(middleware = %id, "Middleware registered");
        id
    }

    /// Removes every registration of `middleware`.
    pub fn remove_middleware(&self, middleware: &Middleware) -> bool {
        self.inner.pipeline.write().remove(middleware)
    }

    /// Starts recording resolved events, keeping at most `max_length` (default 100).
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] if `max_length` is `Some(0)`.
    pub fn enable_history(&self, max_length: Option<usize>) -> Result<(), EventBusError> {
        self.inner.history.lock().enable(max_length)
    }

    /// Stops recording; already recorded entries are kept.
    pub fn disable_history(&self) {
        self.inner.history.lock().disable();
    }

    #[must_use]
    pub fn is_history_enabled(&self) -> bool {
        self.inner.history.lock().is_enabled()
    }

    /// A copy of the recorded entries, oldest first.
    #[must_use]
    pub fn event_history(&self) -> Vec<HistoryEntry> {
        self.inner.history.lock().snapshot()
    }

    pub fn clear_event_history(&self) {
        self.inner.history.lock().clear();
    }

    /// Warns when a pattern collects more live subscriptions than `options.threshold`.
    pub fn enable_memory_leak_detection(&self, options: LeakDetectionOptions) {
        self.inner.leaks.lock().enable(options);
    }

    /// Patterns currently over the leak threshold, sorted.
    #[must_use]
    pub fn leak_suspects(&self) -> Vec<String> {
        self.inner.leaks.lock().suspects()
    }

    /// Lists live subscriptions (registration order) followed by middleware.
    ///
    /// With a `filter`, keeps entries whose pattern matches the filter or is matched by it, so
    /// `Some("user.created")` includes `user.*` subscriptions and global middleware.
    #[must_use]
    pub fn info(&self, filter: Option<&str>) -> Vec<SubscriptionInfo> {
        let keep = |pattern: &str| {
            filter.is_none_or(|filter| matches(pattern, filter) || matches(filter, pattern))
        };

        let mut entries: Vec<_> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|s| keep(&*s.pattern))
            .map(|s| SubscriptionInfo {
                id: s.id.to_string(),
                pattern: s.pattern.to_string(),
                is_middleware: false,
                priority: Some(s.priority),
            })
            .collect();

        entries.extend(self.inner.pipeline.read().entries().iter().filter(|r| keep(r.pattern())).map(
            |r| SubscriptionInfo {
                id: r.id.to_string(),
                pattern: r.pattern().to_owned(),
                is_middleware: true,
                priority: None,
            },
        ));
        entries
    }

    /// Live subscriptions, in total or under exactly `pattern`.
    #[must_use]
    pub fn subscription_count(&self, pattern: Option<&str>) -> usize {
        let registry = self.inner.registry.read();
        pattern.map_or_else(|| registry.total(), |pattern| registry.count(pattern))
    }

    #[must_use]
    pub fn has_subscription(&self, id: impl AsRef<str>) -> bool {
        self.inner.registry.read().contains(id.as_ref())
    }

    /// Drops every subscription, middleware, pending timer and history entry.
    ///
    /// Returns the number of subscriptions removed. Other clones of the handle see an empty bus.
    pub fn shutdown(&self) -> usize {
        let removed = self.inner.registry.write().clear();
        let middleware = self.inner.pipeline.write().clear();
        self.inner.timers.clear();
        self.inner.history.lock().clear();
        self.inner.leaks.lock().reset();

        debug!(subscriptions = removed, middleware, "Event bus shut down");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MiddlewareOutcome;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_names_are_rejected() {
        let bus = EventBus::new();
        let handler = Handler::sync(|_| Ok(()));

        assert!(matches!(
            bus.subscribe("", handler.clone(), SubscribeOptions::new()).await,
            Err(EventBusError::EmptyName { .. })
        ));
        assert!(matches!(bus.unsubscribe("", &handler), Err(EventBusError::EmptyName { .. })));
        assert!(matches!(bus.unsubscribe_by_id(""), Err(EventBusError::EmptyId { .. })));

        let err = bus.publish("", json!(null), ()).await.unwrap_err();
        assert_eq!(err.to_string(), "Empty name: Event name cannot be empty.");
    }

    #[tokio::test]
    async fn test_unknown_unsubscribe_is_not_an_error() {
        let bus = EventBus::new();
        let handler = Handler::sync(|_| Ok(()));
        assert!(!bus.unsubscribe("nothing.here", &handler).unwrap());
        assert!(!bus.unsubscribe_by_id("missing").unwrap());
    }

    #[tokio::test]
    async fn test_info_lists_subscriptions_then_middleware() {
        let bus = EventBus::new();
        let noop = Handler::sync(|_| Ok(()));
        bus.subscribe("user.*", noop.clone(), SubscribeOptions::new().priority(Priority::HIGH))
            .await
            .unwrap();
        bus.subscribe("order.created", noop, SubscribeOptions::new()).await.unwrap();
        bus.use_middleware(Middleware::sync(|_, data| Ok(MiddlewareOutcome::Continue(data))));
        bus.use_middleware(MiddlewareEntry::scoped(
            "order.*",
            Middleware::sync(|_, data| Ok(Some(data).into())),
        ));

        let all = bus.info(None);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].priority, Some(Priority::HIGH));
        assert!(all[2].is_middleware && all[3].is_middleware);

        let patterns: Vec<_> =
            bus.info(Some("user.created")).into_iter().map(|i| i.pattern).collect();
        assert_eq!(patterns, vec!["user.*".to_owned(), "*".to_owned()]);
    }

    #[tokio::test]
    async fn test_from_config_applies_sections() {
        let config = BusConfig {
            history: Some(crate::HistoryConfig { max_length: 2 }),
            leak_detection: Some(LeakDetectionOptions::default()),
            ..BusConfig::default()
        };
        let bus = EventBus::from_config(&config).unwrap();
        assert!(bus.is_history_enabled());

        for i in 0..3 {
            bus.publish("tick", json!(i), ()).await.unwrap();
        }
        assert_eq!(bus.event_history().len(), 2);

        let invalid = BusConfig { max_recursion_depth: 0, ..BusConfig::default() };
        assert!(matches!(
            EventBus::from_config(&invalid),
            Err(EventBusError::InvalidCapacity { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let bus = EventBus::new();
        bus.enable_history(None).unwrap();
        bus.subscribe("a", Handler::sync(|_| Ok(())), SubscribeOptions::new()).await.unwrap();
        bus.subscribe("b", Handler::sync(|_| Ok(())), SubscribeOptions::new()).await.unwrap();
        bus.use_middleware(Middleware::sync(|_, data| Ok(MiddlewareOutcome::Continue(data))));
        bus.publish("a", json!(1), ()).await.unwrap();

        assert_eq!(bus.shutdown(), 2);
        assert_eq!(bus.subscription_count(None), 0);
        assert!(bus.info(None).is_empty());
        assert!(bus.event_history().is_empty());
    }
}
