use crate::handler::{Filter, Handler, Schema, Transform};
use crate::options::{ErrorPolicy, Priority, SubscribeOptions};
use crate::pattern::matches;
use fxhash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// Excludes visually ambiguous characters (I, O, l, 0, 1).
const ID_ALPHABET: [char; 55] = [
    '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L',
    'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f',
    'g', 'h', 'j', 'k', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const ID_LENGTH: usize = 12;

pub(crate) fn generate_id() -> Arc<str> {
    nanoid::nanoid!(ID_LENGTH, &ID_ALPHABET).into()
}

/// Opaque identifier of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Arc<str>);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: Arc<str>,
    pub(crate) handler: Handler,
    pub(crate) priority: Priority,
    pub(crate) filters: Vec<Filter>,
    pub(crate) transform: Option<Transform>,
    pub(crate) schema: Option<Schema>,
    pub(crate) schema_error_policy: ErrorPolicy,
    pub(crate) once: bool,
    pub(crate) debounce: Option<Duration>,
    pub(crate) throttle: Option<Duration>,
    seq: u64,
    fired: AtomicBool,
}

impl Subscription {
    /// Claims the single delivery of a `once` subscription.
    ///
    /// Always succeeds for regular subscriptions.
    pub(crate) fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_spent(&self) -> bool {
        self.once && self.fired.load(Ordering::Acquire)
    }
}

/// Live subscriptions grouped by their exact pattern, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_pattern: FxHashMap<Arc<str>, Vec<Arc<Subscription>>>,
    next_seq: u64,
}

impl Registry {
    pub(crate) fn insert(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: &SubscribeOptions,
    ) -> Arc<Subscription> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let pattern: Arc<str> = self
            .by_pattern
            .get_key_value(pattern)
            .map_or_else(|| Arc::from(pattern), |(key, _)| Arc::clone(key));

        let subscription = Arc::new(Subscription {
            id: SubscriptionId::generate(),
            pattern: Arc::clone(&pattern),
            handler,
            priority: options.priority,
            filters: options.filters.clone(),
            transform: options.transform.clone(),
            schema: options.schema.clone(),
            schema_error_policy: options.schema_error_policy,
            once: options.once,
            debounce: options.debounce,
            throttle: options.throttle,
            seq,
            fired: AtomicBool::new(false),
        });

        self.by_pattern.entry(pattern).or_default().push(Arc::clone(&subscription));
        subscription
    }

    /// Removes the first subscription under `pattern` registered with `handler`.
    ///
    /// Returns `None` when the pattern is unknown, `Some(None)` when no handler matched.
    pub(crate) fn remove_handler(
        &mut self,
        pattern: &str,
        handler: &Handler,
    ) -> Option<Option<Arc<Subscription>>> {
        let list = self.by_pattern.get_mut(pattern)?;
        let removed = list
            .iter()
            .position(|s| s.handler.ptr_eq(handler))
            .map(|index| list.remove(index));
        if list.is_empty() {
            self.by_pattern.remove(pattern);
        }
        Some(removed)
    }

    pub(crate) fn remove_id(&mut self, id: &str) -> Option<Arc<Subscription>> {
        let (pattern, index) = self.by_pattern.iter().find_map(|(pattern, list)| {
            list.iter().position(|s| s.id.as_str() == id).map(|i| (Arc::clone(pattern), i))
        })?;

        let list = self.by_pattern.get_mut(&pattern)?;
        let removed = list.remove(index);
        if list.is_empty() {
            self.by_pattern.remove(&pattern);
        }
        Some(removed)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.iter().any(|s| s.id.as_str() == id)
    }

    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.by_pattern.get(pattern).map_or(0, Vec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.by_pattern.values().map(Vec::len).sum()
    }

    pub(crate) fn subscriptions(&self, pattern: &str) -> &[Arc<Subscription>] {
        self.by_pattern.get(pattern).map_or(&[], Vec::as_slice)
    }

    /// All live subscriptions in registration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        let mut all: Vec<_> = self.by_pattern.values().flatten().collect();
        all.sort_by_key(|s| s.seq);
        all.into_iter()
    }

    /// Snapshot of the subscriptions matching `event`, highest priority first.
    ///
    /// Equal priorities keep registration order.
    pub(crate) fn select(&self, event: &str) -> Vec<Arc<Subscription>> {
        let mut selected: Vec<_> = self
            .by_pattern
            .iter()
            .filter(|(pattern, _)| matches(pattern, event))
            .flat_map(|(_, list)| list.iter().cloned())
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        selected
    }

    pub(crate) fn clear(&mut self) -> usize {
        let total = self.total();
        self.by_pattern.clear();
        total
    }
}
