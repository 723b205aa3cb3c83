use crate::registry::Subscription;
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_LEAK_THRESHOLD: usize = 10;

/// Settings of the subscription leak detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakDetectionOptions {
    /// Live subscriptions per pattern above which a warning is emitted.
    pub threshold: usize,
    /// Also list every subscription of the offending pattern.
    pub show_subscription_details: bool,
}

impl Default for LeakDetectionOptions {
    fn default() -> Self {
        Self { threshold: DEFAULT_LEAK_THRESHOLD, show_subscription_details: true }
    }
}

/// Warns once per threshold breach of a pattern's live subscription count.
#[derive(Debug, Default)]
pub(crate) struct LeakDetector {
    options: Option<LeakDetectionOptions>,
    warned: FxHashSet<Arc<str>>,
}

impl LeakDetector {
    pub(crate) fn enable(&mut self, options: LeakDetectionOptions) {
        self.options = Some(options);
    }

    /// Called after a subscription was added under `pattern`.
    pub(crate) fn on_subscribe(&mut self, pattern: &Arc<str>, live: &[Arc<Subscription>]) {
        let Some(options) = self.options else { return };
        if live.len() <= options.threshold || self.warned.contains(pattern) {
            return;
        }

        warn!(
            pattern = %pattern,
            count = live.len(),
            threshold = options.threshold,
            "Possible memory leak: pattern has more live subscriptions than the threshold"
        );
        if options.show_subscription_details {
            for subscription in live {
                warn!(
                    pattern = %pattern,
                    subscription = %subscription.id,
                    priority = subscription.priority.0,
                    once = subscription.once,
                    "Live subscription"
                );
            }
        }
        self.warned.insert(Arc::clone(pattern));
    }

    /// Called after a subscription under `pattern` was removed.
    pub(crate) fn on_unsubscribe(&mut self, pattern: &str, live: usize) {
        let Some(options) = self.options else { return };
        if live <= options.threshold {
            self.warned.remove(pattern);
        }
    }

    pub(crate) fn suspects(&self) -> Vec<String> {
        let mut patterns: Vec<_> = self.warned.iter().map(ToString::to_string).collect();
        patterns.sort();
        patterns
    }

    pub(crate) fn reset(&mut self) {
        self.warned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::options::SubscribeOptions;
    use crate::registry::Registry;

    fn fill(registry: &mut Registry, pattern: &str, n: usize) {
        for _ in 0..n {
            registry.insert(pattern, Handler::sync(|_| Ok(())), &SubscribeOptions::new());
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let mut registry = Registry::default();
        let mut detector = LeakDetector::default();
        fill(&mut registry, "a", 20);
        detector.on_subscribe(&Arc::from("a"), registry.subscriptions("a"));
        assert!(detector.suspects().is_empty());
    }

    #[test]
    fn test_warns_once_and_rearms_below_threshold() {
        let mut registry = Registry::default();
        let mut detector = LeakDetector::default();
        detector.enable(LeakDetectionOptions { threshold: 2, show_subscription_details: false });
        let pattern: Arc<str> = Arc::from("a");

        fill(&mut registry, "a", 2);
        detector.on_subscribe(&pattern, registry.subscriptions("a"));
        assert!(detector.suspects().is_empty());

        fill(&mut registry, "a", 1);
        detector.on_subscribe(&pattern, registry.subscriptions("a"));
        assert_eq!(detector.suspects(), vec!["a".to_owned()]);

        detector.on_unsubscribe("a", 3);
        assert_eq!(detector.suspects().len(), 1);
        detector.on_unsubscribe("a", 2);
        assert!(detector.suspects().is_empty());
    }
}
