//! Debounce and throttle state, one slot per `(subscription, event, kind)`.
//!
//! Throttle windows close lazily: an expired window is detected by comparing timestamps on the
//! next delivery attempt, and idle slots are swept whenever a new window opens. Debounced
//! deliveries are tokio tasks that sleep for the window and then run a fully prepared delivery;
//! scheduling again for the same slot aborts the previous task while it is still sleeping.

use crate::registry::{Subscription, SubscriptionId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    Throttle,
    Debounce,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    subscription: SubscriptionId,
    event: Arc<str>,
    kind: TimerKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Window {
    #[default]
    Closed,
    Until(Instant),
    /// The window length does not fit the clock; it never closes.
    Unbounded,
}

impl Window {
    fn opened(now: Instant, length: Duration) -> Self {
        now.checked_add(length).map_or(Self::Unbounded, Self::Until)
    }

    fn is_open(self, now: Instant) -> bool {
        match self {
            Self::Closed => false,
            Self::Until(until) => now < until,
            Self::Unbounded => true,
        }
    }
}

#[derive(Debug)]
struct Pending {
    ticket: u64,
    task: AbortHandle,
}

#[derive(Debug, Default)]
struct TimerSlot {
    window: Window,
    pending: Option<Pending>,
}

impl TimerSlot {
    fn is_idle(&self, now: Instant) -> bool {
        self.pending.is_none() && !self.window.is_open(now)
    }

    fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }
}

type Slots = Mutex<FxHashMap<SlotKey, TimerSlot>>;

/// Decision for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Deliver now; no timer is involved.
    Deliver,
    /// Deliver now; this delivery opened a throttle window.
    Lead { kind: TimerKind },
    /// Deliver later through [`TimerCoordinator::schedule`].
    Defer { delay: Duration, kind: TimerKind },
    /// Throttled; the delivery is discarded.
    Drop,
}

#[derive(Debug, Default)]
pub(crate) struct TimerCoordinator {
    slots: Arc<Slots>,
    next_ticket: AtomicU64,
}

impl TimerCoordinator {
    pub(crate) fn gate(&self, subscription: &Subscription, event: &Arc<str>) -> Gate {
        match (subscription.throttle, subscription.debounce) {
            (None, None) => Gate::Deliver,
            (None, Some(delay)) => Gate::Defer { delay, kind: TimerKind::Debounce },
            (Some(window), debounce) => {
                let kind = if debounce.is_some() { TimerKind::Combined } else { TimerKind::Throttle };
                let key =
                    SlotKey { subscription: subscription.id.clone(), event: Arc::clone(event), kind };
                let now = Instant::now();
                let mut slots = self.slots.lock();

                if slots.get(&key).is_some_and(|slot| slot.window.is_open(now)) {
                    drop(slots);
                    return match debounce {
                        Some(delay) => Gate::Defer { delay, kind },
                        None => {
                            debug!(event = %event, subscription = %subscription.id, "Delivery throttled");
                            Gate::Drop
                        },
                    };
                }

                slots.retain(|_, slot| !slot.is_idle(now));
                slots.entry(key).or_default().window = Window::opened(now, window);
                Gate::Lead { kind }
            },
        }
    }

    /// Closes the window opened by a leading delivery that never reached its handler.
    pub(crate) fn rewind(&self, subscription: &SubscriptionId, event: &Arc<str>, kind: TimerKind) {
        let key = SlotKey { subscription: subscription.clone(), event: Arc::clone(event), kind };
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&key) else { return };
        slot.window = Window::Closed;
        if slot.pending.is_none() {
            slots.remove(&key);
        }
    }

    /// Runs `delivery` after `delay`, replacing any delivery still sleeping in the same slot.
    pub(crate) fn schedule<F>(
        &self,
        subscription: &SubscriptionId,
        event: &Arc<str>,
        kind: TimerKind,
        delay: Duration,
        delivery: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = SlotKey { subscription: subscription.clone(), event: Arc::clone(event), kind };
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let owner = Arc::downgrade(&self.slots);
        let fired = key.clone();

        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_default();
        slot.abort_pending();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fire(&owner, &fired, ticket) {
                delivery.await;
            }
        });
        slot.pending = Some(Pending { ticket, task: task.abort_handle() });
        drop(slots);

        trace!(event = %event, subscription = %subscription, delay = ?delay, "Delivery deferred");
    }

    /// Aborts and discards every slot owned by `subscription`.
    pub(crate) fn release(&self, subscription: &SubscriptionId) {
        self.slots.lock().retain(|key, slot| {
            if &key.subscription == subscription {
                slot.abort_pending();
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.values_mut() {
            slot.abort_pending();
        }
        slots.clear();
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.pending.as_ref().is_some_and(|p| !p.task.is_finished()))
            .count()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Detaches a woken task from its slot so later schedules no longer abort it.
///
/// Returns `false` when the task was superseded or the coordinator is gone.
fn fire(owner: &Weak<Slots>, key: &SlotKey, ticket: u64) -> bool {
    let Some(shared) = owner.upgrade() else { return false };
    let mut slots = shared.lock();
    let Some(slot) = slots.get_mut(key) else { return false };
    if slot.pending.as_ref().is_none_or(|pending| pending.ticket != ticket) {
        return false;
    }

    slot.pending = None;
    if !slot.window.is_open(Instant::now()) {
        slots.remove(key);
    }
    true
}

impl Drop for TimerCoordinator {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::options::SubscribeOptions;
    use crate::registry::Registry;
    use std::sync::atomic::AtomicUsize;

    fn subscription(pattern: &str, options: &SubscribeOptions) -> Arc<Subscription> {
        Registry::default().insert(pattern, Handler::sync(|_| Ok(())), options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window_closes_lazily() {
        let timers = TimerCoordinator::default();
        let sub = subscription("tick", &SubscribeOptions::new().throttle(Duration::from_millis(100)));
        let event: Arc<str> = Arc::from("tick");

        assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Throttle });
        assert_eq!(timers.gate(&sub, &event), Gate::Drop);

        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Throttle });
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_defers_inside_window() {
        let timers = TimerCoordinator::default();
        let options = SubscribeOptions::new()
            .throttle(Duration::from_millis(100))
            .debounce(Duration::from_millis(30));
        let sub = subscription("tick", &options);
        let event: Arc<str> = Arc::from("tick");

        assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Combined });
        assert_eq!(
            timers.gate(&sub, &event),
            Gate::Defer { delay: Duration::from_millis(30), kind: TimerKind::Combined }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_windows_are_swept() {
        let timers = TimerCoordinator::default();
        let sub = subscription("*", &SubscribeOptions::new().throttle(Duration::from_millis(10)));

        for i in 0..1000 {
            let event: Arc<str> = Arc::from(format!("event.{i}"));
            assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Throttle });
        }
        assert_eq!(timers.slot_count(), 1000);

        tokio::time::advance(Duration::from_secs(60)).await;
        timers.gate(&sub, &Arc::from("event.last"));
        assert_eq!(timers.slot_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_window_never_closes() {
        let timers = TimerCoordinator::default();
        let sub = subscription("tick", &SubscribeOptions::new().throttle(Duration::MAX));
        let event: Arc<str> = Arc::from("tick");

        assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Throttle });
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(timers.gate(&sub, &event), Gate::Drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewind_reopens_the_slot() {
        let timers = TimerCoordinator::default();
        let sub = subscription("tick", &SubscribeOptions::new().throttle(Duration::from_millis(100)));
        let event: Arc<str> = Arc::from("tick");

        let Gate::Lead { kind } = timers.gate(&sub, &event) else {
            panic!("first delivery must lead the window");
        };
        timers.rewind(&sub.id, &event, kind);
        assert_eq!(timers.slot_count(), 0);
        assert_eq!(timers.gate(&sub, &event), Gate::Lead { kind: TimerKind::Throttle });
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_pending_delivery() {
        let timers = TimerCoordinator::default();
        let sub = subscription("tick", &SubscribeOptions::new().debounce(Duration::from_millis(50)));
        let event: Arc<str> = Arc::from("tick");
        let fired = Arc::new(AtomicUsize::new(0));

        for value in 1..=3 {
            let fired = Arc::clone(&fired);
            timers.schedule(&sub.id, &event, TimerKind::Debounce, Duration::from_millis(50), async move {
                fired.store(value, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.pending(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(timers.pending(), 0);
        assert_eq!(timers.slot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_delivery_survives_rescheduling_its_slot() {
        let timers = Arc::new(TimerCoordinator::default());
        let sub = subscription("tick", &SubscribeOptions::new().debounce(Duration::from_millis(50)));
        let event: Arc<str> = Arc::from("tick");
        let finished = Arc::new(AtomicUsize::new(0));

        let delivery = {
            let timers = Arc::clone(&timers);
            let id = sub.id.clone();
            let event = Arc::clone(&event);
            let finished = Arc::clone(&finished);
            async move {
                timers.schedule(&id, &event, TimerKind::Debounce, Duration::from_millis(50), async {});
                tokio::task::yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        };
        timers.schedule(&sub.id, &event, TimerKind::Debounce, Duration::from_millis(50), delivery);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(timers.slot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_aborts_pending_delivery() {
        let timers = TimerCoordinator::default();
        let sub = subscription("tick", &SubscribeOptions::new().debounce(Duration::from_millis(50)));
        let event: Arc<str> = Arc::from("tick");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timers.schedule(&sub.id, &event, TimerKind::Debounce, Duration::from_millis(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timers.release(&sub.id);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
