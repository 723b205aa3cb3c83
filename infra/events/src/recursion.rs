use crate::error::EventBusError;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::trace;

/// Default bound on same-event re-entrancy.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 3;

/// Per-event-name depth counters of in-flight publish chains.
#[derive(Debug)]
pub(crate) struct RecursionGuard {
    max_depth: usize,
    depths: Mutex<FxHashMap<String, usize>>,
}

impl RecursionGuard {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self { max_depth, depths: Mutex::new(FxHashMap::default()) }
    }

    /// Enters one more level of `event`.
    ///
    /// The returned scope leaves the level when dropped, on every exit path. The counter for
    /// `event` disappears once the outermost publish of the chain is done.
    ///
    /// # Errors
    /// Returns [`EventBusError::RecursionLimit`] when the depth would exceed the maximum.
    pub(crate) fn enter<'a>(&'a self, event: &str) -> Result<DepthScope<'a>, EventBusError> {
        let mut depths = self.depths.lock();
        let depth = depths.get(event).copied().unwrap_or(0) + 1;
        if depth > self.max_depth {
            return Err(EventBusError::RecursionLimit {
                message: format!(
                    "Max recursion depth of {} exceeded for event '{event}'",
                    self.max_depth
                )
                .into(),
                context: None,
            });
        }
        depths.insert(event.to_owned(), depth);
        drop(depths);

        trace!(event, depth, "Entered publish");
        Ok(DepthScope { guard: self, event: event.to_owned() })
    }

    #[cfg(test)]
    fn depth(&self, event: &str) -> usize {
        self.depths.lock().get(event).copied().unwrap_or(0)
    }

    fn leave(&self, event: &str) {
        let mut depths = self.depths.lock();
        if let Some(depth) = depths.get_mut(event) {
            *depth = depth.saturating_sub(1);
            if *depth == 0 {
                depths.remove(event);
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct DepthScope<'a> {
    guard: &'a RecursionGuard,
    event: String,
}

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        self.guard.leave(&self.event);
    }
}
