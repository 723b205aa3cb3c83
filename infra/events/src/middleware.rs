use crate::handler::{Middleware, MiddlewareOutcome};
use crate::pattern::{WILDCARD, matches};
use crate::registry::generate_id;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace};

/// Opaque identifier of a registered middleware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MiddlewareId(Arc<str>);

impl MiddlewareId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A middleware together with the events it applies to.
///
/// A bare [`Middleware`] converts into a global entry that sees every event.
#[derive(Debug, Clone)]
pub struct MiddlewareEntry {
    pattern: Option<String>,
    middleware: Middleware,
}

impl MiddlewareEntry {
    #[must_use]
    pub const fn global(middleware: Middleware) -> Self {
        Self { pattern: None, middleware }
    }

    #[must_use]
    pub fn scoped(pattern: impl Into<String>, middleware: Middleware) -> Self {
        Self { pattern: Some(pattern.into()), middleware }
    }
}

impl From<Middleware> for MiddlewareEntry {
    fn from(middleware: Middleware) -> Self {
        Self::global(middleware)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Registered {
    pub(crate) id: MiddlewareId,
    pub(crate) entry: MiddlewareEntry,
}

impl Registered {
    pub(crate) fn pattern(&self) -> &str {
        self.entry.pattern.as_deref().unwrap_or(WILDCARD)
    }

    fn applies_to(&self, event: &str) -> bool {
        self.entry.pattern.as_deref().is_none_or(|pattern| matches(pattern, event))
    }
}

/// Ordered middleware list; order is registration order.
#[derive(Debug, Default)]
pub(crate) struct Pipeline {
    entries: Vec<Registered>,
}

impl Pipeline {
    pub(crate) fn push(&mut self, entry: MiddlewareEntry) -> MiddlewareId {
        let id = MiddlewareId(generate_id());
        self.entries.push(Registered { id: id.clone(), entry });
        id
    }

    pub(crate) fn remove(&mut self, middleware: &Middleware) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| !r.entry.middleware.ptr_eq(middleware));
        before != self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[Registered] {
        &self.entries
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Entries applying to `event`, captured before any of them runs.
    pub(crate) fn select(&self, event: &str) -> Vec<Middleware> {
        self.entries
            .iter()
            .filter(|r| r.applies_to(event))
            .map(|r| r.entry.middleware.clone())
            .collect()
    }
}

/// Runs the selected middleware strictly in order.
///
/// Returns the resolved `(event, data)` or `None` when the publish call must be dropped.
/// Redirects change the event for delivery but do not re-select middleware.
pub(crate) async fn run(
    selected: Vec<Middleware>,
    mut event: String,
    mut data: Value,
) -> Option<(String, Value)> {
    let original = event.clone();

    for middleware in selected {
        match middleware.run(event.clone(), data).await {
            Ok(MiddlewareOutcome::Continue(next)) => data = next,
            Ok(MiddlewareOutcome::Redirect { event: next_event, data: next }) => {
                trace!(from = %event, to = %next_event, "Middleware redirected event");
                event = next_event;
                data = next;
            },
            Ok(MiddlewareOutcome::Cancel) => {
                trace!(event = %event, "Middleware canceled publish");
                return None;
            },
            Err(e) => {
                error!(event = %original, error = %e, "Error in middleware for event \"{original}\":");
                return None;
            },
        }
    }

    Some((event, data))
}
