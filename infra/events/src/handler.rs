//! Callable shapes accepted by the bus.
//!
//! Every user-supplied callable is normalised once, at construction, into a single boxed async
//! form. Synchronous closures are wrapped into futures so the dispatcher only ever deals with one shape
//! per role.

use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type returned by handlers, filters, transforms, validators and middleware.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a subscriber handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

type HandlerFn = dyn Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type FilterFn = dyn Fn(Value) -> BoxFuture<'static, Result<bool, HandlerError>> + Send + Sync;
type TransformFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync;
type SchemaFn = dyn Fn(Value) -> BoxFuture<'static, SchemaReport> + Send + Sync;
type MiddlewareFn =
    dyn Fn(String, Value) -> BoxFuture<'static, Result<MiddlewareOutcome, HandlerError>> + Send + Sync;

/// Shared cancellation flag of a single `publish` call.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks the publish call as canceled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`CancelHandle::cancel`] has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a subscriber receives for each delivery.
///
/// The cancel capability is only present when the publish call was made with
/// `cancelable: true`; otherwise [`Envelope::cancel`] is a no-op.
#[derive(Debug, Clone)]
pub struct Envelope {
    event: Arc<str>,
    data: Value,
    cancel: Option<CancelHandle>,
}

impl Envelope {
    pub(crate) const fn new(event: Arc<str>, data: Value, cancel: Option<CancelHandle>) -> Self {
        Self { event, data, cancel }
    }

    /// The resolved event name (after middleware redirects).
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The delivered payload.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Consumes the envelope and returns the payload.
    #[must_use]
    pub fn into_data(self) -> Value {
        self.data
    }

    /// Whether this delivery belongs to a cancelable publish call.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        self.cancel.is_some()
    }

    /// Stops the remaining fan-out of a cancelable publish call.
    ///
    /// Returns `false` when the call was not cancelable.
    pub fn cancel(&self) -> bool {
        let Some(handle) = &self.cancel else {
            return false;
        };
        handle.cancel();
        true
    }
}

/// A subscriber callback.
///
/// Identity is the allocation behind the handle: clones compare equal through
/// [`Handler::ptr_eq`], which is what [`crate::EventBus::unsubscribe`] relies on.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Wraps an async callback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |envelope| f(envelope).boxed()))
    }

    /// Wraps a synchronous callback.
    ///
    /// The callback runs when the returned future is first polled, so it executes on the
    /// handler's own task like an async one.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move |envelope| {
            let f = Arc::clone(&f);
            async move { f(envelope) }.boxed()
        }))
    }

    /// Returns `true` if both handles point at the same callback.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn call(&self, envelope: Envelope) -> BoxFuture<'static, HandlerResult> {
        (self.0)(envelope)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&Arc::as_ptr(&self.0).cast::<()>()).finish()
    }
}

/// A delivery predicate. All filters of a subscription must pass.
#[derive(Clone)]
pub struct Filter(Arc<FilterFn>);

impl Filter {
    /// Wraps an async predicate.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |data| f(data).boxed()))
    }

    /// Wraps a synchronous, infallible predicate.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |data| ready(Ok(f(&data))).boxed()))
    }

    pub(crate) fn test(&self, data: Value) -> BoxFuture<'static, Result<bool, HandlerError>> {
        (self.0)(data)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter")
    }
}

/// A payload rewrite applied before the handler runs.
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl Transform {
    /// Wraps an async, fallible transform.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |data| f(data).boxed()))
    }

    /// Wraps a synchronous, infallible transform.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(move |data| ready(Ok(f(data))).boxed()))
    }

    pub(crate) fn apply(&self, data: Value) -> BoxFuture<'static, Result<Value, HandlerError>> {
        (self.0)(data)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

/// Outcome of a schema check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaReport {
    #[must_use]
    pub const fn valid() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    #[must_use]
    pub fn invalid(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { valid: false, errors: errors.into_iter().map(Into::into).collect() }
    }
}

impl From<bool> for SchemaReport {
    fn from(valid: bool) -> Self {
        if valid { Self::valid() } else { Self::invalid(["Schema validation failed"]) }
    }
}

/// A payload validator.
///
/// Both the basic (`bool`) and the detailed ([`SchemaReport`]) flavours are normalised into a
/// report. A validator that errors counts as a failed validation carrying the error text.
#[derive(Clone)]
pub struct Schema(Arc<SchemaFn>);

impl Schema {
    /// A synchronous yes/no validator.
    pub fn basic<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |data| ready(SchemaReport::from(f(&data))).boxed()))
    }

    /// A synchronous validator reporting individual errors.
    pub fn detailed<F>(f: F) -> Self
    where
        F: Fn(&Value) -> SchemaReport + Send + Sync + 'static,
    {
        Self(Arc::new(move |data| ready(f(&data)).boxed()))
    }

    /// An async validator; `Ok(true|false)` or a [`SchemaReport`] are both accepted.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<SchemaReport>,
    {
        Self(Arc::new(move |data| {
            f(data)
                .map(|outcome| match outcome {
                    Ok(report) => report.into(),
                    Err(e) => SchemaReport::invalid([e.to_string()]),
                })
                .boxed()
        }))
    }

    pub(crate) fn validate(&self, data: Value) -> BoxFuture<'static, SchemaReport> {
        (self.0)(data)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Schema")
    }
}

/// What a middleware decides for the current publish call.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    /// Keep the event name, replace the payload.
    Continue(Value),
    /// Replace both the event name and the payload.
    Redirect { event: String, data: Value },
    /// Drop the publish call; no subscriber runs.
    Cancel,
}

impl From<Option<Value>> for MiddlewareOutcome {
    fn from(data: Option<Value>) -> Self {
        data.map_or(Self::Cancel, Self::Continue)
    }
}

/// A pre-dispatch hook receiving `(event, data)`.
#[derive(Clone)]
pub struct Middleware(Arc<MiddlewareFn>);

impl Middleware {
    /// Wraps an async middleware.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MiddlewareOutcome, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |event, data| f(event, data).boxed()))
    }

    /// Wraps a synchronous middleware.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&str, Value) -> Result<MiddlewareOutcome, HandlerError> + Send + Sync + 'static,
    {
        Self(Arc::new(move |event, data| ready(f(&event, data)).boxed()))
    }

    /// Returns `true` if both handles point at the same middleware.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn run(
        &self,
        event: String,
        data: Value,
    ) -> BoxFuture<'static, Result<MiddlewareOutcome, HandlerError>> {
        (self.0)(event, data)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&Arc::as_ptr(&self.0).cast::<()>()).finish()
    }
}
