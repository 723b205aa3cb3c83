use crate::handler::HandlerError;
use std::borrow::Cow;

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// A pattern or event name was empty.
    #[error("Empty name{}: {message}", format_context(.context))]
    EmptyName { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A subscription id was empty.
    #[error("Empty id{}: {message}", format_context(.context))]
    EmptyId { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A publish chain re-entered the same event more often than the configured depth.
    #[error("Recursion limit{}: {message}", format_context(.context))]
    RecursionLimit { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A subscription's schema rejected the payload under the `Throw` policy.
    #[error("Schema validation failed{}: {message}", format_context(.context))]
    SchemaValidation {
        message: Cow<'static, str>,
        errors: Vec<String>,
        context: Option<Cow<'static, str>>,
    },

    /// A subscriber handler or transform failed under the `Throw` policy.
    #[error("Handler failed{}: {source}", format_context(.context))]
    Handler {
        #[source]
        source: HandlerError,
        context: Option<Cow<'static, str>>,
    },

    /// Capacity-like settings must be greater than zero.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Loading or deserializing the bus configuration failed.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

impl EventBusError {
    /// Returns the error raised by the failing handler or transform, if any.
    #[must_use]
    pub fn handler_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Handler { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn empty_name(message: &'static str) -> Self {
        Self::EmptyName { message: Cow::Borrowed(message), context: None }
    }

    pub(crate) fn empty_id() -> Self {
        Self::EmptyId { message: Cow::Borrowed("Subscription id cannot be empty."), context: None }
    }
}

/// Adds `.context(..)` to results carrying an [`EventBusError`] or one of its sources.
pub trait EventBusErrorExt<T> {
    /// Attaches a human-readable context to the error, if any.
    ///
    /// # Errors
    /// Returns the original error, converted into [`EventBusError`] and annotated.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventBusError>;
}

impl<T> EventBusErrorExt<T> for Result<T, EventBusError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                EventBusError::EmptyName { context: c, .. }
                | EventBusError::EmptyId { context: c, .. }
                | EventBusError::RecursionLimit { context: c, .. }
                | EventBusError::SchemaValidation { context: c, .. }
                | EventBusError::Handler { context: c, .. }
                | EventBusError::InvalidCapacity { context: c, .. }
                | EventBusError::Config { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl<T> EventBusErrorExt<T> for Result<T, config::ConfigError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventBusError> {
        self.map_err(|source| EventBusError::Config { source, context: Some(context.into()) })
    }
}

impl<T> EventBusErrorExt<T> for Result<T, HandlerError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventBusError> {
        self.map_err(|source| EventBusError::Handler { source, context: Some(context.into()) })
    }
}

impl From<config::ConfigError> for EventBusError {
    #[inline]
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

impl From<HandlerError> for EventBusError {
    #[inline]
    fn from(source: HandlerError) -> Self {
        Self::Handler { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
