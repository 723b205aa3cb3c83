//! # Event Bus
//!
//! An in-process, pattern-routed publish/subscribe bus for decoupling components that must not
//! hold references to each other.
//!
//! ## Overview
//!
//! Events are dot-separated names carrying a [`serde_json::Value`] payload. Subscribers register
//! a [`Handler`] under a pattern (`user.*`, `*`) and receive every matching event in priority
//! order. A publish call flows through the middleware pipeline, the optional history buffer and
//! then a strictly sequential fan-out.
//!
//! ## Features
//!
//! * **Wildcard routing**: `*` matches one segment, a lone `*` matches everything.
//! * **Priorities**: higher first, registration order on ties.
//! * **Middleware**: rewrite, redirect or cancel events before delivery.
//! * **Per-subscription modifiers**: filters, transforms, schema checks, `once`, debounce and
//!   throttle.
//! * **Cancelable events** and per-call [`ErrorPolicy`].
//! * **Recursion guard** against handlers re-publishing their own event forever.
//! * **Bounded history** with replay on subscribe, plus an optional leak detector.
//!
//! # Example
//!
//! ```rust
//! use courier_event_bus::{EventBus, EventBusError, Handler, Middleware, MiddlewareEntry,
//!     MiddlewareOutcome, SubscribeOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::new();
//!
//!     bus.use_middleware(MiddlewareEntry::scoped("user.*", Middleware::sync(|_, mut data| {
//!         data["tagged"] = json!(true);
//!         Ok(MiddlewareOutcome::Continue(data))
//!     })));
//!
//!     bus.subscribe("user.created", Handler::sync(|envelope| {
//!         assert_eq!(envelope.data(), &json!({"id": 1, "tagged": true}));
//!         Ok(())
//!     }), SubscribeOptions::new()).await?;
//!
//!     assert!(bus.publish("user.created", json!({"id": 1}), ()).await?);
//!     Ok(())
//! }
//! ```

mod builder;
mod bus;
mod config;
mod dispatch;
mod error;
mod handler;
mod history;
mod leak;
mod middleware;
mod options;
mod pattern;
mod recursion;
mod registry;
mod timers;

pub use crate::config::{BusConfig, ENV_PREFIX};
pub use builder::EventBusBuilder;
pub use bus::{EventBus, SubscriptionInfo};
pub use error::{EventBusError, EventBusErrorExt};
pub use handler::{
    CancelHandle, Envelope, Filter, Handler, HandlerError, HandlerResult, Middleware,
    MiddlewareOutcome, Schema, SchemaReport, Transform,
};
pub use history::{DEFAULT_HISTORY_LENGTH, HistoryConfig, HistoryEntry};
pub use leak::{DEFAULT_LEAK_THRESHOLD, LeakDetectionOptions};
pub use middleware::{MiddlewareEntry, MiddlewareId};
pub use options::{DEFAULT_PUBLISH_TIMEOUT, ErrorPolicy, Priority, PublishOptions, SubscribeOptions};
pub use pattern::{WILDCARD, matches};
pub use recursion::DEFAULT_MAX_RECURSION_DEPTH;
pub use registry::SubscriptionId;
pub use serde_json::Value;
