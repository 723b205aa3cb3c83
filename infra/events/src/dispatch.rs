//! The sequential fan-out of one publish call.

use crate::bus::BusInner;
use crate::error::EventBusError;
use crate::handler::{CancelHandle, Envelope, Handler, HandlerError};
use crate::history::HistoryEntry;
use crate::options::{ErrorPolicy, PublishOptions};
use crate::registry::{Subscription, SubscriptionId};
use crate::timers::{Gate, TimerKind};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Per-call state shared by every step of a fan-out.
#[derive(Debug)]
pub(crate) struct Call {
    policy: ErrorPolicy,
    timeout: Duration,
    cancelable: bool,
    canceled: CancelHandle,
}

impl Call {
    pub(crate) fn new(options: PublishOptions, default_timeout: Duration) -> Self {
        Self {
            policy: options.error_policy,
            timeout: options.timeout.unwrap_or(default_timeout),
            cancelable: options.cancelable,
            canceled: CancelHandle::new(),
        }
    }

    fn envelope(&self, event: &Arc<str>, data: Value) -> Envelope {
        Envelope::new(Arc::clone(event), data, self.cancelable.then(|| self.canceled.clone()))
    }

    fn is_canceled(&self) -> bool {
        self.canceled.is_canceled()
    }

    /// Applies `policy` to a failure at one subscription.
    fn settle(
        &self,
        policy: ErrorPolicy,
        failure: EventBusError,
        event: &str,
        subscription: &SubscriptionId,
    ) -> Result<Step, EventBusError> {
        match policy {
            ErrorPolicy::Silent => Ok(Step::Next),
            ErrorPolicy::LogAndContinue => {
                report(&failure, event, subscription);
                Ok(Step::Next)
            },
            ErrorPolicy::CancelOnError => {
                report(&failure, event, subscription);
                self.canceled.cancel();
                Ok(Step::Stop)
            },
            ErrorPolicy::Throw => Err(failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Next,
    Stop,
}

fn report(failure: &EventBusError, event: &str, subscription: &SubscriptionId) {
    if let EventBusError::SchemaValidation { errors, .. } = failure {
        warn!(event, subscription = %subscription, errors = ?errors, "Schema validation failed");
    } else {
        error!(event, subscription = %subscription, error = %failure, "Error in handler for event \"{event}\":");
    }
}

/// Runs `handler` on its own task and waits for it at most `limit`.
///
/// An expired deadline is not a failure: the task keeps running detached. A panic inside the
/// handler surfaces as a failure.
pub(crate) async fn invoke(
    handler: &Handler,
    envelope: Envelope,
    limit: Duration,
) -> Result<(), HandlerError> {
    let event = envelope.event().to_owned();
    let task = tokio::spawn(handler.call(envelope));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(join_error.into()),
        Err(_) => {
            debug!(event, timeout = ?limit, "Handler timed out, no longer awaited");
            Ok(())
        },
    }
}

async fn passes_filters(subscription: &Subscription, event: &str, data: &Value) -> bool {
    for filter in &subscription.filters {
        match filter.test(data.clone()).await {
            Ok(true) => {},
            Ok(false) => return false,
            Err(e) => {
                warn!(event, subscription = %subscription.id, error = %e, "Filter predicate failed");
                return false;
            },
        }
    }
    true
}

impl BusInner {
    /// Delivers `data` to `subscriptions` strictly in order.
    ///
    /// Resolves `false` when the call was canceled by a handler or by `CancelOnError`.
    pub(crate) async fn fan_out(
        self: &Arc<Self>,
        event: Arc<str>,
        mut data: Value,
        subscriptions: Vec<Arc<Subscription>>,
        call: &Call,
    ) -> Result<bool, EventBusError> {
        trace!(event = %event, count = subscriptions.len(), "Dispatching");

        for subscription in subscriptions {
            if call.is_canceled() {
                break;
            }
            if subscription.is_spent() {
                continue;
            }

            if let Some(schema) = &subscription.schema {
                let report = schema.validate(data.clone()).await;
                if !report.valid {
                    let failure = EventBusError::SchemaValidation {
                        message: format!("payload rejected for event '{event}'").into(),
                        errors: report.errors,
                        context: None,
                    };
                    match call.settle(
                        subscription.schema_error_policy,
                        failure,
                        &event,
                        &subscription.id,
                    )? {
                        Step::Next => continue,
                        Step::Stop => break,
                    }
                }
            }

            if !passes_filters(&subscription, &event, &data).await {
                continue;
            }

            let gate = self.timers.gate(&subscription, &event);
            if gate == Gate::Drop {
                continue;
            }

            if let Some(transform) = &subscription.transform {
                match transform.apply(data.clone()).await {
                    Ok(next) => data = next,
                    Err(source) => {
                        if let Gate::Lead { kind } = gate {
                            self.timers.rewind(&subscription.id, &event, kind);
                        }
                        let failure =
                            EventBusError::Handler { source, context: Some("transform".into()) };
                        match call.settle(call.policy, failure, &event, &subscription.id)? {
                            Step::Next => continue,
                            Step::Stop => break,
                        }
                    },
                }
            }

            if let Gate::Defer { delay, kind } = gate {
                self.defer(&subscription, &event, data.clone(), delay, kind, call);
                continue;
            }

            if !subscription.claim() {
                continue;
            }
            let outcome =
                invoke(&subscription.handler, call.envelope(&event, data.clone()), call.timeout)
                    .await;
            if subscription.once {
                self.retire(subscription.id.as_str());
            }

            if let Err(source) = outcome {
                let failure = EventBusError::Handler { source, context: None };
                if call.settle(call.policy, failure, &event, &subscription.id)? == Step::Stop {
                    break;
                }
            }
        }

        Ok(!call.is_canceled())
    }

    fn defer(
        self: &Arc<Self>,
        subscription: &Arc<Subscription>,
        event: &Arc<str>,
        data: Value,
        delay: Duration,
        kind: TimerKind,
        call: &Call,
    ) {
        let bus = Arc::downgrade(self);
        let target = Arc::clone(subscription);
        let envelope = call.envelope(event, data);
        let (policy, timeout) = (call.policy, call.timeout);

        self.timers.schedule(&subscription.id, event, kind, delay, async move {
            if let Some(bus) = bus.upgrade() {
                bus.deliver_deferred(&target, envelope, timeout, policy).await;
            }
        });
    }

    /// Fires a debounced delivery. The scheduling call has already resolved, so failures are
    /// only logged.
    async fn deliver_deferred(
        &self,
        subscription: &Subscription,
        envelope: Envelope,
        timeout: Duration,
        policy: ErrorPolicy,
    ) {
        if !subscription.claim() {
            return;
        }
        let event = envelope.event().to_owned();
        let outcome = invoke(&subscription.handler, envelope, timeout).await;
        if subscription.once {
            self.retire(subscription.id.as_str());
        }

        if let Err(e) = outcome
            && policy != ErrorPolicy::Silent
        {
            error!(event, subscription = %subscription.id, error = %e, "Deferred delivery failed");
        }
    }

    /// Replays recorded entries straight into a fresh subscription's handler.
    pub(crate) async fn replay(&self, subscription: &Subscription, entries: Vec<HistoryEntry>) {
        for entry in entries {
            if !subscription.claim() {
                break;
            }
            let envelope = Envelope::new(Arc::from(entry.event), entry.data, None);
            if let Err(e) = invoke(&subscription.handler, envelope, self.default_timeout).await {
                error!(subscription = %subscription.id, error = %e, "Replay delivery failed");
            }
            if subscription.once {
                self.retire(subscription.id.as_str());
                break;
            }
        }
    }
}
