use courier_event_bus::{Handler, HandlerError, Value};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// One delivery as seen by a recording handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub label: &'static str,
    pub event: String,
    pub data: Value,
}

/// Shared log of deliveries; every handler it hands out appends to the same list.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, label: &'static str, event: &str, data: &Value) {
        self.deliveries.lock().push(Delivery { label, event: event.to_owned(), data: data.clone() });
    }

    /// A handler that records and succeeds.
    #[must_use]
    pub fn handler(&self, label: &'static str) -> Handler {
        let recorder = self.clone();
        Handler::sync(move |envelope| {
            recorder.push(label, envelope.event(), envelope.data());
            Ok(())
        })
    }

    /// A handler that records and then fails with `message`.
    #[must_use]
    pub fn failing(&self, label: &'static str, message: &'static str) -> Handler {
        let recorder = self.clone();
        Handler::sync(move |envelope| {
            recorder.push(label, envelope.event(), envelope.data());
            Err(HandlerError::from(message))
        })
    }

    /// A handler that records and then cancels the publish call.
    #[must_use]
    pub fn canceling(&self, label: &'static str) -> Handler {
        let recorder = self.clone();
        Handler::sync(move |envelope| {
            recorder.push(label, envelope.event(), envelope.data());
            envelope.cancel();
            Ok(())
        })
    }

    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.deliveries.lock().iter().map(|d| d.label).collect()
    }

    #[must_use]
    pub fn payloads(&self) -> Vec<Value> {
        self.deliveries.lock().iter().map(|d| d.data.clone()).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }
}

/// In-memory sink for formatted `tracing` output.
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Routes this thread's `tracing` output into a [`LogCapture`] until the guard drops.
///
/// Only reliable on the current-thread runtime used by `#[tokio::test]`.
#[must_use]
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
