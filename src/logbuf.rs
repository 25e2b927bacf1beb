//! Bounded in-memory log ring served by the local `/logs` endpoint.
//!
//! A `tracing` layer renders each event to a single line and appends it to
//! a shared ring buffer; the oldest lines fall off once the ring is full.

use std::{collections::VecDeque, fmt::Write as _, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{field::{Field, Visit}, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const DEFAULT_LOG_CAPACITY: usize = 2000;

#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut inner = self.inner.lock();
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(line);
    }

    /// Last `n` lines, oldest first, optionally filtered to lines containing
    /// `filter` (case sensitive).
    pub fn tail(&self, n: usize, filter: Option<&str>) -> Vec<String> {
        let inner = self.inner.lock();
        let mut matched: Vec<&String> = match filter {
            Some(needle) => inner.iter().filter(|line| line.contains(needle)).collect(),
            None => inner.iter().collect(),
        };
        if matched.len() > n {
            matched.drain(..matched.len() - n);
        }
        matched.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl LogBufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{} {:>5} {}: {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            metadata.level(),
            metadata.target(),
            visitor.line
        );
        self.buffer.push(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let message = format!("{value:?}");
            // The message goes first, without its field name.
            if self.line.is_empty() {
                self.line = message;
            } else {
                self.line = format!("{message} {}", self.line);
            }
        } else {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            if self.line.is_empty() {
                self.line = value.to_string();
            } else {
                self.line = format!("{value} {}", self.line);
            }
        } else {
            let _ = write!(self.line, " {}={value}", field.name());
        }
    }
}
