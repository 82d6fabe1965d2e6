//! Outbound event channel to the consuming application.
//!
//! Sinks are handed to sessions at construction; there is no process-wide
//! sink reference.

use crate::error::{CallShieldError, Result};
use crate::events::CallEvent;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-directional event channel. Called from capture threads, so `&self`.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: CallEvent) -> Result<()>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: CallEvent) -> Result<()> {
        (**self).emit(event)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Forwards events into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<CallEvent>,
}

impl ChannelSink {
    pub fn new(tx: crossbeam_channel::Sender<CallEvent>) -> Self {
        Self { tx }
    }

    /// Unbounded sink plus the receiving end.
    pub fn unbounded() -> (Self, crossbeam_channel::Receiver<CallEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CallEvent) -> Result<()> {
        self.tx.send(event).map_err(|e| CallShieldError::Protocol {
            message: format!("event receiver dropped: {} lost", e.0.kind()),
        })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Output stream shared between event emission and command responses.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes each event as one JSON line to a shared writer.
pub struct JsonLinesSink {
    writer: SharedWriter,
}

impl JsonLinesSink {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: CallEvent) -> Result<()> {
        let line = event.to_json().map_err(|e| CallShieldError::Protocol {
            message: format!("Failed to serialize event: {}", e),
        })?;
        let mut writer = self.writer.lock().map_err(|e| CallShieldError::Protocol {
            message: format!("Failed to lock event writer: {}", e),
        })?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Records every event; used in tests to assert on delivery order.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Mutex<Vec<CallEvent>>,
    changed: Condvar,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<CallEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Count of events of the given wire type.
    pub fn count(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Block until `predicate` holds over the recorded events or `timeout` passes.
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[CallEvent]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let Ok(mut guard) = self.events.lock() else {
            return false;
        };
        loop {
            if predicate(&guard) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.changed.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
    }

    /// Block until at least `n` events of `kind` were emitted.
    pub fn wait_for(&self, kind: &str, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| {
            events.iter().filter(|event| event.kind() == kind).count() >= n
        })
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: CallEvent) -> Result<()> {
        let mut guard = self.events.lock().map_err(|e| CallShieldError::Protocol {
            message: format!("Failed to lock collector: {}", e),
        })?;
        guard.push(event);
        self.changed.notify_all();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
