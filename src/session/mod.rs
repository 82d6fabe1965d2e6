//! Per-call audio capture: read loop, periodic flush, terminal flush.
//!
//! A session moves `Idle -> Recording -> Stopped`. Three activities touch it
//! concurrently: the reader thread appending microphone bytes, the timer
//! thread flushing on each tick, and whoever reports the call ended (a
//! call-state handler, the host, or the reader itself on failure). The
//! buffer and the state flag live under one lock that is held only to
//! append or to take-and-clear; encoding and emission happen outside it.

pub mod call_state;

use crate::audio::encoder::{AudioFormat, encode_with_format};
use crate::audio::recorder::AudioSource;
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{CallShieldError, Result};
use crate::events::CallEvent;
use crate::number::PhoneNumber;
use crate::sink::EventSink;
use call_state::{CallState, CallStateMonitor, Subscription};
use crossbeam_channel::{Receiver, Sender, select};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Capture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    /// Terminal.
    Stopped,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Call-state stream reported idle.
    CallEnded,
    /// Host asked for the stop (new call, shutdown, drop).
    Requested,
    /// A finite source ran out of audio.
    SourceExhausted,
    /// The read loop hit an unrecoverable device error.
    ReadFailed,
}

/// Where a capture failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Open,
    Read,
}

/// Capture-failure signal handed to the failure hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFailure {
    pub caller_number: String,
    pub stage: FailureStage,
    pub message: String,
}

impl CaptureFailure {
    fn new(caller: &PhoneNumber, stage: FailureStage, err: &CallShieldError) -> Self {
        Self {
            caller_number: caller.raw().to_string(),
            stage,
            message: err.to_string(),
        }
    }
}

pub type FailureHook = Arc<dyn Fn(&CaptureFailure) + Send + Sync>;

/// Stats for a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub caller_number: String,
    pub bytes_captured: u64,
    pub chunks_emitted: u64,
    pub duration: Duration,
    pub reason: StopReason,
}

/// Tunables for one capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush timer period.
    pub chunk_interval: Duration,
    /// Largest single read from the source.
    pub read_buffer_bytes: usize,
    /// Sleep after a zero-byte read from a live source.
    pub idle_backoff: Duration,
    pub format: AudioFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(defaults::CHUNK_INTERVAL_SECS),
            read_buffer_bytes: defaults::READ_BUFFER_BYTES,
            idle_backoff: Duration::from_millis(defaults::IDLE_BACKOFF_MS),
            format: AudioFormat::default(),
        }
    }
}

struct Shared {
    state: CaptureState,
    buffer: Vec<u8>,
    /// Set by the terminal flush; later appends are discarded.
    finalized: bool,
    last_flush: Instant,
    bytes_captured: u64,
    chunks_emitted: u64,
    summary: Option<SessionSummary>,
}

#[derive(Default)]
struct Workers {
    reader: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    caller: PhoneNumber,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    format: AudioFormat,
    started_at: Instant,
    on_failure: Option<FailureHook>,
    shared: Mutex<Shared>,
    closed: Condvar,
    workers: Mutex<Workers>,
    /// Dropping the sender stops the timer thread.
    timer_stop: Mutex<Option<Sender<()>>>,
    subscription: Mutex<Option<Subscription>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        relock(&self.shared)
    }

    fn is_recording(&self) -> bool {
        self.shared().state == CaptureState::Recording
    }

    fn append(&self, bytes: &[u8]) {
        let mut shared = self.shared();
        if shared.finalized {
            return;
        }
        shared.buffer.extend_from_slice(bytes);
        shared.bytes_captured += bytes.len() as u64;
    }

    fn emit(&self, event: CallEvent) {
        let kind = event.kind();
        if let Err(e) = self.sink.emit(event) {
            warn!(
                caller = %self.caller,
                sink = self.sink.name(),
                event = kind,
                error = %e,
                "failed to deliver event"
            );
        }
    }

    /// Timer-driven, non-final flush.
    fn flush(&self) {
        let pcm = {
            let mut shared = self.shared();
            if shared.finalized || shared.state != CaptureState::Recording {
                return;
            }
            shared.last_flush = self.clock.now();
            if shared.buffer.is_empty() {
                return;
            }
            shared.chunks_emitted += 1;
            std::mem::take(&mut shared.buffer)
        };

        debug!(caller = %self.caller, bytes = pcm.len(), "flushing audio chunk");
        let chunk = encode_with_format(&pcm, self.format);
        self.emit(CallEvent::AudioChunk {
            caller_number: self.caller.raw().to_string(),
            data: chunk.into_bytes(),
        });
    }

    fn report_failure(&self, stage: FailureStage, err: &CallShieldError) {
        let failure = CaptureFailure::new(&self.caller, stage, err);
        error!(caller = %self.caller, ?stage, error = %err, "audio capture failed");
        if let Some(hook) = &self.on_failure {
            hook(&failure);
        }
    }

    /// Recording -> Stopped. Only the first caller gets a summary.
    fn finish(&self, reason: StopReason) -> Option<SessionSummary> {
        {
            let mut shared = self.shared();
            if shared.state != CaptureState::Recording {
                return None;
            }
            shared.state = CaptureState::Stopped;
        }
        info!(caller = %self.caller, ?reason, "stopping capture session");

        drop(relock(&self.timer_stop).take());
        let (timer, reader) = {
            let mut workers = relock(&self.workers);
            (workers.timer.take(), workers.reader.take())
        };
        join_worker(timer, "flush timer");
        join_worker(reader, "audio reader");

        let (residual, summary) = {
            let mut shared = self.shared();
            shared.finalized = true;
            shared.last_flush = self.clock.now();
            let residual = std::mem::take(&mut shared.buffer);
            if !residual.is_empty() {
                shared.chunks_emitted += 1;
            }
            let summary = SessionSummary {
                caller_number: self.caller.raw().to_string(),
                bytes_captured: shared.bytes_captured,
                chunks_emitted: shared.chunks_emitted,
                duration: self.clock.now().saturating_duration_since(self.started_at),
                reason,
            };
            (residual, summary)
        };

        let data = (!residual.is_empty())
            .then(|| encode_with_format(&residual, self.format).into_bytes());
        self.emit(CallEvent::CallEnded {
            caller_number: self.caller.raw().to_string(),
            data,
        });

        drop(relock(&self.subscription).take());

        self.shared().summary = Some(summary.clone());
        self.closed.notify_all();

        info!(
            caller = %self.caller,
            bytes = summary.bytes_captured,
            chunks = summary.chunks_emitted,
            "capture session closed"
        );
        Some(summary)
    }
}

/// Join a worker unless it is the current thread (the reader stopping itself).
fn join_worker(handle: Option<JoinHandle<()>>, name: &str) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        error!(worker = name, "capture worker panicked: {msg}");
    }
}

enum ReaderExit {
    Stopped,
    Exhausted,
    Failed(CallShieldError),
}

fn read_loop(
    inner: Arc<Inner>,
    mut source: Box<dyn AudioSource>,
    read_buffer_bytes: usize,
    idle_backoff: Duration,
) {
    let mut buf = vec![0u8; read_buffer_bytes.max(2)];
    let finite = source.is_finite();

    let exit = loop {
        if !inner.is_recording() {
            break ReaderExit::Stopped;
        }
        match source.read(&mut buf) {
            Ok(0) if finite => break ReaderExit::Exhausted,
            Ok(0) => thread::sleep(idle_backoff),
            Ok(n) => inner.append(&buf[..n]),
            Err(e) => break ReaderExit::Failed(e),
        }
    };

    if let Err(e) = source.stop() {
        warn!(caller = %inner.caller, error = %e, "failed to release audio device");
    }

    match exit {
        ReaderExit::Stopped => {}
        ReaderExit::Exhausted => {
            info!(caller = %inner.caller, "audio source exhausted");
            inner.finish(StopReason::SourceExhausted);
        }
        ReaderExit::Failed(e) => {
            inner.report_failure(FailureStage::Read, &e);
            inner.finish(StopReason::ReadFailed);
        }
    }
}

fn timer_loop(inner: Arc<Inner>, ticks: Receiver<Instant>, stop: Receiver<()>) {
    loop {
        select! {
            recv(ticks) -> tick => match tick {
                Ok(_) => inner.flush(),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!(caller = %inner.caller, "flush timer stopped");
}

/// Configures and starts a [`CaptureSession`].
pub struct SessionBuilder {
    caller: PhoneNumber,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    ticks: Option<Receiver<Instant>>,
    monitor: Option<Arc<dyn CallStateMonitor>>,
    on_failure: Option<FailureHook>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the interval timer with an external tick stream.
    /// Each received tick triggers one flush; disconnecting stops flushing.
    pub fn ticks(mut self, ticks: Receiver<Instant>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Stop the session when `monitor` reports [`CallState::Idle`].
    pub fn call_state(mut self, monitor: Arc<dyn CallStateMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Open `source` and begin recording.
    ///
    /// Emits `callStarted` once the source is open. With a call-state
    /// monitor, an Idle that arrives while the source is still opening ends
    /// the session as soon as it starts, so `callEnded` follows at once.
    ///
    /// # Errors
    /// Returns the open error (`PermissionDenied`, `DeviceUnavailable`)
    /// after signalling the failure hook. No events are emitted in that case.
    pub fn start(self, mut source: Box<dyn AudioSource>) -> Result<CaptureSession> {
        let ended_early = Arc::new(AtomicBool::new(false));
        let target: Arc<Mutex<Weak<Inner>>> = Arc::new(Mutex::new(Weak::new()));
        let subscription = self.monitor.map(|monitor| {
            let ended_early = Arc::clone(&ended_early);
            let target = Arc::clone(&target);
            monitor.subscribe(Arc::new(move |state| {
                if state != CallState::Idle {
                    return;
                }
                ended_early.store(true, Ordering::SeqCst);
                let inner = relock(&target).upgrade();
                if let Some(inner) = inner {
                    inner.finish(StopReason::CallEnded);
                }
            }))
        });

        if let Err(e) = source.start() {
            drop(subscription);
            let failure = CaptureFailure::new(&self.caller, FailureStage::Open, &e);
            warn!(
                caller = %self.caller,
                error = %e,
                "could not open audio source, session stopped before recording"
            );
            if let Some(hook) = &self.on_failure {
                hook(&failure);
            }
            return Err(e);
        }

        let now = self.clock.now();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let inner = Arc::new(Inner {
            caller: self.caller,
            sink: self.sink,
            clock: self.clock,
            format: self.config.format,
            started_at: now,
            on_failure: self.on_failure,
            shared: Mutex::new(Shared {
                state: CaptureState::Recording,
                buffer: Vec::new(),
                finalized: false,
                last_flush: now,
                bytes_captured: 0,
                chunks_emitted: 0,
                summary: None,
            }),
            closed: Condvar::new(),
            workers: Mutex::new(Workers::default()),
            timer_stop: Mutex::new(Some(stop_tx)),
            subscription: Mutex::new(subscription),
        });

        info!(
            caller = %inner.caller,
            interval_secs = self.config.chunk_interval.as_secs_f64(),
            "capture session recording"
        );
        inner.emit(CallEvent::CallStarted {
            caller_number: inner.caller.raw().to_string(),
        });

        let ticks = self
            .ticks
            .unwrap_or_else(|| crossbeam_channel::tick(self.config.chunk_interval));
        let timer = {
            let inner = Arc::clone(&inner);
            thread::spawn(move || timer_loop(inner, ticks, stop_rx))
        };
        let reader = {
            let inner = Arc::clone(&inner);
            let read_buffer_bytes = self.config.read_buffer_bytes;
            let idle_backoff = self.config.idle_backoff;
            thread::spawn(move || read_loop(inner, source, read_buffer_bytes, idle_backoff))
        };
        {
            let mut workers = relock(&inner.workers);
            workers.timer = Some(timer);
            workers.reader = Some(reader);
        }

        // Idle handlers reach the session only from here on
        *relock(&target) = Arc::downgrade(&inner);
        if ended_early.load(Ordering::SeqCst) {
            info!(caller = %inner.caller, "call ended while the source was opening");
            inner.finish(StopReason::CallEnded);
        }

        Ok(CaptureSession { inner })
    }
}

/// One call's audio capture. Dropping a recording session stops it.
pub struct CaptureSession {
    inner: Arc<Inner>,
}

impl CaptureSession {
    pub fn builder(caller: PhoneNumber, sink: Arc<dyn EventSink>) -> SessionBuilder {
        SessionBuilder {
            caller,
            sink,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            ticks: None,
            monitor: None,
            on_failure: None,
        }
    }

    /// Stop recording, flush the residual audio and emit `callEnded`.
    ///
    /// Idempotent: only the first of any number of concurrent calls (or
    /// call-end notifications) performs the stop and gets the summary.
    pub fn stop(&self) -> Option<SessionSummary> {
        self.inner.finish(StopReason::Requested)
    }

    pub fn state(&self) -> CaptureState {
        self.inner.shared().state
    }

    pub fn caller(&self) -> &PhoneNumber {
        &self.inner.caller
    }

    pub fn bytes_captured(&self) -> u64 {
        self.inner.shared().bytes_captured
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.inner.shared().chunks_emitted
    }

    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    pub fn last_flush(&self) -> Instant {
        self.inner.shared().last_flush
    }

    /// Summary of a closed session, whoever stopped it.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.inner.shared().summary.clone()
    }

    /// Block until the session has closed (`callEnded` emitted) or `timeout` passes.
    pub fn wait_until_stopped(&self, timeout: Duration) -> Option<SessionSummary> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.inner.shared();
        loop {
            if let Some(summary) = &shared.summary {
                return Some(summary.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            shared = match self.inner.closed.wait_timeout(shared, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.inner.finish(StopReason::Requested);
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("caller", &self.inner.caller.raw())
            .field("state", &self.state())
            .finish()
    }
}
