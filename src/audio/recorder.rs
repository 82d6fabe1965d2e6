use crate::error::{CallShieldError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Trait for microphone-like sources of 16kHz mono 16-bit little-endian PCM.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Open the device and begin capturing.
    ///
    /// # Errors
    /// `PermissionDenied` or `DeviceUnavailable` when the device cannot be opened.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Read available PCM bytes into `buf`, returning how many were written.
    ///
    /// `Ok(0)` means nothing is available yet (or, for finite sources, that
    /// the source is exhausted). Implementations only return whole samples.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// True for sources that end on their own (files), false for live devices.
    fn is_finite(&self) -> bool {
        false
    }
}

/// One scripted step for [`MockAudioSource`].
#[derive(Debug, Clone)]
pub enum MockRead {
    Bytes(Vec<u8>),
    Fail(String),
}

/// Which open failure a mock should simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStartFailure {
    PermissionDenied,
    DeviceUnavailable,
}

/// Observation handle for a [`MockAudioSource`] that was moved into a session.
#[derive(Debug, Clone, Default)]
pub struct MockTracker {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
}

impl MockTracker {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }
}

/// Feeds reads into a [`MockAudioSource`] from another thread.
#[derive(Debug, Clone)]
pub struct MockFeed {
    tx: Sender<MockRead>,
}

impl MockFeed {
    /// Queue bytes for the next read(s).
    pub fn push(&self, bytes: Vec<u8>) {
        // Receiver gone means the session already released the source
        let _sent = self.tx.send(MockRead::Bytes(bytes)).is_ok();
    }

    /// Make the next read fail.
    pub fn fail(&self, message: &str) {
        let _sent = self.tx.send(MockRead::Fail(message.to_string())).is_ok();
    }
}

/// Mock audio source for testing.
///
/// Reads come from a channel. A live mock returns `Ok(0)` when nothing is
/// queued; a finite mock blocks until data arrives and reports exhaustion
/// once every feed is dropped.
#[derive(Debug)]
pub struct MockAudioSource {
    rx: Receiver<MockRead>,
    pending: Vec<u8>,
    start_failure: Option<MockStartFailure>,
    start_delay: Duration,
    finite: bool,
    poll: Duration,
    tracker: MockTracker,
}

impl MockAudioSource {
    /// Create a live mock and the feed that drives it.
    pub fn channel() -> (Self, MockFeed) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let source = Self {
            rx,
            pending: Vec::new(),
            start_failure: None,
            start_delay: Duration::ZERO,
            finite: false,
            poll: Duration::from_millis(5),
            tracker: MockTracker::default(),
        };
        (source, MockFeed { tx })
    }

    /// Create a finite mock that yields `reads` in order, then ends.
    pub fn with_reads(reads: Vec<MockRead>) -> Self {
        let (source, feed) = Self::channel();
        for read in reads {
            // Unbounded channel with a live receiver cannot fail
            let _sent = feed.tx.send(read).is_ok();
        }
        source.finite()
    }

    /// Report exhaustion once all feeds are dropped.
    pub fn finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self, failure: MockStartFailure) -> Self {
        self.start_failure = Some(failure);
        self
    }

    /// Make `start` take `delay`, like a device that is slow to open.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Handle for observing the mock after it has been moved.
    pub fn tracker(&self) -> MockTracker {
        self.tracker.clone()
    }

    fn next_read(&self) -> Option<MockRead> {
        if self.finite {
            return self.rx.recv().ok();
        }
        match self.rx.recv_timeout(self.poll) {
            Ok(read) => Some(read),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if !self.start_delay.is_zero() {
            std::thread::sleep(self.start_delay);
        }
        match self.start_failure {
            Some(MockStartFailure::PermissionDenied) => Err(CallShieldError::PermissionDenied {
                message: "mock microphone permission denied".to_string(),
            }),
            Some(MockStartFailure::DeviceUnavailable) => Err(CallShieldError::DeviceUnavailable {
                device: "mock".to_string(),
            }),
            None => {
                self.tracker.started.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.tracker.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.next_read() {
                Some(MockRead::Bytes(bytes)) => self.pending = bytes,
                Some(MockRead::Fail(message)) => {
                    return Err(CallShieldError::AudioCapture { message });
                }
                None => return Ok(0),
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        self.tracker.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}
