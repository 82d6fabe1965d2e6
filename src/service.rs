//! Host-side glue: admission, monitoring and inbound commands in one place.
//!
//! Admission never waits on audio I/O. An AllowAndMonitor verdict comes back
//! with a [`PendingMonitor`] that opens the microphone afterwards, once the
//! verdict has been delivered. Each monitored call and each hang-up bumps a
//! generation counter; a monitor that finishes opening after its call has
//! ended stops the session it just started.

use crate::audio::recorder::AudioSource;
use crate::cache::ScamNumberCache;
use crate::contacts::ContactResolver;
use crate::defaults;
use crate::error::{CallShieldError, Result};
use crate::events::CallEvent;
use crate::gate::{CallAdmissionGate, CallResponse, IncomingCall, Verdict};
use crate::number::PhoneNumber;
use crate::session::call_state::{CallState, CallStateBus};
use crate::session::{
    CaptureFailure, CaptureSession, FailureHook, FailureStage, SessionConfig, SessionSummary,
};
use crate::sink::EventSink;
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Opens a fresh audio source for each monitored call.
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn AudioSource>> + Send + Sync>;

/// Everything needed to start a capture session for an admitted call.
#[derive(Clone)]
struct MonitorSettings {
    sink: Arc<dyn EventSink>,
    bus: CallStateBus,
    sources: SourceFactory,
    session_config: SessionConfig,
    ticks: Option<Receiver<Instant>>,
    on_failure: Option<FailureHook>,
}

#[derive(Default)]
struct CallSlot {
    /// Bumped for every monitored call and every hang-up.
    generation: u64,
    session: Option<CaptureSession>,
}

type SharedSlot = Arc<Mutex<CallSlot>>;

fn lock_slot(slot: &Mutex<CallSlot>) -> MutexGuard<'_, CallSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Verdict for a call plus the monitoring it still needs, if any.
#[derive(Debug)]
pub struct Admission {
    pub response: CallResponse,
    /// Present for AllowAndMonitor. Start it after the response is delivered.
    pub monitor: Option<PendingMonitor>,
}

/// Monitoring for an admitted call that has not opened the microphone yet.
///
/// Dropping it without starting stops the previous call's session, if it
/// was still recording, and monitors nothing.
pub struct PendingMonitor {
    caller: PhoneNumber,
    generation: u64,
    previous: Option<CaptureSession>,
    slot: SharedSlot,
    settings: MonitorSettings,
}

impl PendingMonitor {
    pub fn caller(&self) -> &PhoneNumber {
        &self.caller
    }

    fn is_current(&self) -> bool {
        lock_slot(&self.slot).generation == self.generation
    }

    /// Stop the previous session, open the microphone and record until the
    /// call ends. Blocks while the source opens.
    ///
    /// Does nothing if the call ended before this runs. If it ends while the
    /// source is opening, the new session stops right after `callStarted`.
    ///
    /// # Errors
    /// The open error. It has already been logged and passed to the
    /// failure hook; the call itself is unaffected.
    pub fn start(mut self) -> Result<()> {
        if let Some(previous) = self.previous.take() {
            info!(caller = %previous.caller(), "stopping previous session for new call");
            previous.stop();
        }
        if !self.is_current() {
            debug!(caller = %self.caller, "call over before monitoring started");
            return Ok(());
        }

        let source = match (self.settings.sources)() {
            Ok(source) => source,
            Err(e) => {
                self.report_open_failure(&e);
                return Err(e);
            }
        };

        let settings = &self.settings;
        let mut builder = CaptureSession::builder(self.caller.clone(), Arc::clone(&settings.sink))
            .config(settings.session_config.clone())
            .call_state(Arc::new(settings.bus.clone()));
        if let Some(ticks) = &settings.ticks {
            builder = builder.ticks(ticks.clone());
        }
        if let Some(hook) = &settings.on_failure {
            builder = builder.on_failure(Arc::clone(hook));
        }
        let session = builder.start(source)?;

        let stale = {
            let mut slot = lock_slot(&self.slot);
            if slot.generation == self.generation {
                slot.session.replace(session)
            } else {
                Some(session)
            }
        };
        if let Some(stale) = stale {
            info!(caller = %stale.caller(), "call ended while the microphone was opening");
            stale.stop();
        }
        Ok(())
    }

    /// Run [`start`](Self::start) on its own thread.
    pub fn spawn(self) {
        let caller = self.caller.clone();
        let spawned = thread::Builder::new()
            .name("callshield-monitor".to_string())
            .spawn(move || {
                let caller = self.caller.clone();
                if let Err(e) = self.start() {
                    debug!(caller = %caller, error = %e, "monitoring not started");
                }
            });
        if let Err(e) = spawned {
            error!(caller = %caller, error = %e, "failed to spawn monitor thread");
        }
    }

    fn report_open_failure(&self, err: &CallShieldError) {
        if err.is_capture_open_failure() {
            warn!(caller = %self.caller, error = %err, "microphone unavailable, call not monitored");
        } else {
            error!(caller = %self.caller, error = %err, "failed to create audio source");
        }
        if let Some(hook) = &self.settings.on_failure {
            hook(&CaptureFailure {
                caller_number: self.caller.raw().to_string(),
                stage: FailureStage::Open,
                message: err.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for PendingMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMonitor")
            .field("caller", &self.caller.raw())
            .field("generation", &self.generation)
            .finish()
    }
}

pub struct ScreeningService {
    gate: CallAdmissionGate,
    cache: Arc<ScamNumberCache>,
    settings: MonitorSettings,
    slot: SharedSlot,
}

impl ScreeningService {
    pub fn new(
        cache: Arc<ScamNumberCache>,
        contacts: Arc<dyn ContactResolver>,
        sink: Arc<dyn EventSink>,
        sources: SourceFactory,
    ) -> Self {
        Self {
            gate: CallAdmissionGate::new(Arc::clone(&cache), contacts, Arc::clone(&sink)),
            cache,
            settings: MonitorSettings {
                sink,
                bus: CallStateBus::new(),
                sources,
                session_config: SessionConfig::default(),
                ticks: None,
                on_failure: None,
            },
            slot: SharedSlot::default(),
        }
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.settings.session_config = config;
        self
    }

    /// Drive session flushes from `ticks` instead of the interval timer.
    pub fn with_ticks(mut self, ticks: Receiver<Instant>) -> Self {
        self.settings.ticks = Some(ticks);
        self
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.settings.on_failure = Some(hook);
        self
    }

    fn slot(&self) -> MutexGuard<'_, CallSlot> {
        lock_slot(&self.slot)
    }

    /// Decide on an incoming call without touching audio.
    ///
    /// For AllowAndMonitor the returned monitor must be started (or spawned)
    /// by the caller once the verdict is out. Admitting a new monitored call
    /// retires the previous one.
    pub fn admit(&self, call: &IncomingCall) -> Admission {
        let verdict = self.gate.admit(call);
        let monitor = (verdict == Verdict::AllowAndMonitor).then(|| {
            let mut slot = self.slot();
            slot.generation += 1;
            PendingMonitor {
                caller: PhoneNumber::new(call.number.as_str()),
                generation: slot.generation,
                previous: slot.session.take(),
                slot: Arc::clone(&self.slot),
                settings: self.settings.clone(),
            }
        });
        Admission {
            response: CallResponse::from(verdict),
            monitor,
        }
    }

    /// Decide on an incoming call. Monitoring of unknown callers starts on
    /// a background thread, so this returns without waiting on the microphone.
    pub fn screen(&self, call: &IncomingCall) -> CallResponse {
        let admission = self.admit(call);
        if let Some(monitor) = admission.monitor {
            monitor.spawn();
        }
        admission.response
    }

    /// Replace the scam cache with `numbers`.
    pub fn update_scam_cache<S: AsRef<str>>(&self, numbers: &[S]) -> Result<usize> {
        self.cache.replace_all(numbers)
    }

    pub fn add_scam_number(&self, number: &str) -> Result<bool> {
        self.cache.add_one(number)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.count()
    }

    /// A scam was confirmed mid-call: alert first, then remember the number.
    ///
    /// # Errors
    /// The cache error, if the number could not be persisted. The alert has
    /// been emitted regardless.
    pub fn scam_detected(&self, number: &str, reason: &str) -> Result<()> {
        let reason = if reason.trim().is_empty() {
            defaults::DEFAULT_SCAM_REASON
        } else {
            reason
        };
        info!(number, reason, "scam detected");
        if let Err(e) = self.settings.sink.emit(CallEvent::ScamAlert {
            caller_number: number.to_string(),
            reason: reason.to_string(),
        }) {
            warn!(number, error = %e, "failed to deliver scam alert");
        }

        match self.cache.add_one(number) {
            Ok(_) => Ok(()),
            Err(CallShieldError::MalformedInput { message }) => {
                warn!(number, %message, "not caching scam number");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Forward a platform call-state transition to subscribed sessions.
    ///
    /// Idle also retires a monitor that is still opening the microphone.
    pub fn call_state_changed(&self, state: CallState) {
        let finished = (state == CallState::Idle).then(|| self.retire());
        self.settings.bus.publish(state);
        drop(finished);
    }

    pub fn end_call(&self) {
        self.call_state_changed(CallState::Idle);
    }

    /// Stop the active session, if any.
    pub fn stop_monitoring(&self) -> Option<SessionSummary> {
        let session = self.retire()?;
        session.stop().or_else(|| session.summary())
    }

    /// Invalidate any pending monitor and take the recording session.
    fn retire(&self) -> Option<CaptureSession> {
        let mut slot = self.slot();
        slot.generation += 1;
        slot.session.take()
    }

    pub fn active_caller(&self) -> Option<String> {
        self.slot()
            .session
            .as_ref()
            .map(|session| session.caller().raw().to_string())
    }

    pub fn call_states(&self) -> &CallStateBus {
        &self.settings.bus
    }

    pub fn cache(&self) -> &Arc<ScamNumberCache> {
        &self.cache
    }
}

impl Drop for ScreeningService {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::{MockAudioSource, MockFeed, MockStartFailure, MockTracker};
    use crate::cache::store::MemoryStore;
    use crate::contacts::StaticContacts;
    use crate::sink::CollectorSink;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        service: ScreeningService,
        sink: Arc<CollectorSink>,
        store: Arc<MemoryStore>,
        feeds: Arc<Mutex<Vec<MockFeed>>>,
        trackers: Arc<Mutex<Vec<MockTracker>>>,
    }

    fn harness(contacts: &[&str]) -> Harness {
        harness_with_open_delay(contacts, Duration::ZERO)
    }

    fn harness_with_open_delay(contacts: &[&str], open_delay: Duration) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ScamNumberCache::open(Box::new(Arc::clone(&store))));
        let sink = Arc::new(CollectorSink::new());
        let feeds: Arc<Mutex<Vec<MockFeed>>> = Arc::default();
        let trackers: Arc<Mutex<Vec<MockTracker>>> = Arc::default();
        let factory_feeds = Arc::clone(&feeds);
        let factory_trackers = Arc::clone(&trackers);
        let sources: SourceFactory = Arc::new(move || {
            let (source, feed) = MockAudioSource::channel();
            let source = source.with_start_delay(open_delay);
            factory_feeds.lock().unwrap().push(feed);
            factory_trackers.lock().unwrap().push(source.tracker());
            Ok(Box::new(source) as Box<dyn AudioSource>)
        });
        let (_tick_tx, tick_rx) = crossbeam_channel::unbounded();
        let service = ScreeningService::new(
            cache,
            Arc::new(StaticContacts::new(contacts)),
            sink.clone(),
            sources,
        )
        .with_ticks(tick_rx);
        Harness {
            service,
            sink,
            store,
            feeds,
            trackers,
        }
    }

    /// Admit `number` and, if it needs monitoring, start it on this thread.
    fn admit_and_start(service: &ScreeningService, number: &str) -> Verdict {
        let admission = service.admit(&IncomingCall::inbound(number));
        if let Some(monitor) = admission.monitor {
            monitor.start().unwrap();
        }
        admission.response.verdict
    }

    #[test]
    fn unknown_caller_is_monitored_until_idle() {
        let h = harness(&[]);

        let admission = h.service.admit(&IncomingCall::inbound("555-0142"));
        assert_eq!(admission.response.verdict, Verdict::AllowAndMonitor);
        assert!(admission.response.allow);
        assert!(h.sink.events().is_empty());

        admission.monitor.unwrap().start().unwrap();
        assert_eq!(h.service.active_caller().as_deref(), Some("555-0142"));
        assert_eq!(h.sink.count("callStarted"), 1);

        h.service.end_call();
        assert_eq!(h.sink.count("callEnded"), 1);
        assert!(h.service.active_caller().is_none());
    }

    #[test]
    fn verdict_does_not_wait_for_slow_microphone() {
        let h = harness_with_open_delay(&[], Duration::from_millis(500));

        let began = Instant::now();
        let response = h.service.screen(&IncomingCall::inbound("+15550001111"));
        let elapsed = began.elapsed();

        assert_eq!(response.verdict, Verdict::AllowAndMonitor);
        assert!(elapsed < Duration::from_millis(250), "verdict took {elapsed:?}");
        assert!(h.sink.events().is_empty());

        assert!(h.sink.wait_for("callStarted", 1, WAIT));
        h.service.end_call();
        assert!(h.sink.wait_for("callEnded", 1, WAIT));
    }

    #[test]
    fn hang_up_while_microphone_opens_ends_the_call() {
        let h = harness_with_open_delay(&[], Duration::from_millis(500));

        h.service.screen(&IncomingCall::inbound("+15550001111"));
        thread::sleep(Duration::from_millis(100));
        h.service.end_call();

        assert!(h.sink.wait_for("callEnded", 1, WAIT));
        let kinds: Vec<&str> = h.sink.events().iter().map(CallEvent::kind).collect();
        assert_eq!(kinds, vec!["callStarted", "callEnded"]);
        assert!(h.service.active_caller().is_none());
        assert!(h.trackers.lock().unwrap()[0].is_stopped());

        // Late call-state noise changes nothing
        h.service.end_call();
        assert_eq!(h.sink.count("callEnded"), 1);
    }

    #[test]
    fn new_call_while_microphone_opens_retires_the_first() {
        let h = harness_with_open_delay(&[], Duration::from_millis(300));

        h.service.screen(&IncomingCall::inbound("1001"));
        thread::sleep(Duration::from_millis(50));
        let second = h.service.admit(&IncomingCall::inbound("1002"));
        assert!(second.monitor.is_some());

        assert!(h.sink.wait_for("callEnded", 1, WAIT));
        let kinds: Vec<(&str, String)> = h
            .sink
            .events()
            .iter()
            .map(|e| (e.kind(), e.caller_number().to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("callStarted", "1001".to_string()),
                ("callEnded", "1001".to_string()),
            ]
        );
        assert!(h.service.active_caller().is_none());
    }

    #[test]
    fn hang_up_before_monitor_starts_opens_nothing() {
        let h = harness(&[]);

        let admission = h.service.admit(&IncomingCall::inbound("5550142"));
        h.service.end_call();
        admission.monitor.unwrap().start().unwrap();

        assert!(h.sink.events().is_empty());
        assert!(h.feeds.lock().unwrap().is_empty());
        assert!(h.service.active_caller().is_none());
    }

    #[test]
    fn new_call_stops_previous_session() {
        let h = harness(&[]);
        admit_and_start(&h.service, "1001");
        admit_and_start(&h.service, "1002");

        let kinds: Vec<(&str, String)> = h
            .sink
            .events()
            .iter()
            .map(|e| (e.kind(), e.caller_number().to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("callStarted", "1001".to_string()),
                ("callEnded", "1001".to_string()),
                ("callStarted", "1002".to_string()),
            ]
        );
        assert_eq!(h.feeds.lock().unwrap().len(), 2);
        assert_eq!(h.service.active_caller().as_deref(), Some("1002"));
    }

    #[test]
    fn superseded_monitor_opens_nothing() {
        let h = harness(&[]);
        let first = h.service.admit(&IncomingCall::inbound("1001")).monitor.unwrap();
        admit_and_start(&h.service, "1002");

        // The first call was retired before its microphone opened
        first.start().unwrap();

        assert_eq!(h.service.active_caller().as_deref(), Some("1002"));
        assert_eq!(h.sink.count("callStarted"), 1);
        assert_eq!(h.sink.count("callEnded"), 0);
        assert_eq!(h.feeds.lock().unwrap().len(), 1);
    }

    #[test]
    fn known_scam_is_blocked() {
        let h = harness(&[]);
        h.service.update_scam_cache(&["+1 555 0199"]).unwrap();

        let admission = h.service.admit(&IncomingCall::inbound("+15550199"));

        assert_eq!(admission.response.verdict, Verdict::Block);
        assert!(admission.response.reject);
        assert!(admission.monitor.is_none());
        assert_eq!(h.sink.count("scamAlert"), 1);
        assert!(h.service.active_caller().is_none());
    }

    #[test]
    fn scam_detected_alerts_then_caches() {
        let h = harness(&[]);
        h.service.scam_detected("555-0142", "").unwrap();

        assert_eq!(
            h.sink.events(),
            vec![CallEvent::ScamAlert {
                caller_number: "555-0142".into(),
                reason: "Scam detected".into(),
            }]
        );
        assert_eq!(h.service.cached_count(), 1);
        assert_eq!(
            h.service.screen(&IncomingCall::inbound("5550142")).verdict,
            Verdict::Block
        );
    }

    #[test]
    fn scam_detected_without_number_still_alerts() {
        let h = harness(&[]);
        h.service.scam_detected("", "voice phishing").unwrap();

        assert_eq!(h.sink.count("scamAlert"), 1);
        assert_eq!(h.service.cached_count(), 0);
    }

    #[test]
    fn scam_detected_reports_persistence_failure_after_alert() {
        let h = harness(&[]);
        h.store.set_fail_writes(true);

        let result = h.service.scam_detected("555-0142", "impersonation");

        assert!(matches!(result, Err(CallShieldError::PersistenceFailure { .. })));
        assert_eq!(h.sink.count("scamAlert"), 1);
        assert_eq!(h.service.cached_count(), 0);
        // Not persisted, so not blocked either
        assert_eq!(
            h.service.admit(&IncomingCall::inbound("5550142")).response.verdict,
            Verdict::AllowAndMonitor
        );
    }

    #[test]
    fn open_failure_allows_call_without_events() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ScamNumberCache::open(Box::new(Arc::clone(&store))));
        let sink = Arc::new(CollectorSink::new());
        let failures: Arc<Mutex<Vec<CaptureFailure>>> = Arc::default();
        let recorded = Arc::clone(&failures);
        let sources: SourceFactory = Arc::new(|| {
            let (source, _feed) = MockAudioSource::channel();
            Ok(Box::new(source.with_start_failure(MockStartFailure::DeviceUnavailable))
                as Box<dyn AudioSource>)
        });
        let service = ScreeningService::new(
            cache,
            Arc::new(StaticContacts::default()),
            sink.clone(),
            sources,
        )
        .with_failure_hook(Arc::new(move |f| recorded.lock().unwrap().push(f.clone())));

        let admission = service.admit(&IncomingCall::inbound("5550142"));
        assert_eq!(admission.response.verdict, Verdict::AllowAndMonitor);
        assert!(admission.response.allow);

        let result = admission.monitor.unwrap().start();
        assert!(matches!(result, Err(CallShieldError::DeviceUnavailable { .. })));
        assert!(sink.events().is_empty());
        assert!(service.active_caller().is_none());
        assert_eq!(failures.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_monitoring_returns_summary() {
        let h = harness(&[]);
        admit_and_start(&h.service, "1001");
        h.feeds.lock().unwrap()[0].push(vec![0u8; 64]);

        let deadline = Instant::now() + WAIT;
        loop {
            let captured = h
                .service
                .slot()
                .session
                .as_ref()
                .map(|s| s.bytes_captured())
                .unwrap_or(0);
            if captured >= 64 || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let summary = h.service.stop_monitoring().unwrap();
        assert_eq!(summary.bytes_captured, 64);
        assert_eq!(summary.chunks_emitted, 1);
        assert!(h.service.stop_monitoring().is_none());
    }

    #[test]
    fn contact_is_never_monitored() {
        let h = harness(&["555-0100"]);
        let admission = h.service.admit(&IncomingCall::inbound("5550100"));
        assert_eq!(admission.response.verdict, Verdict::Allow);
        assert!(admission.monitor.is_none());
        assert!(h.sink.events().is_empty());
        assert!(h.feeds.lock().unwrap().is_empty());
        assert!(h.service.active_caller().is_none());
    }
}
