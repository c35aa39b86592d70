//! # Relay Bridge
//!
//! Keeps a client connection to the companion's event stream, records what
//! flows through it and republishes it to local subscribers.
//!
//! ## State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^                            |
//!      +------ error / EOF ---------+
//! ```
//!
//! Every failure waits a fixed retry delay; the worker never gives up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::state::{parse_position, BridgeState, BridgeStatus, LastPosition};
use super::transport::{SseTransport, UpstreamEvent, UpstreamTransport};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::fanout::event::{CHANNEL_MESSAGE, CHANNEL_RAW, CHANNEL_STATUS};
use crate::fanout::{Broadcaster, Event, Lifecycle};
use crate::shutdown::Shutdown;

/// Shared transport handle
pub type SharedTransport = Arc<dyn UpstreamTransport + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BridgeInner {
    transport: SharedTransport,
    events: Broadcaster<Event>,
    state: Mutex<BridgeState>,
    position: Mutex<Option<LastPosition>>,
    retry_delay: Duration,
    /// Only bumped with `state` held
    generation: AtomicU64,
    started: Mutex<bool>,
    shutdown: Shutdown,
}

/// Reconnecting relay to an upstream event stream
///
/// Cloning yields another handle to the same bridge.
#[derive(Clone)]
pub struct RelayBridge {
    inner: Arc<BridgeInner>,
}

impl RelayBridge {
    pub fn new(
        transport: SharedTransport,
        events: Broadcaster<Event>,
        retry_delay: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                transport,
                events,
                state: Mutex::new(BridgeState::default()),
                position: Mutex::new(None),
                retry_delay,
                generation: AtomicU64::new(0),
                started: Mutex::new(false),
                shutdown,
            }),
        }
    }

    /// Bridge to the companion described by `config` over HTTP SSE
    pub fn from_config(config: &RelayConfig, shutdown: Shutdown) -> Self {
        Self::new(
            Arc::new(SseTransport::new(config)),
            Broadcaster::new(config.subscriber_capacity),
            Duration::from_millis(config.retry_delay_ms),
            shutdown,
        )
    }

    /// Local broadcaster carrying every republished event
    pub fn events(&self) -> &Broadcaster<Event> {
        &self.inner.events
    }

    /// Copy of the current bridge state
    pub fn state(&self) -> BridgeState {
        lock(&self.inner.state).clone()
    }

    pub fn last_position(&self) -> Option<LastPosition> {
        lock(&self.inner.position).clone()
    }

    /// Last republished event, if any
    pub fn last_event(&self) -> Option<Event> {
        self.inner.events.last()
    }

    /// Start the worker unless it is already running.
    ///
    /// Returns `true` if this call started it.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the worker thread cannot be spawned.
    pub fn ensure_started(&self) -> Result<bool> {
        let mut started = lock(&self.inner.started);
        if *started {
            return Ok(false);
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.spawn_worker(generation)?;
        *started = true;
        Ok(true)
    }

    /// Retire the current worker and start a fresh one.
    ///
    /// From this call on the old worker cannot touch the bridge state or
    /// republish anything; it exits at its next event or retry.
    pub fn restart(&self) -> Result<()> {
        let mut started = lock(&self.inner.started);
        let generation = {
            let _state = lock(&self.inner.state);
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        info!("Restarting relay bridge (generation {})", generation);
        self.spawn_worker(generation)?;
        *started = true;
        Ok(())
    }

    fn spawn_worker(&self, generation: u64) -> Result<()> {
        let bridge = self.clone();
        thread::Builder::new()
            .name(format!("relay-bridge-{}", generation))
            .spawn(move || bridge.run_worker(generation))?;
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.inner.shutdown.is_triggered()
            && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply `f` to the state only if `generation` is still the live worker.
    ///
    /// The check runs under the state lock, so a retired worker can never
    /// overwrite what its replacement recorded.
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut BridgeState)) -> bool {
        let mut state = lock(&self.inner.state);
        if !self.is_current(generation) {
            return false;
        }
        f(&mut state);
        true
    }

    fn run_worker(&self, generation: u64) {
        info!("Relay bridge worker {} started", generation);

        while self.is_current(generation) {
            if let Err(e) = self.attempt(generation) {
                warn!("Relay bridge error: {} (retry in {:?})", e, self.inner.retry_delay);
            }
            if !self.is_current(generation) {
                break;
            }
            self.inner.shutdown.sleep(self.inner.retry_delay);
        }

        debug!("Relay bridge worker {} exited", generation);
    }

    /// One connection attempt: check reachability, connect, pump events
    /// until the session ends. `Ok` for a clean end of stream or retirement.
    fn attempt(&self, generation: u64) -> Result<()> {
        if !self.update_if_current(generation, |s| s.set_status(BridgeStatus::Connecting)) {
            return Ok(());
        }

        match self.inner.transport.check_reachable() {
            Ok(status) => info!("Companion reachable ({})", status),
            Err(e) => warn!("Companion reachability check failed: {}", e),
        }

        let mut session = match self.inner.transport.connect() {
            Ok(session) => session,
            Err(e) => {
                if self.update_if_current(generation, |s| s.record_error(&e)) {
                    return Err(e);
                }
                debug!("Retired relay worker {} discarding: {}", generation, e);
                return Ok(());
            }
        };

        let connected = self.update_if_current(generation, |s| {
            s.set_status(BridgeStatus::Connected);
            s.connections += 1;
            self.inner.events.publish(Event::meta(Lifecycle::Connect));
        });
        if !connected {
            return Ok(());
        }
        info!("Relay bridge connected");

        let outcome = loop {
            match session.next_event() {
                Ok(Some(event)) => {
                    if !self.handle_event(generation, event) {
                        return Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let recorded = self.update_if_current(generation, |s| {
            match &outcome {
                Ok(()) => s.set_status(BridgeStatus::Disconnected),
                Err(e) => s.record_error(e),
            }
            self.inner.events.publish(Event::meta(Lifecycle::Disconnect));
        });
        if !recorded {
            return Ok(());
        }

        if outcome.is_ok() {
            info!("Relay upstream closed the stream");
        }
        warn!("Relay bridge disconnected");
        outcome
    }

    /// Record and republish one upstream event. Returns `false` if this
    /// worker has been retired and the event was dropped.
    fn handle_event(&self, generation: u64, event: UpstreamEvent) -> bool {
        let payload: Option<Value> = serde_json::from_str(&event.data).ok();
        let channel = event.channel.as_str();

        let mut state = lock(&self.inner.state);
        if !self.is_current(generation) {
            return false;
        }

        state.record_message();
        if channel == CHANNEL_STATUS {
            state.telemetry_status = Some(status_value(payload.as_ref(), &event.data));
        }

        if !matches!(channel, CHANNEL_STATUS | CHANNEL_RAW | CHANNEL_MESSAGE) {
            debug!("Relay ignoring upstream channel {}", channel);
            return true;
        }

        if channel != CHANNEL_STATUS {
            if let Some(position) = payload.as_ref().and_then(parse_position) {
                *lock(&self.inner.position) = Some(position);
                state.positions_seen += 1;
            }
        }

        self.inner.events.publish(Event::new(channel, event.data));
        true
    }
}

fn status_value(payload: Option<&Value>, raw: &str) -> Value {
    match payload {
        Some(Value::Object(obj)) if obj.contains_key("isTelemetryRunning") => {
            obj["isTelemetryRunning"].clone()
        }
        Some(value) => value.clone(),
        None => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GaugeBridgeError;
    use crate::fanout::event::CHANNEL_META;
    use crate::fanout::Subscription;
    use crate::relay::transport::{
        MockUpstreamSession, MockUpstreamTransport, SessionBox, UpstreamSession,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc::{self, Receiver};
    use std::time::Instant;

    type Script = Vec<Result<Option<UpstreamEvent>>>;

    fn session(script: Script) -> SessionBox {
        let mut steps: VecDeque<_> = script.into();
        let mut session = MockUpstreamSession::new();
        session
            .expect_next_event()
            .returning(move || steps.pop_front().unwrap_or(Ok(None)));
        Box::new(session)
    }

    fn transport(sessions: Vec<Result<SessionBox>>) -> MockUpstreamTransport {
        let mut sessions: VecDeque<_> = sessions.into();
        let mut transport = MockUpstreamTransport::new();
        transport.expect_check_reachable().returning(|| Ok("200".to_string()));
        transport.expect_connect().returning(move || {
            sessions
                .pop_front()
                .unwrap_or_else(|| Err(GaugeBridgeError::Upstream("no more sessions".into())))
        });
        transport
    }

    fn bridge(transport: MockUpstreamTransport) -> RelayBridge {
        RelayBridge::new(
            Arc::new(transport),
            Broadcaster::new(64),
            Duration::ZERO,
            Shutdown::new(),
        )
    }

    fn event(channel: &str, data: &str) -> Result<Option<UpstreamEvent>> {
        Ok(Some(UpstreamEvent::new(channel, data)))
    }

    fn drain(sub: &mut Subscription<Event>) -> Vec<Event> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    fn lost() -> Result<Option<UpstreamEvent>> {
        Err(GaugeBridgeError::Upstream("connection reset".into()))
    }

    #[test]
    fn test_reconnect_cycle_counts_each_failure_once() {
        let bridge = bridge(transport(vec![
            Ok(session(vec![event(CHANNEL_RAW, "{}"), lost()])),
            Ok(session(vec![event(CHANNEL_RAW, "{}"), lost()])),
        ]));
        let mut sub = bridge.events().subscribe();

        assert!(bridge.attempt(0).is_err());
        let state = bridge.state();
        assert_eq!(state.errors, 1);
        assert!(!state.connected);
        assert_eq!(state.status, BridgeStatus::Disconnected);
        assert_eq!(state.connections, 1);

        assert!(bridge.attempt(0).is_err());
        let state = bridge.state();
        assert_eq!(state.errors, 2);
        assert_eq!(state.connections, 2);
        assert_eq!(state.messages_seen, 2);

        let lifecycle: Vec<String> = drain(&mut sub)
            .iter()
            .filter(|e| e.channel() == CHANNEL_META)
            .map(|e| e.payload()["_meta"]["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(lifecycle, vec!["connect", "disconnect", "connect", "disconnect"]);
    }

    #[test]
    fn test_connected_flag_tracks_transitions() {
        // The session inspects the bridge while it is being pumped
        let observed: Arc<Mutex<Vec<(BridgeStatus, bool)>>> = Arc::default();
        let cell: Arc<Mutex<Option<RelayBridge>>> = Arc::default();

        let mut script = VecDeque::from(vec![event(CHANNEL_RAW, "{}"), lost()]);
        let (seen, slot) = (Arc::clone(&observed), Arc::clone(&cell));
        let mut live = MockUpstreamSession::new();
        live.expect_next_event().returning(move || {
            if let Some(bridge) = lock(&slot).as_ref() {
                let s = bridge.state();
                lock(&seen).push((s.status, s.connected));
            }
            script.pop_front().unwrap_or(Ok(None))
        });

        let bridge = bridge(transport(vec![
            Ok(Box::new(live)),
            Err(GaugeBridgeError::Upstream("refused".into())),
            Ok(session(vec![])),
        ]));
        *lock(&cell) = Some(bridge.clone());

        assert!(bridge.attempt(0).is_err());
        assert_eq!(
            *lock(&observed),
            vec![(BridgeStatus::Connected, true), (BridgeStatus::Connected, true)]
        );
        assert!(!bridge.state().connected);

        // Refused connect: counted, still disconnected
        assert!(bridge.attempt(0).is_err());
        assert_eq!(bridge.state().errors, 2);
        assert_eq!(bridge.state().status, BridgeStatus::Disconnected);

        // Clean end of stream is a disconnect without an error
        assert!(bridge.attempt(0).is_ok());
        let state = bridge.state();
        assert_eq!(state.errors, 2);
        assert!(!state.connected);
        assert_eq!(state.connections, 2);

        lock(&cell).take();
    }

    #[test]
    fn test_events_are_recorded_and_republished_verbatim() {
        let position = r#"{"mavpackettype":"GLOBAL_POSITION_INT","lat":372400000,"lon":-1157900000,"relative_alt":5000}"#;
        let bridge = bridge(transport(vec![Ok(session(vec![
            event(CHANNEL_STATUS, r#"{"isTelemetryRunning":true}"#),
            event(CHANNEL_RAW, position),
            event("gauge_snapshot", r#"{"meta":{}}"#),
            event(CHANNEL_MESSAGE, "not json"),
        ]))]));
        let mut sub = bridge.events().subscribe();

        assert!(bridge.attempt(0).is_ok());

        let republished: Vec<(String, String)> = drain(&mut sub)
            .iter()
            .filter(|e| e.channel() != CHANNEL_META)
            .map(|e| (e.channel().to_string(), e.data().to_string()))
            .collect();
        assert_eq!(
            republished,
            vec![
                (CHANNEL_STATUS.to_string(), r#"{"isTelemetryRunning":true}"#.to_string()),
                (CHANNEL_RAW.to_string(), position.to_string()),
                (CHANNEL_MESSAGE.to_string(), "not json".to_string()),
            ]
        );

        let state = bridge.state();
        assert_eq!(state.messages_seen, 4);
        assert_eq!(state.positions_seen, 1);
        assert_eq!(state.telemetry_status, Some(Value::Bool(true)));

        let pos = bridge.last_position().unwrap();
        assert!((pos.lat - 37.24).abs() < 1e-9);
        assert_eq!(pos.alt, 5.0);
    }

    #[test]
    fn test_status_payload_without_flag_is_stored_whole() {
        assert_eq!(status_value(Some(&Value::Bool(false)), "false"), Value::Bool(false));
        assert_eq!(
            status_value(None, "running"),
            Value::String("running".to_string())
        );
        let obj = serde_json::json!({"status": "Connected"});
        assert_eq!(status_value(Some(&obj), ""), obj);
    }

    #[test]
    fn test_unreachable_companion_does_not_block_connect() {
        let mut transport = MockUpstreamTransport::new();
        transport
            .expect_check_reachable()
            .times(1)
            .returning(|| Err(GaugeBridgeError::Upstream("timeout".into())));
        transport
            .expect_connect()
            .times(1)
            .returning(|| Ok(session(vec![])));

        let bridge = bridge(transport);
        assert!(bridge.attempt(0).is_ok());
        assert_eq!(bridge.state().connections, 1);
    }

    #[test]
    fn test_retired_generation_drops_events() {
        let bridge = bridge(transport(vec![Ok(session(vec![event(CHANNEL_RAW, "{}")]))]));
        bridge.inner.generation.store(1, Ordering::SeqCst);

        assert!(bridge.attempt(0).is_ok());
        assert_eq!(bridge.state().messages_seen, 0);
        assert!(bridge.last_event().map_or(true, |e| e.channel() == CHANNEL_META));
    }

    #[test]
    fn test_worker_keeps_retrying_until_shutdown() {
        let mut transport = MockUpstreamTransport::new();
        transport.expect_check_reachable().returning(|| Ok("200".into()));
        transport
            .expect_connect()
            .returning(|| Err(GaugeBridgeError::Upstream("refused".into())));

        let shutdown = Shutdown::new();
        let bridge = RelayBridge::new(
            Arc::new(transport),
            Broadcaster::new(8),
            Duration::from_millis(1),
            shutdown.clone(),
        );

        assert!(bridge.ensure_started().unwrap());
        assert!(!bridge.ensure_started().unwrap());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while bridge.state().errors < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();

        assert!(bridge.state().errors >= 3);
        assert!(!bridge.state().connected);
    }

    #[test]
    fn test_restart_bumps_generation() {
        let mut transport = MockUpstreamTransport::new();
        transport.expect_check_reachable().returning(|| Ok("200".into()));
        transport
            .expect_connect()
            .returning(|| Err(GaugeBridgeError::Upstream("refused".into())));

        let shutdown = Shutdown::new();
        let bridge = RelayBridge::new(
            Arc::new(transport),
            Broadcaster::new(8),
            Duration::from_millis(1),
            shutdown.clone(),
        );

        bridge.restart().unwrap();
        bridge.restart().unwrap();
        assert_eq!(bridge.inner.generation.load(Ordering::SeqCst), 2);
        assert!(!bridge.ensure_started().unwrap());
        shutdown.trigger();
    }

    /// First connect blocks until released and then fails; later connects
    /// stream events until shutdown
    struct SlowFirstConnect {
        calls: Arc<AtomicUsize>,
        release: Mutex<Receiver<()>>,
        first_done: Arc<AtomicBool>,
        shutdown: Shutdown,
    }

    struct Endless(Shutdown);

    impl UpstreamSession for Endless {
        fn next_event(&mut self) -> Result<Option<UpstreamEvent>> {
            if self.0.sleep(Duration::from_millis(2)) {
                return Ok(None);
            }
            Ok(Some(UpstreamEvent::new(CHANNEL_RAW, "{}")))
        }
    }

    impl UpstreamTransport for SlowFirstConnect {
        fn check_reachable(&self) -> Result<String> {
            Ok("200".to_string())
        }

        fn connect(&self) -> Result<SessionBox> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = lock(&self.release).recv_timeout(Duration::from_secs(5));
                self.first_done.store(true, Ordering::SeqCst);
                return Err(GaugeBridgeError::Upstream("connect timed out".into()));
            }
            Ok(Box::new(Endless(self.shutdown.clone())))
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_retired_worker_cannot_clobber_live_state() {
        let shutdown = Shutdown::new();
        let (release, gate) = mpsc::channel();
        let first_done = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = SlowFirstConnect {
            calls: Arc::clone(&calls),
            release: Mutex::new(gate),
            first_done: Arc::clone(&first_done),
            shutdown: shutdown.clone(),
        };
        let bridge = RelayBridge::new(
            Arc::new(transport),
            Broadcaster::new(64),
            Duration::from_millis(1),
            shutdown.clone(),
        );

        // Worker 0 parks inside connect
        assert!(bridge.ensure_started().unwrap());
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));

        // Worker 1 takes over and streams
        bridge.restart().unwrap();
        assert!(wait_until(|| {
            let s = bridge.state();
            s.connected && s.messages_seen > 0
        }));

        // Worker 0's connect now fails after it was retired
        release.send(()).unwrap();
        assert!(wait_until(|| first_done.load(Ordering::SeqCst)));
        thread::sleep(Duration::from_millis(20));

        let state = bridge.state();
        shutdown.trigger();
        assert_eq!(state.status, BridgeStatus::Connected);
        assert!(state.connected);
        assert_eq!(state.errors, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.connections, 1);
    }

    #[test]
    fn test_retired_worker_stops_republishing() {
        let bridge = bridge(transport(vec![Ok(session(vec![
            event(CHANNEL_RAW, "{}"),
            event(CHANNEL_RAW, "{}"),
        ]))]));

        assert!(bridge.handle_event(0, UpstreamEvent::new(CHANNEL_RAW, "{\"n\":1}")));
        {
            let _state = lock(&bridge.inner.state);
            bridge.inner.generation.fetch_add(1, Ordering::SeqCst);
        }
        assert!(!bridge.handle_event(0, UpstreamEvent::new(CHANNEL_RAW, "{\"n\":2}")));

        assert_eq!(bridge.state().messages_seen, 1);
        assert_eq!(bridge.last_event().unwrap().data(), "{\"n\":1}");
    }
}
