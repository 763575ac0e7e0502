//! Connection lifecycle orchestration.
//!
//! The manager owns one transport at a time and drives the state machine
//! `Idle -> Connecting -> Connected`, dropping into `Retrying` on unexpected
//! loss and into the terminal `CircuitOpen` after three consecutive attempt
//! failures. Keystrokes sent during an outage queue in a byte-bounded FIFO
//! and flush on reconnect. Ownership of a session id is exclusive: the
//! registry aborts the previous manager when a new one is constructed, and
//! every continuation re-checks ownership after resuming from an await.

pub mod queue;
pub mod registry;
pub mod retry;

pub use queue::{DEFAULT_INPUT_QUEUE_BYTES, InputQueue};
pub use registry::SessionRegistry;
pub use retry::{
    DEFAULT_RETRY_WINDOW, MAX_CONSECUTIVE_FAILURES, RETRY_DELAYS_MS, RetryDecision, RetryState,
    retry_delay,
};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{FormatError, Snapshot, decode_snapshot};
use crate::session::{ReqwestSessionBackend, SessionBackend, SessionConfig, SessionError};
use crate::transport::{
    ChannelSide, OUTPUT_FLUSH_INTERVAL, SessionTransport, TerminalInput, TransportConfig,
    TransportEvent,
};

use registry::SharedState;

/// Caller-visible connection state. Handed out as a snapshot copy; only the
/// manager mutates it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub retry_count: u32,
    pub max_retries: Option<u32>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("session validation failed: {0}")]
    Validation(String),
    #[error("connection failed {MAX_CONSECUTIVE_FAILURES} times in a row; reconnect to try again")]
    CircuitBreakerOpen,
    #[error("max retry time exceeded; reconnect to try again")]
    RetryBudgetExceeded,
}

#[derive(Debug, Error)]
pub enum SnapshotFetchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Events delivered to the caller, strictly in occurrence order.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Output(String),
    Status(ConnectionStatus),
    Error(ConnectionError),
    Exited(i32),
}

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub session: SessionConfig,
    pub session_id: String,
    pub auth_token: Option<String>,
    pub input_queue_budget: usize,
    pub max_retry_window: Duration,
    pub flush_interval: Duration,
}

impl ManagerConfig {
    pub fn new(session: SessionConfig, session_id: impl Into<String>) -> Self {
        ManagerConfig {
            session,
            session_id: session_id.into(),
            auth_token: None,
            input_queue_budget: DEFAULT_INPUT_QUEUE_BYTES,
            max_retry_window: DEFAULT_RETRY_WINDOW,
            flush_interval: OUTPUT_FLUSH_INTERVAL,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_input_queue_budget(mut self, bytes: usize) -> Self {
        self.input_queue_budget = bytes;
        self
    }

    pub fn with_max_retry_window(mut self, window: Duration) -> Self {
        self.max_retry_window = window;
        self
    }

    fn transport(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.session.clone(), self.session_id.clone())
            .with_auth_token(self.auth_token.clone());
        config.flush_interval = self.flush_interval;
        config
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    Retrying,
    CircuitOpen,
}

struct ManagerState {
    phase: Phase,
    retry: RetryState,
    queue: InputQueue,
    transport: Option<SessionTransport>,
    monitor_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    connected_once: bool,
    /// Bumped on disconnect/reconnect to invalidate scheduled retries.
    episode: u64,
}

struct ManagerInner {
    config: ManagerConfig,
    instance_id: Uuid,
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn SessionBackend>,
    shared: Arc<SharedState>,
    state: Mutex<ManagerState>,
    events: UnboundedSender<SessionEvent>,
}

pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Build a manager over the reqwest backend and the process-wide
    /// registry. Constructing a second manager for the same session id
    /// immediately disconnects the prior one.
    pub fn new(
        config: ManagerConfig,
    ) -> Result<(Self, UnboundedReceiver<SessionEvent>), SessionError> {
        let backend = Arc::new(ReqwestSessionBackend::new()?);
        Ok(Self::with_parts(config, SessionRegistry::global(), backend))
    }

    /// Injectable variant for tests and alternative backends.
    pub fn with_parts(
        config: ManagerConfig,
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn SessionBackend>,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedState::new());
        let instance_id = Uuid::new_v4();
        registry.register(&config.session_id, instance_id, shared.clone());

        let state = ManagerState {
            phase: Phase::Idle,
            retry: RetryState::default(),
            queue: InputQueue::new(config.input_queue_budget),
            transport: None,
            monitor_task: None,
            retry_task: None,
            connected_once: false,
            episode: 0,
        };

        let inner = Arc::new(ManagerInner {
            config,
            instance_id,
            registry,
            backend,
            shared,
            state: Mutex::new(state),
            events,
        });
        (ConnectionManager { inner }, events_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connected
    }

    /// Bytes currently parked in the offline input queue.
    pub fn queued_input_bytes(&self) -> usize {
        self.inner.state.lock().unwrap().queue.queued_bytes()
    }

    /// Establish the session connection. No-op while an attempt is already
    /// in flight or the circuit breaker is open; a connect during a retry
    /// wait preempts the scheduled retry. The first attempt's failure is
    /// returned directly; retries report through the event channel.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase {
                Phase::Connecting => {
                    debug!(
                        target = "connection",
                        session = %self.inner.config.session_id,
                        "connect ignored: attempt already in flight"
                    );
                    return Ok(());
                }
                Phase::Connected => {
                    debug!(
                        target = "connection",
                        session = %self.inner.config.session_id,
                        "connect ignored: already connected"
                    );
                    return Ok(());
                }
                Phase::CircuitOpen => {
                    debug!(
                        target = "connection",
                        session = %self.inner.config.session_id,
                        "connect ignored: circuit breaker open"
                    );
                    return Ok(());
                }
                Phase::Retrying => {
                    state.episode += 1;
                    if let Some(task) = state.retry_task.take() {
                        task.abort();
                    }
                    state.phase = Phase::Connecting;
                }
                Phase::Idle => state.phase = Phase::Connecting,
            }
        }
        run_attempt(self.inner.clone()).await
    }

    /// Tear everything down and release the session. Idempotent.
    pub async fn disconnect(&self) {
        let (transport, retry_task, monitor_task) = {
            let mut state = self.inner.state.lock().unwrap();
            state.episode += 1;
            state.phase = Phase::Idle;
            state.retry.reset();
            state.queue.clear();
            (
                state.transport.take(),
                state.retry_task.take(),
                state.monitor_task.take(),
            )
        };
        if let Some(task) = retry_task {
            task.abort();
        }
        if let Some(task) = monitor_task {
            task.abort();
        }
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        self.inner.shared.update_status(|status| {
            *status = ConnectionStatus::default();
        });
        self.inner.emit_status();
        self.inner
            .registry
            .unregister(&self.inner.config.session_id, self.inner.instance_id);
        debug!(
            target = "connection",
            session = %self.inner.config.session_id,
            "disconnected"
        );
    }

    /// Forward input now if connected, otherwise queue it (lossy beyond the
    /// byte budget).
    pub fn send_input(&self, input: impl Into<TerminalInput>) {
        let payload = input.into().into_payload();
        let mut state = self.inner.state.lock().unwrap();
        if state.phase == Phase::Connected {
            if let Some(transport) = &state.transport {
                if transport.send_input(&payload).is_ok() {
                    return;
                }
            }
        }
        state.queue.push(payload);
    }

    /// Pull a point-in-time binary snapshot and decode it, independent of
    /// the streaming replay channel.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, SnapshotFetchError> {
        let bytes = self
            .inner
            .backend
            .fetch_snapshot(&self.inner.config.session, &self.inner.config.session_id)
            .await?;
        Ok(decode_snapshot(&bytes)?)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.episode += 1;
            if let Some(task) = state.retry_task.take() {
                task.abort();
            }
            if let Some(task) = state.monitor_task.take() {
                task.abort();
            }
            // SessionTransport::drop aborts its channel tasks
            state.transport = None;
        }
        self.inner
            .registry
            .unregister(&self.inner.config.session_id, self.inner.instance_id);
    }
}

impl ManagerInner {
    fn is_current(&self) -> bool {
        !self.shared.is_aborted()
            && self
                .registry
                .is_current(&self.config.session_id, self.instance_id)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self) {
        self.emit(SessionEvent::Status(self.shared.status()));
    }

    /// Drop back to idle after losing ownership mid-attempt.
    fn stand_down(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(state.phase, Phase::Connecting | Phase::Retrying) {
            state.phase = Phase::Idle;
        }
    }
}

async fn run_attempt(inner: Arc<ManagerInner>) -> Result<(), ConnectionError> {
    if !inner.is_current() {
        debug!(
            target = "connection",
            session = %inner.config.session_id,
            "attempt abandoned: no longer the active manager"
        );
        inner.stand_down();
        return Ok(());
    }

    // The very first attempt skips validation: a freshly created remote
    // session may still be initializing and would report a false negative.
    let needs_validation = {
        let state = inner.state.lock().unwrap();
        state.connected_once || state.retry.retry_count > 0
    };
    if needs_validation {
        let outcome = inner
            .backend
            .describe_session(&inner.config.session, &inner.config.session_id)
            .await;
        if !inner.is_current() {
            inner.stand_down();
            return Ok(());
        }
        if let Err(err) = outcome {
            warn!(
                target = "connection",
                session = %inner.config.session_id,
                error = %err,
                "session validation failed"
            );
            return attempt_failed(&inner, ConnectionError::Validation(err.to_string())).await;
        }
    }

    match SessionTransport::connect(&inner.config.transport()).await {
        Err(err) => {
            if !inner.is_current() {
                inner.stand_down();
                return Ok(());
            }
            attempt_failed(&inner, ConnectionError::Connect(err.to_string())).await
        }
        Ok((transport, transport_events)) => {
            if !inner.is_current() {
                // lost ownership while the sockets came up; the attempt ran
                // to completion, now tear down what it produced
                transport.shutdown().await;
                inner.stand_down();
                return Ok(());
            }

            let flushed = {
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Connected;
                state.retry.reset();
                state.connected_once = true;
                let queued = state.queue.drain();
                for payload in &queued {
                    let _ = transport.send_input(payload);
                }
                state.transport = Some(transport);
                let monitor = tokio::spawn(run_monitor(inner.clone(), transport_events));
                if let Some(previous) = state.monitor_task.replace(monitor) {
                    previous.abort();
                }
                queued.len()
            };
            if flushed > 0 {
                debug!(
                    target = "connection",
                    session = %inner.config.session_id,
                    flushed,
                    "flushed queued input"
                );
            }
            inner.shared.update_status(|status| {
                *status = ConnectionStatus {
                    connected: true,
                    ..ConnectionStatus::default()
                };
            });
            inner.emit_status();
            info!(
                target = "connection",
                session = %inner.config.session_id,
                "connected"
            );
            Ok(())
        }
    }
}

async fn attempt_failed(
    inner: &Arc<ManagerInner>,
    err: ConnectionError,
) -> Result<(), ConnectionError> {
    inner.emit(SessionEvent::Error(err.clone()));
    let decision = {
        let mut state = inner.state.lock().unwrap();
        state
            .retry
            .record_failure(Instant::now(), inner.config.max_retry_window)
    };
    apply_decision(inner, decision);
    Err(err)
}

fn apply_decision(inner: &Arc<ManagerInner>, decision: RetryDecision) {
    match decision {
        RetryDecision::CircuitOpen => {
            {
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::CircuitOpen;
                if let Some(task) = state.retry_task.take() {
                    task.abort();
                }
            }
            let err = ConnectionError::CircuitBreakerOpen;
            warn!(
                target = "connection",
                session = %inner.config.session_id,
                "circuit breaker open"
            );
            inner.shared.update_status(|status| {
                status.connected = false;
                status.reconnecting = false;
                status.error = Some(err.to_string());
            });
            inner.emit(SessionEvent::Error(err));
            inner.emit_status();
        }
        RetryDecision::WindowExhausted => {
            {
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
            }
            let err = ConnectionError::RetryBudgetExceeded;
            warn!(
                target = "connection",
                session = %inner.config.session_id,
                "retry window exhausted"
            );
            inner.shared.update_status(|status| {
                status.connected = false;
                status.reconnecting = false;
                status.error = Some(err.to_string());
            });
            inner.emit(SessionEvent::Error(err));
            inner.emit_status();
        }
        RetryDecision::RetryAfter(delay) => {
            let (episode, retry_count) = {
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Retrying;
                (state.episode, state.retry.retry_count)
            };
            inner.shared.update_status(|status| {
                status.connected = false;
                status.reconnecting = true;
                status.retry_count = retry_count;
                status.max_retries = Some(MAX_CONSECUTIVE_FAILURES);
            });
            inner.emit_status();
            debug!(
                target = "connection",
                session = %inner.config.session_id,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );

            let task_inner = inner.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !task_inner.is_current() {
                    return;
                }
                {
                    let mut state = task_inner.state.lock().unwrap();
                    if state.episode != episode || state.phase != Phase::Retrying {
                        return;
                    }
                    state.phase = Phase::Connecting;
                }
                let _ = run_attempt(task_inner.clone()).await;
            });
            let mut state = inner.state.lock().unwrap();
            if let Some(previous) = state.retry_task.replace(handle) {
                previous.abort();
            }
        }
    }
}

async fn run_monitor(inner: Arc<ManagerInner>, mut events: UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Output(text) => inner.emit(SessionEvent::Output(text)),
            TransportEvent::Exited(code) => {
                handle_session_exit(&inner, code).await;
                return;
            }
            TransportEvent::ChannelClosed(side) => {
                handle_connection_lost(&inner, side).await;
                return;
            }
        }
    }
}

async fn handle_session_exit(inner: &Arc<ManagerInner>, code: i32) {
    info!(
        target = "connection",
        session = %inner.config.session_id,
        code,
        "session exited"
    );
    let transport = {
        let mut state = inner.state.lock().unwrap();
        state.phase = Phase::Idle;
        state.monitor_task = None;
        state.retry.reset();
        state.transport.take()
    };
    if let Some(transport) = transport {
        transport.shutdown().await;
    }
    inner.shared.update_status(|status| {
        *status = ConnectionStatus::default();
    });
    inner.emit_status();
    inner.emit(SessionEvent::Exited(code));
    inner
        .registry
        .unregister(&inner.config.session_id, inner.instance_id);
}

async fn handle_connection_lost(inner: &Arc<ManagerInner>, side: ChannelSide) {
    if !inner.is_current() {
        let transport = {
            let mut state = inner.state.lock().unwrap();
            state.monitor_task = None;
            state.phase = Phase::Idle;
            state.transport.take()
        };
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        return;
    }

    let (transport, reason) = {
        let mut state = inner.state.lock().unwrap();
        if state.phase != Phase::Connected {
            return;
        }
        state.monitor_task = None;
        let transport = state.transport.take();
        let reason = transport
            .as_ref()
            .map(|t| t.disconnect_reason())
            .unwrap_or("connection lost");
        (transport, reason)
    };
    warn!(
        target = "connection",
        session = %inner.config.session_id,
        ?side,
        reason,
        "connection lost"
    );
    inner.shared.update_status(|status| {
        status.connected = false;
        status.error = Some(reason.to_string());
    });
    inner.emit_status();
    if let Some(transport) = transport {
        transport.shutdown().await;
    }

    let decision = {
        let mut state = inner.state.lock().unwrap();
        state
            .retry
            .schedule(Instant::now(), inner.config.max_retry_window)
    };
    apply_decision(inner, decision);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::{Duration as TokioDuration, timeout};

    struct MockBackend {
        valid: AtomicBool,
        validations: AtomicU32,
        snapshot: Vec<u8>,
    }

    impl MockBackend {
        fn new() -> Self {
            MockBackend {
                valid: AtomicBool::new(true),
                validations: AtomicU32::new(0),
                snapshot: Vec::new(),
            }
        }

        fn with_snapshot(snapshot: Vec<u8>) -> Self {
            MockBackend {
                snapshot,
                ..MockBackend::new()
            }
        }
    }

    #[async_trait]
    impl SessionBackend for MockBackend {
        async fn describe_session(
            &self,
            _config: &SessionConfig,
            session_id: &str,
        ) -> Result<SessionDescriptor, SessionError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.valid.load(Ordering::SeqCst) {
                Ok(SessionDescriptor {
                    id: session_id.to_string(),
                })
            } else {
                Err(SessionError::HttpStatus(reqwest::StatusCode::NOT_FOUND))
            }
        }

        async fn fetch_snapshot(
            &self,
            _config: &SessionConfig,
            _session_id: &str,
        ) -> Result<Vec<u8>, SessionError> {
            Ok(self.snapshot.clone())
        }
    }

    fn unreachable_config() -> ManagerConfig {
        // port 9 on loopback: nothing listens, connects fail fast
        let session = SessionConfig::new("http://127.0.0.1:9").unwrap();
        ManagerConfig::new(session, "sess-test")
    }

    async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(TokioDuration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn constructing_a_second_manager_supersedes_the_first() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::new());

        let (first, _rx_a) =
            ConnectionManager::with_parts(unreachable_config(), registry.clone(), backend.clone());
        let (second, _rx_b) =
            ConnectionManager::with_parts(unreachable_config(), registry.clone(), backend);

        let status = first.status();
        assert!(!status.connected);
        assert!(status.error.is_some());
        assert_eq!(registry.active_managers(), 1);
        assert!(!first.is_connected());
        assert_eq!(second.session_id(), "sess-test");
    }

    #[tokio::test]
    async fn three_failed_attempts_open_the_circuit() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::new());
        let (manager, mut events) =
            ConnectionManager::with_parts(unreachable_config(), registry, backend.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Connect(_)));

        // first failure already reported; wait for the breaker to trip
        let mut saw_circuit_open = false;
        for _ in 0..24 {
            match next_event(&mut events).await {
                SessionEvent::Error(ConnectionError::CircuitBreakerOpen) => {
                    saw_circuit_open = true;
                    break;
                }
                SessionEvent::Error(_) | SessionEvent::Status(_) => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_circuit_open);

        let status = manager.status();
        assert!(!status.connected);
        assert!(!status.reconnecting);
        assert!(status.error.is_some());

        // connect is a no-op while the breaker is open
        assert!(manager.connect().await.is_ok());

        // explicit disconnect resets the breaker; the next attempt runs
        manager.disconnect().await;
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Connect(_)));
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn first_attempt_skips_validation() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::new());
        let (manager, _events) =
            ConnectionManager::with_parts(unreachable_config(), registry, backend.clone());

        let _ = manager.connect().await;
        assert_eq!(backend.validations.load(Ordering::SeqCst), 0);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn invalid_session_aborts_reconnect_attempts() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::new());
        backend.valid.store(false, Ordering::SeqCst);
        let (manager, mut events) =
            ConnectionManager::with_parts(unreachable_config(), registry, backend.clone());

        // first attempt fails at the socket, later retries at validation
        let _ = manager.connect().await;
        let mut saw_validation_error = false;
        for _ in 0..24 {
            match next_event(&mut events).await {
                SessionEvent::Error(ConnectionError::Validation(_)) => {
                    saw_validation_error = true;
                    break;
                }
                SessionEvent::Error(ConnectionError::CircuitBreakerOpen) => break,
                _ => {}
            }
        }
        assert!(saw_validation_error);
        assert!(backend.validations.load(Ordering::SeqCst) >= 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn input_queues_while_disconnected_and_respects_budget() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::new());
        let config = unreachable_config().with_input_queue_budget(8);
        let (manager, _events) = ConnectionManager::with_parts(config, registry, backend);

        manager.send_input("12345");
        manager.send_input("678");
        manager.send_input("overflowing");
        assert_eq!(manager.queued_input_bytes(), 8);

        manager.disconnect().await;
        assert_eq!(manager.queued_input_bytes(), 0);
    }

    #[tokio::test]
    async fn snapshot_fetch_decodes_backend_bytes() {
        use crate::model::Cell;
        use crate::protocol::encode_snapshot;

        let snapshot = Snapshot {
            cols: 4,
            rows: 1,
            viewport_y: 2,
            cursor_x: 1,
            cursor_y: 0,
            cells: vec![vec![Cell::plain("o"), Cell::plain("k")]],
        };
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::with_snapshot(encode_snapshot(&snapshot)));
        let (manager, _events) =
            ConnectionManager::with_parts(unreachable_config(), registry, backend);

        let fetched = manager.fetch_snapshot().await.unwrap();
        assert_eq!(fetched, snapshot);
    }

    #[tokio::test]
    async fn snapshot_fetch_surfaces_format_errors() {
        let registry = Arc::new(SessionRegistry::new());
        let backend = Arc::new(MockBackend::with_snapshot(vec![0x00, 0x01, 0x02]));
        let (manager, _events) =
            ConnectionManager::with_parts(unreachable_config(), registry, backend);

        assert!(matches!(
            manager.fetch_snapshot().await,
            Err(SnapshotFetchError::Format(_))
        ));
    }
}
