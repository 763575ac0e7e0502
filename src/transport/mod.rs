//! Session transport: the keystroke input channel and the output replay
//! channel, owned as a pair.
//!
//! The two channels are deliberately asymmetric. Output arrives over a
//! server-push replay stream that always restarts from the beginning of the
//! session recording, so scrollback can be rebuilt from stream replay alone;
//! input goes out over a low-latency WebSocket that carries no output. The
//! transport reports connected only while both are up.

pub mod input;
pub mod keys;
pub mod replay;

pub use keys::{NamedKey, TerminalInput};

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::debug;
use url::Url;

use crate::session::SessionConfig;

/// Cadence at which buffered output is flushed to the consumer (~60 Hz).
pub const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSide {
    Input,
    Output,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("input channel: {0}")]
    Input(String),
    #[error("output channel: {0}")]
    Output(String),
    #[error("transport is not connected")]
    NotConnected,
}

/// Events the transport reports to its owner, in receipt order.
#[derive(Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Batched output text
    Output(String),
    /// Server reported session termination with this exit code
    Exited(i32),
    /// A channel dropped unexpectedly
    ChannelClosed(ChannelSide),
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub session: SessionConfig,
    pub session_id: String,
    pub auth_token: Option<String>,
    pub flush_interval: Duration,
}

impl TransportConfig {
    pub fn new(session: SessionConfig, session_id: impl Into<String>) -> Self {
        TransportConfig {
            session,
            session_id: session_id.into(),
            auth_token: None,
            flush_interval: OUTPUT_FLUSH_INTERVAL,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    fn input_url(&self) -> Result<Url, ConnectError> {
        let url = self
            .session
            .websocket_endpoint(&self.session_id, "input")
            .map_err(|err| ConnectError::Input(err.to_string()))?;
        Ok(self.with_token(url))
    }

    fn stream_url(&self) -> Result<Url, ConnectError> {
        let url = self
            .session
            .session_endpoint(&self.session_id, "stream")
            .map_err(|err| ConnectError::Output(err.to_string()))?;
        Ok(self.with_token(url))
    }

    // The WebSocket handshake cannot attach custom headers from every
    // environment this client runs in, so the bearer token rides the query
    // string on both channels.
    fn with_token(&self, mut url: Url) -> Url {
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

pub(crate) struct ChannelFlags {
    input: AtomicBool,
    output: AtomicBool,
}

impl ChannelFlags {
    fn new() -> Self {
        ChannelFlags {
            input: AtomicBool::new(true),
            output: AtomicBool::new(true),
        }
    }

    pub(crate) fn both_connected(&self) -> bool {
        self.input.load(Ordering::SeqCst) && self.output.load(Ordering::SeqCst)
    }

    /// Mark one side closed; true only on the first close of that side.
    pub(crate) fn close(&self, side: ChannelSide) -> bool {
        let flag = match side {
            ChannelSide::Input => &self.input,
            ChannelSide::Output => &self.output,
        };
        flag.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn disconnect_reason(&self) -> &'static str {
        match (
            self.input.load(Ordering::SeqCst),
            self.output.load(Ordering::SeqCst),
        ) {
            (false, false) => "both channels closed",
            (false, true) => "input channel closed",
            (true, false) => "output channel closed",
            (true, true) => "connected",
        }
    }
}

pub(crate) fn notify_closed(
    flags: &ChannelFlags,
    events: &UnboundedSender<TransportEvent>,
    side: ChannelSide,
) {
    if flags.close(side) {
        let _ = events.send(TransportEvent::ChannelClosed(side));
    }
}

/// Accumulates output fragments between flush ticks, preserving order.
#[derive(Default)]
pub(crate) struct OutputBatcher {
    pending: Mutex<String>,
}

impl OutputBatcher {
    pub(crate) fn push(&self, fragment: &str) {
        self.pending.lock().unwrap().push_str(fragment);
    }

    pub(crate) fn take(&self) -> Option<String> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *pending))
        }
    }
}

pub struct SessionTransport {
    input_tx: UnboundedSender<String>,
    flags: Arc<ChannelFlags>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionTransport {
    /// Establish both channels. Resolves once each is usable; either side
    /// failing to come up fails the whole connect.
    pub async fn connect(
        config: &TransportConfig,
    ) -> Result<(Self, UnboundedReceiver<TransportEvent>), ConnectError> {
        let input_url = config.input_url()?;
        let (ws, _) = connect_async(input_url.as_str())
            .await
            .map_err(|err| ConnectError::Input(err.to_string()))?;
        debug!(target = "transport", path = input_url.path(), "input channel connected");

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .no_proxy()
            .build()
            .map_err(|err| ConnectError::Output(err.to_string()))?;
        let stream_url = config.stream_url()?;
        let response = client
            .get(stream_url.clone())
            .send()
            .await
            .map_err(|err| ConnectError::Output(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ConnectError::Output(format!(
                "unexpected http status {}",
                response.status()
            )));
        }
        debug!(target = "transport", path = stream_url.path(), "output channel connected");

        let flags = Arc::new(ChannelFlags::new());
        let batcher = Arc::new(OutputBatcher::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

        let (sink, stream) = ws.split();
        let mut tasks = Vec::with_capacity(4);
        tasks.push(tokio::spawn(input::run_writer(
            sink,
            input_rx,
            flags.clone(),
            events_tx.clone(),
        )));
        tasks.push(tokio::spawn(input::run_reader(
            stream,
            flags.clone(),
            events_tx.clone(),
        )));
        tasks.push(tokio::spawn(replay::pump(
            response,
            batcher.clone(),
            flags.clone(),
            events_tx.clone(),
        )));
        tasks.push(tokio::spawn(run_flusher(
            config.flush_interval,
            batcher,
            events_tx,
        )));

        Ok((
            SessionTransport {
                input_tx,
                flags,
                tasks,
            },
            events_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.flags.both_connected()
    }

    pub fn disconnect_reason(&self) -> &'static str {
        self.flags.disconnect_reason()
    }

    /// Queue a keystroke payload for the input channel.
    pub fn send_input(&self, payload: &str) -> Result<(), ConnectError> {
        if !self.is_connected() {
            return Err(ConnectError::NotConnected);
        }
        self.input_tx
            .send(payload.to_string())
            .map_err(|_| ConnectError::NotConnected)
    }

    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn run_flusher(
    interval: Duration,
    batcher: Arc<OutputBatcher>,
    events: UnboundedSender<TransportEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Some(batch) = batcher.take() {
            if events.send(TransportEvent::Output(batch)).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batcher_concatenates_in_order() {
        let batcher = OutputBatcher::default();
        assert_eq!(batcher.take(), None);
        batcher.push("a");
        batcher.push("bc");
        assert_eq!(batcher.take(), Some("abc".to_string()));
        assert_eq!(batcher.take(), None);
    }

    #[test]
    fn flags_report_first_close_only() {
        let flags = ChannelFlags::new();
        assert!(flags.both_connected());
        assert_eq!(flags.disconnect_reason(), "connected");

        assert!(flags.close(ChannelSide::Output));
        assert!(!flags.close(ChannelSide::Output));
        assert!(!flags.both_connected());
        assert_eq!(flags.disconnect_reason(), "output channel closed");

        flags.close(ChannelSide::Input);
        assert_eq!(flags.disconnect_reason(), "both channels closed");
    }

    #[test]
    fn token_rides_the_query_string() {
        let session = SessionConfig::new("http://127.0.0.1:9000").unwrap();
        let config =
            TransportConfig::new(session, "sess-1").with_auth_token(Some("secret".into()));
        let input = config.input_url().unwrap();
        assert_eq!(input.scheme(), "ws");
        assert!(input.path().ends_with("/sessions/sess-1/input"));
        assert_eq!(input.query(), Some("token=secret"));

        let stream = config.stream_url().unwrap();
        assert_eq!(stream.scheme(), "http");
        assert!(stream.path().ends_with("/sessions/sess-1/stream"));
    }
}
