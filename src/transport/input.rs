//! WebSocket keystroke channel tasks.
//!
//! The writer drains the outbound queue into text frames; the reader exists
//! only to notice the peer going away. Inbound frames are not output (that
//! is the replay channel's job) and are dropped.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{ChannelFlags, ChannelSide, TransportEvent, notify_closed};

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub(crate) async fn run_writer(
    mut sink: WsSink,
    mut rx: UnboundedReceiver<String>,
    flags: Arc<ChannelFlags>,
    events: UnboundedSender<TransportEvent>,
) {
    while let Some(payload) = rx.recv().await {
        trace!(target = "transport::input", bytes = payload.len(), "sending input frame");
        if sink.send(Message::Text(payload)).await.is_err() {
            notify_closed(&flags, &events, ChannelSide::Input);
            return;
        }
    }
    // owner dropped the sender; close politely
    let _ = sink.close().await;
}

pub(crate) async fn run_reader(
    mut stream: WsStream,
    flags: Arc<ChannelFlags>,
    events: UnboundedSender<TransportEvent>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(target = "transport::input", ?frame, "input channel closed by peer");
                break;
            }
            Err(err) => {
                debug!(target = "transport::input", error = %err, "input channel error");
                break;
            }
            Ok(_) => {}
        }
    }
    notify_closed(&flags, &events, ChannelSide::Input);
}
