//! Output replay channel.
//!
//! The server pushes the session recording as line-delimited JSON: one
//! header object, then `[timestamp, kind, payload]` tuples, then possibly an
//! `["exit", code, session_id]` sentinel. Every (re)connect replays from the
//! start of the recording, which is what makes scrollback reconstruction
//! possible without a snapshot fetch. Some deployments frame the same lines
//! as server-sent events, so `data:` prefixes and comment lines are
//! tolerated.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{ChannelFlags, ChannelSide, OutputBatcher, TransportEvent, notify_closed};

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CastHeader {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CastLine {
    Header(CastHeader),
    Output(String),
    Resize,
    InputEcho,
    Exit { code: i32 },
}

#[derive(Debug, Error)]
pub(crate) enum CastParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed replay line: {0}")]
    Malformed(String),
}

/// Parse one replay line. `Ok(None)` means framing noise to skip.
pub(crate) fn parse_cast_line(line: &str) -> Result<Option<CastLine>, CastParseError> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return Ok(None);
    }
    if let Some(rest) = line.strip_prefix("data:") {
        line = rest.trim();
        if line.is_empty() {
            return Ok(None);
        }
    }

    let value: Value = serde_json::from_str(line)?;
    match value {
        Value::Object(_) => {
            let header: CastHeader = serde_json::from_value(value)?;
            Ok(Some(CastLine::Header(header)))
        }
        Value::Array(items) => parse_event_tuple(&items).map(Some),
        other => Err(CastParseError::Malformed(format!(
            "expected object or array, got {other}"
        ))),
    }
}

fn parse_event_tuple(items: &[Value]) -> Result<CastLine, CastParseError> {
    match items.first() {
        Some(Value::String(sentinel)) if sentinel == "exit" => {
            let code = items
                .get(1)
                .and_then(Value::as_i64)
                .ok_or_else(|| CastParseError::Malformed("exit event without code".into()))?;
            Ok(CastLine::Exit { code: code as i32 })
        }
        Some(Value::Number(_)) => {
            let kind = items
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| CastParseError::Malformed("event tuple without kind".into()))?;
            match kind {
                "o" => {
                    let payload = items.get(2).and_then(Value::as_str).ok_or_else(|| {
                        CastParseError::Malformed("output event without payload".into())
                    })?;
                    Ok(CastLine::Output(payload.to_string()))
                }
                "r" => Ok(CastLine::Resize),
                "i" => Ok(CastLine::InputEcho),
                other => Err(CastParseError::Malformed(format!(
                    "unknown event kind {other:?}"
                ))),
            }
        }
        _ => Err(CastParseError::Malformed(
            "event tuple without timestamp".into(),
        )),
    }
}

pub(crate) async fn pump(
    response: reqwest::Response,
    batcher: Arc<OutputBatcher>,
    flags: Arc<ChannelFlags>,
    events: UnboundedSender<TransportEvent>,
) {
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                debug!(target = "transport::replay", error = %err, "replay stream error");
                break;
            }
        };
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            match parse_cast_line(line.trim_end_matches('\r')) {
                Ok(None) => {}
                Ok(Some(CastLine::Header(header))) => {
                    info!(
                        target = "transport::replay",
                        version = ?header.version,
                        width = ?header.width,
                        height = ?header.height,
                        "replay header received"
                    );
                }
                Ok(Some(CastLine::Output(data))) => batcher.push(&data),
                Ok(Some(CastLine::Resize | CastLine::InputEcho)) => {}
                Ok(Some(CastLine::Exit { code })) => {
                    if let Some(rest) = batcher.take() {
                        let _ = events.send(TransportEvent::Output(rest));
                    }
                    let _ = events.send(TransportEvent::Exited(code));
                    // clean termination, not a channel failure
                    flags.close(ChannelSide::Output);
                    return;
                }
                Err(err) => {
                    warn!(target = "transport::replay", error = %err, "skipping replay line");
                }
            }
        }
    }

    if let Some(rest) = batcher.take() {
        let _ = events.send(TransportEvent::Output(rest));
    }
    notify_closed(&flags, &events, ChannelSide::Output);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_object() {
        let line = r#"{"version": 2, "width": 80, "height": 24, "timestamp": 123}"#;
        assert_eq!(
            parse_cast_line(line).unwrap(),
            Some(CastLine::Header(CastHeader {
                version: Some(2),
                width: Some(80),
                height: Some(24),
            }))
        );
    }

    #[test]
    fn parses_output_event() {
        let line = r#"[0.1342, "o", "hello\r\n"]"#;
        assert_eq!(
            parse_cast_line(line).unwrap(),
            Some(CastLine::Output("hello\r\n".to_string()))
        );
    }

    #[test]
    fn resize_and_input_echo_are_ignored_kinds() {
        assert_eq!(
            parse_cast_line(r#"[1.0, "r", "80x24"]"#).unwrap(),
            Some(CastLine::Resize)
        );
        assert_eq!(
            parse_cast_line(r#"[1.5, "i", "ls"]"#).unwrap(),
            Some(CastLine::InputEcho)
        );
    }

    #[test]
    fn parses_exit_sentinel() {
        let line = r#"["exit", 137, "sess-9"]"#;
        assert_eq!(
            parse_cast_line(line).unwrap(),
            Some(CastLine::Exit { code: 137 })
        );
    }

    #[test]
    fn strips_sse_framing() {
        assert_eq!(
            parse_cast_line(r#"data: [0.5, "o", "x"]"#).unwrap(),
            Some(CastLine::Output("x".to_string()))
        );
        assert_eq!(parse_cast_line(": keepalive").unwrap(), None);
        assert_eq!(parse_cast_line("event: message").unwrap(), None);
        assert_eq!(parse_cast_line("").unwrap(), None);
    }

    #[test]
    fn rejects_unknown_kind_and_bare_values() {
        assert!(parse_cast_line(r#"[1.0, "q", "?"]"#).is_err());
        assert!(parse_cast_line("42").is_err());
        assert!(parse_cast_line("not json").is_err());
    }
}
