/// Frame decoding for the streaming transports.
///
/// Event-stream payloads, newline-delimited chunked bodies and single JSON
/// bodies all decode to the same [`Frame`] values.
use serde_json::{Map, Value};
use tracing::debug;

use crate::api::models::SourceDocument;

/// Payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_MARKER: &str = "data:";

/// Event-stream fields other than `data:` that carry nothing for us.
const IGNORED_FIELDS: &[&str] = &["event:", "id:", "retry:"];

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Token(String),
    Sources(Vec<SourceDocument>),
    /// Error reported by the backend inside the stream.
    Failure(String),
    Done,
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Decode one event payload: sentinel, then JSON object, then raw text.
///
/// Returns no frames for payloads that carry nothing (empty data, keepalive
/// objects). An object with both a token and sources yields both, in that
/// order.
#[must_use]
pub fn decode_payload(payload: &str) -> Vec<Frame> {
    if payload.trim() == DONE_SENTINEL {
        return vec![Frame::Done];
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => decode_object(&map),
        Ok(_) => raw_token(payload),
        Err(e) => {
            if payload.trim_start().starts_with('{') {
                debug!("Malformed JSON payload, emitting as text: {e}");
            }
            raw_token(payload)
        }
    }
}

fn raw_token(payload: &str) -> Vec<Frame> {
    if payload.is_empty() {
        Vec::new()
    } else {
        vec![Frame::Token(payload.to_string())]
    }
}

fn decode_object(map: &Map<String, Value>) -> Vec<Frame> {
    if let Some(message) = error_message(map) {
        return vec![Frame::Failure(message)];
    }

    let mut frames = Vec::new();
    let field = ["token", "text"]
        .into_iter()
        .find_map(|key| map.get(key).map(|value| (key, value)));
    match field {
        Some((_, Value::String(token))) if !token.is_empty() => {
            frames.push(Frame::Token(token.clone()));
        }
        Some((_, Value::String(_) | Value::Null)) | None => {}
        Some((key, other)) => debug!("Skipping non-string {key} field: {other}"),
    }

    if let Some(sources) = map.get("sources").filter(|v| !v.is_null()) {
        frames.extend(decode_sources(sources).map(Frame::Sources));
    }
    frames
}

fn error_message(map: &Map<String, Value>) -> Option<String> {
    match map.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(inner) => Some(
            inner
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown backend error")
                .to_string(),
        ),
        other => Some(other.to_string()),
    }
}

fn decode_sources(value: &Value) -> Option<Vec<SourceDocument>> {
    match serde_json::from_value::<Vec<SourceDocument>>(value.clone()) {
        Ok(sources) => Some(sources),
        Err(e) => {
            debug!("Ignoring unreadable sources payload: {e}");
            None
        }
    }
}

// ── Chunked bodies ───────────────────────────────────────────────────

/// Decode one newline-delimited record of a chunked body.
#[must_use]
pub fn decode_line(line: &str) -> Vec<Frame> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Vec::new();
    }

    if let Some(rest) = line.strip_prefix(DATA_MARKER) {
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        return decode_payload(payload);
    }

    // SSE comments and non-data fields
    if line.starts_with(':') || IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) {
        return Vec::new();
    }

    if line.trim() == DONE_SENTINEL {
        return vec![Frame::Done];
    }

    vec![Frame::Token(line.to_string())]
}

/// Splits a byte stream into complete lines.
///
/// Bytes after the last newline stay buffered until a later chunk completes
/// the line, so a record split anywhere (even inside a multi-byte
/// character) decodes exactly as if it arrived whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Take the unterminated remainder once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ── Single JSON bodies ───────────────────────────────────────────────

/// Whether a `Content-Type` value announces a single JSON body.
#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Decode a non-streaming body into its answer, sources and a final `Done`.
#[must_use]
pub fn decode_json_body(body: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            let answer = ["answer", "token", "text"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str));
            match answer {
                Some(answer) => {
                    if !answer.is_empty() {
                        frames.push(Frame::Token(answer.to_string()));
                    }
                    if let Some(sources) = map.get("sources").and_then(decode_sources) {
                        frames.push(Frame::Sources(sources));
                    }
                }
                None => match error_message(&map) {
                    Some(message) => frames.push(Frame::Failure(message)),
                    None => push_verbatim(&mut frames, body),
                },
            }
        }
        _ => push_verbatim(&mut frames, body),
    }

    frames.push(Frame::Done);
    frames
}

fn push_verbatim(frames: &mut Vec<Frame>, body: &[u8]) {
    let text = String::from_utf8_lossy(body);
    if !text.trim().is_empty() {
        frames.push(Frame::Token(text.into_owned()));
    }
}
