//! Streaming answer delivery: transports, framing and negotiation.
//!
//! A [`Query`] is streamed through one [`StreamSession`]. The
//! [`negotiator::Negotiator`] walks its transport list against a single
//! [`deadline::Deadline`], and every decoded token is handed synchronously to
//! a [`TokenSink`] before the next chunk is read.
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::models::SourceDocument;

pub mod deadline;
pub mod frame;
pub mod negotiator;
pub mod transport;

use frame::LineBuffer;

// ── Query ────────────────────────────────────────────────────────────

/// A question as issued by the user. Immutable once created.
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    requested_at: DateTime<Local>,
}

impl Query {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            requested_at: Local::now(),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn requested_at(&self) -> DateTime<Local> {
        self.requested_at
    }
}

// ── Transport kinds & session state ──────────────────────────────────

/// The delivery mechanisms, in their default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Persistent `text/event-stream` GET.
    #[serde(rename = "eventsource")]
    EventSource,
    /// Chunked response to a POST.
    #[serde(rename = "post-fetch")]
    PostFetch,
    /// Chunked response to a GET.
    #[serde(rename = "get-fetch")]
    GetFetch,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventSource => "eventsource",
            Self::PostFetch => "post-fetch",
            Self::GetFetch => "get-fetch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Done,
    Failed,
}

/// State of one in-flight query across its transport attempts.
///
/// Switching transport resets the state and partial-line buffer; the
/// session itself lives until the query reaches a terminal state.
#[derive(Debug)]
pub struct StreamSession {
    transport_kind: Option<TransportKind>,
    state: SessionState,
    buffer: LineBuffer,
    attempts: Vec<TransportKind>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport_kind: None,
            state: SessionState::Connecting,
            buffer: LineBuffer::default(),
            attempts: Vec::new(),
        }
    }

    /// Transport currently (or last) in use.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport_kind
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transports tried so far, in order.
    #[must_use]
    pub fn attempts(&self) -> &[TransportKind] {
        &self.attempts
    }

    pub fn buffer_mut(&mut self) -> &mut LineBuffer {
        &mut self.buffer
    }

    pub(crate) fn begin(&mut self, kind: TransportKind) {
        self.transport_kind = Some(kind);
        self.state = SessionState::Connecting;
        self.buffer.clear();
        self.attempts.push(kind);
    }

    pub fn mark_open(&mut self) {
        self.state = SessionState::Open;
    }

    pub fn mark_done(&mut self) {
        self.state = SessionState::Done;
    }

    pub fn mark_failed(&mut self) {
        self.state = SessionState::Failed;
    }
}

// ── Sink ─────────────────────────────────────────────────────────────

/// Receives decoded frames synchronously from a transport's read loop.
pub trait TokenSink {
    fn on_token(&mut self, token: &str);

    /// Source documents delivered inside the stream.
    fn on_sources(&mut self, _sources: Vec<SourceDocument>) {}
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{transport} transport failed: {reason}")]
    ConnectionFailure {
        transport: TransportKind,
        reason: String,
    },

    #[error("streaming timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("backend reported an error: {0}")]
    Backend(String),

    #[error("all streaming transports failed: {}", join_failures(.0))]
    Exhausted(Vec<StreamError>),
}

impl StreamError {
    pub fn connection(transport: TransportKind, reason: impl fmt::Display) -> Self {
        Self::ConnectionFailure {
            transport,
            reason: reason.to_string(),
        }
    }
}

fn join_failures(failures: &[StreamError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
