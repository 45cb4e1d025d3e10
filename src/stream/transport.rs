/// Streaming transport strategies.
///
/// Every strategy exposes the same capability, [`Transport::attempt`], so the
/// negotiator can walk a priority list of trait objects.
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use tracing::{debug, trace};

use super::deadline::Deadline;
use super::frame::{self, Frame};
use super::{Query, StreamError, StreamSession, TokenSink, TransportKind};
use crate::api::models::StreamRequest;

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Stream one answer into `sink`.
    ///
    /// `Ok` means a terminal signal was observed. Tokens handed to the sink
    /// before an error stay delivered.
    async fn attempt(
        &self,
        query: &Query,
        session: &mut StreamSession,
        deadline: &Deadline,
        sink: &mut (dyn TokenSink + Send),
    ) -> Result<(), StreamError>;
}

/// Build transports for `kinds`, in order, all targeting `stream_url`.
#[must_use]
pub fn build_transports(
    kinds: &[TransportKind],
    http: &reqwest::Client,
    stream_url: &str,
) -> Vec<Box<dyn Transport>> {
    kinds
        .iter()
        .map(|kind| -> Box<dyn Transport> {
            match kind {
                TransportKind::EventSource => {
                    Box::new(EventSourceTransport::new(http.clone(), stream_url))
                }
                TransportKind::PostFetch => Box::new(FetchTransport::post(http.clone(), stream_url)),
                TransportKind::GetFetch => Box::new(FetchTransport::get(http.clone(), stream_url)),
            }
        })
        .collect()
}

// ── Event stream ─────────────────────────────────────────────────────

/// Persistent `text/event-stream` GET. Only `[DONE]` ends it successfully.
pub struct EventSourceTransport {
    http: reqwest::Client,
    url: String,
}

impl EventSourceTransport {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Transport for EventSourceTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::EventSource
    }

    async fn attempt(
        &self,
        query: &Query,
        session: &mut StreamSession,
        deadline: &Deadline,
        sink: &mut (dyn TokenSink + Send),
    ) -> Result<(), StreamError> {
        let kind = self.kind();
        let request = self
            .http
            .get(&self.url)
            .query(&[("question", query.text())])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let response = open(kind, request, deadline).await?;
        session.mark_open();

        if has_json_body(&response) {
            return read_json_body(kind, response, session, deadline, sink).await;
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| match e {
                EventStreamError::Transport(e) => request_error(kind, deadline, e),
                other => StreamError::connection(kind, other),
            })?;
            trace!("SSE data: {:?}", event.data);

            for frame in frame::decode_payload(&event.data) {
                if let Flow::Finished = dispatch(frame, session, sink)? {
                    return Ok(());
                }
            }
        }

        Err(StreamError::connection(
            kind,
            "event stream closed before the terminal sentinel",
        ))
    }
}

// ── Chunked fetch ────────────────────────────────────────────────────

/// Newline-delimited chunked body over POST or GET. A clean end of body is
/// terminal, as is `[DONE]`.
pub struct FetchTransport {
    kind: TransportKind,
    http: reqwest::Client,
    url: String,
}

impl FetchTransport {
    pub fn post(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::PostFetch,
            http,
            url: url.into(),
        }
    }

    pub fn get(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::GetFetch,
            http,
            url: url.into(),
        }
    }

    fn request(&self, query: &Query) -> RequestBuilder {
        match self.kind {
            TransportKind::PostFetch => self
                .http
                .post(&self.url)
                .json(&StreamRequest {
                    question: query.text(),
                })
                .header(ACCEPT, "text/event-stream"),
            _ => self
                .http
                .get(&self.url)
                .query(&[("question", query.text())])
                .header(ACCEPT, "*/*"),
        }
    }
}

#[async_trait]
impl Transport for FetchTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn attempt(
        &self,
        query: &Query,
        session: &mut StreamSession,
        deadline: &Deadline,
        sink: &mut (dyn TokenSink + Send),
    ) -> Result<(), StreamError> {
        let kind = self.kind;
        let response = open(kind, self.request(query), deadline).await?;
        session.mark_open();

        if has_json_body(&response) {
            return read_json_body(kind, response, session, deadline, sink).await;
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| request_error(kind, deadline, e))?;
            let lines = session.buffer_mut().push(&chunk);
            for frame in lines.iter().flat_map(|line| frame::decode_line(line)) {
                if let Flow::Finished = dispatch(frame, session, sink)? {
                    return Ok(());
                }
            }
        }

        // End of body completes the last record.
        if let Some(rest) = session.buffer_mut().finish() {
            for frame in frame::decode_line(&rest) {
                if let Flow::Finished = dispatch(frame, session, sink)? {
                    return Ok(());
                }
            }
        }

        debug!("{kind} body ended without [DONE]");
        session.mark_done();
        Ok(())
    }
}

// ── Shared helpers ───────────────────────────────────────────────────

enum Flow {
    Continue,
    Finished,
}

fn dispatch(
    frame: Frame,
    session: &mut StreamSession,
    sink: &mut (dyn TokenSink + Send),
) -> Result<Flow, StreamError> {
    match frame {
        Frame::Token(token) => {
            sink.on_token(&token);
            Ok(Flow::Continue)
        }
        Frame::Sources(sources) => {
            sink.on_sources(sources);
            Ok(Flow::Continue)
        }
        Frame::Failure(message) => Err(StreamError::Backend(message)),
        Frame::Done => {
            session.mark_done();
            Ok(Flow::Finished)
        }
    }
}

/// Send the request with the remaining budget as its timeout so an expired
/// deadline also tears down the connection.
async fn open(
    kind: TransportKind,
    request: RequestBuilder,
    deadline: &Deadline,
) -> Result<Response, StreamError> {
    let response = request
        .timeout(deadline.remaining())
        .send()
        .await
        .map_err(|e| request_error(kind, deadline, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::connection(kind, format!("HTTP {status}")));
    }
    Ok(response)
}

fn request_error(kind: TransportKind, deadline: &Deadline, e: reqwest::Error) -> StreamError {
    if e.is_timeout() {
        deadline.timeout_error()
    } else {
        StreamError::connection(kind, e)
    }
}

fn has_json_body(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(frame::is_json_content_type)
        .unwrap_or(false)
}

async fn read_json_body(
    kind: TransportKind,
    response: Response,
    session: &mut StreamSession,
    deadline: &Deadline,
    sink: &mut (dyn TokenSink + Send),
) -> Result<(), StreamError> {
    debug!("{kind} answered with a single JSON body");
    let body = response
        .bytes()
        .await
        .map_err(|e| request_error(kind, deadline, e))?;

    for frame in frame::decode_json_body(&body) {
        if let Flow::Finished = dispatch(frame, session, sink)? {
            return Ok(());
        }
    }
    Ok(())
}
