/// Per-query control flow: stream first, fall back to one plain request.
///
/// `Idle → Streaming → {Completed | FallbackRequested} → Completed`.
/// `ask` takes `&mut self`, so a controller never has two queries in flight.
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::accumulator::{AnswerAccumulator, AnswerObserver, Reducer};
use super::{ChatError, ChatMessage};
use crate::api::ApiClient;
use crate::api::models::SourceDocument;
use crate::stream::deadline::Deadline;
use crate::stream::negotiator::Negotiator;
use crate::stream::{Query, StreamSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Streaming,
    FallbackRequested,
    Completed,
}

pub struct ChatController {
    api: ApiClient,
    negotiator: Negotiator,
    state: ControllerState,
    stream_timeout: Duration,
    return_sources: bool,
    sources_top_k: usize,
}

impl ChatController {
    /// Controller using the configured transports against the stream endpoint.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        let config = api.config().clone();
        let stream_url = config.url(&config.endpoints.stream);
        let negotiator = Negotiator::for_endpoint(&config.transports, api.http(), &stream_url);
        Self::with_negotiator(api, negotiator)
    }

    #[must_use]
    pub fn with_negotiator(api: ApiClient, negotiator: Negotiator) -> Self {
        let config = api.config().clone();
        Self {
            api,
            negotiator,
            state: ControllerState::Idle,
            stream_timeout: config.stream_timeout(),
            return_sources: config.return_sources,
            sources_top_k: config.sources_top_k,
        }
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn set_return_sources(&mut self, enabled: bool) {
        self.return_sources = enabled;
    }

    /// Answer `question`, streaming tokens into `observer` as they arrive.
    ///
    /// Only an empty question is an `Err`; a total failure comes back as an
    /// error message.
    pub async fn ask(
        &mut self,
        question: &str,
        observer: &mut (dyn AnswerObserver + Send),
    ) -> Result<ChatMessage, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let query = Query::new(question);
        info!(
            "Question at {}: {}",
            query.requested_at().format("%H:%M:%S"),
            query.text()
        );
        self.state = ControllerState::Streaming;

        let mut answer = AnswerAccumulator::new();
        let mut session = StreamSession::new();
        let deadline = Deadline::after(self.stream_timeout);

        let streamed = {
            let mut reducer = Reducer::new(&mut answer, &mut *observer);
            let result = self
                .negotiator
                .run(&query, &mut session, &deadline, &mut reducer)
                .await;
            if result.is_ok() {
                reducer.finish();
            }
            result
        };
        debug!("Transports attempted: {:?}", session.attempts());

        let transport = match streamed {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!("Streaming failed, falling back to a single request: {e}");
                self.state = ControllerState::FallbackRequested;
                None
            }
        };

        if self.state == ControllerState::FallbackRequested {
            match self.api.query(query.text(), self.return_sources).await {
                Ok(response) => {
                    answer.replace(response.answer);
                    answer.attach_sources(response.sources);
                    observer.on_replaced(&answer);
                }
                Err(e) => {
                    let err = ChatError::FallbackFailure(e);
                    error!("{err}");
                    answer.finish();
                    let message = ChatMessage::failure(&err);
                    observer.on_error(&message.text);
                    self.state = ControllerState::Completed;
                    return Ok(message);
                }
            }
        } else if self.return_sources && answer.sources().is_empty() {
            match self.fetch_sources(query.text()).await {
                Ok(sources) => {
                    answer.attach_sources(sources);
                    observer.on_sources(&answer);
                }
                Err(e) => warn!("{e}"),
            }
        }

        self.state = ControllerState::Completed;
        Ok(ChatMessage::assistant(&answer, transport))
    }

    async fn fetch_sources(&self, query: &str) -> Result<Vec<SourceDocument>, ChatError> {
        self.api
            .similarity(query, self.sources_top_k)
            .await
            .map(|r| r.documents)
            .map_err(ChatError::SourceFetchFailure)
    }
}
