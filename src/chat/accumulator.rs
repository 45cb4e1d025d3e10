/// Incremental answer state and the reducer that feeds it.
use tracing::trace;

use crate::api::models::SourceDocument;
use crate::stream::TokenSink;

/// Marker closing a model's reasoning preamble.
const THINK_CLOSE: &str = "</think>";

/// The answer being built for one query.
///
/// `full_text` is always the in-order concatenation of `tokens`.
/// `is_streaming` goes from true to false exactly once.
#[derive(Debug, Clone)]
pub struct AnswerAccumulator {
    tokens: Vec<String>,
    full_text: String,
    is_streaming: bool,
    sources: Vec<SourceDocument>,
}

impl Default for AnswerAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: Vec::new(),
            full_text: String::new(),
            is_streaming: true,
            sources: Vec::new(),
        }
    }

    /// Append a token. Ignored once the answer is closed.
    pub fn apply(&mut self, token: &str) -> bool {
        if !self.is_streaming {
            trace!("Dropping token after close: {token:?}");
            return false;
        }
        self.full_text.push_str(token);
        self.tokens.push(token.to_string());
        true
    }

    /// Close the answer. Returns `true` only for the first call.
    pub fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.is_streaming, false)
    }

    /// Replace everything streamed so far with `text` and close.
    pub fn replace(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.full_text.clone_from(&text);
        self.tokens = vec![text];
        self.is_streaming = false;
    }

    pub fn attach_sources(&mut self, sources: Vec<SourceDocument>) {
        self.sources = sources;
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Text shown to the user: anything up to the last `</think>` is the
    /// model's reasoning and is left out.
    #[must_use]
    pub fn display_text(&self) -> &str {
        match self.full_text.rfind(THINK_CLOSE) {
            Some(idx) => self.full_text[idx + THINK_CLOSE.len()..].trim_start(),
            None => &self.full_text,
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    #[must_use]
    pub fn sources(&self) -> &[SourceDocument] {
        &self.sources
    }
}

/// UI hook notified after every committed change.
pub trait AnswerObserver {
    /// A token was appended; `answer` already includes it.
    fn on_token(&mut self, _token: &str, _answer: &AnswerAccumulator) {}

    fn on_sources(&mut self, _answer: &AnswerAccumulator) {}

    fn on_finished(&mut self, _answer: &AnswerAccumulator) {}

    /// The streamed text was overwritten by a non-streaming answer.
    fn on_replaced(&mut self, _answer: &AnswerAccumulator) {}

    /// Streaming and the fallback both failed.
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that ignores every update.
pub struct NoopObserver;

impl AnswerObserver for NoopObserver {}

/// Applies frames to the accumulator and notifies the observer before
/// returning control to the read loop.
pub struct Reducer<'a> {
    answer: &'a mut AnswerAccumulator,
    observer: &'a mut (dyn AnswerObserver + Send),
}

impl<'a> Reducer<'a> {
    pub fn new(
        answer: &'a mut AnswerAccumulator,
        observer: &'a mut (dyn AnswerObserver + Send),
    ) -> Self {
        Self { answer, observer }
    }

    /// Close the answer and notify, once.
    pub fn finish(&mut self) {
        if self.answer.finish() {
            self.observer.on_finished(self.answer);
        }
    }
}

impl TokenSink for Reducer<'_> {
    fn on_token(&mut self, token: &str) {
        if self.answer.apply(token) {
            self.observer.on_token(token, self.answer);
        }
    }

    fn on_sources(&mut self, sources: Vec<SourceDocument>) {
        self.answer.attach_sources(sources);
        self.observer.on_sources(self.answer);
    }
}
