//! Conversation layer: answer accumulation, fallback control and rendering.
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::api::ApiError;
use crate::api::models::SourceDocument;
use crate::stream::TransportKind;

pub mod accumulator;
pub mod controller;
pub mod render;

use accumulator::AnswerAccumulator;

/// Prefix of the message shown when both streaming and fallback failed.
pub const FAILURE_PREFIX: &str = "Sorry, an error occurred while processing your request";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("fallback request failed: {0}")]
    FallbackFailure(#[source] ApiError),

    #[error("source lookup failed: {0}")]
    SourceFetchFailure(#[source] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized conversation entry.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceDocument>,
    pub is_error: bool,
    /// Transport that delivered the answer; `None` for fallback answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Local::now(),
            sources: Vec::new(),
            is_error: false,
            transport: None,
        }
    }

    #[must_use]
    pub fn assistant(answer: &AnswerAccumulator, transport: Option<TransportKind>) -> Self {
        Self {
            role: Role::Assistant,
            text: answer.display_text().to_string(),
            timestamp: Local::now(),
            sources: answer.sources().to_vec(),
            is_error: false,
            transport,
        }
    }

    #[must_use]
    pub fn failure(error: &ChatError) -> Self {
        Self {
            role: Role::Assistant,
            text: format!("{FAILURE_PREFIX}: {error}"),
            timestamp: Local::now(),
            sources: Vec::new(),
            is_error: true,
            transport: None,
        }
    }
}

/// Messages of one interactive session, oldest first.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Sources of the most recent assistant answer.
    #[must_use]
    pub fn last_sources(&self) -> &[SourceDocument] {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
