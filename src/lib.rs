//! # ragchat - streaming client for RAG chat backends
//!
//! Sends questions to a Retrieval-Augmented-Generation backend, renders the
//! answer token by token as it is generated, and falls back to a single
//! non-streaming request when every streaming transport fails.
//!
//! ## Architecture
//!
//! - **[`config`]** - Configuration loading, validation, and backend origin resolution
//! - **[`api`]** - Wire models and the non-streaming endpoints (query, similarity, health, …)
//! - **[`stream`]** - Transports (event stream, chunked POST/GET), frame parsing,
//!   shared deadline, and transport negotiation
//! - **[`chat`]** - Answer accumulation, the fallback controller, and terminal rendering

pub mod api;
pub mod chat;
pub mod config;
pub mod stream;
