//! Mock RAG backend for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{StreamExt, stream};
use serde_json::Value;
use tokio::net::TcpListener;

use ragchat::api::ApiClient;
use ragchat::chat::accumulator::{AnswerAccumulator, AnswerObserver};
use ragchat::chat::controller::ChatController;
use ragchat::config::Config;

/// What an endpoint answers with.
#[derive(Clone)]
pub enum Reply {
    Status(StatusCode),
    /// Body written as separate chunks.
    Chunks {
        content_type: &'static str,
        chunks: Vec<&'static str>,
    },
    Json(Value),
    /// Sends the chunks, then never finishes the body.
    Stall {
        content_type: &'static str,
        chunks: Vec<&'static str>,
    },
    /// Sends the chunks, then aborts the connection mid-body.
    Broken {
        content_type: &'static str,
        chunks: Vec<&'static str>,
    },
}

impl Reply {
    pub fn sse(chunks: Vec<&'static str>) -> Self {
        Self::Chunks {
            content_type: "text/event-stream",
            chunks,
        }
    }

    pub fn plain(chunks: Vec<&'static str>) -> Self {
        Self::Chunks {
            content_type: "text/plain; charset=utf-8",
            chunks,
        }
    }

    pub fn unavailable() -> Self {
        Self::Status(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn render(&self) -> Response {
        match self {
            Self::Status(code) => code.into_response(),
            Self::Json(value) => Json(value.clone()).into_response(),
            Self::Chunks {
                content_type,
                chunks,
            } => streamed(
                *content_type,
                Body::from_stream(stream::iter(parts::<Infallible>(chunks))),
            ),
            Self::Stall {
                content_type,
                chunks,
            } => {
                let body = stream::iter(parts::<Infallible>(chunks)).chain(stream::pending());
                streamed(*content_type, Body::from_stream(body))
            }
            Self::Broken {
                content_type,
                chunks,
            } => {
                let failure = stream::once(async {
                    // Let the sent chunks reach the client first
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "backend crashed"))
                });
                let body = stream::iter(parts::<io::Error>(chunks)).chain(failure);
                streamed(*content_type, Body::from_stream(body))
            }
        }
    }
}

fn parts<E>(chunks: &[&'static str]) -> Vec<Result<Bytes, E>> {
    chunks
        .iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect()
}

fn streamed(content_type: &'static str, body: Body) -> Response {
    Response::builder()
        .header(CONTENT_TYPE, content_type)
        .body(body)
        .unwrap()
}

pub struct Behaviour {
    pub eventsource: Reply,
    pub post_stream: Reply,
    pub get_stream: Reply,
    pub query: Reply,
    pub similarity: Reply,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            eventsource: Reply::unavailable(),
            post_stream: Reply::unavailable(),
            get_stream: Reply::unavailable(),
            query: Reply::unavailable(),
            similarity: Reply::Json(serde_json::json!({"query": "", "documents": []})),
        }
    }
}

#[derive(Clone)]
pub struct MockBackend {
    behaviour: Arc<Behaviour>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Requests seen so far, as `endpoint` names in arrival order.
    pub fn log(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    /// Requests with their question/query text, as `endpoint:text`.
    pub fn detailed_log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, endpoint: &str, text: &str) {
        self.log.lock().unwrap().push(format!("{endpoint}:{text}"));
    }
}

async fn get_stream(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let question = params.get("question").cloned().unwrap_or_default();
    let is_eventsource = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    if is_eventsource {
        backend.record("eventsource", &question);
        backend.behaviour.eventsource.render()
    } else {
        backend.record("get-fetch", &question);
        backend.behaviour.get_stream.render()
    }
}

async fn post_stream(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    backend.record("post-fetch", body["question"].as_str().unwrap_or_default());
    backend.behaviour.post_stream.render()
}

async fn post_query(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    backend.record("query", body["question"].as_str().unwrap_or_default());
    backend.behaviour.query.render()
}

async fn post_similarity(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    backend.record("similarity", body["query"].as_str().unwrap_or_default());
    backend.behaviour.similarity.render()
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({"status": "healthy", "message": "ok"}))
}

async fn info() -> Json<Value> {
    Json(serde_json::json!({
        "name": "RAG System",
        "version": "1.0.0",
        "description": "Document QA",
        "embedding_model": "multilingual-e5-large",
        "llm_model": "gpt-3.5-turbo"
    }))
}

async fn stats() -> Json<Value> {
    Json(serde_json::json!({
        "total_documents": 12,
        "total_chunks": 340,
        "index_size_mb": 4.5,
        "last_updated": null
    }))
}

async fn documents() -> Json<Value> {
    Json(serde_json::json!({
        "documents": [
            {"name": "pledges.docx", "size_bytes": 2048, "modified": 1700000000.5, "path": "docs/pledges.docx"}
        ],
        "total_count": 1
    }))
}

/// Start a mock backend on an ephemeral port; returns it with its origin.
pub async fn spawn_backend(behaviour: Behaviour) -> (MockBackend, String) {
    let backend = MockBackend {
        behaviour: Arc::new(behaviour),
        log: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/api/query/stream", get(get_stream).post(post_stream))
        .route("/api/query", post(post_query))
        .route("/api/similarity", post(post_similarity))
        .route("/health", get(health))
        .route("/api/info", get(info))
        .route("/api/stats", get(stats))
        .route("/api/documents", get(documents))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, format!("http://{addr}"))
}

pub fn api_client(origin: &str) -> ApiClient {
    let config = Config::default().with_api_url(Some(origin.to_string()));
    ApiClient::new(Arc::new(config)).unwrap()
}

pub fn controller(origin: &str) -> ChatController {
    ChatController::new(api_client(origin))
}

/// Controller whose streaming attempts share a `secs` second budget.
pub fn controller_with_budget(origin: &str, secs: u64) -> ChatController {
    let mut config = Config::default().with_api_url(Some(origin.to_string()));
    config.stream_timeout_secs = secs;
    ChatController::new(ApiClient::new(Arc::new(config)).unwrap())
}

/// Observer recording every notification.
#[derive(Default)]
pub struct Recorder {
    pub tokens: Vec<String>,
    pub snapshots: Vec<String>,
    /// `is_streaming` as seen by each `on_finished` call.
    pub finished: Vec<bool>,
    pub replaced: Vec<String>,
    pub errors: Vec<String>,
}

impl AnswerObserver for Recorder {
    fn on_token(&mut self, token: &str, answer: &AnswerAccumulator) {
        self.tokens.push(token.to_string());
        self.snapshots.push(answer.full_text().to_string());
    }

    fn on_finished(&mut self, answer: &AnswerAccumulator) {
        self.finished.push(answer.is_streaming());
    }

    fn on_replaced(&mut self, answer: &AnswerAccumulator) {
        self.replaced.push(answer.full_text().to_string());
    }

    fn on_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}
