//! HTTP client for the non-streaming RAG backend endpoints.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

pub mod models;

use models::{
    DocumentsResponse, HealthResponse, InfoResponse, QueryRequest, QueryResponse,
    SimilarityRequest, SimilarityResponse, StatsResponse,
};

/// Longest response body excerpt carried in a status error.
const ERROR_BODY_LIMIT: usize = 300;

/// Errors from the non-streaming backend endpoints.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Typed access to the backend. Cheap to clone; clones share one
/// connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<Config>,
}

impl ApiClient {
    pub fn new(config: Arc<Config>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ragchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { http, config })
    }

    /// The shared HTTP client, reused by the streaming transports.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Non-streaming question answering.
    pub async fn query(
        &self,
        question: &str,
        return_sources: bool,
    ) -> Result<QueryResponse, ApiError> {
        let body = QueryRequest {
            question,
            return_sources,
        };
        self.post_json(
            &self.config.endpoints.query,
            &body,
            self.config.request_timeout(),
        )
        .await
    }

    /// Nearest source documents for `query`.
    pub async fn similarity(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<SimilarityResponse, ApiError> {
        let body = SimilarityRequest { query, top_k };
        self.post_json(
            &self.config.endpoints.similarity,
            &body,
            self.config.request_timeout(),
        )
        .await
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.get_json(&self.config.endpoints.health, self.config.health_timeout())
            .await
    }

    pub async fn info(&self) -> Result<InfoResponse, ApiError> {
        self.get_json(&self.config.endpoints.info, self.config.request_timeout())
            .await
    }

    pub async fn stats(&self) -> Result<StatsResponse, ApiError> {
        self.get_json(&self.config.endpoints.stats, self.config.request_timeout())
            .await
    }

    pub async fn documents(&self) -> Result<DocumentsResponse, ApiError> {
        self.get_json(
            &self.config.endpoints.documents,
            self.config.request_timeout(),
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, ApiError> {
        let url = self.config.url(path);
        debug!("GET {url}");
        let request = self.http.get(&url).timeout(timeout);
        Self::send(url, request).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, ApiError> {
        let url = self.config.url(path);
        debug!("POST {url}");
        let request = self.http.post(&url).json(body).timeout(timeout);
        Self::send(url, request).await
    }

    async fn send<T: DeserializeOwned>(
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = match request.send().await {
            Ok(r) => r,
            Err(source) => return Err(ApiError::Request { url, source }),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                url,
                status,
                body: excerpt(&text, ERROR_BODY_LIMIT),
            });
        }

        match response.json::<T>().await {
            Ok(value) => Ok(value),
            Err(source) => Err(ApiError::Decode { url, source }),
        }
    }
}

/// First `limit` characters of `text`, marked when cut.
fn excerpt(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
