use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    pub question: &'a str,
    pub return_sources: bool,
}

/// Body of the chunked POST stream request.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest<'a> {
    pub question: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub question: String,
    pub answer: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sources: Vec<SourceDocument>,
}

/// A retrieved chunk backing an answer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, deserialize_with = "metadata_as_strings")]
    pub metadata: HashMap<String, String>,
}

impl SourceDocument {
    /// Label shown for the document: its `source` metadata, else the title.
    #[must_use]
    pub fn label(&self) -> &str {
        match self.metadata.get("source") {
            Some(source) if !source.is_empty() => source.as_str(),
            _ if !self.title.is_empty() => self.title.as_str(),
            _ => "unknown source",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimilarityResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "results", deserialize_with = "null_as_empty")]
    pub documents: Vec<SourceDocument>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl HealthResponse {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default)]
    pub llm_model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsResponse {
    pub total_documents: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub index_size_mb: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentEntry {
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Unix timestamp (seconds, possibly fractional).
    #[serde(default)]
    pub modified: f64,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentsResponse {
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
    #[serde(default)]
    pub total_count: Option<u64>,
    /// Set by the backend when the documents folder is missing.
    #[serde(default)]
    pub message: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Backend metadata values are arbitrary JSON; flatten them to strings.
fn metadata_as_strings<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}
