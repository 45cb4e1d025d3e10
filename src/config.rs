/// Configuration module for ragchat.
///
/// Handles loading, validating, and providing default configuration values,
/// plus resolution of the backend origin and endpoint URLs.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stream::TransportKind;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ragchat.json";

/// Environment variable overriding `api_base_url` at runtime.
pub const API_URL_ENV: &str = "RAGCHAT_API_URL";

// ── Default value functions ──────────────────────────────────────────

fn default_dev_proxy_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_stream_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_health_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_sources_top_k() -> usize {
    5
}

fn default_transports() -> Vec<TransportKind> {
    vec![
        TransportKind::EventSource,
        TransportKind::PostFetch,
        TransportKind::GetFetch,
    ]
}

fn default_query_path() -> String {
    "/api/query".to_string()
}

fn default_stream_path() -> String {
    "/api/query/stream".to_string()
}

fn default_similarity_path() -> String {
    "/api/similarity".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_info_path() -> String {
    "/api/info".to_string()
}

fn default_stats_path() -> String {
    "/api/stats".to_string()
}

fn default_documents_path() -> String {
    "/api/documents".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Backend origin. Empty means same-origin relative paths behind a
    /// development proxy.
    #[serde(default)]
    pub api_base_url: String,

    /// Origin that relative paths resolve against when `api_base_url` is empty.
    #[serde(default = "default_dev_proxy_origin")]
    pub dev_proxy_origin: String,

    /// Budget shared by every streaming transport, measured from query issuance.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub return_sources: bool,

    #[serde(default = "default_sources_top_k")]
    pub sources_top_k: usize,

    /// Streaming transports in priority order.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    #[serde(default)]
    pub endpoints: EndpointPaths,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    #[serde(default = "default_query_path")]
    pub query: String,

    #[serde(default = "default_stream_path")]
    pub stream: String,

    #[serde(default = "default_similarity_path")]
    pub similarity: String,

    #[serde(default = "default_health_path")]
    pub health: String,

    #[serde(default = "default_info_path")]
    pub info: String,

    #[serde(default = "default_stats_path")]
    pub stats: String,

    #[serde(default = "default_documents_path")]
    pub documents: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            dev_proxy_origin: default_dev_proxy_origin(),
            stream_timeout_secs: default_stream_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            return_sources: default_true(),
            sources_top_k: default_sources_top_k(),
            transports: default_transports(),
            endpoints: EndpointPaths::default(),
        }
    }
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            query: default_query_path(),
            stream: default_stream_path(),
            similarity: default_similarity_path(),
            health: default_health_path(),
            info: default_info_path(),
            stats: default_stats_path(),
            documents: default_documents_path(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, looks for `ragchat.json` in the working
    /// directory, then in the user config directory. If no file exists,
    /// returns a default config and generates a template at the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            default_config_path()
        } else {
            PathBuf::from(config_path)
        };

        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            let cfg = Self::default();

            // Generate template only for the default path
            if config_path.is_empty() {
                match cfg.save(&path) {
                    Ok(()) => info!("Generated config template: {}", path.display()),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {}: {e}", path.display());
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {}", path.display());

        if cfg.transports.is_empty() {
            cfg.transports = default_transports();
        }

        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply the `RAGCHAT_API_URL` environment override, if set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let from_env = std::env::var(API_URL_ENV).ok();
        self.with_api_url(from_env)
    }

    /// Replace the backend origin when an override is given.
    #[must_use]
    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url {
            info!("Backend origin overridden: {url:?}");
            self.api_base_url = url.trim().to_string();
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.stream_timeout_secs > 0,
            "stream_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );
        anyhow::ensure!(self.sources_top_k > 0, "sources_top_k must be positive");
        anyhow::ensure!(
            !self.transports.is_empty(),
            "at least one streaming transport must be specified"
        );
        let origin = self.origin();
        anyhow::ensure!(
            origin.starts_with("http://") || origin.starts_with("https://"),
            "backend origin must be an http(s) URL, got {origin:?}"
        );
        Ok(())
    }

    /// The origin requests are sent to.
    #[must_use]
    pub fn origin(&self) -> &str {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            self.dev_proxy_origin.trim_end_matches('/')
        } else {
            base.trim_end_matches('/')
        }
    }

    /// Whether requests use same-origin relative paths.
    #[must_use]
    pub fn is_same_origin(&self) -> bool {
        self.api_base_url.trim().is_empty()
    }

    /// Join an endpoint path onto the resolved origin.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.origin(), path.trim_start_matches('/'))
    }

    #[must_use]
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

/// `ragchat.json` in the working directory if present, otherwise the copy in
/// the user config directory if present, otherwise the working-directory path.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        let user = dir.join("ragchat").join(DEFAULT_CONFIG_FILE);
        if user.exists() {
            return user;
        }
    }
    local
}

// ── Tests ────────────────────────────────────────────────────────────
