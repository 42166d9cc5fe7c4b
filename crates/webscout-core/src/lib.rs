use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("no readable content found at {0}")]
    NoContentFound(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("no search provider available for query: {0}")]
    NoSearchProvider(String),
    #[error("failed to spawn scout worker: {0}")]
    WorkerSpawnFailed(String),
    #[error("scout worker exited with {}: {message}", exit_code_label(.code))]
    WorkerExitedNonZero { code: Option<i32>, message: String },
    #[error("task underspecified: {0}")]
    TaskUnderspecified(String),
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Stable machine-readable tag for hosts that branch on failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::FetchFailed(_) => "fetch_failed",
            Self::NoContentFound(_) => "no_content_found",
            Self::Search(_) => "search_failed",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::NoSearchProvider(_) => "no_search_provider",
            Self::WorkerSpawnFailed(_) => "worker_spawn_failed",
            Self::WorkerExitedNonZero { .. } => "worker_exited_non_zero",
            Self::TaskUnderspecified(_) => "task_underspecified",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the whole request (connect + body).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: None,
            max_bytes: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// CSS selector narrowing extraction to one element (ignored unless it matches exactly once).
    pub selector: Option<String>,
    /// Character budget for `content` (default: [`DEFAULT_MAX_LENGTH`]).
    pub max_length: Option<usize>,
    /// Keep hyperlinks as `[text](url)` instead of bare anchor text.
    pub include_links: bool,
}

pub const DEFAULT_MAX_LENGTH: usize = 15_000;

/// Appended to `content` when the character budget cut it short.
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated]";

impl ExtractOptions {
    pub fn max_length(&self) -> usize {
        self.max_length.unwrap_or(DEFAULT_MAX_LENGTH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub byline: String,
    /// Character count before the budget was applied.
    pub original_length: usize,
    pub source_url: String,
    /// Set when `content` was cut to the budget and carries [`TRUNCATION_MARKER`].
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Pre-fetched page text, for providers that return it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One-line human description (shown in scout instructions and `doctor`).
    fn describe(&self) -> String;

    /// Must be cheap and side-effect free; callers evaluate it on every lookup.
    fn check_availability(&self) -> bool;

    /// True only for the "no search capability" provider.
    fn is_fallback(&self) -> bool {
        false
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// A research request handed to the scout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutTask {
    pub task_description: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
}

impl ScoutTask {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            ..Self::default()
        }
    }

    /// Non-blank URLs, in caller order.
    pub fn urls(&self) -> Vec<&str> {
        self.urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect()
    }

    /// The query, if non-blank.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.urls().is_empty() && self.query().is_none() {
            return Err(Error::TaskUnderspecified(
                "provide at least one url or a search query".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_total: f64,
    pub turn_count: u32,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutRunResult {
    pub status: RunStatus,
    /// `None` when the worker never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    pub final_output_text: String,
    pub usage: Usage,
    pub stderr_text: String,
}

impl ScoutRunResult {
    pub fn cancelled_before_spawn() -> Self {
        Self {
            status: RunStatus::Cancelled,
            exit_code: None,
            final_output_text: String::new(),
            usage: Usage::default(),
            stderr_text: String::new(),
        }
    }

    /// Diagnostic text for a failed run: stderr, else the last partial output.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr_text.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let out = self.final_output_text.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        "(no output)".to_string()
    }

    pub fn into_result(self) -> Result<Self> {
        match self.status {
            RunStatus::Completed => Ok(self),
            RunStatus::Cancelled => Err(Error::Cancelled),
            RunStatus::Failed => Err(Error::WorkerExitedNonZero {
                code: self.exit_code,
                message: self.failure_message(),
            }),
        }
    }
}
