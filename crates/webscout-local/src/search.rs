use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use webscout_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};

use crate::config::env;

pub const FETCH_ONLY_PROVIDER: &str = "fetch-only";

const BRAVE_DEFAULT_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

pub(crate) fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Same budget as page fetches unless the caller asks otherwise.
    q.timeout_ms
        .unwrap_or(crate::DEFAULT_FETCH_TIMEOUT.as_millis() as u64)
        .clamp(1_000, 60_000)
}

fn brave_api_key_from_env() -> Option<String> {
    env("WEBSCOUT_BRAVE_API_KEY").or_else(|| env("BRAVE_API_KEY"))
}

/// Provider snippets often carry inline highlight markup (`<strong>`); keep the text.
pub(crate) fn strip_inline_html(s: &str) -> String {
    if !s.contains('<') {
        return s.trim().to_string();
    }
    let frag = html_scraper::Html::parse_fragment(s);
    frag.root_element()
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Brave Search web API. The credential is looked up on every call, so a key
/// exported after startup is picked up without re-registering.
#[derive(Debug, Clone)]
pub struct BraveSearchProvider {
    client: reqwest::Client,
}

impl BraveSearchProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint() -> String {
        env("WEBSCOUT_BRAVE_ENDPOINT").unwrap_or_else(|| BRAVE_DEFAULT_ENDPOINT.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &str {
        "brave"
    }

    fn describe(&self) -> String {
        "Brave Search web results (needs BRAVE_API_KEY)".to_string()
    }

    fn check_availability(&self) -> bool {
        brave_api_key_from_env().is_some()
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let api_key = brave_api_key_from_env().ok_or_else(|| {
            Error::ProviderUnavailable("brave: missing BRAVE_API_KEY (or WEBSCOUT_BRAVE_API_KEY)".to_string())
        })?;
        let t0 = Instant::now();

        let mut req = self
            .client
            .get(Self::endpoint())
            .header("X-Subscription-Token", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("q", q.query.as_str())]);
        if let Some(n) = q.max_results {
            req = req.query(&[("count", n.clamp(1, 20).to_string())]);
        }

        let resp = req
            .timeout(Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("brave search HTTP {status}")));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let mut results: Vec<SearchResult> = parsed
            .web
            .and_then(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchResult {
                title: strip_inline_html(r.title.as_deref().unwrap_or("")),
                snippet: strip_inline_html(r.description.as_deref().unwrap_or("")),
                url: r.url,
                content: None,
            })
            .collect();
        if let Some(n) = q.max_results {
            results.truncate(n);
        }

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
        tracing::debug!(provider = "brave", results = results.len(), "search done");

        Ok(SearchResponse {
            results,
            provider: "brave".to_string(),
            timings_ms,
        })
    }
}

/// Always available; answers every query with nothing. Its presence means
/// "operate on explicit URLs only".
#[derive(Debug, Clone, Default)]
pub struct FetchOnlyProvider;

#[async_trait::async_trait]
impl SearchProvider for FetchOnlyProvider {
    fn name(&self) -> &str {
        FETCH_ONLY_PROVIDER
    }

    fn describe(&self) -> String {
        "No search backend; only explicitly supplied URLs are fetched".to_string()
    }

    fn check_availability(&self) -> bool {
        true
    }

    fn is_fallback(&self) -> bool {
        true
    }

    async fn search(&self, _q: &SearchQuery) -> Result<SearchResponse> {
        Ok(SearchResponse {
            results: Vec::new(),
            provider: FETCH_ONLY_PROVIDER.to_string(),
            timings_ms: BTreeMap::new(),
        })
    }
}
