use std::collections::BTreeMap;
use std::time::Duration;
use webscout_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};

pub mod config;
pub mod discovery;
pub mod extract;
pub mod instructions;
pub mod protocol;
pub mod readability;
pub mod registry;
pub mod render;
pub mod runner;
pub mod scout;
pub mod search;
pub mod shellout;

/// Browser-like identification; many sites serve stripped or blocked pages to unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_BYTES: u64 = 5_000_000;

/// Shared HTTP client settings for fetches and network-backed search providers.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::FetchFailed(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl LocalFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            max_bytes,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_BYTES)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let mut timings_ms = BTreeMap::new();
        let t_req = std::time::Instant::now();
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let mut rb = self.client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        let resp = rb.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::FetchFailed(format!("timed out fetching {}", req.url))
            } else {
                Error::FetchFailed(e.to_string())
            }
        })?;
        let final_url = resp.url().to_string();
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::FetchFailed(format!("HTTP {status} for {final_url}")));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let max_bytes = req.max_bytes.unwrap_or(self.max_bytes) as usize;
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::FetchFailed(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        timings_ms.insert("network_fetch".to_string(), t_req.elapsed().as_millis());
        tracing::debug!(
            url = %req.url,
            status = status.as_u16(),
            bytes = bytes.len(),
            truncated,
            "fetched"
        );
        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status: status.as_u16(),
            content_type,
            bytes,
            truncated,
            timings_ms,
        })
    }
}
