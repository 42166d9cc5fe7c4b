//! Tool surface shared by the CLI and the MCP server.
//!
//! Every entry point returns a JSON payload, never an `Err`: failures become
//! `{ok: false, error: {code, message, hint, retryable}}` and every payload
//! carries the envelope fields (`schema_version`, `kind`, `elapsed_ms`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use webscout_core::{
    Error, ExtractOptions, FetchBackend, FetchRequest, RunStatus, ScoutTask, SearchQuery,
};
use webscout_local::config::ScoutConfig;
use webscout_local::registry::ProviderRegistry;
use webscout_local::runner::TurnUpdate;
use webscout_local::{discovery, extract, scout, shellout, LocalFetcher};

use crate::envelope::{add_envelope_fields, error_obj, error_payload, ErrorCode};

pub const DEFAULT_SEARCH_RESULTS: usize = 5;
pub const MAX_SEARCH_RESULTS: usize = 20;
const MAX_LENGTH_CAP: usize = 200_000;

#[derive(Debug, Deserialize, Default)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct FetchArgs {
    /// Absolute http(s) URL to read.
    #[serde(default)]
    pub url: Option<String>,
    /// CSS selector for the content root; used only when it matches exactly one element.
    #[serde(default)]
    pub selector: Option<String>,
    /// Max characters of returned content (default: 15000).
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Keep hyperlinks as markdown links (default: false).
    #[serde(default)]
    pub include_links: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct SearchArgs {
    #[serde(default)]
    pub query: Option<String>,
    /// Registered provider name (default: first available).
    #[serde(default)]
    pub provider: Option<String>,
    /// Default 5, max 20.
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct ResearchArgs {
    /// What the scout should find out.
    #[serde(default)]
    pub task: Option<String>,
    /// Pages the scout should read.
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    /// Search query; requires an available search provider unless urls are given.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    /// Model id for the scout worker.
    #[serde(default)]
    pub model: Option<String>,
}

/// Shared state behind the tools: one fetcher, one registry, one config.
#[derive(Debug, Clone)]
pub struct Tools {
    fetcher: LocalFetcher,
    registry: ProviderRegistry,
    cfg: ScoutConfig,
    cwd: PathBuf,
}

impl Tools {
    pub fn new(fetcher: LocalFetcher, registry: ProviderRegistry, cfg: ScoutConfig, cwd: PathBuf) -> Self {
        Self {
            fetcher,
            registry,
            cfg,
            cwd,
        }
    }

    /// Config from `WEBSCOUT_*`, built-in providers plus any discovered definition files.
    pub fn from_env(cwd: &Path) -> webscout_core::Result<Self> {
        let cfg = ScoutConfig::from_env(cwd);
        let fetcher = LocalFetcher::new(cfg.fetch_timeout, cfg.max_bytes)?;
        let registry = ProviderRegistry::with_builtins(fetcher.client().clone());
        let n = discovery::register_discovered(&registry, &cfg.provider_dirs, fetcher.client());
        tracing::info!(
            discovered = n,
            providers = %registry.names().join(","),
            "webscout tools ready"
        );
        Ok(Self::new(fetcher, registry, cfg, cwd.to_path_buf()))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.cfg
    }

    pub async fn web_fetch(&self, args: FetchArgs) -> serde_json::Value {
        let t0 = Instant::now();
        let url = args.url.unwrap_or_default().trim().to_string();
        let mut payload = if url.is_empty() {
            invalid_params("url must be non-empty", "Pass an absolute URL like https://example.com.")
        } else {
            let opts = ExtractOptions {
                selector: args.selector.filter(|s| !s.trim().is_empty()),
                max_length: args.max_length.map(|n| n.clamp(1, MAX_LENGTH_CAP)),
                include_links: args.include_links.unwrap_or(false),
            };
            match self.fetch_and_extract(&url, opts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "web_fetch failed");
                    let mut p = error_payload(&e);
                    p["url"] = serde_json::json!(url);
                    p
                }
            }
        };
        add_envelope_fields(&mut payload, "web_fetch", t0.elapsed().as_millis());
        payload
    }

    async fn fetch_and_extract(
        &self,
        url: &str,
        opts: ExtractOptions,
    ) -> webscout_core::Result<serde_json::Value> {
        let resp = self.fetcher.fetch(&FetchRequest::new(url)).await?;
        let final_url = resp.final_url.clone();
        let source_url = final_url.clone();
        // HTML parsing is CPU-bound and the parsed tree is not Send.
        let article = tokio::task::spawn_blocking(move || {
            extract::extract(&resp.bytes, resp.content_type.as_deref(), &source_url, &opts)
        })
        .await
        .map_err(|e| Error::FetchFailed(format!("extraction task failed: {e}")))??;

        Ok(serde_json::json!({
            "ok": true,
            "url": url,
            "final_url": final_url,
            "title": article.title,
            "byline": article.byline,
            "content": article.content,
            "original_length": article.original_length,
            "truncated": article.truncated,
        }))
    }

    pub async fn web_search(&self, args: SearchArgs) -> serde_json::Value {
        let t0 = Instant::now();
        let query = args.query.unwrap_or_default().trim().to_string();
        let mut payload = if query.is_empty() {
            invalid_params("query must be non-empty", "Pass a search query string.")
        } else {
            let max_results = args
                .max_results
                .unwrap_or(DEFAULT_SEARCH_RESULTS)
                .clamp(1, MAX_SEARCH_RESULTS);
            match self.search(&query, args.provider.as_deref(), max_results).await {
                Ok(v) => v,
                Err(e) => {
                    let mut p = error_payload(&e);
                    p["query"] = serde_json::json!(query);
                    p
                }
            }
        };
        add_envelope_fields(&mut payload, "web_search", t0.elapsed().as_millis());
        payload
    }

    async fn search(
        &self,
        query: &str,
        provider: Option<&str>,
        max_results: usize,
    ) -> webscout_core::Result<serde_json::Value> {
        // Resolved once; a concurrent re-registration does not affect this call.
        let p = self.registry.resolve(provider)?;
        if p.is_fallback() {
            return Err(Error::NoSearchProvider(query.to_string()));
        }
        let mut q = SearchQuery::new(query);
        q.max_results = Some(max_results);
        let mut resp = p.search(&q).await?;
        resp.results.truncate(max_results);
        Ok(serde_json::json!({
            "ok": true,
            "query": query,
            "provider": resp.provider,
            "results": resp.results,
            "timings_ms": resp.timings_ms,
        }))
    }

    pub async fn web_research(
        &self,
        args: ResearchArgs,
        cancel: &CancellationToken,
        on_update: impl FnMut(&TurnUpdate),
    ) -> serde_json::Value {
        let t0 = Instant::now();
        let task = ScoutTask {
            task_description: args.task.unwrap_or_default(),
            urls: args.urls.unwrap_or_default(),
            query: args.query,
            provider_name: args.provider,
            model_override: args.model,
        };
        let mut payload = if task.task_description.trim().is_empty() {
            invalid_params("task must be non-empty", "Describe what the scout should find out.")
        } else {
            match scout::research(&task, &self.registry, &self.cfg, &self.cwd, cancel, on_update).await
            {
                Ok(r) => {
                    let status = r.status;
                    let exit_code = r.exit_code;
                    let usage = r.usage.clone();
                    let output = r.final_output_text.clone();
                    let mut p = match r.into_result() {
                        Ok(_) => serde_json::json!({ "ok": true }),
                        Err(e) => error_payload(&e),
                    };
                    p["status"] = serde_json::json!(status);
                    p["output"] = serde_json::json!(output);
                    p["usage"] = serde_json::json!(usage);
                    p["exit_code"] = serde_json::json!(exit_code);
                    if status != RunStatus::Completed {
                        tracing::info!(status = ?status, exit_code = ?exit_code, "scout run did not complete");
                    }
                    p
                }
                Err(e) => error_payload(&e),
            }
        };
        add_envelope_fields(&mut payload, "web_research", t0.elapsed().as_millis());
        payload
    }

    /// Configuration and launch diagnostics. Reports presence only, never secret values.
    pub fn doctor(&self) -> serde_json::Value {
        let t0 = Instant::now();
        let worker_path = shellout::resolve_bin(&self.cfg.worker_bin);
        let providers: Vec<serde_json::Value> = self
            .registry
            .get_all()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "description": p.describe(),
                    "available": p.check_availability(),
                    "fallback": p.is_fallback(),
                })
            })
            .collect();
        let default = self.registry.get_default();
        let mut checks = vec![serde_json::json!({
            "name": "worker_binary",
            "ok": worker_path.is_some(),
            "detail": worker_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("`{}` not found on PATH", self.cfg.worker_bin)),
        })];
        checks.push(serde_json::json!({
            "name": "search_provider",
            "ok": self.registry.has_search(),
            "detail": default.name(),
        }));
        if let Some(ext) = &self.cfg.extension_path {
            checks.push(serde_json::json!({
                "name": "extension_path",
                "ok": ext.exists(),
                "detail": ext.display().to_string(),
            }));
        }
        let ok = checks.iter().all(|c| c["ok"].as_bool() == Some(true));

        let mut payload = serde_json::json!({
            "ok": ok,
            "name": "webscout",
            "version": env!("CARGO_PKG_VERSION"),
            "features": { "stdio": cfg!(feature = "stdio") },
            "worker": {
                "bin": self.cfg.worker_bin,
                "found": worker_path.is_some(),
                "extension_path": self.cfg.extension_path.as_ref().map(|p| p.display().to_string()),
                "kill_grace_ms": self.cfg.kill_grace.as_millis(),
            },
            "fetch": {
                "timeout_ms": self.cfg.fetch_timeout.as_millis(),
                "max_bytes": self.cfg.max_bytes,
            },
            "providers": providers,
            "default_provider": default.name(),
            "provider_dirs": self
                .cfg
                .provider_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>(),
            "checks": checks,
        });
        add_envelope_fields(&mut payload, "doctor", t0.elapsed().as_millis());
        payload
    }
}

fn invalid_params(message: &str, hint: &str) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "error": error_obj(ErrorCode::InvalidParams, message, hint),
    })
}
