//! Provider definition files.
//!
//! Each `*.json` file in a provider directory declares one HTTP search backend
//! that answers with JSON. Unreadable or malformed files are skipped.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use webscout_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};

use crate::config::env;
use crate::registry::ProviderRegistry;
use crate::search::{strip_inline_html, timeout_ms_from_query};

fn default_query_param() -> String {
    "q".to_string()
}

fn default_results_pointer() -> String {
    "/results".to_string()
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_url_field() -> String {
    "url".to_string()
}

fn default_snippet_field() -> String {
    "snippet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpJsonProviderDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub endpoint: String,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    #[serde(default)]
    pub count_param: Option<String>,
    /// Fixed query parameters sent with every request (e.g. `format=json`).
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    /// Environment variable holding the credential; the provider is unavailable while it is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key_header: Option<String>,
    /// Prepended to the key in the header value (e.g. `"Bearer "`).
    #[serde(default)]
    pub api_key_prefix: Option<String>,
    /// JSON pointer (RFC 6901) to the result array.
    #[serde(default = "default_results_pointer")]
    pub results_pointer: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default = "default_url_field")]
    pub url_field: String,
    #[serde(default = "default_snippet_field")]
    pub snippet_field: String,
    #[serde(default)]
    pub content_field: Option<String>,
}

impl HttpJsonProviderDef {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Io(e.to_string()))?;
        let def: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        def.validate()?;
        Ok(def)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Io("provider definition has an empty name".to_string()));
        }
        let url = url::Url::parse(&self.endpoint).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        if !self.results_pointer.is_empty() && !self.results_pointer.starts_with('/') {
            return Err(Error::Io(format!(
                "results_pointer must be a JSON pointer: {}",
                self.results_pointer
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpJsonProvider {
    def: HttpJsonProviderDef,
    client: reqwest::Client,
}

impl HttpJsonProvider {
    pub fn new(def: HttpJsonProviderDef, client: reqwest::Client) -> Self {
        Self { def, client }
    }

    fn api_key(&self) -> Option<String> {
        self.def.api_key_env.as_deref().and_then(env)
    }
}

/// `field` is a key, or a JSON pointer when it starts with `/`.
fn field_str(item: &serde_json::Value, field: &str) -> Option<String> {
    let v = if field.starts_with('/') {
        item.pointer(field)
    } else {
        item.get(field)
    }?;
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn map_results(def: &HttpJsonProviderDef, body: &serde_json::Value) -> Result<Vec<SearchResult>> {
    let items = body
        .pointer(&def.results_pointer)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            Error::Search(format!(
                "{}: no result array at {}",
                def.name, def.results_pointer
            ))
        })?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let url = field_str(item, &def.url_field)?;
            Some(SearchResult {
                title: strip_inline_html(&field_str(item, &def.title_field).unwrap_or_default()),
                snippet: strip_inline_html(&field_str(item, &def.snippet_field).unwrap_or_default()),
                content: def
                    .content_field
                    .as_deref()
                    .and_then(|f| field_str(item, f)),
                url,
            })
        })
        .collect())
}

#[async_trait::async_trait]
impl SearchProvider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn describe(&self) -> String {
        self.def
            .description
            .clone()
            .unwrap_or_else(|| format!("HTTP JSON search at {}", self.def.endpoint))
    }

    fn check_availability(&self) -> bool {
        self.def.api_key_env.is_none() || self.api_key().is_some()
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let mut req = self
            .client
            .get(&self.def.endpoint)
            .query(&[(self.def.query_param.as_str(), q.query.as_str())])
            .query(&self.def.extra_params);
        if let (Some(param), Some(n)) = (self.def.count_param.as_deref(), q.max_results) {
            req = req.query(&[(param, n.to_string())]);
        }
        if let Some(env_key) = self.def.api_key_env.as_deref() {
            let key = self.api_key().ok_or_else(|| {
                Error::ProviderUnavailable(format!("{}: missing {env_key}", self.def.name))
            })?;
            let header = self.def.api_key_header.as_deref().unwrap_or("Authorization");
            let prefix = self.def.api_key_prefix.as_deref().unwrap_or("");
            req = req.header(header, format!("{prefix}{key}"));
        }

        let resp = req
            .timeout(Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("{} search HTTP {status}", self.def.name)));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let mut results = map_results(&self.def, &body)?;
        if let Some(n) = q.max_results {
            results.truncate(n);
        }

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
        Ok(SearchResponse {
            results,
            provider: self.def.name.clone(),
            timings_ms,
        })
    }
}

fn definition_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = rd
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
        .collect();
    files.sort();
    files
}

/// Load every valid definition under `dirs`, in directory order then file name order.
pub fn discover_providers(dirs: &[PathBuf], client: &reqwest::Client) -> Vec<Arc<dyn SearchProvider>> {
    let mut out: Vec<Arc<dyn SearchProvider>> = Vec::new();
    for dir in dirs {
        for path in definition_files(dir) {
            match HttpJsonProviderDef::from_file(&path) {
                Ok(def) => {
                    tracing::debug!(path = %path.display(), provider = %def.name, "discovered provider");
                    out.push(Arc::new(HttpJsonProvider::new(def, client.clone())));
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping provider file");
                }
            }
        }
    }
    out
}

/// Discover and register; later directories override earlier ones on name clashes.
pub fn register_discovered(
    registry: &ProviderRegistry,
    dirs: &[PathBuf],
    client: &reqwest::Client,
) -> usize {
    let found = discover_providers(dirs, client);
    let n = found.len();
    for p in found {
        registry.register(p);
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::HeaderMap, routing::get, Json, Router};
    use std::collections::HashMap;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn discovery_skips_bad_files() {
        let user = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        write(
            user.path(),
            "a.json",
            r#"{"name":"alpha","endpoint":"https://alpha.example/search"}"#,
        );
        write(user.path(), "broken.json", "{ not json");
        write(user.path(), "notes.txt", "ignored");
        write(
            user.path(),
            "bad-scheme.json",
            r#"{"name":"ftp","endpoint":"ftp://example.com"}"#,
        );
        write(
            project.path(),
            "b.json",
            r#"{"name":"beta","endpoint":"http://127.0.0.1:9/s","api_key_env":"WEBSCOUT_TEST_UNSET_KEY_93"}"#,
        );

        let dirs = vec![
            user.path().to_path_buf(),
            project.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
        ];
        let found = discover_providers(&dirs, &reqwest::Client::new());
        let names: Vec<&str> = found.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(found[0].check_availability());
        assert!(!found[1].check_availability(), "credential env var is unset");
    }

    #[test]
    fn registered_discoveries_land_in_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "x.json",
            r#"{"name":"xsearch","endpoint":"https://x.example/api"}"#,
        );
        let registry = ProviderRegistry::new();
        let n = register_discovered(&registry, &[dir.path().to_path_buf()], &reqwest::Client::new());
        assert_eq!(n, 1);
        assert_eq!(registry.get_default().name(), "xsearch");
    }

    #[test]
    fn maps_nested_fields_and_skips_items_without_url() {
        let def: HttpJsonProviderDef = serde_json::from_str(
            r#"{"name":"n","endpoint":"https://n.example","results_pointer":"/data/items",
                "title_field":"/meta/title","snippet_field":"summary","content_field":"body"}"#,
        )
        .unwrap();
        let body = serde_json::json!({"data": {"items": [
            {"url": "https://one.example", "meta": {"title": "One"}, "summary": "<b>first</b>", "body": "full text"},
            {"meta": {"title": "no url"}}
        ]}});
        let rs = map_results(&def, &body).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].title, "One");
        assert_eq!(rs[0].snippet, "first");
        assert_eq!(rs[0].content.as_deref(), Some("full text"));

        let err = map_results(&def, &serde_json::json!({"other": 1})).unwrap_err();
        assert_eq!(err.kind(), "search_failed");
    }

    #[tokio::test]
    async fn http_json_provider_queries_endpoint() {
        let app = Router::new().route(
            "/search",
            get(
                |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                    let auth = headers
                        .get("x-api-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    Json(serde_json::json!({"results": [
                        {"url": "https://r.example", "title": params.get("query").cloned().unwrap_or_default(),
                         "snippet": format!("{}|{}|{}", auth, params.get("format").cloned().unwrap_or_default(),
                                            params.get("n").cloned().unwrap_or_default())}
                    ]}))
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        std::env::set_var("WEBSCOUT_TEST_HTTP_JSON_KEY", "k1");
        let def: HttpJsonProviderDef = serde_json::from_value(serde_json::json!({
            "name": "local",
            "endpoint": format!("http://{addr}/search"),
            "query_param": "query",
            "count_param": "n",
            "extra_params": {"format": "json"},
            "api_key_env": "WEBSCOUT_TEST_HTTP_JSON_KEY",
            "api_key_header": "x-api-key",
        }))
        .unwrap();
        let p = HttpJsonProvider::new(def, reqwest::Client::new());
        let mut q = SearchQuery::new("hello");
        q.max_results = Some(3);
        let res = p.search(&q).await.unwrap();
        std::env::remove_var("WEBSCOUT_TEST_HTTP_JSON_KEY");

        assert_eq!(res.provider, "local");
        assert_eq!(res.results[0].title, "hello");
        assert_eq!(res.results[0].snippet, "k1|json|3");
    }
}
