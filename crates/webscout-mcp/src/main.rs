#![recursion_limit = "256"]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use webscout_mcp::facade::{FetchArgs, ResearchArgs, SearchArgs, Tools};

#[derive(Parser, Debug)]
#[command(name = "webscout")]
#[command(about = "Delegated web research: fetch, search and scout runs (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a URL and print its readable content.
    Fetch(FetchCmd),
    /// Search the web with a registered provider.
    Search(SearchCmd),
    /// Delegate a research task to a scout worker process.
    Research(ResearchCmd),
    /// Run as an MCP stdio server (for MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct FetchCmd {
    url: String,
    /// CSS selector for the content root (used only when it matches exactly one element).
    #[arg(long)]
    selector: Option<String>,
    /// Max characters of content (default: 15000).
    #[arg(long)]
    max_length: Option<usize>,
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    include_links: bool,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    /// Provider name (default: first available).
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    max_results: Option<usize>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// What the scout should find out.
    task: String,
    /// Page to read (repeatable).
    #[arg(long)]
    url: Vec<String>,
    /// Search query for the scout (needs a search provider unless urls are given).
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    /// Model id for the worker (overrides WEBSCOUT_MODEL).
    #[arg(long)]
    model: Option<String>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[cfg(feature = "stdio")]
mod mcp {
    use rmcp::{
        handler::server::router::tool::ToolRouter as RmcpToolRouter,
        handler::server::wrapper::Parameters,
        model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
        tool, tool_handler, tool_router,
        transport::stdio,
        ErrorData as McpError, ServiceExt,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use webscout_mcp::facade::{FetchArgs, ResearchArgs, SearchArgs, Tools};

    fn tool_result(payload: serde_json::Value) -> CallToolResult {
        let mut r = CallToolResult::structured(payload.clone());
        // Hosts that ignore structured content still get the JSON as text.
        r.content = vec![Content::text(payload.to_string())];
        r
    }

    #[derive(Clone)]
    pub(crate) struct WebscoutMcp {
        tool_router: RmcpToolRouter<Self>,
        tools: Arc<Tools>,
        /// Cancelled when the client goes away; in-flight scout runs hang off it.
        shutdown: CancellationToken,
    }

    #[tool_router]
    impl WebscoutMcp {
        pub(crate) fn new(tools: Tools, shutdown: CancellationToken) -> Self {
            Self {
                tool_router: Self::tool_router(),
                tools: Arc::new(tools),
                shutdown,
            }
        }

        #[tool(
            description = "Fetch a URL and return its main content as markdown (nav/ads/boilerplate removed; bounded by max_length)"
        )]
        async fn web_fetch(
            &self,
            params: Parameters<Option<FetchArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            Ok(tool_result(self.tools.web_fetch(args).await))
        }

        #[tool(description = "Search the web with a registered provider (title, url, snippet per result)")]
        async fn web_search(
            &self,
            params: Parameters<Option<SearchArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            Ok(tool_result(self.tools.web_search(args).await))
        }

        #[tool(
            description = "Delegate a research task to a cheap scout model that reads the given urls (and searches, when a query and provider are available). Returns only the scout's final answer plus usage."
        )]
        async fn web_research(
            &self,
            params: Parameters<Option<ResearchArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            let cancel = self.shutdown.child_token();
            let payload = self
                .tools
                .web_research(args, &cancel, |u| {
                    tracing::info!(
                        turn = u.turn,
                        input_tokens = u.usage.input_tokens,
                        output_tokens = u.usage.output_tokens,
                        cost = u.usage.cost_total,
                        "scout turn"
                    );
                })
                .await;
            Ok(tool_result(payload))
        }
    }

    #[tool_handler]
    impl rmcp::ServerHandler for WebscoutMcp {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                instructions: Some(
                    "Web research tools. web_research delegates reading to a scout process and returns only its answer; outputs are JSON and schema-versioned."
                        .to_string(),
                ),
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                ..Default::default()
            }
        }
    }

    pub(crate) async fn serve_stdio(tools: Tools) -> Result<(), McpError> {
        let shutdown = CancellationToken::new();
        let svc = WebscoutMcp::new(tools, shutdown.clone());
        let running = svc
            .serve(stdio())
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        // Keep the stdio server alive until the client closes.
        let waited = running.waiting().await;
        shutdown.cancel();
        waited.map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(())
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries payloads (and the MCP stream); logs go to stderr.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn is_text(output: &str) -> bool {
    output.eq_ignore_ascii_case("text")
}

/// Print a tool payload and turn `ok: false` into a non-zero exit.
fn emit(
    payload: &serde_json::Value,
    output: &str,
    text: impl FnOnce(&serde_json::Value) -> String,
) -> Result<()> {
    let ok = payload["ok"].as_bool() == Some(true);
    if !is_text(output) {
        println!("{payload}");
    } else if ok {
        println!("{}", text(payload));
    }
    if ok {
        return Ok(());
    }
    let err = &payload["error"];
    anyhow::bail!(
        "{}: {} ({})",
        err["code"].as_str().unwrap_or("unexpected_error"),
        err["message"].as_str().unwrap_or(""),
        err["hint"].as_str().unwrap_or("")
    )
}

fn fetch_text(v: &serde_json::Value) -> String {
    let title = v["title"].as_str().unwrap_or("");
    let content = v["content"].as_str().unwrap_or("");
    if title.is_empty() {
        content.to_string()
    } else {
        format!("# {title}\n\n{content}")
    }
}

fn search_text(v: &serde_json::Value) -> String {
    let mut out = String::new();
    for (i, r) in v["results"].as_array().into_iter().flatten().enumerate() {
        out.push_str(&format!(
            "{}. {}\n   {}\n",
            i + 1,
            r["title"].as_str().unwrap_or(""),
            r["url"].as_str().unwrap_or("")
        ));
        let snippet = r["snippet"].as_str().unwrap_or("");
        if !snippet.is_empty() {
            out.push_str(&format!("   {snippet}\n"));
        }
    }
    out.trim_end().to_string()
}

fn doctor_text(v: &serde_json::Value) -> String {
    let mut out = format!(
        "webscout {}\nworker: {} ({})\n",
        v["version"].as_str().unwrap_or(""),
        v["worker"]["bin"].as_str().unwrap_or(""),
        if v["worker"]["found"].as_bool() == Some(true) {
            "found"
        } else {
            "missing"
        }
    );
    out.push_str("providers:\n");
    for p in v["providers"].as_array().into_iter().flatten() {
        out.push_str(&format!(
            "  {} [{}] {}\n",
            p["name"].as_str().unwrap_or(""),
            if p["available"].as_bool() == Some(true) {
                "available"
            } else {
                "unavailable"
            },
            p["description"].as_str().unwrap_or("")
        ));
    }
    for c in v["checks"].as_array().into_iter().flatten() {
        out.push_str(&format!(
            "check {}: {} ({})\n",
            c["name"].as_str().unwrap_or(""),
            if c["ok"].as_bool() == Some(true) { "ok" } else { "FAIL" },
            c["detail"].as_str().unwrap_or("")
        ));
    }
    out.trim_end().to_string()
}

fn tools_from_cwd() -> Result<Tools> {
    let cwd = std::env::current_dir()?;
    Ok(Tools::from_env(&cwd)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio(tools_from_cwd()?)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Fetch(args) => {
            let payload = tools_from_cwd()?
                .web_fetch(FetchArgs {
                    url: Some(args.url),
                    selector: args.selector,
                    max_length: args.max_length,
                    include_links: Some(args.include_links),
                })
                .await;
            emit(&payload, &args.output, fetch_text)?;
        }
        Commands::Search(args) => {
            let payload = tools_from_cwd()?
                .web_search(SearchArgs {
                    query: Some(args.query),
                    provider: args.provider,
                    max_results: args.max_results,
                })
                .await;
            emit(&payload, &args.output, search_text)?;
        }
        Commands::Research(args) => {
            let tools = tools_from_cwd()?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted; stopping scout");
                    on_interrupt.cancel();
                }
            });
            let payload = tools
                .web_research(
                    ResearchArgs {
                        task: Some(args.task),
                        urls: Some(args.url),
                        query: args.query,
                        provider: args.provider,
                        model: args.model,
                    },
                    &cancel,
                    |u| {
                        tracing::info!(
                            turn = u.turn,
                            input_tokens = u.usage.input_tokens,
                            output_tokens = u.usage.output_tokens,
                            cost = u.usage.cost_total,
                            "scout turn"
                        );
                    },
                )
                .await;
            emit(&payload, &args.output, |v| {
                v["output"].as_str().unwrap_or("").to_string()
            })?;
        }
        Commands::Doctor(args) => {
            let payload = tools_from_cwd()?.doctor();
            if is_text(&args.output) {
                println!("{}", doctor_text(&payload));
            } else {
                println!("{payload}");
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": webscout_mcp::envelope::SCHEMA_VERSION,
                "kind": "version",
                "ok": true,
                "name": "webscout",
                "version": env!("CARGO_PKG_VERSION"),
            });
            if is_text(&args.output) {
                println!("webscout {}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("{v}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_research_flags() {
        let cli = Cli::try_parse_from([
            "webscout",
            "research",
            "what changed?",
            "--url",
            "https://a.example",
            "--url",
            "https://b.example",
            "--query",
            "changelog",
        ])
        .unwrap();
        let Commands::Research(r) = cli.command else {
            panic!("expected research");
        };
        assert_eq!(r.url.len(), 2);
        assert_eq!(r.query.as_deref(), Some("changelog"));
        assert_eq!(r.output, "json");
    }

    #[test]
    fn emit_fails_on_error_payload() {
        let v = serde_json::json!({
            "ok": false,
            "error": {"code": "invalid_url", "message": "bad", "hint": "fix it", "retryable": false}
        });
        let err = emit(&v, "text", |_| String::new()).unwrap_err();
        assert_eq!(err.to_string(), "invalid_url: bad (fix it)");
        assert!(emit(&serde_json::json!({"ok": true}), "text", |_| "x".into()).is_ok());
    }

    #[test]
    fn search_text_numbers_results() {
        let v = serde_json::json!({
            "ok": true,
            "results": [
                {"title": "A", "url": "https://a.example", "snippet": "first"},
                {"title": "B", "url": "https://b.example", "snippet": ""}
            ]
        });
        assert_eq!(
            search_text(&v),
            "1. A\n   https://a.example\n   first\n2. B\n   https://b.example"
        );
    }
}
