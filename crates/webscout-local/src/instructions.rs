//! What the scout may do, which model it runs on, and what it is told.

use webscout_core::{Error, Result, ScoutTask};

use crate::registry::ProviderRegistry;

pub const TOOL_WEB_FETCH: &str = "web_fetch";
pub const TOOL_WEB_SEARCH: &str = "web_search";

pub const DEFAULT_SCOUT_MODEL: &str = "claude-haiku-4-5";

/// Cheap model per provider family of the caller's active model.
const CHEAP_MODELS: &[(&str, &str)] = &[
    ("anthropic", "claude-haiku-4-5"),
    ("openai", "gpt-5-mini"),
    ("google", "gemini-2.5-flash"),
    ("openrouter", "anthropic/claude-haiku-4.5"),
    ("groq", "llama-3.1-8b-instant"),
    ("xai", "grok-3-mini"),
    ("mistral", "mistral-small-latest"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityGrant {
    /// Allow-list passed to the worker, always starting with `web_fetch`.
    pub tools: Vec<String>,
    /// Provider the scout should search with, when search is granted.
    pub search_provider: Option<String>,
}

impl CapabilityGrant {
    pub fn can_search(&self) -> bool {
        self.search_provider.is_some()
    }
}

/// Fetch is always granted. Search is granted iff the task carries a query and
/// a real (non-fallback) provider resolves.
pub fn grant_capabilities(task: &ScoutTask, registry: &ProviderRegistry) -> Result<CapabilityGrant> {
    let mut tools = vec![TOOL_WEB_FETCH.to_string()];
    let Some(query) = task.query() else {
        return Ok(CapabilityGrant {
            tools,
            search_provider: None,
        });
    };

    let provider = registry.resolve(task.provider_name.as_deref())?;
    if provider.is_fallback() {
        if task.urls().is_empty() {
            return Err(Error::NoSearchProvider(query.to_string()));
        }
        tracing::info!("no search provider available; scout will read the given urls only");
        return Ok(CapabilityGrant {
            tools,
            search_provider: None,
        });
    }
    tools.push(TOOL_WEB_SEARCH.to_string());
    Ok(CapabilityGrant {
        tools,
        search_provider: Some(provider.name().to_string()),
    })
}

/// Override, then the cheap model for the active provider family, then the default.
pub fn select_model(model_override: Option<&str>, active_provider: Option<&str>) -> String {
    if let Some(m) = model_override.map(str::trim).filter(|m| !m.is_empty()) {
        return m.to_string();
    }
    if let Some(family) = active_provider.map(|p| p.trim().to_ascii_lowercase()) {
        if let Some((_, m)) = CHEAP_MODELS.iter().find(|(f, _)| *f == family) {
            return m.to_string();
        }
    }
    DEFAULT_SCOUT_MODEL.to_string()
}

/// System instructions: a numbered workflow matching the granted tools.
pub fn build_system_prompt(task: &ScoutTask, grant: &CapabilityGrant) -> String {
    let mut steps: Vec<String> = Vec::new();
    if let (Some(provider), Some(query)) = (grant.search_provider.as_deref(), task.query()) {
        steps.push(format!(
            "Search with `{TOOL_WEB_SEARCH}` (provider: {provider}) for: {query}. Pick the few most relevant results."
        ));
    }
    let urls = task.urls();
    if !urls.is_empty() {
        steps.push(format!(
            "Read each of these pages with `{TOOL_WEB_FETCH}`: {}.",
            urls.join(", ")
        ));
    } else {
        steps.push(format!(
            "Read the most promising result pages with `{TOOL_WEB_FETCH}`."
        ));
    }
    steps.push(
        "Use a `selector` when a page has an obvious main pane, and stop fetching once you can answer."
            .to_string(),
    );
    steps.push(
        "Answer the task concisely. Cite the URL for each fact. Say plainly what you could not find."
            .to_string(),
    );

    let mut out = String::from(
        "You are a web research scout. Your final message is the only thing the requester sees; \
         raw page content never reaches them.\n\n",
    );
    out.push_str(&format!("Available tools: {}.\n\n", grant.tools.join(", ")));
    if !grant.can_search() {
        out.push_str("You cannot search the web. Work only from the pages listed below.\n\n");
    }
    out.push_str("Workflow:\n");
    for (i, s) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, s));
    }
    out
}

/// The positional task argument handed to the worker.
pub fn build_task_text(task: &ScoutTask) -> String {
    let mut out = task.task_description.trim().to_string();
    let urls = task.urls();
    if !urls.is_empty() {
        out.push_str("\n\nURLs:\n");
        for u in urls {
            out.push_str("- ");
            out.push_str(u);
            out.push('\n');
        }
    }
    if let Some(q) = task.query() {
        out.push_str(&format!("\nSearch query: {q}\n"));
    }
    out.trim_end().to_string()
}
