use std::path::Path;
use tokio_util::sync::CancellationToken;
use webscout_core::{Result, ScoutRunResult, ScoutTask};

use crate::config::ScoutConfig;
use crate::instructions::{build_system_prompt, build_task_text, grant_capabilities, select_model};
use crate::registry::ProviderRegistry;
use crate::runner::{ScoutRunRequest, ScoutRunner, TurnUpdate};

/// Everything decided before the worker starts.
#[derive(Debug, Clone)]
pub struct ScoutPlan {
    pub request: ScoutRunRequest,
    pub search_provider: Option<String>,
}

/// Validate the task and turn it into a run request. Nothing is spawned.
pub fn plan(
    task: &ScoutTask,
    registry: &ProviderRegistry,
    cfg: &ScoutConfig,
    cwd: &Path,
) -> Result<ScoutPlan> {
    task.validate()?;
    let grant = grant_capabilities(task, registry)?;
    let model = select_model(
        task.model_override
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or(cfg.model_override.as_deref()),
        cfg.active_provider.as_deref(),
    );
    tracing::debug!(
        model = %model,
        tools = %grant.tools.join(","),
        urls = task.urls().len(),
        has_query = task.query().is_some(),
        "scout plan"
    );
    Ok(ScoutPlan {
        request: ScoutRunRequest {
            cwd: cwd.to_path_buf(),
            task_text: build_task_text(task),
            system_prompt: build_system_prompt(task, &grant),
            model,
            tools: grant.tools.clone(),
            extension_path: cfg.extension_path.clone(),
        },
        search_provider: grant.search_provider,
    })
}

/// Plan and run a research task end to end.
pub async fn research(
    task: &ScoutTask,
    registry: &ProviderRegistry,
    cfg: &ScoutConfig,
    cwd: &Path,
    cancel: &CancellationToken,
    on_update: impl FnMut(&TurnUpdate),
) -> Result<ScoutRunResult> {
    let plan = plan(task, registry, cfg, cwd)?;
    ScoutRunner::from_config(cfg)
        .run(&plan.request, cancel, on_update)
        .await
}
