//! Environment-driven configuration.
//!
//! Every knob has a default; the CLI can override individual fields after
//! [`ScoutConfig::from_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKER_BIN: &str = "pi";

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Directory name (under `$HOME` and the project root) holding provider definitions.
pub const PROVIDER_DIR: &str = ".webscout/providers";

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ScoutConfig {
    /// Executable launched as the scout worker.
    pub worker_bin: String,
    /// Extension the worker loads to get the fetch/search tools.
    pub extension_path: Option<PathBuf>,
    /// Forces the scout model for every run (a per-task override still wins).
    pub model_override: Option<String>,
    /// Provider family of the caller's active model, used to pick a cheap scout model.
    pub active_provider: Option<String>,
    pub kill_grace: Duration,
    pub fetch_timeout: Duration,
    pub max_bytes: u64,
    /// Directories scanned for provider definition files, user-level first.
    pub provider_dirs: Vec<PathBuf>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            worker_bin: DEFAULT_WORKER_BIN.to_string(),
            extension_path: None,
            model_override: None,
            active_provider: None,
            kill_grace: DEFAULT_KILL_GRACE,
            fetch_timeout: crate::DEFAULT_FETCH_TIMEOUT,
            max_bytes: crate::DEFAULT_MAX_BYTES,
            provider_dirs: Vec::new(),
        }
    }
}

impl ScoutConfig {
    /// Read `WEBSCOUT_*` variables; `project_root` anchors the project-level provider dir.
    pub fn from_env(project_root: &Path) -> Self {
        let d = Self::default();
        Self {
            worker_bin: env("WEBSCOUT_WORKER_BIN").unwrap_or(d.worker_bin),
            extension_path: env("WEBSCOUT_EXTENSION_PATH").map(PathBuf::from),
            model_override: env("WEBSCOUT_MODEL"),
            active_provider: env("WEBSCOUT_ACTIVE_PROVIDER"),
            kill_grace: Duration::from_millis(
                env_u64("WEBSCOUT_KILL_GRACE_MS", d.kill_grace.as_millis() as u64)
                    .clamp(100, 60_000),
            ),
            fetch_timeout: Duration::from_millis(
                env_u64(
                    "WEBSCOUT_FETCH_TIMEOUT_MS",
                    d.fetch_timeout.as_millis() as u64,
                )
                .clamp(1_000, 300_000),
            ),
            max_bytes: env_u64("WEBSCOUT_MAX_BYTES", d.max_bytes).clamp(1_000, 50_000_000),
            provider_dirs: default_provider_dirs(project_root),
        }
    }
}

pub fn default_provider_dirs(project_root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = dirs::home_dir() {
        out.push(home.join(PROVIDER_DIR));
    }
    let project = project_root.join(PROVIDER_DIR);
    if !out.contains(&project) {
        out.push(project);
    }
    out
}
