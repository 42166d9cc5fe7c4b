//! Runs one scout task in an isolated worker process.
//!
//! The worker gets its system instructions through a private temp file and
//! reports progress as newline-delimited JSON on stdout. Only assistant turn
//! text and usage numbers leave this module; everything else the worker sees
//! (fetched pages, search noise) stays in the child.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use webscout_core::{Error, Result, RunStatus, ScoutRunResult, Usage};

use crate::config::{ScoutConfig, DEFAULT_KILL_GRACE};
use crate::protocol::{AssistantTurn, LineDecoder, WorkerEvent};
use crate::shellout;

const INSTRUCTIONS_FILE: &str = "scout-instructions.md";

#[derive(Debug, Clone)]
pub struct ScoutRunRequest {
    /// Working directory of the worker.
    pub cwd: PathBuf,
    pub task_text: String,
    pub system_prompt: String,
    pub model: String,
    /// Tool allow-list handed to the worker.
    pub tools: Vec<String>,
    pub extension_path: Option<PathBuf>,
}

/// Progress forwarded after each completed assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUpdate {
    pub turn: u32,
    pub text: String,
    /// Totals so far, including this turn.
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Spawning,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Spawning)
                | (Idle, Cancelled)
                | (Spawning, Streaming)
                | (Spawning, Failed)
                | (Spawning, Cancelled)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Cancelled)
        )
    }
}

struct StateTracker(RunState);

impl StateTracker {
    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.0.can_transition_to(next),
            "illegal scout run transition {:?} -> {:?}",
            self.0,
            next
        );
        tracing::debug!(from = ?self.0, to = ?next, "scout run state");
        self.0 = next;
    }
}

/// Folds assistant turns into usage totals. Single consumer, arrival order.
#[derive(Debug, Default)]
struct TurnAccumulator {
    usage: Usage,
    final_text: String,
}

impl TurnAccumulator {
    fn apply(&mut self, turn: AssistantTurn) -> TurnUpdate {
        self.usage.turn_count += 1;
        if let Some(n) = turn.input_tokens {
            self.usage.input_tokens += n;
        }
        if let Some(n) = turn.output_tokens {
            self.usage.output_tokens += n;
        }
        if let Some(c) = turn.cost_total {
            self.usage.cost_total += c;
        }
        if turn.model.is_some() {
            self.usage.model_used = turn.model;
        }
        if !turn.text.trim().is_empty() {
            self.final_text = turn.text.clone();
        }
        TurnUpdate {
            turn: self.usage.turn_count,
            text: turn.text,
            usage: self.usage.clone(),
        }
    }

    fn line(&mut self, line: &str, on_update: &mut impl FnMut(&TurnUpdate)) {
        match WorkerEvent::decode(line) {
            Some(WorkerEvent::TurnCompleted(turn)) => {
                let update = self.apply(turn);
                tracing::debug!(turn = update.turn, chars = update.text.len(), "scout turn");
                on_update(&update);
            }
            Some(WorkerEvent::Unknown) => {}
            None => tracing::trace!(line, "skipping malformed worker line"),
        }
    }
}

/// Command-line shape the worker is launched with.
pub fn worker_args(req: &ScoutRunRequest, instructions_file: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--mode".into(),
        "json".into(),
        "-p".into(),
        "--no-session".into(),
        "--model".into(),
        req.model.clone().into(),
        "--tools".into(),
        req.tools.join(",").into(),
    ];
    if let Some(ext) = &req.extension_path {
        args.push("--extension".into());
        args.push(ext.clone().into_os_string());
    }
    args.push("--append-system-prompt".into());
    args.push(instructions_file.as_os_str().to_os_string());
    args.push(req.task_text.clone().into());
    args
}

#[derive(Debug, Clone)]
pub struct ScoutRunner {
    worker_bin: String,
    kill_grace: Duration,
}

impl ScoutRunner {
    pub fn new(worker_bin: impl Into<String>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn from_config(cfg: &ScoutConfig) -> Self {
        Self::new(cfg.worker_bin.clone()).with_kill_grace(cfg.kill_grace)
    }

    /// How long a worker may take to exit after SIGTERM before it is killed.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn worker_bin(&self) -> &str {
        &self.worker_bin
    }

    /// Run the worker to completion, failure or cancellation.
    ///
    /// `Err` is reserved for runs that never got going (bad request, temp file
    /// or spawn failures, stream read errors). A worker that exits non-zero
    /// yields `Ok` with [`RunStatus::Failed`]; see [`ScoutRunResult::into_result`].
    pub async fn run(
        &self,
        req: &ScoutRunRequest,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(&TurnUpdate),
    ) -> Result<ScoutRunResult> {
        if req.task_text.trim().is_empty() {
            return Err(Error::TaskUnderspecified("empty task text".to_string()));
        }
        let mut state = StateTracker(RunState::Idle);
        if cancel.is_cancelled() {
            state.advance(RunState::Cancelled);
            return Ok(ScoutRunResult::cancelled_before_spawn());
        }

        // Dropped on every return path below, taking the instructions file with it.
        let tmp = shellout::run_temp_dir()?;
        let instructions = shellout::write_private_file(tmp.path(), INSTRUCTIONS_FILE, &req.system_prompt)?;

        state.advance(RunState::Spawning);
        if cancel.is_cancelled() {
            state.advance(RunState::Cancelled);
            return Ok(ScoutRunResult::cancelled_before_spawn());
        }
        let mut child = match Command::new(&self.worker_bin)
            .args(worker_args(req, &instructions))
            .current_dir(&req.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                state.advance(RunState::Failed);
                let msg = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("`{}` not found (set WEBSCOUT_WORKER_BIN)", self.worker_bin)
                } else {
                    format!("{}: {e}", self.worker_bin)
                };
                return Err(Error::WorkerSpawnFailed(msg));
            }
        };
        state.advance(RunState::Streaming);
        tracing::info!(
            pid = ?child.id(),
            model = %req.model,
            tools = %req.tools.join(","),
            "scout worker started"
        );

        let mut acc = TurnAccumulator::default();
        let mut stderr_buf: Vec<u8> = Vec::new();
        let stream = stream_worker_output(&mut child, cancel, &mut acc, &mut stderr_buf, &mut on_update).await;

        let outcome = match stream {
            Ok(StreamEnd::Cancelled) => None,
            Ok(StreamEnd::Closed) => {
                tokio::select! {
                    status = child.wait() => Some(status.map_err(|e| Error::Io(e.to_string()))),
                    _ = cancel.cancelled() => None,
                }
            }
            Err(e) => {
                state.advance(RunState::Failed);
                self.terminate(&mut child).await;
                return Err(e);
            }
        };

        let stderr_text = String::from_utf8_lossy(&stderr_buf).into_owned();
        let (status, exit_code) = match outcome {
            None => {
                let exit = self.terminate(&mut child).await;
                state.advance(RunState::Cancelled);
                (RunStatus::Cancelled, exit.and_then(|s| s.code()))
            }
            Some(Err(e)) => {
                state.advance(RunState::Failed);
                return Err(e);
            }
            Some(Ok(exit)) if exit.success() => {
                state.advance(RunState::Completed);
                (RunStatus::Completed, exit.code())
            }
            Some(Ok(exit)) => {
                state.advance(RunState::Failed);
                (RunStatus::Failed, exit.code())
            }
        };
        debug_assert!(state.0.is_terminal());
        tracing::info!(
            status = ?status,
            exit_code = ?exit_code,
            turns = acc.usage.turn_count,
            input_tokens = acc.usage.input_tokens,
            output_tokens = acc.usage.output_tokens,
            "scout worker finished"
        );

        Ok(ScoutRunResult {
            status,
            exit_code,
            final_output_text: acc.final_text,
            usage: acc.usage,
            stderr_text,
        })
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall on a pid we spawned and have not yet reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                tracing::warn!(grace_ms = self.kill_grace.as_millis() as u64, "scout worker ignored SIGTERM; killing");
                let _ = child.kill().await;
                child.wait().await.ok()
            }
        }
    }
}

enum StreamEnd {
    Closed,
    Cancelled,
}

/// Pump stdout through the line decoder and capture stderr until both close or
/// the token fires.
async fn stream_worker_output(
    child: &mut Child,
    cancel: &CancellationToken,
    acc: &mut TurnAccumulator,
    stderr_buf: &mut Vec<u8>,
    on_update: &mut impl FnMut(&TurnUpdate),
) -> Result<StreamEnd> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();
    let mut stdout_chunk = vec![0u8; 8192];
    let mut stderr_chunk = vec![0u8; 8192];
    let mut decoder = LineDecoder::new();

    while !stdout_done || !stderr_done {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            read = async {
                match stdout.as_mut() {
                    Some(r) => r.read(&mut stdout_chunk).await,
                    None => Ok(0),
                }
            }, if !stdout_done => {
                let n = read.map_err(|e| Error::Io(format!("reading worker stdout: {e}")))?;
                if n == 0 {
                    stdout_done = true;
                    if let Some(rest) = decoder.finish() {
                        acc.line(&rest, on_update);
                    }
                } else {
                    for line in decoder.push(&stdout_chunk[..n]) {
                        acc.line(&line, on_update);
                    }
                }
            }
            read = async {
                match stderr.as_mut() {
                    Some(r) => r.read(&mut stderr_chunk).await,
                    None => Ok(0),
                }
            }, if !stderr_done => {
                let n = read.map_err(|e| Error::Io(format!("reading worker stderr: {e}")))?;
                if n == 0 {
                    stderr_done = true;
                } else {
                    stderr_buf.extend_from_slice(&stderr_chunk[..n]);
                }
            }
        }
    }
    Ok(StreamEnd::Closed)
}
