#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use webscout_core::RunStatus;
use webscout_local::runner::{ScoutRunRequest, ScoutRunner, TurnUpdate};

fn write_worker(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn request(cwd: &Path) -> ScoutRunRequest {
    ScoutRunRequest {
        cwd: cwd.to_path_buf(),
        task_text: "summarize https://example.com".to_string(),
        system_prompt: "1. fetch\n2. answer\n".to_string(),
        model: "test-model".to_string(),
        tools: vec!["web_fetch".to_string()],
        extension_path: None,
    }
}

/// Echoes the instructions file path (and its content) to stderr.
const REPORT_INSTRUCTIONS: &str = r#"
prev=""
for a in "$@"; do
  if [ "$prev" = "--append-system-prompt" ]; then
    echo "$a" >&2
    cat "$a" >&2
  fi
  prev="$a"
done
"#;

/// Writes the instructions file path to `instructions.path` in the worker's cwd.
const RECORD_INSTRUCTIONS: &str = r#"
prev=""
for a in "$@"; do
  if [ "$prev" = "--append-system-prompt" ]; then
    printf '%s' "$a" > instructions.path
  fi
  prev="$a"
done
"#;

fn assert_instructions_removed(dir: &Path) {
    let recorded = std::fs::read_to_string(dir.join("instructions.path")).unwrap();
    let instructions = PathBuf::from(recorded);
    assert!(!instructions.exists(), "instructions file left behind");
    assert!(
        !instructions.parent().unwrap().exists(),
        "instructions dir left behind"
    );
}

#[tokio::test]
async fn streams_turns_and_aggregates_usage() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        r#"{REPORT_INSTRUCTIONS}
printf '%s\n' '{{"type":"agent_start"}}'
printf '%s' '{{"type":"message_end","message":{{"role":"assistant","model":"m-used","usage":{{"input":10,'
printf '%s\n' '"output":5,"cost":{{"total":0.25}}}},"content":[{{"type":"text","text":"first look"}}]}}}}'
echo 'this line is not json'
printf '%s\n' '{{"type":"message_end","message":{{"role":"user","content":[{{"type":"text","text":"ignored"}}]}}}}'
printf '%s' '{{"type":"message_end","message":{{"role":"assistant","usage":{{"input":7,"output":3,"cost":{{"total":0.5}}}},"content":[{{"type":"text","text":"final answer"}}]}}}}'
"#
    );
    let worker = write_worker(dir.path(), "worker-ok.sh", &body);

    let updates: Arc<Mutex<Vec<TurnUpdate>>> = Arc::default();
    let sink = updates.clone();
    let runner = ScoutRunner::new(worker.to_string_lossy());
    let r = runner
        .run(&request(dir.path()), &CancellationToken::new(), move |u| {
            sink.lock().unwrap().push(u.clone())
        })
        .await
        .unwrap();

    assert_eq!(r.status, RunStatus::Completed);
    assert_eq!(r.exit_code, Some(0));
    assert_eq!(r.final_output_text, "final answer");
    assert_eq!(r.usage.turn_count, 2);
    assert_eq!(r.usage.input_tokens, 17);
    assert_eq!(r.usage.output_tokens, 8);
    assert!((r.usage.cost_total - 0.75).abs() < 1e-9);
    assert_eq!(r.usage.model_used.as_deref(), Some("m-used"));

    let updates = updates.lock().unwrap();
    let texts: Vec<&str> = updates.iter().map(|u| u.text.as_str()).collect();
    assert_eq!(texts, vec!["first look", "final answer"]);
    assert_eq!(updates[0].usage.input_tokens, 10);

    // The instructions file existed while the worker ran and is gone now.
    let mut lines = r.stderr_text.lines();
    let instructions = PathBuf::from(lines.next().unwrap());
    assert_eq!(lines.next(), Some("1. fetch"));
    assert!(!instructions.exists());
    assert!(!instructions.parent().unwrap().exists());
}

#[tokio::test]
async fn non_zero_exit_is_failure_with_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        r#"{RECORD_INSTRUCTIONS}
printf '%s\n' '{{"type":"message_end","message":{{"role":"assistant","content":[{{"type":"text","text":"partial"}}]}}}}'
echo "model not found" >&2
exit 3"#
    );
    let worker = write_worker(dir.path(), "worker-fail.sh", &body);
    let r = ScoutRunner::new(worker.to_string_lossy())
        .run(&request(dir.path()), &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(r.status, RunStatus::Failed);
    assert_eq!(r.exit_code, Some(3));
    assert_eq!(r.final_output_text, "partial");
    assert_instructions_removed(dir.path());

    let err = r.into_result().unwrap_err();
    assert_eq!(err.kind(), "worker_exited_non_zero");
    assert!(err.to_string().contains("model not found"));
}

#[tokio::test]
async fn failure_without_stderr_reports_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let worker = write_worker(
        dir.path(),
        "worker-quiet-fail.sh",
        r#"printf '%s\n' '{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"got halfway"}]}}'
exit 1"#,
    );
    let r = ScoutRunner::new(worker.to_string_lossy())
        .run(&request(dir.path()), &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(r.status, RunStatus::Failed);
    assert_eq!(r.failure_message(), "got halfway");
}

#[tokio::test]
async fn cancel_kills_worker_that_ignores_sigterm() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        r#"{RECORD_INSTRUCTIONS}
trap '' TERM
printf '%s\n' '{{"type":"message_end","message":{{"role":"assistant","content":[{{"type":"text","text":"working on it"}}]}}}}'
while true; do sleep 0.05; done"#
    );
    let worker = write_worker(dir.path(), "worker-stubborn.sh", &body);
    let grace = Duration::from_millis(300);
    let runner = ScoutRunner::new(worker.to_string_lossy()).with_kill_grace(grace);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let cancelled_at: Arc<Mutex<Option<Instant>>> = Arc::default();
    let stamp = cancelled_at.clone();
    let r = runner
        .run(&request(dir.path()), &cancel, move |_| {
            *stamp.lock().unwrap() = Some(Instant::now());
            trigger.cancel();
        })
        .await
        .unwrap();
    let elapsed = cancelled_at.lock().unwrap().unwrap().elapsed();

    assert_eq!(r.status, RunStatus::Cancelled);
    assert_eq!(r.final_output_text, "working on it");
    assert!(elapsed >= grace, "returned before the grace period: {elapsed:?}");
    assert!(
        elapsed < grace + Duration::from_secs(2),
        "forced termination took too long: {elapsed:?}"
    );
    assert_instructions_removed(dir.path());
    assert_eq!(r.into_result().unwrap_err().kind(), "cancelled");
}

#[tokio::test]
async fn cancel_stops_cooperative_worker_quickly() {
    let dir = tempfile::tempdir().unwrap();
    let worker = write_worker(
        dir.path(),
        "worker-sleepy.sh",
        "exec sleep 30",
    );
    let runner = ScoutRunner::new(worker.to_string_lossy()).with_kill_grace(Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    let t0 = Instant::now();
    let r = runner.run(&request(dir.path()), &cancel, |_| {}).await.unwrap();
    assert_eq!(r.status, RunStatus::Cancelled);
    // SIGTERM alone ends `sleep`; no need to wait out the grace period.
    assert!(t0.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn concurrent_runs_use_separate_temp_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let worker = write_worker(dir.path(), "worker-report.sh", REPORT_INSTRUCTIONS);
    let runner = ScoutRunner::new(worker.to_string_lossy());
    let req = request(dir.path());
    let (ca, cb) = (CancellationToken::new(), CancellationToken::new());
    let (a, b) = tokio::join!(
        runner.run(&req, &ca, |_| {}),
        runner.run(&req, &cb, |_| {}),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status, RunStatus::Completed);
    assert_eq!(b.status, RunStatus::Completed);
    assert_ne!(a.stderr_text.lines().next(), b.stderr_text.lines().next());
    assert_eq!(a.final_output_text, "");
}

#[tokio::test]
async fn blank_task_text_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path());
    req.task_text = "   ".to_string();
    let err = ScoutRunner::new("/definitely/not/a/worker")
        .run(&req, &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "task_underspecified");
}
