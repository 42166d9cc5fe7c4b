use assert_cmd::Command;
use predicates::prelude::*;

fn webscout(home: &std::path::Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("webscout"));
    // Hermetic: no user-level provider files, no inherited keys or worker overrides.
    cmd.env("HOME", home)
        .current_dir(home)
        .env_remove("BRAVE_API_KEY")
        .env_remove("WEBSCOUT_BRAVE_API_KEY")
        .env_remove("WEBSCOUT_WORKER_BIN")
        .env_remove("WEBSCOUT_MODEL")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn version_contract() {
    let home = tempfile::tempdir().unwrap();
    let out = webscout(home.path()).arg("version").output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("version json");
    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["name"].as_str(), Some("webscout"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());

    webscout(home.path())
        .args(["version", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("webscout "));
}

#[test]
fn research_without_urls_or_query_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let out = webscout(home.path())
        .args(["research", "what is new in the release?"])
        .env("WEBSCOUT_WORKER_BIN", "/definitely/not/a/worker")
        .output()
        .unwrap();
    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("research json");
    assert_eq!(v["ok"], false);
    assert_eq!(v["kind"], "web_research");
    assert_eq!(v["error"]["code"], "task_underspecified");
    assert_eq!(v["error"]["retryable"], false);
}

#[test]
fn search_without_provider_reports_no_search_provider() {
    let home = tempfile::tempdir().unwrap();
    webscout(home.path())
        .args(["search", "rust async runtimes"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"no_search_provider\""));
}

#[test]
fn fetch_invalid_url_fails_with_structured_error() {
    let home = tempfile::tempdir().unwrap();
    webscout(home.path())
        .args(["fetch", "ftp://example.com/file"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"invalid_url\""))
        .stderr(predicate::str::contains("invalid_url"));
}

#[test]
fn doctor_reports_missing_worker_and_discovered_providers() {
    let home = tempfile::tempdir().unwrap();
    let dir = home.path().join(".webscout/providers");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("local.json"),
        r#"{"name": "local-index", "endpoint": "http://127.0.0.1:9/search"}"#,
    )
    .unwrap();
    std::fs::write(dir.join("broken.json"), "{ not json").unwrap();

    let out = webscout(home.path())
        .arg("doctor")
        .env("WEBSCOUT_WORKER_BIN", "/definitely/not/a/worker")
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("doctor json");
    assert_eq!(v["kind"], "doctor");
    assert_eq!(v["worker"]["found"], false);
    assert_eq!(
        v["features"]["stdio"].as_bool(),
        Some(cfg!(feature = "stdio"))
    );
    let names: Vec<&str> = v["providers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert!(names.contains(&"fetch-only"));
    assert!(names.contains(&"local-index"));
    assert_eq!(v["default_provider"], "local-index");
}

#[test]
fn fetch_local_page_as_text() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = rt.block_on(async {
        use axum::{routing::get, Router};
        let app = Router::new().route(
            "/post",
            get(|| async {
                (
                    [(axum::http::header::CONTENT_TYPE, "text/html")],
                    "<html><head><title>Field notes</title></head><body><nav>Menu</nav>\
                     <article><h1>Field notes</h1><p>The river crossing took four hours because the bridge was out and the ferry ran late.</p>\
                     <p>We camped on the far bank and resumed the survey at dawn the next morning.</p></article></body></html>",
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("axum serve");
        });
        addr
    });

    let home = tempfile::tempdir().unwrap();
    webscout(home.path())
        .args(["fetch", &format!("http://{addr}/post"), "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("# Field notes"))
        .stdout(predicate::str::contains("river crossing"))
        .stdout(predicate::str::contains("Menu").not());
    drop(rt);
}
