//! End-to-end lifecycle scenarios: scratch data tree, scratch store, real
//! service with either the built-in regex analyzer or a scripted stand-in.

use piiscan::config::Config;
use piiscan::service::AnalysisService;
use piiscan_analyzer::{AnalysisReport, AnalyzerSettings, FileAnalyzer, RegexAnalyzer};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SlowAnalyzer {
    delay: Duration,
}

impl FileAnalyzer for SlowAnalyzer {
    fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
        std::thread::sleep(self.delay);
        AnalysisReport::success(Vec::new(), serde_json::Value::Null)
    }
}

struct FailingAnalyzer;

impl FileAnalyzer for FailingAnalyzer {
    fn analyze(&self, _path: &Path, _settings: &AnalyzerSettings) -> AnalysisReport {
        AnalysisReport::failure("synthetic failure")
    }
}

fn config(data_dir: &Path, db_path: &Path) -> Config {
    Config {
        db_path: db_path.to_path_buf(),
        data_path: data_dir.to_path_buf(),
        workers: Some(2),
        batch_size: 10,
        threshold: 0.7,
        file_size_limit: 100,
        bind: "127.0.0.1:0".to_string(),
    }
}

fn write_files(dir: &Path, count: usize, content: &str) {
    for i in 0..count {
        fs::write(dir.join(format!("doc{i:04}.txt")), content).unwrap();
    }
}

/// Poll until the service leaves the running states, or panic on timeout.
async fn wait_until_settled(service: &AnalysisService, timeout: Duration) -> serde_json::Value {
    let deadline = Instant::now() + timeout;
    loop {
        let status = service.status().await;
        if !status["is_running"].as_bool().unwrap() {
            return status;
        }
        assert!(Instant::now() < deadline, "run did not settle: {status}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_tree_completes_with_zero_files() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let service = AnalysisService::new(
        config(data.path(), &store.path().join("results.db")),
        Arc::new(RegexAnalyzer::new()),
    );

    let reply = service.start().await;
    assert!(reply.success);

    let status = wait_until_settled(&service, Duration::from_secs(10)).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["files"]["total"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_clean_file_yields_one_entity() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    fs::write(data.path().join("record.txt"), "SSN: 123-45-6789\n").unwrap();

    let service = AnalysisService::new(
        config(data.path(), &store.path().join("results.db")),
        Arc::new(RegexAnalyzer::new()),
    );
    assert!(service.start().await.success);

    let status = wait_until_settled(&service, Duration::from_secs(10)).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["files"]["completed"], 1);
    assert_eq!(status["files"]["error"], 0);

    let export = service.export_json().await;
    assert_eq!(export["success"], true);
    assert_eq!(export["data"]["job"]["status"], "completed");
    assert_eq!(export["data"]["job"]["processed_files"], 1);
    let entities = export["data"]["files"][0]["entities"].as_array().unwrap();
    assert!(entities
        .iter()
        .any(|e| e["entity_type"] == "US_SSN" && e["text"] == "123-45-6789"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_precondition_failures_have_no_side_effects() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    // Stop with nothing running.
    let service = AnalysisService::new(
        config(data.path(), &store.path().join("results.db")),
        Arc::new(RegexAnalyzer::new()),
    );
    let reply = service.stop();
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("No analysis is running"));

    // Start with a missing data path.
    let service = AnalysisService::new(
        config(Path::new("/definitely/not/here"), &store.path().join("other.db")),
        Arc::new(RegexAnalyzer::new()),
    );
    let reply = service.start().await;
    assert!(!reply.success);
    assert!(reply.error.unwrap().contains("Data path does not exist"));
    assert_eq!(service.status().await["state"], "idle");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_while_running_is_rejected() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_files(data.path(), 40, "slow");

    let service = AnalysisService::new(
        config(data.path(), &store.path().join("results.db")),
        Arc::new(SlowAnalyzer {
            delay: Duration::from_millis(50),
        }),
    );
    assert!(service.start().await.success);

    let second = service.start().await;
    assert!(!second.success);
    assert_eq!(second.error.as_deref(), Some("Analysis is already running"));

    wait_until_settled(&service, Duration::from_secs(30)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_mid_run_interrupts_and_leaves_pending() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_files(data.path(), 60, "slow");

    let service = AnalysisService::new(
        config(data.path(), &store.path().join("results.db")),
        Arc::new(SlowAnalyzer {
            delay: Duration::from_millis(30),
        }),
    );
    assert!(service.start().await.success);

    // Let some work land, then stop.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status = service.status().await;
        if status["files"]["completed"].as_i64().unwrap_or(0) >= 5 {
            break;
        }
        assert!(Instant::now() < deadline, "no progress before stop: {status}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let reply = service.stop();
    assert!(reply.success);
    assert!(reply.message.unwrap().contains("current batch"));

    let status = wait_until_settled(&service, Duration::from_secs(30)).await;
    assert_eq!(status["state"], "idle");
    let completed = status["files"]["completed"].as_i64().unwrap();
    let pending = status["files"]["pending"].as_i64().unwrap();
    assert!(completed >= 5);
    assert!(pending > 0, "a stopped run must leave pending rows");
    assert_eq!(status["files"]["processing"], 0, "in-flight work must drain");

    let export = service.export_json().await;
    assert_eq!(export["data"]["job"]["status"], "interrupted");

    // A fresh start drains a new pass to completion.
    assert!(service.start().await.success);
    let status = wait_until_settled(&service, Duration::from_secs(30)).await;
    assert_eq!(status["state"], "completed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_total_failure_trips_breaker_and_interrupts() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    write_files(data.path(), 60, "doomed");

    let mut cfg = config(data.path(), &store.path().join("results.db"));
    cfg.batch_size = 50;
    let service = AnalysisService::new(cfg, Arc::new(FailingAnalyzer));
    assert!(service.start().await.success);

    let status = wait_until_settled(&service, Duration::from_secs(30)).await;
    assert_eq!(status["state"], "idle");
    assert!(status["error"]
        .as_str()
        .unwrap()
        .contains("consecutive errors"));
    assert_eq!(status["files"]["error"], 50);
    assert_eq!(status["files"]["pending"], 10);

    let export = service.export_json().await;
    assert_eq!(export["data"]["job"]["status"], "interrupted");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_removes_store_and_resets_state() {
    let data = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let db_path = store.path().join("results.db");
    fs::write(data.path().join("a.txt"), "text 123-45-6789").unwrap();

    let service = AnalysisService::new(
        config(data.path(), &db_path),
        Arc::new(RegexAnalyzer::new()),
    );
    assert!(service.start().await.success);
    wait_until_settled(&service, Duration::from_secs(10)).await;
    assert!(db_path.exists());

    let reply = service.clear().await;
    assert!(reply.success);
    assert!(!db_path.exists());

    let status = service.status().await;
    assert_eq!(status["state"], "idle");
    assert!(status["job_id"].is_null());

    let export = service.export_json().await;
    assert_eq!(export["success"], false);
    assert_eq!(export["error"], "No results to export");
}
