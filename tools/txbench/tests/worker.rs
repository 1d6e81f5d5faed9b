mod common;

use std::process::Stdio;

use common::{worker_data, MockConfig, MockService};
use tokio::process::Command;
use txbench::worker::{run_worker, OPTIONS_ENV, WORKER_DATA_ENV};
use txbench::LoadOptions;

fn options(url: String) -> LoadOptions {
    LoadOptions {
        url,
        connections: 2,
        duration_ms: 300,
        ..LoadOptions::default()
    }
}

async fn worker_exit_code(envs: &[(&str, String)]) -> Option<i32> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_txbench"));
    command
        .arg("worker")
        .env_remove(OPTIONS_ENV)
        .env_remove(WORKER_DATA_ENV)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (key, value) in envs {
        command.env(key, value);
    }
    command.status().await.unwrap().code()
}

#[tokio::test]
async fn test_run_worker_submits_until_duration() {
    let service = MockService::spawn(MockConfig::default()).await;

    let errors = run_worker(options(service.url()), worker_data()).await.unwrap();

    assert_eq!(errors, 0);
    assert!(service.submitted() > 0);
}

#[tokio::test]
async fn test_worker_process_exits_zero_after_run() {
    let service = MockService::spawn(MockConfig::default()).await;
    let envs = [
        (OPTIONS_ENV, serde_json::to_string(&options(service.url())).unwrap()),
        (WORKER_DATA_ENV, serde_json::to_string(&worker_data().with_index(3)).unwrap()),
    ];

    assert_eq!(worker_exit_code(&envs).await, Some(0));
    assert!(service.submitted() > 0);
}

#[tokio::test]
async fn test_worker_process_exits_one_with_bad_key() {
    let service = MockService::spawn(MockConfig::default()).await;
    let mut data = worker_data();
    data.private_key = "not-hex".to_string();
    let envs = [
        (OPTIONS_ENV, serde_json::to_string(&options(service.url())).unwrap()),
        (WORKER_DATA_ENV, serde_json::to_string(&data).unwrap()),
    ];

    assert_eq!(worker_exit_code(&envs).await, Some(1));
    assert_eq!(service.submitted(), 0);
}

#[tokio::test]
async fn test_worker_process_exits_one_without_environment() {
    assert_eq!(worker_exit_code(&[]).await, Some(1));
}
