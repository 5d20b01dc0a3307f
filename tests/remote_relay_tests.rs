//! Integration tests for the remote build host handoff
//!
//! One mock server plays the Compute Engine API and the build host. The
//! coordinator launches the host with a stand-in command, looks up its
//! address, logs in and relays the command.

use kbuildsrv::config::ReadinessPolicy;
use kbuildsrv::{ConfigError, JobLog, RemoteBuildCoordinator, RemoteError, RemoteOutcome, ServerConfig};
use mockito::Matcher;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const INSTANCE_PATH: &str =
    "/compute/v1/projects/xfstests-proj/zones/us-west1-b/instances/xfstests-bldsrv";

fn create_test_config(root: &Path, endpoint: &str, launch: &[&str]) -> ServerConfig {
    let credential_file = root.join("pwd.json");
    fs::write(&credential_file, r#"{"password":"s3cret"}"#).unwrap();

    let mut config = ServerConfig::default();
    config.log_root = root.join("bldsrv_logs");
    config.gce_project = "xfstests-proj".to_string();
    config.gce_zone = "us-west1-b".to_string();
    config.gs_bucket = "xfstests-kernels".to_string();
    config.compute_endpoint = endpoint.to_string();
    config.access_token = Some("test-token".to_string());
    config.launch_command = launch.iter().map(|s| s.to_string()).collect();
    config.credential_file = credential_file;
    config.readiness = ReadinessPolicy {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        max_attempts: 4,
    };
    config
}

fn open_log(root: &Path) -> JobLog {
    JobLog::open("relay", root.join("bldsrv_logs/relay/run.log")).unwrap()
}

#[tokio::test]
async fn test_relay_through_compute_api() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let instance_body = json!({
        "status": "RUNNING",
        "networkInterfaces": [{"accessConfigs": [{"natIP": server.url()}]}]
    });
    let instance = server
        .mock("GET", INSTANCE_PATH)
        .match_header("authorization", "Bearer test-token")
        .with_body(instance_body.to_string())
        .create_async()
        .await;
    let login = server
        .mock("POST", "/login")
        .match_body(Matcher::Json(json!({"password": "s3cret"})))
        .with_body(r#"{"status":true}"#)
        .expect(1)
        .create_async()
        .await;
    let command = server
        .mock("POST", "/gce-xfstests")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "orig_cmd": "gce-xfstests ltm -c ext4/4k generic/001",
            "options": {"git_repo": "https://example.com/linux.git", "commit_id": "v6.6"}
        })))
        .with_body(r#"{"status": "true"}"#)
        .expect(1)
        .create_async()
        .await;

    let config = create_test_config(temp_dir.path(), &server.url(), &["true"]);
    let coordinator = RemoteBuildCoordinator::new(
        &config,
        "gce-xfstests ltm -c ext4/4k generic/001",
        json!({
            "orig_cmd": "gce-xfstests ltm -c ext4/4k generic/001",
            "options": {"git_repo": "https://example.com/linux.git", "commit_id": "v6.6"}
        }),
        open_log(temp_dir.path()),
    )
    .unwrap();
    assert_eq!(coordinator.target().region, "us-west1");

    let outcome = coordinator.run().wait().await.unwrap();
    assert_eq!(outcome, RemoteOutcome::Ok("true".to_string()));

    instance.assert_async().await;
    login.assert_async().await;
    command.assert_async().await;
}

#[tokio::test]
async fn test_launch_failure_stops_handoff() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let instance = server.mock("GET", INSTANCE_PATH).expect(0).create_async().await;

    let config = create_test_config(temp_dir.path(), &server.url(), &["false"]);
    let result = RemoteBuildCoordinator::new(&config, "ltm", json!({}), open_log(temp_dir.path()))
        .unwrap()
        .run()
        .wait()
        .await;

    assert!(matches!(result, Err(RemoteError::Command { .. })));
    instance.assert_async().await;

    let log = fs::read_to_string(temp_dir.path().join("bldsrv_logs/relay/run.log")).unwrap();
    assert!(log.contains("Build server failed to start"));
}

#[tokio::test]
async fn test_instance_without_address_is_unreachable() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let instance = server
        .mock("GET", INSTANCE_PATH)
        .with_body(r#"{"status":"PROVISIONING","networkInterfaces":[]}"#)
        .expect(4)
        .create_async()
        .await;

    let config = create_test_config(temp_dir.path(), &server.url(), &["true"]);
    let result = RemoteBuildCoordinator::new(&config, "ltm", json!({}), open_log(temp_dir.path()))
        .unwrap()
        .run()
        .wait()
        .await;

    assert!(matches!(
        result,
        Err(RemoteError::HostUnreachable { attempts: 4, .. })
    ));
    instance.assert_async().await;
}

#[tokio::test]
async fn test_missing_credentials_abort_before_login() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let instance_body = json!({
        "networkInterfaces": [{"accessConfigs": [{"natIP": server.url()}]}]
    });
    let _instance = server
        .mock("GET", INSTANCE_PATH)
        .with_body(instance_body.to_string())
        .create_async()
        .await;
    let login = server.mock("POST", "/login").expect(0).create_async().await;

    let mut config = create_test_config(temp_dir.path(), &server.url(), &["true"]);
    config.credential_file = temp_dir.path().join("missing.json");
    let result = RemoteBuildCoordinator::new(&config, "ltm", json!({}), open_log(temp_dir.path()))
        .unwrap()
        .run()
        .wait()
        .await;

    assert!(matches!(result, Err(RemoteError::Credentials { .. })));
    login.assert_async().await;
}

#[tokio::test]
async fn test_unresolved_project_fails_before_launch() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let instance = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    // Launch would leave a marker if it ever ran
    let marker = temp_dir.path().join("launched");
    let launch = format!("touch {}", marker.display());
    let mut config = create_test_config(temp_dir.path(), &server.url(), &["sh", "-c", &launch]);
    config.gce_project = String::new();

    let result = RemoteBuildCoordinator::new(&config, "ltm", json!({}), open_log(temp_dir.path()));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    assert!(!marker.exists());
    instance.assert_async().await;
}
