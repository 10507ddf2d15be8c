//! Health check registrar tests

use std::path::PathBuf;
use std::sync::Arc;

use cdagent::consul::memory::MemoryConsul;
use cdagent::environment::Platform;
use cdagent::healthchecks::consul::ConsulCheckTransport;
use cdagent::healthchecks::sensu::SensuCheckTransport;
use cdagent::healthchecks::{CheckTarget, HealthCheckRegistrar};
use cdagent::models::healthcheck::{CheckSet, HealthCheckDefinition, Interval};
use cdagent::models::service::Slice;
use tempfile::TempDir;

fn target(slice: Slice) -> CheckTarget {
    CheckTarget {
        service_id: "c50-orders".to_string(),
        service_name: "c50-orders".to_string(),
        slice,
        port: 40001,
        platform: Platform::Linux,
        environment: "c50".to_string(),
        server_role: "web".to_string(),
        cluster: Some("Infra".to_string()),
    }
}

fn http_check(name: &str) -> HealthCheckDefinition {
    HealthCheckDefinition {
        name: Some(name.to_string()),
        check_type: Some("http".to_string()),
        url: Some("http://localhost:${PORT}/health".to_string()),
        interval: Some(Interval::Text("30s".to_string())),
        ..Default::default()
    }
}

fn script_check(name: &str, script: &str) -> HealthCheckDefinition {
    HealthCheckDefinition {
        name: Some(name.to_string()),
        check_type: Some("script".to_string()),
        script: Some(script.to_string()),
        script_arguments: Some("--warn 80".to_string()),
        interval: Some(Interval::Seconds(60)),
        ..Default::default()
    }
}

fn consul_registrar(consul: Arc<MemoryConsul>) -> HealthCheckRegistrar {
    HealthCheckRegistrar::new(Arc::new(ConsulCheckTransport::new(consul)), Vec::new())
}

#[tokio::test]
async fn test_duplicate_ids_rejected_before_any_write() {
    let consul = Arc::new(MemoryConsul::default());
    let registrar = consul_registrar(consul.clone());

    let mut checks = CheckSet::new();
    checks.insert("Check_1".to_string(), http_check("first"));
    checks.insert("check_1".to_string(), http_check("second"));

    let err = registrar
        .register_all(&checks, &target(Slice::None), &PathBuf::from("/tmp"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unique ids"));
    assert!(consul.check_ids().await.is_empty());
}

#[tokio::test]
async fn test_one_invalid_check_blocks_the_batch() {
    let consul = Arc::new(MemoryConsul::default());
    let registrar = consul_registrar(consul.clone());

    let mut checks = CheckSet::new();
    checks.insert("a_valid".to_string(), http_check("valid"));
    checks.insert(
        "b_no_interval".to_string(),
        HealthCheckDefinition {
            interval: None,
            ..http_check("no-interval")
        },
    );

    let err = registrar
        .register_all(&checks, &target(Slice::None), &PathBuf::from("/tmp"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'interval' is a required property"));
    assert!(consul.check_ids().await.is_empty());
}

#[tokio::test]
async fn test_consul_register_and_deregister() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("check-queue.sh"), "#!/bin/sh\nexit 0\n")
        .await
        .unwrap();

    let consul = Arc::new(MemoryConsul::default());
    let registrar = consul_registrar(consul.clone());
    let target = target(Slice::Named("blue".to_string()));

    let mut checks = CheckSet::new();
    checks.insert("http".to_string(), http_check("orders-http"));
    checks.insert("queue".to_string(), script_check("orders-queue", "check-queue.sh"));

    let count = registrar
        .register_all(&checks, &target, dir.path())
        .await
        .unwrap();
    assert_eq!(count, 2);

    let http = consul.check("c50-orders:http").await.unwrap();
    assert_eq!(http.service_id, "c50-orders");
    assert_eq!(http.http.as_deref(), Some("http://localhost:40001/health"));
    assert_eq!(http.interval, "30s");

    let queue = consul.check("c50-orders:queue").await.unwrap();
    let args = queue.args.unwrap();
    assert_eq!(
        args,
        vec![
            dir.path().join("check-queue.sh").display().to_string(),
            "--warn".to_string(),
            "80".to_string(),
            "blue".to_string(),
        ]
    );
    assert_eq!(queue.interval, "60s");

    let removed = registrar.deregister_all(&checks, &target).await.unwrap();
    assert_eq!(removed, 2);
    assert!(consul.check_ids().await.is_empty());
}

#[tokio::test]
async fn test_missing_script_is_reported() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    let registrar = consul_registrar(consul.clone());

    let mut checks = CheckSet::new();
    checks.insert("queue".to_string(), script_check("orders-queue", "missing.sh"));

    let err = registrar
        .register_all(&checks, &target(Slice::None), dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Couldn't find Consul check script"));
    assert!(consul.check_ids().await.is_empty());
}

#[tokio::test]
async fn test_sensu_file_written_and_deleted() {
    let bundle = TempDir::new().unwrap();
    let checks_dir = TempDir::new().unwrap();
    tokio::fs::write(bundle.path().join("check-queue.sh"), "#!/bin/sh\nexit 0\n")
        .await
        .unwrap();

    let registrar = HealthCheckRegistrar::new(
        Arc::new(SensuCheckTransport::new(checks_dir.path())),
        Vec::new(),
    );
    let target = target(Slice::Named("green".to_string()));

    let mut checks = CheckSet::new();
    checks.insert("queue".to_string(), script_check("queue", "check-queue.sh"));

    registrar
        .register_all(&checks, &target, bundle.path())
        .await
        .unwrap();

    let file = checks_dir.path().join("c50-orders-queue-green.json");
    let written: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&file).await.unwrap()).unwrap();

    let check = &written["checks"]["orders-queue-g"];
    let command = check["command"].as_str().unwrap();
    assert!(command.ends_with("check-queue.sh --warn 80 green"));
    assert_eq!(check["interval"], 60);
    assert_eq!(check["team"], "infra");
    assert_eq!(check["standalone"], true);
    assert_eq!(check["ttl_environment"], "c50");

    registrar.deregister_all(&checks, &target).await.unwrap();
    assert!(!file.exists());

    // Removing an absent file is not an error
    registrar.deregister_all(&checks, &target).await.unwrap();
}

#[tokio::test]
async fn test_sensu_rejects_bad_names() {
    let checks_dir = TempDir::new().unwrap();
    let registrar = HealthCheckRegistrar::new(
        Arc::new(SensuCheckTransport::new(checks_dir.path())),
        Vec::new(),
    );

    let mut checks = CheckSet::new();
    checks.insert("bad".to_string(), http_check("has spaces"));

    let err = registrar
        .register_all(&checks, &target(Slice::None), checks_dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Sensu name expression"));
}
