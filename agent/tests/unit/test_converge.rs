//! Convergence pass and worker tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cdagent::consul::keys;
use cdagent::consul::kv::{ServiceCatalogue, ServiceRegistration};
use cdagent::consul::memory::MemoryConsul;
use cdagent::converge::converger::{Converger, DeploymentRunner};
use cdagent::converge::loader::DataLoader;
use cdagent::converge::quarantine::QuarantineStore;
use cdagent::converge::server_role::ServerRole;
use cdagent::deploy::pipeline::DeploymentResult;
use cdagent::environment::{Environment, Platform};
use cdagent::models::action::{Action, ActionKind};
use cdagent::models::service::{CatalogueEntry, Service};
use cdagent::storage::settings::QuarantineMode;
use cdagent::workers::converger as worker;
use serde_json::json;
use tokio::sync::oneshot;

fn environment() -> Environment {
    Environment {
        name: "test".to_string(),
        server_role: "web".to_string(),
        instance_id: "i-1".to_string(),
        ip_address: "10.0.0.5".to_string(),
        cluster: None,
        platform: Platform::Linux,
    }
}

async fn declare(consul: &MemoryConsul, name: &str, version: &str, deployment_id: &str) {
    let role_key = format!(
        "{}/{}",
        keys::server_role_services_key("test", "web"),
        name
    );
    consul
        .seed_json(
            &role_key,
            &json!({"Name": name, "Version": version, "DeploymentId": deployment_id}),
        )
        .await;
    consul
        .seed_json(
            &keys::service_definition_key("test", name, version),
            &json!({"Service": {"ID": name, "Name": name}}),
        )
        .await;
}

/// Registers the service like a successful install would, or fails
struct FakeRunner {
    consul: Arc<MemoryConsul>,
    succeed: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(consul: Arc<MemoryConsul>, succeed: bool) -> Self {
        Self {
            consul,
            succeed,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentRunner for FakeRunner {
    async fn run(&self, action: &Action, _last_deployment_id: Option<String>) -> DeploymentResult {
        self.calls
            .lock()
            .unwrap()
            .push(action.deployment_id().to_string());

        if self.succeed {
            let service = action.service();
            self.consul
                .register_service(&ServiceRegistration {
                    id: service.id.clone(),
                    name: service.name.clone(),
                    address: service.address.clone(),
                    port: service.port,
                    tags: service.tags().to_vec(),
                })
                .await
                .unwrap();
        }

        DeploymentResult {
            id: action.deployment_id().to_string(),
            is_success: self.succeed,
        }
    }
}

fn converger(consul: Arc<MemoryConsul>, runner: Arc<FakeRunner>, mode: QuarantineMode) -> Converger {
    let loader = DataLoader::new(consul.clone(), consul.clone(), environment());
    let quarantine = QuarantineStore::new(mode, consul, "i-1");
    Converger::new(loader, runner, quarantine)
}

fn registered(id: &str, deployment_id: &str) -> Service {
    Service::from_catalogue(&CatalogueEntry {
        id: id.to_string(),
        name: id.to_string(),
        address: "10.0.0.5".to_string(),
        port: 0,
        tags: vec![format!("deployment_id:{}", deployment_id)],
    })
    .unwrap()
}

#[test]
fn test_next_action_until_registered() {
    let mut role = ServerRole::new("web");
    let desired = registered("A", "D1");
    role.push(Action::new(ActionKind::Install, "D1", desired.clone()));

    let (action, last) = role.next_action(&[]).unwrap();
    assert_eq!(action, Action::new(ActionKind::Install, "D1", desired));
    assert_eq!(last, None);

    assert!(role.next_action(&[registered("A", "D1")]).is_none());
}

#[test]
fn test_next_action_reports_installed_deployment() {
    let mut role = ServerRole::new("web");
    role.push(Action::new(ActionKind::Install, "D2", registered("A", "D2")));

    let (_, last) = role.next_action(&[registered("A", "D1")]).unwrap();
    assert_eq!(last.as_deref(), Some("D1"));

    assert!(role.quarantine("D2"));
    assert!(role.next_action(&[registered("A", "D1")]).is_none());
}

#[tokio::test]
async fn test_run_once_installs_declared_services() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;
    declare(&consul, "billing", "2.1.0", "D7").await;

    let runner = Arc::new(FakeRunner::new(consul.clone(), true));
    let mut converger = converger(consul.clone(), runner.clone(), QuarantineMode::Process);

    assert!(converger.run_once().await);
    let mut calls = runner.calls();
    calls.sort();
    assert_eq!(calls, vec!["D1", "D7"]);

    // Already converged, nothing runs
    assert!(converger.run_once().await);
    assert_eq!(runner.calls().len(), 2);

    let orders = consul.service("orders").await.unwrap();
    assert!(orders.tags.contains(&"deployment_id:D1".to_string()));
    assert!(orders.tags.contains(&"version:1.0.0".to_string()));
    assert_eq!(orders.address, "10.0.0.5");
}

#[tokio::test]
async fn test_failed_deployment_is_quarantined() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;

    let runner = Arc::new(FakeRunner::new(consul.clone(), false));
    let mut converger = converger(consul.clone(), runner.clone(), QuarantineMode::Process);

    assert!(!converger.run_once().await);
    assert_eq!(runner.calls(), vec!["D1"]);
    assert!(converger.quarantine().ids().contains("D1"));

    // Carried to the next pass within the process
    assert!(converger.run_once().await);
    assert_eq!(runner.calls(), vec!["D1"]);
}

#[tokio::test]
async fn test_pass_quarantine_retries_next_pass() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;

    let runner = Arc::new(FakeRunner::new(consul.clone(), false));
    let mut converger = converger(consul.clone(), runner.clone(), QuarantineMode::Pass);

    assert!(!converger.run_once().await);
    assert!(!converger.run_once().await);
    assert_eq!(runner.calls(), vec!["D1", "D1"]);
}

#[tokio::test]
async fn test_persistent_quarantine_survives_restart() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;

    let runner = Arc::new(FakeRunner::new(consul.clone(), false));
    let mut first = converger(consul.clone(), runner.clone(), QuarantineMode::Persistent);
    assert!(!first.run_once().await);
    assert!(consul
        .value(&keys::quarantine_key("i-1"))
        .await
        .unwrap()
        .contains("D1"));

    let mut store = QuarantineStore::new(QuarantineMode::Persistent, consul.clone(), "i-1");
    store.load().await.unwrap();
    let loader = DataLoader::new(consul.clone(), consul.clone(), environment());
    let mut second = Converger::new(loader, runner.clone(), store);

    assert!(second.run_once().await);
    assert_eq!(runner.calls(), vec!["D1"]);
}

#[tokio::test]
async fn test_unconverged_success_does_not_loop() {
    struct NoopRunner;

    #[async_trait]
    impl DeploymentRunner for NoopRunner {
        async fn run(&self, action: &Action, _last: Option<String>) -> DeploymentResult {
            DeploymentResult {
                id: action.deployment_id().to_string(),
                is_success: true,
            }
        }
    }

    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;

    let loader = DataLoader::new(consul.clone(), consul.clone(), environment());
    let quarantine = QuarantineStore::new(QuarantineMode::Process, consul.clone(), "i-1");
    let mut converger = Converger::new(loader, Arc::new(NoopRunner), quarantine);

    assert!(converger.run_once().await);
    assert!(converger.quarantine().ids().contains("D1"));
}

#[tokio::test]
async fn test_unreachable_store_fails_pass() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;
    consul.set_offline(true);

    let runner = Arc::new(FakeRunner::new(consul.clone(), true));
    let mut converger = converger(consul.clone(), runner.clone(), QuarantineMode::Process);

    assert!(!converger.run_once().await);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_loader_default_timeout() {
    let consul = Arc::new(MemoryConsul::default());
    declare(&consul, "orders", "1.0.0", "D1").await;
    declare(&consul, "billing", "2.1.0", "D7").await;
    consul
        .seed_json(
            &keys::service_installation_key("test", "billing", "2.1.0"),
            &json!({"InstallationTimeout": 10}),
        )
        .await;

    let loader = DataLoader::new(consul.clone(), consul.clone(), environment())
        .with_default_timeout(Duration::from_secs(90));
    let role = loader.load_server_role().await.unwrap();

    let timeout_of = |id: &str| {
        role.actions()
            .iter()
            .find(|a| a.service().id == id)
            .map(|a| a.service().installation.timeout)
            .unwrap()
    };
    assert_eq!(timeout_of("orders"), Duration::from_secs(90));
    assert_eq!(timeout_of("billing"), Duration::from_secs(600));
}

#[tokio::test]
async fn test_worker_reacts_to_role_changes() {
    let consul = Arc::new(MemoryConsul::new(Duration::from_millis(50)));
    declare(&consul, "orders", "1.0.0", "D1").await;

    let runner = Arc::new(FakeRunner::new(consul.clone(), true));
    let mut converger = converger(consul.clone(), runner.clone(), QuarantineMode::Process);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let kv = consul.clone();
    let worker = tokio::spawn(async move {
        worker::run(
            &worker::Options::default(),
            &mut converger,
            kv,
            &keys::server_role_services_key("test", "web"),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.await;
            }),
        )
        .await;
    });

    let wait_for = |id: &'static str| {
        let runner = runner.clone();
        async move {
            for _ in 0..100 {
                if runner.calls().iter().any(|c| c == id) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }
    };

    assert!(wait_for("D1").await);

    declare(&consul, "billing", "2.1.0", "D7").await;
    assert!(wait_for("D7").await);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(runner.calls(), vec!["D1", "D7"]);
}
