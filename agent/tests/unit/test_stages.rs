//! Install and uninstall pipelines run against real bundles

#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdagent::artifacts::LocalArtifactStore;
use cdagent::consul::keys;
use cdagent::consul::kv::get_json;
use cdagent::consul::memory::MemoryConsul;
use cdagent::converge::converger::Converger;
use cdagent::converge::loader::DataLoader;
use cdagent::converge::quarantine::QuarantineStore;
use cdagent::deploy::deployment::Deployment;
use cdagent::deploy::pipeline::{Pipeline, PipelineDeps, PipelineRunner, PipelineSettings};
use cdagent::deploy::script::ScriptExecutor;
use cdagent::deploy::stage::Stage;
use cdagent::deploy::stages::DeletePreviousDeploymentFiles;
use cdagent::environment::{Environment, Platform};
use cdagent::models::report::{DeploymentReport, ReportStatus};
use cdagent::models::service::{
    InstallationRecord, Service, ServiceDefinition, Slice, DEPLOYMENT_ID_TAG, SLICE_TAG,
    VERSION_TAG,
};
use cdagent::storage::layout::StorageLayout;
use cdagent::storage::settings::QuarantineMode;
use serde_json::json;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const BUCKET: &str = "bundles";

const AFTER_INSTALL: &str = "#!/bin/sh
echo \"name=$EM_SERVICE_NAME version=$EM_SERVICE_VERSION slice=$EM_SERVICE_SLICE port=$EM_SERVICE_PORT\"
echo \"agent=$TTL_CDA_DIR\"
";

const STOP: &str = "#!/bin/sh
echo \"$DEPLOYMENT_ID $DEPLOYMENT_BASE_DIR\" >> \"$TTL_CDA_DIR/stopped\"
";

/// A throwaway host: agent dir, deployments root, artifact store and Consul
struct Host {
    root: TempDir,
    consul: Arc<MemoryConsul>,
}

impl Host {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        Self {
            root,
            consul: Arc::new(MemoryConsul::default()),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn destination(&self) -> PathBuf {
        self.path("srv/orders")
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.path("etc"), self.path("deployments"))
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            kv: self.consul.clone(),
            catalogue: self.consul.clone(),
            checks: self.consul.clone(),
            artifacts: Arc::new(LocalArtifactStore::new(self.path("store"))),
            executor: Arc::new(ScriptExecutor::default()),
            layout: self.layout(),
        }
    }

    fn settings(&self, retain_count: usize) -> PipelineSettings {
        PipelineSettings {
            min_free_disk_mb: 0,
            retain_count,
            sensu_checks_dir: self.path("sensu"),
            plugin_search_paths: Vec::new(),
            ..Default::default()
        }
    }

    /// Zip `files` into the store at `bundles/orders/<version>.zip`
    fn publish(&self, version: &str, files: &[(&str, String)]) {
        let path = self.path("store").join(BUCKET).join(package_key(version));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o755);
        for (name, contents) in files {
            zip.start_file(*name, options.clone()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn deployment(&self, id: &str, version: &str, last_id: Option<&str>) -> Deployment {
        Deployment::new(
            id,
            service(version, id),
            last_id.map(str::to_string),
            environment(),
            &self.layout(),
            1,
        )
    }

    async fn install(&self, id: &str, version: &str, last_id: Option<&str>, retain_count: usize) -> (bool, Deployment) {
        let mut deployment = self.deployment(id, version, last_id);
        let result = Pipeline::install(&self.deps(), &self.settings(retain_count))
            .run(&mut deployment)
            .await;
        assert_eq!(result.id, id);
        (result.is_success, deployment)
    }

    async fn report(&self, id: &str) -> DeploymentReport {
        let key = keys::deployment_report_key(id, "i-1");
        let (report, _) = get_json::<DeploymentReport>(self.consul.as_ref(), &key)
            .await
            .unwrap()
            .unwrap();
        report
    }
}

fn package_key(version: &str) -> String {
    format!("orders/{}.zip", version)
}

fn environment() -> Environment {
    Environment {
        name: "test".to_string(),
        server_role: "web".to_string(),
        instance_id: "i-1".to_string(),
        ip_address: "127.0.0.1".to_string(),
        cluster: None,
        platform: Platform::Linux,
    }
}

fn service(version: &str, deployment_id: &str) -> Service {
    let definition: ServiceDefinition = serde_json::from_value(json!({
        "ID": "orders",
        "Name": "orders",
        "Ports": {"blue": 40001, "green": 40002}
    }))
    .unwrap();
    let installation = InstallationRecord {
        installation_timeout: Some(1),
        package_bucket: Some(BUCKET.to_string()),
        package_key: Some(package_key(version)),
    };

    let mut service = Service::from_definition(
        &definition,
        &installation,
        "127.0.0.1",
        Slice::parse("blue"),
        version,
    )
    .unwrap();
    service.tag(DEPLOYMENT_ID_TAG, deployment_id);
    service.tag(SLICE_TAG, "blue");
    service.tag(VERSION_TAG, version);
    service
}

/// Manifest copying `app/` to the destination, with optional hooks and one Consul check
fn manifest(host: &Host, hooks: &[(&str, &str)], check_id: &str) -> String {
    let destination = host.destination().display().to_string();
    let mut manifest = format!(
        "version: 0.0
os: linux
files:
  - source: /app
    destination: {destination}
permissions:
  - object: {destination}
    mode: 750
consul_healthchecks:
  {check_id}:
    name: orders-{check_id}
    type: http
    http: http://localhost:${{PORT}}/health
    interval: 10s
"
    );
    if !hooks.is_empty() {
        manifest.push_str("hooks:\n");
        for (event, location) in hooks {
            manifest.push_str(&format!("  {}:\n    - location: {}\n", event, location));
        }
    }
    manifest
}

/// Bundle with the standard stop and after-install scripts
fn standard_bundle(host: &Host, check_id: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "appspec.yml",
            manifest(
                host,
                &[
                    ("ApplicationStop", "hooks/stop.sh"),
                    ("AfterInstall", "/hooks/after-install.sh"),
                ],
                check_id,
            ),
        ),
        ("app/config.txt", "port=40001\n".to_string()),
        ("app/bin/run.sh", "#!/bin/sh\nexit 0\n".to_string()),
        ("hooks/stop.sh", STOP.to_string()),
        ("hooks/after-install.sh", AFTER_INSTALL.to_string()),
    ]
}

#[tokio::test]
async fn test_install_runs_every_stage() {
    let host = Host::new();
    host.publish("1.0.0", &standard_bundle(&host, "http"));

    std::fs::create_dir_all(host.destination()).unwrap();
    std::fs::write(host.destination().join("stale.txt"), "old").unwrap();

    let (success, deployment) = host.install("D1", "1.0.0", None, 2).await;
    let journal = deployment.journal.contents();
    assert!(success, "{}", journal);

    let report = host.report("D1").await;
    assert_eq!(report.status, Some(ReportStatus::Success));
    assert_eq!(
        report.last_completed_stage.as_deref(),
        Some("DeletePreviousDeploymentFiles")
    );
    assert_eq!(report.number_of_attempts, Some(1));

    // Bundle unpacked under the deployment dir
    assert!(deployment.archive_dir.join("appspec.yml").exists());
    assert!(deployment.bundle_file().exists());

    // Destination cleared, then filled from the bundle with the manifest mode
    let config = host.destination().join("config.txt");
    assert!(!host.destination().join("stale.txt").exists());
    assert_eq!(std::fs::read_to_string(&config).unwrap(), "port=40001\n");
    assert!(host.destination().join("bin/run.sh").exists());
    let mode = std::fs::metadata(&config).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o750);

    // Hook saw the service variables
    assert!(journal.contains("name=orders version=1.0.0 slice=blue port=40001"));
    assert!(journal.contains(&format!("agent={}", host.path("etc").display())));
    assert!(journal.contains("Skipping BeforeInstall stage as there is no hook defined."));
    assert!(journal.contains("Skipping StopApplication stage as there is no previous deployment."));

    let registered = host.consul.service("orders").await.unwrap();
    assert_eq!(registered.address, "127.0.0.1");
    assert_eq!(registered.port, 40001);
    assert!(registered.tags.contains(&"deployment_id:D1".to_string()));
    assert!(registered.tags.contains(&"version:1.0.0".to_string()));

    let check = host.consul.check("orders:http").await.unwrap();
    assert_eq!(check.http.as_deref(), Some("http://localhost:40001/health"));
    assert_eq!(check.interval, "10s");

    assert!(!host.path("etc/stopped").exists());
}

#[tokio::test]
async fn test_upgrades_replace_previous_deployment() {
    let host = Host::new();
    host.publish("1.0.0", &standard_bundle(&host, "http"));
    host.publish("2.0.0", &standard_bundle(&host, "web"));
    host.publish("3.0.0", &standard_bundle(&host, "web"));

    let (success, first) = host.install("D1", "1.0.0", None, 0).await;
    assert!(success, "{}", first.journal.contents());

    let (success, second) = host.install("D2", "2.0.0", Some("D1"), 0).await;
    assert!(success, "{}", second.journal.contents());

    // The previous bundle's stop hook ran from its own archive
    let stopped = std::fs::read_to_string(host.path("etc/stopped")).unwrap();
    assert_eq!(
        stopped.trim(),
        format!("D1 {}", first.archive_dir.display())
    );

    // Checks declared by the previous bundle are gone, the new ones registered
    assert!(host.consul.check("orders:http").await.is_none());
    assert!(host.consul.check("orders:web").await.is_some());

    let registered = host.consul.service("orders").await.unwrap();
    assert!(registered.tags.contains(&"deployment_id:D2".to_string()));
    assert!(!registered.tags.contains(&"deployment_id:D1".to_string()));

    // The running and previous deployments are never reclaimed
    assert!(first.dir.exists());
    assert!(second.dir.exists());

    let (success, third) = host.install("D3", "3.0.0", Some("D2"), 0).await;
    assert!(success, "{}", third.journal.contents());
    assert!(!first.dir.exists());
    assert!(second.dir.exists());
    assert!(third.dir.exists());
}

#[tokio::test]
async fn test_uninstall_removes_service() {
    let host = Host::new();
    host.publish("1.0.0", &standard_bundle(&host, "http"));

    let (success, installed) = host.install("D1", "1.0.0", None, 2).await;
    assert!(success, "{}", installed.journal.contents());

    let mut removal = host.deployment("U1", "1.0.0", Some("D1"));
    let result = Pipeline::uninstall(&host.deps(), &host.settings(2))
        .run(&mut removal)
        .await;
    assert!(result.is_success, "{}", removal.journal.contents());

    assert!(host.consul.service("orders").await.is_none());
    assert!(host.consul.check_ids().await.is_empty());

    let stopped = std::fs::read_to_string(host.path("etc/stopped")).unwrap();
    assert!(stopped.starts_with("D1 "));
    assert_eq!(
        host.report("U1").await.last_completed_stage.as_deref(),
        Some("DeletePreviousDeploymentFiles")
    );
}

#[tokio::test]
async fn test_bundle_without_manifest_fails() {
    let host = Host::new();
    host.publish(
        "1.0.0",
        &[("app/config.txt", "port=40001\n".to_string())],
    );

    let (success, deployment) = host.install("D1", "1.0.0", None, 2).await;
    assert!(!success);
    assert!(deployment.journal.contents().contains("Bundle has no appspec.yml"));

    let report = host.report("D1").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("ValidateBundle"));
    assert!(host.consul.service("orders").await.is_none());
    assert!(!host.destination().exists());
}

#[tokio::test]
async fn test_missing_bundle_fails_download() {
    let host = Host::new();

    let (success, _) = host.install("D1", "9.9.9", None, 2).await;
    assert!(!success);

    let report = host.report("D1").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("DownloadBundle"));
}

#[tokio::test]
async fn test_failing_hook_stops_install() {
    let host = Host::new();
    host.publish(
        "1.0.0",
        &[
            (
                "appspec.yml",
                manifest(&host, &[("BeforeInstall", "hooks/before.sh")], "http"),
            ),
            ("app/config.txt", "port=40001\n".to_string()),
            ("hooks/before.sh", "#!/bin/sh\necho refusing\nexit 3\n".to_string()),
        ],
    );

    let (success, deployment) = host.install("D1", "1.0.0", None, 2).await;
    assert!(!success);
    let journal = deployment.journal.contents();
    assert!(journal.contains("refusing"));
    assert!(journal.contains("exit code 3"));

    let report = host.report("D1").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("BeforeInstall"));

    // Later stages never ran
    assert!(!host.destination().exists());
    assert!(host.consul.service("orders").await.is_none());
    assert!(host.consul.check_ids().await.is_empty());
}

#[tokio::test]
async fn test_hook_timeout_stops_install() {
    let host = Host::new();
    let mut bundle = standard_bundle(&host, "http");
    bundle[0].1.push_str("  ValidateService:\n    - location: hooks/validate.sh\n      timeout: 1\n");
    bundle.push((
        "hooks/validate.sh",
        "#!/bin/sh\necho waiting\nsleep 30\n".to_string(),
    ));
    host.publish("1.0.0", &bundle);

    let started = Instant::now();
    let (success, deployment) = host.install("D1", "1.0.0", None, 2).await;
    assert!(!success);
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(deployment.journal.contents().contains("waiting"));

    let report = host.report("D1").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("ValidateService"));
    assert!(host.consul.service("orders").await.is_none());
}

#[tokio::test]
async fn test_cleanup_stage_keeps_current_and_last() {
    let host = Host::new();
    let service_root = host.path("deployments/orders");
    for id in ["d-1", "d-2", "d-3", "d-4", "d-5"] {
        std::fs::create_dir_all(service_root.join(id)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    std::fs::create_dir_all(host.path("deployments/billing/d-0")).unwrap();

    let mut deployment = host.deployment("d-5", "1.0.0", Some("d-4"));
    DeletePreviousDeploymentFiles::new(host.layout(), 1)
        .run(&mut deployment)
        .await
        .unwrap();

    assert!(!service_root.join("d-1").exists());
    assert!(!service_root.join("d-2").exists());
    assert!(service_root.join("d-3").exists());
    assert!(service_root.join("d-4").exists());
    assert!(service_root.join("d-5").exists());
    assert!(host.path("deployments/billing/d-0").exists());
}

#[tokio::test]
async fn test_converger_drives_pipeline_runner() {
    let host = Host::new();
    host.publish("1.0.0", &standard_bundle(&host, "http"));

    let consul = host.consul.clone();
    consul
        .seed_json(
            &format!("{}/orders", keys::server_role_services_key("test", "web")),
            &json!({"Name": "orders", "Version": "1.0.0", "DeploymentId": "D1", "Slice": "blue"}),
        )
        .await;
    consul
        .seed_json(
            &keys::service_definition_key("test", "orders", "1.0.0"),
            &json!({"Service": {"ID": "orders", "Name": "orders", "Ports": {"blue": 40001}}}),
        )
        .await;
    consul
        .seed_json(
            &keys::service_installation_key("test", "orders", "1.0.0"),
            &json!({"PackageBucket": BUCKET, "PackageKey": package_key("1.0.0")}),
        )
        .await;

    let runner = PipelineRunner::new(host.deps(), host.settings(2), environment());
    let loader = DataLoader::new(consul.clone(), consul.clone(), environment());
    let quarantine = QuarantineStore::new(QuarantineMode::Process, consul.clone(), "i-1");
    let mut converger = Converger::new(loader, Arc::new(runner), quarantine);

    assert!(converger.run_once().await);
    assert!(converger.quarantine().ids().is_empty());

    let registered = consul.service("orders").await.unwrap();
    assert!(registered.tags.contains(&"deployment_id:D1".to_string()));
    assert_eq!(host.report("D1").await.status, Some(ReportStatus::Success));
    assert!(host.destination().join("config.txt").exists());

    // Converged, a second pass has nothing to do
    assert!(converger.run_once().await);
    assert_eq!(host.report("D1").await.number_of_attempts, Some(1));
}
