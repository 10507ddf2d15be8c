//! Pipeline execution and report tests

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cdagent::artifacts::LocalArtifactStore;
use cdagent::consul::keys;
use cdagent::consul::kv::get_json;
use cdagent::consul::memory::MemoryConsul;
use cdagent::deploy::deployment::Deployment;
use cdagent::deploy::pipeline::{Pipeline, PipelineSettings};
use cdagent::deploy::stage::Stage;
use cdagent::deploy::stages::ValidateDeployment;
use cdagent::environment::{Environment, Platform};
use cdagent::errors::AgentError;
use cdagent::models::report::{DeploymentReport, ReportStatus};
use cdagent::models::service::{CatalogueEntry, Service};
use cdagent::storage::layout::StorageLayout;
use serde_json::json;
use tempfile::TempDir;

struct RecordingStage {
    name: String,
    fail: bool,
    ran: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        self.ran.lock().unwrap().push(self.name.clone());
        deployment.journal.info(format!("ran {}", self.name));
        if self.fail {
            return Err(AgentError::StageError(format!("{} exited with code 1", self.name)));
        }
        Ok(())
    }
}

struct PanickingStage;

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        "Explode"
    }

    async fn run(&self, _deployment: &mut Deployment) -> Result<(), AgentError> {
        panic!("stage blew up");
    }
}

fn environment() -> Environment {
    Environment {
        name: "test".to_string(),
        server_role: "web".to_string(),
        instance_id: "i-1".to_string(),
        ip_address: "127.0.0.1".to_string(),
        cluster: Some("Infra".to_string()),
        platform: Platform::Linux,
    }
}

fn service() -> Service {
    Service::from_catalogue(&CatalogueEntry {
        id: "orders".to_string(),
        name: "orders".to_string(),
        address: "127.0.0.1".to_string(),
        port: 8080,
        tags: vec!["deployment_id:D0".to_string()],
    })
    .unwrap()
}

fn deployment(root: &Path, id: &str, max_attempts: u32) -> Deployment {
    let layout = StorageLayout::new(root.join("config"), root.join("deployments"));
    Deployment::new(id, service(), None, environment(), &layout, max_attempts)
}

fn pipeline(consul: Arc<MemoryConsul>, root: &Path, stages: Vec<Box<dyn Stage>>) -> Pipeline {
    Pipeline::new(
        stages,
        consul,
        Arc::new(LocalArtifactStore::new(root.join("store"))),
        PipelineSettings::default(),
    )
}

async fn report(consul: &MemoryConsul, id: &str) -> DeploymentReport {
    let key = keys::deployment_report_key(id, "i-1");
    let (report, _) = get_json::<DeploymentReport>(consul, &key).await.unwrap().unwrap();
    report
}

#[tokio::test]
async fn test_failed_stage_stops_pipeline() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    let ran = Arc::new(Mutex::new(Vec::new()));

    let stages: Vec<Box<dyn Stage>> = (1..=5)
        .map(|i| {
            Box::new(RecordingStage {
                name: format!("Stage{}", i),
                fail: i == 3,
                ran: ran.clone(),
            }) as Box<dyn Stage>
        })
        .collect();

    let mut deployment = deployment(dir.path(), "D1", 1);
    let result = pipeline(consul.clone(), dir.path(), stages)
        .run(&mut deployment)
        .await;

    assert_eq!(result.id, "D1");
    assert!(!result.is_success);
    assert_eq!(*ran.lock().unwrap(), vec!["Stage1", "Stage2", "Stage3"]);

    let report = report(&consul, "D1").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("Stage3"));
    assert_eq!(report.cause.as_deref(), Some("Deployment"));
    assert!(report.start_time.is_some());
    assert!(report.end_time.is_some());
}

#[tokio::test]
async fn test_successful_pipeline_writes_journal() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    let ran = Arc::new(Mutex::new(Vec::new()));

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ValidateDeployment),
        Box::new(RecordingStage {
            name: "Install".to_string(),
            fail: false,
            ran: ran.clone(),
        }),
    ];

    let mut deployment = deployment(dir.path(), "D2", 1);
    let result = pipeline(consul.clone(), dir.path(), stages)
        .run(&mut deployment)
        .await;
    assert!(result.is_success);

    let report = report(&consul, "D2").await;
    assert_eq!(report.status, Some(ReportStatus::Success));
    assert_eq!(report.number_of_attempts, Some(1));
    assert!(report.log.is_none());

    let journal = tokio::fs::read_to_string(deployment.log_file().path())
        .await
        .unwrap();
    assert!(journal.contains("Start Install stage execution."));
    assert!(journal.contains("ran Install"));
    assert!(journal.contains("completed successfully"));
}

#[tokio::test]
async fn test_panicking_stage_fails_deployment() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    let ran = Arc::new(Mutex::new(Vec::new()));

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(PanickingStage),
        Box::new(RecordingStage {
            name: "Never".to_string(),
            fail: false,
            ran: ran.clone(),
        }),
    ];

    let mut deployment = deployment(dir.path(), "D3", 1);
    let result = pipeline(consul.clone(), dir.path(), stages)
        .run(&mut deployment)
        .await;

    assert!(!result.is_success);
    assert!(ran.lock().unwrap().is_empty());
    assert!(deployment
        .journal
        .contents()
        .contains("stage blew up"));

    let report = report(&consul, "D3").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.last_completed_stage.as_deref(), Some("Explode"));
}

#[tokio::test]
async fn test_attempt_ceiling_stops_retries() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    consul
        .seed_json(
            &keys::deployment_report_key("D4", "i-1"),
            &json!({"Status": "Failed", "NumberOfAttempts": 1, "LastCompletedStage": "Install"}),
        )
        .await;
    let ran = Arc::new(Mutex::new(Vec::new()));

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ValidateDeployment),
        Box::new(RecordingStage {
            name: "Install".to_string(),
            fail: false,
            ran: ran.clone(),
        }),
    ];

    let mut deployment = deployment(dir.path(), "D4", 1);
    let result = pipeline(consul.clone(), dir.path(), stages)
        .run(&mut deployment)
        .await;

    assert!(!result.is_success);
    assert!(ran.lock().unwrap().is_empty());
    assert!(deployment
        .journal
        .contents()
        .contains("Maximum number of attempts (1) has been reached."));

    let report = report(&consul, "D4").await;
    assert_eq!(report.status, Some(ReportStatus::Failed));
    assert_eq!(report.number_of_attempts, Some(1));
    assert_eq!(report.last_completed_stage.as_deref(), Some("ValidateDeployment"));
}

#[tokio::test]
async fn test_retry_counts_previous_attempts() {
    let dir = TempDir::new().unwrap();
    let consul = Arc::new(MemoryConsul::default());
    consul
        .seed_json(
            &keys::deployment_report_key("D5", "i-1"),
            &json!({"Status": "Failed", "NumberOfAttempts": 1}),
        )
        .await;

    let mut deployment = deployment(dir.path(), "D5", 3);
    let result = pipeline(consul.clone(), dir.path(), vec![Box::new(ValidateDeployment)])
        .run(&mut deployment)
        .await;

    assert!(result.is_success);
    assert_eq!(deployment.attempt_count, 2);
    assert_eq!(report(&consul, "D5").await.number_of_attempts, Some(2));
}
