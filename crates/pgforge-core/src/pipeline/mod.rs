//! Pipeline orchestration: Generate → Apply → GenerateInventory → RunConfig.
//!
//! Each operation is a short sequential protocol over the renderer, the
//! artifact store and the tool runner. One async mutex serializes the whole
//! sequence: the external tools are not safe for concurrent invocation
//! against the same workspace, so concurrent operations queue instead of
//! interleaving artifact reads and writes.
//!
//! Stage transitions happen only when an operation succeeds. Out-of-order
//! calls are rejected up front with a [`StageError`] instead of being left
//! for the external tool to fail on missing input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::{ArtifactKind, ArtifactStore, PersistenceError};
use crate::config::PipelineConfig;
use crate::invoke::{ToolInvocation, ToolInvocationResult, ToolRunner};
use crate::render::{
    ConfigBindings, InfraBindings, InventoryBindings, Renderer, TemplateError,
};
use crate::request::{ProvisioningRequest, RequestError};
use crate::topology::{ParseError, TopologyOutputs};

/// Credential variables handed to every infrastructure tool invocation.
/// Absent values are passed through as empty strings, never omitted.
pub const CREDENTIAL_VARS: [&str; 2] = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

/// How far the pipeline has progressed for the current workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Unstarted,
    Generated,
    Applied,
    InventoryReady,
    Configured,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Unstarted => "unstarted",
            PipelineStage::Generated => "generated",
            PipelineStage::Applied => "applied",
            PipelineStage::InventoryReady => "inventory_ready",
            PipelineStage::Configured => "configured",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation was invoked before its stage dependency was satisfied.
#[derive(Debug, Error)]
#[error("{operation} requires stage {required} or later, but the pipeline is at {actual}")]
pub struct StageError {
    pub operation: &'static str,
    pub required: PipelineStage,
    pub actual: PipelineStage,
}

/// Umbrella error for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// An external tool invocation did not succeed. The tool's own stderr is
    /// surfaced verbatim; no retry is attempted.
    #[error("{tool} {step} {status}: {stderr}")]
    ToolFailed {
        tool: String,
        step: &'static str,
        status: String,
        stderr: String,
    },
}

fn tool_failure(tool: &str, step: &'static str, result: &ToolInvocationResult) -> PipelineError {
    let status = match result.exit_code {
        Some(code) => format!("failed (exit {code})"),
        None => result.outcome.as_str().to_owned(),
    };
    PipelineError::ToolFailed {
        tool: tool.to_owned(),
        step,
        status,
        stderr: result.stderr.trim().to_owned(),
    }
}

fn require(
    actual: PipelineStage,
    required: PipelineStage,
    operation: &'static str,
) -> Result<(), StageError> {
    if actual >= required {
        Ok(())
    } else {
        Err(StageError {
            operation,
            required,
            actual,
        })
    }
}

/// Orchestrates the four pipeline operations against one workspace.
pub struct Pipeline {
    config: PipelineConfig,
    renderer: Renderer,
    store: ArtifactStore,
    runner: Arc<dyn ToolRunner>,
    cancel: CancellationToken,
    stage: Mutex<PipelineStage>,
}

impl Pipeline {
    /// Build a pipeline with a fresh `Unstarted` stage record.
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn ToolRunner>,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let renderer = Renderer::new()?;
        let store = ArtifactStore::new(&config.workspace_dir);
        Ok(Self {
            config,
            renderer,
            store,
            runner,
            cancel,
            stage: Mutex::new(PipelineStage::Unstarted),
        })
    }

    /// Build a pipeline whose stage is recovered from artifacts on disk.
    ///
    /// No pipeline state is persisted across processes; the tools' own
    /// artifacts are the only durable record. A Terraform state file implies
    /// a past apply, a written inventory implies the topology was queried.
    /// `Configured` leaves no artifact and is never recovered.
    pub fn resume(
        config: PipelineConfig,
        runner: Arc<dyn ToolRunner>,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new(config, runner, cancel)?;
        let detected = detect_stage(&pipeline.store);
        info!(stage = %detected, "recovered pipeline stage from workspace");
        *pipeline.stage.get_mut() = detected;
        Ok(pipeline)
    }

    /// Current stage of the pipeline.
    pub async fn stage(&self) -> PipelineStage {
        *self.stage.lock().await
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Generate: validate the request, render the infrastructure definition
    /// and the configuration playbook, and persist both.
    pub async fn generate(&self, request: &ProvisioningRequest) -> Result<(), PipelineError> {
        let mut stage = self.stage.lock().await;

        request.validate()?;

        let infra = self.renderer.infra(&InfraBindings::new(
            &self.config.region,
            &self.config.image_id,
            &request.instance_type,
            request.num_replicas,
        ))?;
        let playbook = self
            .renderer
            .config_playbook(&ConfigBindings::from_request(request))?;

        self.store.write(&infra)?;
        self.store.write(&playbook)?;

        *stage = PipelineStage::Generated;
        info!(
            postgres_version = %request.postgres_version,
            num_replicas = request.num_replicas,
            workspace = %self.store.root().display(),
            "generated infrastructure and configuration artifacts"
        );
        Ok(())
    }

    /// Apply: run the infrastructure tool's init and apply steps against the
    /// generated definition, with the credential overlay.
    pub async fn apply(&self) -> Result<(), PipelineError> {
        let mut stage = self.stage.lock().await;
        require(*stage, PipelineStage::Generated, "apply")?;

        self.run_terraform("init", &["init"]).await?;
        self.run_terraform("apply", &["apply", "-auto-approve"])
            .await?;

        *stage = PipelineStage::Applied;
        info!("infrastructure applied");
        Ok(())
    }

    /// GenerateInventory: query the applied infrastructure's outputs, parse
    /// the topology, and render the host inventory from it.
    ///
    /// A failed query aborts the operation; a successful query with missing
    /// output fields degrades to empty host groups.
    pub async fn generate_inventory(&self) -> Result<(), PipelineError> {
        let mut stage = self.stage.lock().await;
        require(*stage, PipelineStage::Applied, "inventory generation")?;

        let result = self.run_terraform("output", &["output", "-json"]).await?;
        let topology = TopologyOutputs::parse(&result.stdout)?;
        if topology.is_empty() {
            warn!("infrastructure reported no addresses; rendering empty host groups");
        }

        let inventory = self
            .renderer
            .inventory(&InventoryBindings::from_topology(&topology))?;
        self.store.write(&inventory)?;

        *stage = PipelineStage::InventoryReady;
        info!(
            primaries = topology.primary_addrs.len(),
            replicas = topology.replica_addrs.len(),
            "host inventory generated"
        );
        Ok(())
    }

    /// RunConfig: run the configuration tool against the written playbook
    /// and inventory.
    pub async fn run_config(&self) -> Result<(), PipelineError> {
        let mut stage = self.stage.lock().await;
        require(*stage, PipelineStage::InventoryReady, "configuration run")?;

        let playbook = self.store.path_of(ArtifactKind::ConfigPlaybook);
        let inventory = self.store.path_of(ArtifactKind::HostInventory);
        let invocation = ToolInvocation {
            program: self.config.ansible_playbook_bin.clone(),
            args: vec![
                playbook.display().to_string(),
                "-i".to_owned(),
                inventory.display().to_string(),
            ],
            working_dir: self.store.working_dir(ArtifactKind::ConfigPlaybook),
            env: HashMap::new(),
            timeout: self.config.tool_timeout(),
        };

        let result = self.runner.run(&invocation, &self.cancel).await;
        if !result.succeeded() {
            return Err(tool_failure(
                &self.config.ansible_playbook_bin,
                "playbook",
                &result,
            ));
        }

        *stage = PipelineStage::Configured;
        info!("configuration playbook completed");
        Ok(())
    }

    /// Run one infrastructure tool step in the definition's working
    /// directory with the credential overlay, failing on non-success.
    async fn run_terraform(
        &self,
        step: &'static str,
        args: &[&str],
    ) -> Result<ToolInvocationResult, PipelineError> {
        let invocation = ToolInvocation {
            program: self.config.terraform_bin.clone(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            working_dir: self.store.working_dir(ArtifactKind::InfraDefinition),
            env: credential_overlay(),
            timeout: self.config.tool_timeout(),
        };

        let result = self.runner.run(&invocation, &self.cancel).await;
        if !result.succeeded() {
            return Err(tool_failure(&self.config.terraform_bin, step, &result));
        }
        Ok(result)
    }
}

/// Build the credential overlay from the process environment. Unset
/// variables become empty entries so the tool sees them explicitly.
fn credential_overlay() -> HashMap<String, String> {
    CREDENTIAL_VARS
        .iter()
        .map(|name| ((*name).to_owned(), std::env::var(name).unwrap_or_default()))
        .collect()
}

/// Infer the pipeline stage from what is on disk.
fn detect_stage(store: &ArtifactStore) -> PipelineStage {
    if store.exists(ArtifactKind::HostInventory) {
        return PipelineStage::InventoryReady;
    }
    let tfstate = store
        .working_dir(ArtifactKind::InfraDefinition)
        .join("terraform.tfstate");
    if tfstate.is_file() {
        return PipelineStage::Applied;
    }
    if store.exists(ArtifactKind::InfraDefinition) && store.exists(ArtifactKind::ConfigPlaybook) {
        return PipelineStage::Generated;
    }
    PipelineStage::Unstarted
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::invoke::InvocationOutcome;
    use crate::request::TuningSettings;

    /// Replays canned results and records every invocation it receives.
    struct ScriptedRunner {
        results: StdMutex<VecDeque<ToolInvocationResult>>,
        calls: StdMutex<Vec<ToolInvocation>>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<ToolInvocationResult>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ToolInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: &ToolInvocation,
            _cancel: &CancellationToken,
        ) -> ToolInvocationResult {
            self.calls.lock().unwrap().push(invocation.clone());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ok(""))
        }
    }

    fn ok(stdout: &str) -> ToolInvocationResult {
        ToolInvocationResult {
            outcome: InvocationOutcome::Completed,
            exit_code: Some(0),
            stdout: stdout.to_owned(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    fn failed(exit_code: i32, stderr: &str) -> ToolInvocationResult {
        ToolInvocationResult {
            outcome: InvocationOutcome::Completed,
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_owned(),
            duration_ms: 1,
        }
    }

    fn request() -> ProvisioningRequest {
        ProvisioningRequest {
            postgres_version: "15".to_owned(),
            instance_type: "t3.medium".to_owned(),
            num_replicas: 2,
            settings: TuningSettings {
                max_connections: "100".to_owned(),
                shared_buffers: "256MB".to_owned(),
            },
        }
    }

    fn pipeline_in(
        dir: &std::path::Path,
        runner: Arc<dyn ToolRunner>,
    ) -> Pipeline {
        let config = PipelineConfig {
            workspace_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        };
        Pipeline::new(config, runner, CancellationToken::new()).unwrap()
    }

    const TOPOLOGY_JSON: &str = r#"{
        "instance_ips": { "value": ["10.0.0.1"] },
        "replica_ips": { "value": ["10.0.0.2", "10.0.0.3"] }
    }"#;

    #[tokio::test]
    async fn generate_writes_both_artifacts_and_advances_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();

        assert_eq!(pipeline.stage().await, PipelineStage::Generated);
        let infra = pipeline.store().read(ArtifactKind::InfraDefinition).unwrap();
        assert_eq!(
            infra.matches("resource \"aws_instance\" \"replica_").count(),
            2
        );
        let playbook = pipeline.store().read(ArtifactKind::ConfigPlaybook).unwrap();
        assert!(playbook.contains("max_connections = 100"));
        assert!(playbook.contains("shared_buffers = 256MB"));
    }

    #[tokio::test]
    async fn generate_rejects_invalid_request_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let pipeline = pipeline_in(tmp.path(), runner);

        let mut bad = request();
        bad.postgres_version = String::new();
        let err = pipeline.generate(&bad).await.unwrap_err();

        assert!(matches!(err, PipelineError::Request(_)));
        assert_eq!(pipeline.stage().await, PipelineStage::Unstarted);
        assert!(!pipeline.store().exists(ArtifactKind::InfraDefinition));
    }

    #[tokio::test]
    async fn apply_before_generate_is_rejected_without_invoking_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let pipeline = pipeline_in(tmp.path(), runner.clone());

        let err = pipeline.apply().await.unwrap_err();

        assert!(matches!(err, PipelineError::Stage(_)));
        assert!(runner.calls().is_empty(), "no tool should have run");
    }

    #[tokio::test]
    async fn apply_runs_init_then_apply_with_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), ok("")]);
        let pipeline = pipeline_in(tmp.path(), runner.clone());

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();

        assert_eq!(pipeline.stage().await, PipelineStage::Applied);
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["init"]);
        assert_eq!(calls[1].args, vec!["apply", "-auto-approve"]);
        for call in &calls {
            assert!(call.working_dir.ends_with("terraform"));
            assert!(call.working_dir.is_absolute());
            for name in CREDENTIAL_VARS {
                assert!(
                    call.env.contains_key(name),
                    "credential {name} must be present even when unset"
                );
            }
        }
    }

    #[tokio::test]
    async fn failed_apply_surfaces_stderr_and_keeps_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), failed(1, "InvalidClientTokenId")]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();
        let err = pipeline.apply().await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("InvalidClientTokenId"), "got: {message}");
        assert!(message.contains("exit 1"));
        assert_eq!(pipeline.stage().await, PipelineStage::Generated);
    }

    #[tokio::test]
    async fn inventory_renders_host_groups_from_tool_output() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), ok(""), ok(TOPOLOGY_JSON)]);
        let pipeline = pipeline_in(tmp.path(), runner.clone());

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        pipeline.generate_inventory().await.unwrap();

        assert_eq!(pipeline.stage().await, PipelineStage::InventoryReady);
        let calls = runner.calls();
        assert_eq!(calls[2].args, vec!["output", "-json"]);

        let hosts = pipeline.store().read(ArtifactKind::HostInventory).unwrap();
        assert!(hosts.contains("[primary]"));
        assert!(hosts.contains("10.0.0.1"));
        assert!(hosts.contains("10.0.0.2"));
        assert!(hosts.contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn inventory_fails_fast_when_output_query_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let runner =
            ScriptedRunner::new(vec![ok(""), ok(""), failed(1, "no state file was found")]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        let err = pipeline.generate_inventory().await.unwrap_err();

        assert!(err.to_string().contains("no state file was found"));
        assert_eq!(pipeline.stage().await, PipelineStage::Applied);
        assert!(!pipeline.store().exists(ArtifactKind::HostInventory));
    }

    #[tokio::test]
    async fn inventory_tolerates_missing_outputs_with_empty_groups() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), ok(""), ok("{}")]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        pipeline.generate_inventory().await.unwrap();

        assert_eq!(pipeline.stage().await, PipelineStage::InventoryReady);
        let hosts = pipeline.store().read(ArtifactKind::HostInventory).unwrap();
        assert!(hosts.contains("[primary]"));
        assert!(hosts.contains("[replicas]"));
    }

    #[tokio::test]
    async fn malformed_output_json_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), ok(""), ok("Outputs:\n\nempty")]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        let err = pipeline.generate_inventory().await.unwrap_err();

        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[tokio::test]
    async fn run_config_passes_playbook_and_inventory_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let runner =
            ScriptedRunner::new(vec![ok(""), ok(""), ok(TOPOLOGY_JSON), ok("")]);
        let pipeline = pipeline_in(tmp.path(), runner.clone());

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        pipeline.generate_inventory().await.unwrap();
        pipeline.run_config().await.unwrap();

        assert_eq!(pipeline.stage().await, PipelineStage::Configured);
        let calls = runner.calls();
        let ansible = &calls[3];
        assert!(ansible.args[0].ends_with("playbook.yml"));
        assert_eq!(ansible.args[1], "-i");
        assert!(ansible.args[2].ends_with("hosts"));
        assert!(std::path::Path::new(&ansible.args[0]).is_absolute());
    }

    #[tokio::test]
    async fn run_config_before_inventory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![ok(""), ok("")]);
        let pipeline = pipeline_in(tmp.path(), runner.clone());

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        let err = pipeline.run_config().await.unwrap_err();

        assert!(matches!(err, PipelineError::Stage(_)));
        assert_eq!(runner.calls().len(), 2, "only the apply steps should have run");
    }

    #[tokio::test]
    async fn generate_resets_a_completed_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let runner =
            ScriptedRunner::new(vec![ok(""), ok(""), ok(TOPOLOGY_JSON), ok("")]);
        let pipeline = pipeline_in(tmp.path(), runner);

        pipeline.generate(&request()).await.unwrap();
        pipeline.apply().await.unwrap();
        pipeline.generate_inventory().await.unwrap();
        pipeline.run_config().await.unwrap();

        pipeline.generate(&request()).await.unwrap();
        assert_eq!(pipeline.stage().await, PipelineStage::Generated);

        let err = pipeline.run_config().await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage(_)));
    }

    #[tokio::test]
    async fn stage_ordering_matches_pipeline_order() {
        assert!(PipelineStage::Unstarted < PipelineStage::Generated);
        assert!(PipelineStage::Generated < PipelineStage::Applied);
        assert!(PipelineStage::Applied < PipelineStage::InventoryReady);
        assert!(PipelineStage::InventoryReady < PipelineStage::Configured);
    }

    #[tokio::test]
    async fn resume_detects_generated_stage_from_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let pipeline = pipeline_in(tmp.path(), runner);
        pipeline.generate(&request()).await.unwrap();

        let resumed = Pipeline::resume(
            PipelineConfig {
                workspace_dir: tmp.path().to_path_buf(),
                ..PipelineConfig::default()
            },
            ScriptedRunner::new(vec![]),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(resumed.stage().await, PipelineStage::Generated);
    }

    #[tokio::test]
    async fn resume_detects_applied_stage_from_state_file() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let pipeline = pipeline_in(tmp.path(), runner);
        pipeline.generate(&request()).await.unwrap();
        std::fs::write(
            pipeline
                .store()
                .working_dir(ArtifactKind::InfraDefinition)
                .join("terraform.tfstate"),
            "{}",
        )
        .unwrap();

        let resumed = Pipeline::resume(
            PipelineConfig {
                workspace_dir: tmp.path().to_path_buf(),
                ..PipelineConfig::default()
            },
            ScriptedRunner::new(vec![]),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(resumed.stage().await, PipelineStage::Applied);
    }

    #[tokio::test]
    async fn resume_on_empty_workspace_is_unstarted() {
        let tmp = tempfile::tempdir().unwrap();
        let resumed = Pipeline::resume(
            PipelineConfig {
                workspace_dir: tmp.path().to_path_buf(),
                ..PipelineConfig::default()
            },
            ScriptedRunner::new(vec![]),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(resumed.stage().await, PipelineStage::Unstarted);
    }
}
