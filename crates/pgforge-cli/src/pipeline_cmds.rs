//! One-shot pipeline commands.
//!
//! Each command builds a [`Pipeline`] resumed from whatever artifacts already
//! sit in the workspace, runs a single step, and prints the outcome. The HTTP
//! server in `serve_cmd` drives the same operations long-lived.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pgforge_core::artifact::ArtifactKind;
use pgforge_core::config::PipelineConfig;
use pgforge_core::invoke::ProcessRunner;
use pgforge_core::pipeline::Pipeline;
use pgforge_core::request::ProvisioningRequest;

/// Build a pipeline over the configured workspace, recovering the stage from
/// artifacts left by previous invocations.
pub fn open_pipeline(config: PipelineConfig) -> Result<Pipeline> {
    let cancel = CancellationToken::new();
    Pipeline::resume(config, Arc::new(ProcessRunner), cancel)
        .context("failed to open the provisioning workspace")
}

/// Execute `pgforge generate <request.json>`.
pub async fn run_generate(config: PipelineConfig, request_file: &str) -> Result<()> {
    let contents = std::fs::read_to_string(request_file)
        .with_context(|| format!("failed to read request file {request_file}"))?;
    let request: ProvisioningRequest = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse request file {request_file}"))?;

    let pipeline = open_pipeline(config)?;
    pipeline.generate(&request).await?;

    println!(
        "Generated Terraform and Ansible configurations under {}",
        pipeline.store().root().display()
    );
    println!(
        "  {}",
        pipeline.store().path_of(ArtifactKind::InfraDefinition).display()
    );
    println!(
        "  {}",
        pipeline.store().path_of(ArtifactKind::ConfigPlaybook).display()
    );
    Ok(())
}

/// Execute `pgforge apply`.
pub async fn run_apply(config: PipelineConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    pipeline.apply().await?;
    println!("Terraform applied successfully.");
    Ok(())
}

/// Execute `pgforge inventory`.
pub async fn run_inventory(config: PipelineConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    pipeline.generate_inventory().await?;
    println!(
        "Ansible inventory written to {}",
        pipeline.store().path_of(ArtifactKind::HostInventory).display()
    );
    Ok(())
}

/// Execute `pgforge configure`.
pub async fn run_configure(config: PipelineConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    pipeline.run_config().await?;
    println!("Ansible playbook executed successfully.");
    Ok(())
}

/// Execute `pgforge status`: print the recovered stage and artifact presence.
pub async fn run_status(config: PipelineConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let store = pipeline.store();

    println!("Workspace: {}", store.root().display());
    println!("Stage:     {}", pipeline.stage().await);
    println!("Artifacts:");
    for kind in [
        ArtifactKind::InfraDefinition,
        ArtifactKind::ConfigPlaybook,
        ArtifactKind::HostInventory,
    ] {
        let marker = if store.exists(kind) { "present" } else { "missing" };
        println!("  {:<10} {} ({marker})", kind.as_str(), store.path_of(kind).display());
    }
    Ok(())
}
