mod config;
mod pipeline_cmds;
mod serve_cmd;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use pgforge_core::invoke::ProcessRunner;
use pgforge_core::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "pgforge", about = "PostgreSQL cluster provisioning orchestrator")]
struct Cli {
    /// Workspace directory for generated artifacts (overrides config/env)
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a pgforge config file with defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the provisioning HTTP API
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 5000)]
        port: u16,
    },
    /// Render Terraform and Ansible artifacts from a provisioning request
    Generate {
        /// Path to a JSON provisioning request file
        request: String,
    },
    /// Run terraform init and apply against the generated definition
    Apply,
    /// Read the applied topology and write the Ansible inventory
    Inventory,
    /// Run the Ansible playbook against the inventory
    Configure,
    /// Show the recovered pipeline stage and artifact presence
    Status,
}

/// Execute the `pgforge init` command: write a default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  pipeline.workspace_dir = {}", cfg.pipeline.workspace_dir.display());
    println!("  pipeline.region = {}", cfg.pipeline.region);
    println!("  pipeline.terraform_bin = {}", cfg.pipeline.terraform_bin);
    println!(
        "  pipeline.ansible_playbook_bin = {}",
        cfg.pipeline.ansible_playbook_bin
    );
    println!();
    println!("Next: run `pgforge serve` or `pgforge generate <request.json>`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Serve { bind, port } => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            let cancel = CancellationToken::new();
            let pipeline = Arc::new(Pipeline::resume(
                resolved,
                Arc::new(ProcessRunner),
                cancel.clone(),
            )?);
            serve_cmd::run_serve(pipeline, &bind, port, cancel).await?;
        }
        Commands::Generate { request } => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            pipeline_cmds::run_generate(resolved, &request).await?;
        }
        Commands::Apply => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            pipeline_cmds::run_apply(resolved).await?;
        }
        Commands::Inventory => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            pipeline_cmds::run_inventory(resolved).await?;
        }
        Commands::Configure => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            pipeline_cmds::run_configure(resolved).await?;
        }
        Commands::Status => {
            let resolved = config::resolve(cli.workspace.as_deref())?;
            pipeline_cmds::run_status(resolved).await?;
        }
    }

    Ok(())
}
