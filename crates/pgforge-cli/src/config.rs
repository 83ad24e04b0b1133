//! Configuration file management for pgforge.
//!
//! Provides a TOML-based config file at `~/.config/pgforge/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pgforge_core::config::PipelineConfig;

/// On-disk config file shape.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Return the pgforge config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/pgforge` or `~/.config/pgforge`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("pgforge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("pgforge")
}

/// Return the path to the pgforge config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

/// Resolve the pipeline configuration.
///
/// Chain, strongest first: `--workspace` CLI flag, `PGFORGE_*` env vars,
/// the config file, compiled-in defaults.
pub fn resolve(cli_workspace: Option<&str>) -> Result<PipelineConfig> {
    let mut config = load_config().map(|f| f.pipeline).unwrap_or_default();

    if let Ok(dir) = std::env::var("PGFORGE_WORKSPACE") {
        config.workspace_dir = PathBuf::from(dir);
    }
    if let Ok(bin) = std::env::var("PGFORGE_TERRAFORM_BIN") {
        config.terraform_bin = bin;
    }
    if let Ok(bin) = std::env::var("PGFORGE_ANSIBLE_PLAYBOOK_BIN") {
        config.ansible_playbook_bin = bin;
    }

    if let Some(dir) = cli_workspace {
        config.workspace_dir = PathBuf::from(dir);
    }

    Ok(config)
}
