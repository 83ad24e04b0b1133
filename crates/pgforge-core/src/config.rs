//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the pipeline needs to know about its environment: where to put
/// rendered artifacts, which tool binaries to invoke, and the fixed
/// infrastructure parameters baked into the templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for rendered artifacts (`terraform/`, `ansible/`).
    pub workspace_dir: PathBuf,
    /// AWS region the infrastructure definition targets.
    pub region: String,
    /// Machine image id for primary and replica instances.
    pub image_id: String,
    /// Infrastructure tool binary, resolved via `$PATH` unless absolute.
    pub terraform_bin: String,
    /// Configuration tool binary, resolved via `$PATH` unless absolute.
    pub ansible_playbook_bin: String,
    /// Upper bound on any single external tool invocation, in seconds.
    pub tool_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("workspace"),
            region: "ap-south-1".to_owned(),
            image_id: "ami-0dee22c13ea7a9a67".to_owned(),
            terraform_bin: "terraform".to_owned(),
            ansible_playbook_bin: "ansible-playbook".to_owned(),
            tool_timeout_secs: 600,
        }
    }
}

impl PipelineConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = PipelineConfig::default();
        assert_eq!(config.terraform_bin, "terraform");
        assert_eq!(config.ansible_playbook_bin, "ansible-playbook");
        assert_eq!(config.tool_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: PipelineConfig =
            toml::from_str("workspace_dir = \"/srv/pgforge\"\ntool_timeout_secs = 30\n").unwrap();
        assert_eq!(config.workspace_dir, PathBuf::from("/srv/pgforge"));
        assert_eq!(config.tool_timeout(), Duration::from_secs(30));
        assert_eq!(config.region, "ap-south-1");
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let config = PipelineConfig {
            tool_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.tool_timeout(), Duration::from_secs(1));
    }
}
