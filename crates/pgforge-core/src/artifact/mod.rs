//! Rendered artifact persistence.
//!
//! Each artifact kind has a fixed slot under the workspace directory. Writes
//! fully replace prior content for that kind (last writer wins); there is no
//! merging and no partial-write recovery.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The named artifact slots the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Terraform definition of the compute resources to provision.
    InfraDefinition,
    /// Ansible playbook describing post-provision software configuration.
    ConfigPlaybook,
    /// Ansible inventory mapping provisioned addresses to role groups.
    HostInventory,
}

impl ArtifactKind {
    /// Short identifier, also used as the template name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::InfraDefinition => "infra",
            ArtifactKind::ConfigPlaybook => "playbook",
            ArtifactKind::HostInventory => "inventory",
        }
    }

    /// Path of this artifact's slot, relative to the workspace root.
    ///
    /// The layout mirrors what the external tools expect: Terraform reads
    /// `terraform/`, Ansible reads `ansible/`.
    pub fn relative_path(&self) -> &'static str {
        match self {
            ArtifactKind::InfraDefinition => "terraform/main.tf",
            ArtifactKind::ConfigPlaybook => "ansible/playbook.yml",
            ArtifactKind::HostInventory => "ansible/hosts",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered artifact ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub kind: ArtifactKind,
    pub text: String,
}

/// Errors that can occur when persisting or reading artifacts.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to create artifact directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {kind} artifact at {path}: {source}")]
    Write {
        kind: ArtifactKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {kind} artifact at {path}: {source}")]
    Read {
        kind: ArtifactKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem store for rendered artifacts under one workspace root.
///
/// The root is made absolute up front so that tool invocations can be handed
/// absolute working directories instead of relying on the process-wide
/// current directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the slot for `kind`.
    pub fn path_of(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.relative_path())
    }

    /// Absolute directory a tool must run in to pick up the `kind` artifact.
    pub fn working_dir(&self, kind: ArtifactKind) -> PathBuf {
        let mut path = self.path_of(kind);
        path.pop();
        path
    }

    /// Whether the slot for `kind` currently holds content.
    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path_of(kind).is_file()
    }

    /// Persist an artifact, creating its directory if absent and completely
    /// replacing any prior content for that kind.
    pub fn write(&self, artifact: &RenderedArtifact) -> Result<(), PersistenceError> {
        let path = self.path_of(artifact.kind);
        let dir = self.working_dir(artifact.kind);
        std::fs::create_dir_all(&dir).map_err(|source| PersistenceError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        std::fs::write(&path, &artifact.text).map_err(|source| PersistenceError::Write {
            kind: artifact.kind,
            path,
            source,
        })
    }

    /// Read back the current content of the slot for `kind`.
    pub fn read(&self, kind: ArtifactKind) -> Result<String, PersistenceError> {
        let path = self.path_of(kind);
        std::fs::read_to_string(&path).map_err(|source| PersistenceError::Read {
            kind,
            path,
            source,
        })
    }
}
