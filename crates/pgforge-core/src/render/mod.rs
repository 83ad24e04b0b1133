//! Artifact template rendering.
//!
//! Pure text generation: a typed binding struct per artifact kind is
//! validated, then fed through a strict-mode handlebars registry. No I/O, no
//! side effects; identical bindings always produce byte-identical output.
//!
//! Tuning settings pass through verbatim as opaque payload. The renderer
//! never re-validates them as numbers or sizes.

mod bindings;

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;

use crate::artifact::{ArtifactKind, RenderedArtifact};

pub use bindings::{ConfigBindings, InfraBindings, InventoryBindings, ReplicaSlot};

/// Errors produced by binding validation or template expansion.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// An embedded template failed to parse at registry construction.
    #[error("embedded {kind} template is invalid: {source}")]
    Invalid {
        kind: ArtifactKind,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    /// Strict-mode expansion failed, e.g. a referenced binding is absent.
    #[error("rendering {kind} failed: {source}")]
    Render {
        kind: ArtifactKind,
        #[source]
        source: Box<handlebars::RenderError>,
    },

    /// The declared replica count and the replica slot list disagree.
    #[error("infra bindings declare {declared} replicas but carry {actual} slots")]
    ReplicaArity { declared: u32, actual: usize },

    /// Replica slot indices are not the contiguous sequence `0..n`.
    #[error("replica slot at position {position} has index {found}, expected {expected}")]
    ReplicaIndex {
        position: usize,
        found: u32,
        expected: u32,
    },
}

/// Terraform definition: one primary, N indexed replicas, and the two output
/// values the topology parser depends on. The `replica_ips` list suppresses
/// the separator on the last element so the rendered HCL stays valid for any
/// N, including `[]` for N = 0.
const INFRA_TEMPLATE: &str = r#"provider "aws" {
  region = "{{region}}"
}

resource "aws_instance" "primary" {
  ami           = "{{image_id}}"
  instance_type = "{{instance_type}}"
  tags = { Name = "postgres-primary" }
}

{{#each replicas~}}
resource "aws_instance" "replica_{{index}}" {
  ami           = "{{../image_id}}"
  instance_type = "{{../instance_type}}"
  tags = { Name = "postgres-replica-{{index}}" }
}

{{/each~}}
output "instance_ips" {
  value = [aws_instance.primary.public_ip]
}

output "replica_ips" {
  value = [{{#each replicas}}aws_instance.replica_{{index}}.public_ip{{#unless @last}}, {{/unless}}{{/each}}]
}
"#;

/// Ansible playbook: installs the requested PostgreSQL version and pins the
/// two tuning settings as line-level directives in postgresql.conf.
const PLAYBOOK_TEMPLATE: &str = r#"- name: Configure PostgreSQL
  hosts: all
  become: yes
  tasks:
    - name: Install PostgreSQL
      apt:
        name: postgresql-{{postgres_version}}
        state: present

    - name: Set max_connections
      lineinfile:
        path: /etc/postgresql/{{postgres_version}}/main/postgresql.conf
        regexp: '^max_connections'
        line: "max_connections = {{max_connections}}"
        state: present

    - name: Set shared_buffers
      lineinfile:
        path: /etc/postgresql/{{postgres_version}}/main/postgresql.conf
        regexp: '^shared_buffers'
        line: "shared_buffers = {{shared_buffers}}"
        state: present
"#;

/// Ansible inventory: role groups populated with the parsed topology
/// addresses, order preserved.
const INVENTORY_TEMPLATE: &str = r#"[primary]
{{#each primary_addrs~}}
{{this}}
{{/each~}}

[replicas]
{{#each replica_addrs~}}
{{this}}
{{/each~}}
"#;

/// Strict-mode template registry over the embedded artifact templates.
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);

        let templates = [
            (ArtifactKind::InfraDefinition, INFRA_TEMPLATE),
            (ArtifactKind::ConfigPlaybook, PLAYBOOK_TEMPLATE),
            (ArtifactKind::HostInventory, INVENTORY_TEMPLATE),
        ];
        for (kind, text) in templates {
            registry
                .register_template_string(kind.as_str(), text)
                .map_err(|source| TemplateError::Invalid {
                    kind,
                    source: Box::new(source),
                })?;
        }

        Ok(Self { registry })
    }

    /// Render the infrastructure definition.
    pub fn infra(&self, bindings: &InfraBindings) -> Result<RenderedArtifact, TemplateError> {
        bindings.validate()?;
        self.render(ArtifactKind::InfraDefinition, bindings)
    }

    /// Render the configuration playbook.
    pub fn config_playbook(
        &self,
        bindings: &ConfigBindings,
    ) -> Result<RenderedArtifact, TemplateError> {
        self.render(ArtifactKind::ConfigPlaybook, bindings)
    }

    /// Render the host inventory.
    pub fn inventory(
        &self,
        bindings: &InventoryBindings,
    ) -> Result<RenderedArtifact, TemplateError> {
        self.render(ArtifactKind::HostInventory, bindings)
    }

    fn render<T: Serialize>(
        &self,
        kind: ArtifactKind,
        data: &T,
    ) -> Result<RenderedArtifact, TemplateError> {
        let text = self
            .registry
            .render(kind.as_str(), data)
            .map_err(|source| TemplateError::Render {
                kind,
                source: Box::new(source),
            })?;
        Ok(RenderedArtifact { kind, text })
    }
}
