//! Typed template-variable schemas, one per artifact kind.
//!
//! The replica count drives both the number of replica resource blocks and
//! the arity of the replica address output list. Carrying the count and the
//! expanded slots together lets [`InfraBindings::validate`] catch a mismatch
//! as a [`TemplateError`] before anything syntactically invalid is rendered.

use serde::Serialize;

use super::TemplateError;
use crate::request::ProvisioningRequest;
use crate::topology::TopologyOutputs;

/// One replica resource slot, identified by its zero-based index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaSlot {
    pub index: u32,
}

/// Bindings for the infrastructure definition template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraBindings {
    pub region: String,
    pub image_id: String,
    pub instance_type: String,
    pub num_replicas: u32,
    pub replicas: Vec<ReplicaSlot>,
}

impl InfraBindings {
    pub fn new(
        region: impl Into<String>,
        image_id: impl Into<String>,
        instance_type: impl Into<String>,
        num_replicas: u32,
    ) -> Self {
        Self {
            region: region.into(),
            image_id: image_id.into(),
            instance_type: instance_type.into(),
            num_replicas,
            replicas: (0..num_replicas)
                .map(|index| ReplicaSlot { index })
                .collect(),
        }
    }

    /// Check structural consistency between the declared count and the
    /// expanded replica slots.
    pub(super) fn validate(&self) -> Result<(), TemplateError> {
        if self.replicas.len() != self.num_replicas as usize {
            return Err(TemplateError::ReplicaArity {
                declared: self.num_replicas,
                actual: self.replicas.len(),
            });
        }
        for (position, slot) in self.replicas.iter().enumerate() {
            let expected = position as u32;
            if slot.index != expected {
                return Err(TemplateError::ReplicaIndex {
                    position,
                    found: slot.index,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Bindings for the configuration playbook template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigBindings {
    pub postgres_version: String,
    pub max_connections: String,
    pub shared_buffers: String,
}

impl ConfigBindings {
    pub fn from_request(request: &ProvisioningRequest) -> Self {
        Self {
            postgres_version: request.postgres_version.clone(),
            max_connections: request.settings.max_connections.clone(),
            shared_buffers: request.settings.shared_buffers.clone(),
        }
    }
}

/// Bindings for the host inventory template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryBindings {
    pub primary_addrs: Vec<String>,
    pub replica_addrs: Vec<String>,
}

impl InventoryBindings {
    pub fn from_topology(topology: &TopologyOutputs) -> Self {
        Self {
            primary_addrs: topology.primary_addrs.clone(),
            replica_addrs: topology.replica_addrs.clone(),
        }
    }
}
