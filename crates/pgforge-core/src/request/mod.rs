//! Provisioning request model and shape validation.
//!
//! A [`ProvisioningRequest`] is one user-submitted intent: which PostgreSQL
//! version to install, what compute to put it on, how many replicas, and the
//! tuning settings to apply. Requests are immutable once deserialized and are
//! discarded after the pipeline run they trigger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by request shape validation.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("postgresVersion must not be empty")]
    EmptyVersion,

    #[error("instanceType must not be empty")]
    EmptyInstanceType,

    #[error("setting {name} must not be empty")]
    EmptySetting { name: &'static str },
}

/// PostgreSQL tuning settings carried by a request.
///
/// Values are opaque payload: they are inserted into the configuration
/// playbook verbatim and never re-validated as numbers or sizes here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningSettings {
    pub max_connections: String,
    pub shared_buffers: String,
}

/// One user-submitted provisioning intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    /// PostgreSQL major version to install, e.g. `"15"`.
    pub postgres_version: String,
    /// Compute instance type for the primary and every replica.
    pub instance_type: String,
    /// Number of replica instances. Zero is valid.
    pub num_replicas: u32,
    pub settings: TuningSettings,
}

impl ProvisioningRequest {
    /// Validate the request shape.
    ///
    /// Field presence and types are already enforced by deserialization;
    /// this rejects the degenerate values deserialization lets through.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.postgres_version.trim().is_empty() {
            return Err(RequestError::EmptyVersion);
        }
        if self.instance_type.trim().is_empty() {
            return Err(RequestError::EmptyInstanceType);
        }
        if self.settings.max_connections.trim().is_empty() {
            return Err(RequestError::EmptySetting {
                name: "maxConnections",
            });
        }
        if self.settings.shared_buffers.trim().is_empty() {
            return Err(RequestError::EmptySetting {
                name: "sharedBuffers",
            });
        }
        Ok(())
    }
}
