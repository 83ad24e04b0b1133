//! Parsing of `terraform output -json` into provisioned topology addresses.
//!
//! Missing output fields degrade to empty sequences rather than failing:
//! downstream consumers can tolerate "not yet available". Only structurally
//! broken output (non-JSON, or not an object) is an error.

use serde_json::Value;
use thiserror::Error;

/// Errors produced when tool output cannot be interpreted at all.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("tool output is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("tool output is not a JSON object")]
    NotAnObject,
}

/// Addresses of provisioned infrastructure, parsed from the infrastructure
/// tool's structured output. Recomputed on demand, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyOutputs {
    /// Primary instance addresses, in output order.
    pub primary_addrs: Vec<String>,
    /// Replica instance addresses, in output order.
    pub replica_addrs: Vec<String>,
}

impl TopologyOutputs {
    /// Parse the JSON body produced by the infrastructure tool's
    /// output-query step.
    ///
    /// Expected shape: `{"instance_ips": {"value": [..]}, "replica_ips":
    /// {"value": [..]}}`. Either output may be absent.
    pub fn parse(json_text: &str) -> Result<Self, ParseError> {
        let outputs: Value = serde_json::from_str(json_text)?;
        if !outputs.is_object() {
            return Err(ParseError::NotAnObject);
        }
        Ok(Self {
            primary_addrs: address_list(&outputs, "instance_ips"),
            replica_addrs: address_list(&outputs, "replica_ips"),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.primary_addrs.is_empty() && self.replica_addrs.is_empty()
    }
}

/// Extract `outputs[name].value` as a string list, or empty when absent or
/// of an unexpected shape.
fn address_list(outputs: &Value, name: &str) -> Vec<String> {
    outputs
        .get(name)
        .and_then(|output| output.get("value"))
        .and_then(|value| value.as_array())
        .map(|addrs| {
            addrs
                .iter()
                .filter_map(|addr| addr.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
