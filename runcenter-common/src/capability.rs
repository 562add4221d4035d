//! Capability-gated request/response pair

use serde::{Deserialize, Serialize};

/// Message returned when a capability is absent from the registry
pub const CAPABILITY_NOT_ALLOWED: &str = "capability not allowed";

/// Invocation of a pre-registered capability by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub capability: String,

    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl CapabilityRequest {
    pub fn new(capability: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            run_id: None,
            capability: capability.into(),
            args,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Outcome of a capability invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityResponse {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn not_allowed() -> Self {
        Self::failure(CAPABILITY_NOT_ALLOWED)
    }

    /// Whether this response is the deny-by-default rejection
    pub fn is_denied(&self) -> bool {
        !self.ok && self.error.as_deref() == Some(CAPABILITY_NOT_ALLOWED)
    }
}
