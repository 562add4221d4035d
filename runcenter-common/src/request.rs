//! Execution request types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied when a request carries no `controls.timeoutMs`.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Source dialect of the submitted handler code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[serde(alias = "js")]
    JavaScript,
    #[serde(alias = "ts")]
    TypeScript,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            other => Err(ValidationError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Per-attempt execution controls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controls {
    /// Hard timeout in milliseconds (None = `DEFAULT_TIMEOUT_MS`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Retry budget managed by the caller. Carried for the caller's benefit;
    /// the engine runs every request exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl Controls {
    /// Timeout that will actually be enforced, given a fallback default
    pub fn effective_timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout_ms.unwrap_or(default_ms)
    }

    /// Timeout that will actually be enforced with the built-in default
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_millis(self.effective_timeout_ms(DEFAULT_TIMEOUT_MS))
    }
}

/// One execution attempt of user-authored handler code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    /// Caller-assigned identifier, unique per attempt
    pub run_id: String,

    /// Provenance: the flow node this attempt belongs to
    #[serde(default)]
    pub node_id: String,

    /// Provenance: the flow this attempt belongs to
    #[serde(default)]
    pub flow_id: String,

    /// Source text defining exactly one `handler(input, context)` function
    pub code: String,

    #[serde(default)]
    pub language: Language,

    #[serde(default)]
    pub input: serde_json::Value,

    #[serde(default)]
    pub controls: Controls,

    /// Read-only variables exposed to the handler as `context.env`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ExecRequest {
    /// Create a javascript request with a `null` input and default controls
    pub fn new(run_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: String::new(),
            flow_id: String::new(),
            code: code.into(),
            language: Language::default(),
            input: serde_json::Value::Null,
            controls: Controls::default(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.controls.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.controls.retries = Some(retries);
        self
    }

    /// Add an environment variable visible to the handler
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_provenance(mut self, flow_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.flow_id = flow_id.into();
        self.node_id = node_id.into();
        self
    }

    /// Parse a request coming off the validation gate.
    ///
    /// A structurally incomplete document is reported as a validation
    /// failure rather than a generic JSON error.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let request: ExecRequest =
            serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Structural checks the engine relies on
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_id.trim().is_empty() {
            return Err(ValidationError::MissingField("runId"));
        }
        if self.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code"));
        }
        if self.controls.timeout_ms == Some(0) {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Malformed request reaching the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("controls.timeoutMs must be greater than zero")]
    InvalidTimeout,

    #[error("unknown language '{0}'")]
    UnknownLanguage(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}
