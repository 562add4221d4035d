//! Lifecycle events and the frames an isolated context writes on its wire

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Severity of a handler log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lifecycle event delivered to the caller, in emission order.
///
/// `Started` comes first, `Log` any number of times, and `Result` at most
/// once as the last event. Failures are not events: they reach the caller as
/// a rejected outcome, preceded by an error-level `Log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ExecEvent {
    Started {
        run_id: String,
        ts: DateTime<Utc>,
    },
    Log {
        run_id: String,
        ts: DateTime<Utc>,
        level: LogLevel,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Result {
        run_id: String,
        ts: DateTime<Utc>,
        duration_ms: u64,
        #[serde(default)]
        output: serde_json::Value,
    },
}

impl ExecEvent {
    pub fn started(run_id: impl Into<String>) -> Self {
        ExecEvent::Started {
            run_id: run_id.into(),
            ts: Utc::now(),
        }
    }

    pub fn log(
        run_id: impl Into<String>,
        level: LogLevel,
        event: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        ExecEvent::Log {
            run_id: run_id.into(),
            ts: Utc::now(),
            level,
            event: event.into(),
            data,
        }
    }

    pub fn result(run_id: impl Into<String>, duration_ms: u64, output: serde_json::Value) -> Self {
        ExecEvent::Result {
            run_id: run_id.into(),
            ts: Utc::now(),
            duration_ms,
            output,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            ExecEvent::Started { run_id, .. }
            | ExecEvent::Log { run_id, .. }
            | ExecEvent::Result { run_id, .. } => run_id,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            ExecEvent::Started { ts, .. }
            | ExecEvent::Log { ts, .. }
            | ExecEvent::Result { ts, .. } => *ts,
        }
    }

    /// Whether this event ends the stream for its run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecEvent::Result { .. })
    }

    /// Short name of the variant, matching the wire `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            ExecEvent::Started { .. } => "STARTED",
            ExecEvent::Log { .. } => "LOG",
            ExecEvent::Result { .. } => "RESULT",
        }
    }
}

/// Why an isolated context gave up on a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The submitted code did not yield a callable handler
    Load,
    /// The handler threw or rejected
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FailedTag {
    #[serde(rename = "FAILED")]
    Failed,
}

/// Terminal failure frame written by the isolated context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFailure {
    #[serde(rename = "type")]
    tag: FailedTag,
    pub run_id: String,
    pub ts: DateTime<Utc>,
    pub kind: FailureKind,
    pub message: String,
}

impl ContextFailure {
    pub fn new(run_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            tag: FailedTag::Failed,
            run_id: run_id.into(),
            ts: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

/// One newline-delimited JSON frame read from an isolated context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextFrame {
    Event(ExecEvent),
    Failed(ContextFailure),
}

impl ContextFrame {
    /// Decode a single wire line. Anything that is neither a lifecycle event
    /// nor a failure frame is rejected.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(FrameError::Empty);
        }
        serde_json::from_str(line).map_err(|e| FrameError::Unrecognized {
            reason: e.to_string(),
            line: truncate(line, 200),
        })
    }

    /// Encode as one wire line, without the trailing newline
    pub fn to_line(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))
    }

    pub fn run_id(&self) -> &str {
        match self {
            ContextFrame::Event(event) => event.run_id(),
            ContextFrame::Failed(failure) => &failure.run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            ContextFrame::Event(event) => event.is_terminal(),
            ContextFrame::Failed(_) => true,
        }
    }
}

impl From<ExecEvent> for ContextFrame {
    fn from(event: ExecEvent) -> Self {
        ContextFrame::Event(event)
    }
}

impl From<ContextFailure> for ContextFrame {
    fn from(failure: ContextFailure) -> Self {
        ContextFrame::Failed(failure)
    }
}

/// Wire frame could not be decoded or encoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unrecognized frame ({reason}): {line}")]
    Unrecognized { reason: String, line: String },

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
