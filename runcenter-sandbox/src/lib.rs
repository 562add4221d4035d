//! Run center sandbox - executes user-authored handlers in isolated contexts
//!
//! A [`RunClient`] takes an [`ExecRequest`](runcenter_common::ExecRequest),
//! spawns a dedicated context for it, relays the lifecycle events the context
//! reports, and settles on a single outcome under a hard timeout. The
//! capability-gated mode dispatches to a frozen registry of trusted functions
//! instead of loading submitted code.

mod capability;
mod client;
mod config;
mod context;
mod error;

pub use capability::{Capability, CapabilityExecutor, CapabilityRegistry, CapabilityRegistryBuilder};
pub use client::{RunClient, RunOutcome, RunStream};
pub use config::{InterpreterConfig, Interpreters, SandboxConfig, CONFIG_ENV, NODE_ENV};
pub use context::{ContextSpawner, ExecutionContext, ProcessContext, ProcessSpawner, HARNESS};
pub use error::{ErrorKind, RunError, RunResult};
pub use tokio_util::sync::CancellationToken;

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
