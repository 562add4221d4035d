//! Isolated execution contexts

mod process;

use crate::error::RunResult;
use async_trait::async_trait;
use runcenter_common::{ContextFrame, ExecRequest};

pub use process::{ProcessContext, ProcessSpawner, HARNESS};

/// A running, externally terminable unit of execution dedicated to one request.
///
/// The context talks to its owner only through the frames it produces.
#[async_trait]
pub trait ExecutionContext: Send {
    /// Next decoded frame, or `None` once the context has stopped producing
    /// output. Must be cancel-safe: the run client polls it inside `select!`.
    async fn next_frame(&mut self) -> Option<RunResult<ContextFrame>>;

    /// Forcibly stop the context. Calling it again is a no-op.
    fn terminate(&mut self);

    fn is_terminated(&self) -> bool;

    /// How the context ended, when known. Used to explain a context that
    /// went quiet without reporting an outcome.
    async fn exit_status(&mut self) -> Option<String> {
        None
    }
}

/// Creates a fresh execution context per request
#[async_trait]
pub trait ContextSpawner: Send + Sync {
    async fn spawn(&self, request: &ExecRequest) -> RunResult<Box<dyn ExecutionContext>>;

    /// Get spawner name
    fn name(&self) -> &str;
}
