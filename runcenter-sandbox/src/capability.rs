//! Capability-gated execution: trusted, pre-registered functions invoked by
//! name instead of submitted source code.
//!
//! The registry is frozen once built and shared read-only between concurrent
//! invocations. A name that is not registered is always rejected; there is
//! no fallback path.

use crate::error::{RunError, RunResult};
use async_trait::async_trait;
use runcenter_common::{CapabilityRequest, CapabilityResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A trusted operation invocable by name
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

struct FnCapability<F>(F);

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.0)(args)
    }
}

/// Immutable mapping from capability name to callable
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Registry that denies everything
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Collects capabilities at startup; `build` freezes them
#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, capability: impl Capability + 'static) -> Self {
        let name = name.into();
        if self.entries.insert(name.clone(), Arc::new(capability)).is_some() {
            warn!(capability = %name, "Capability registered twice, keeping the last one");
        }
        self
    }

    pub fn register_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, FnCapability(f))
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            entries: self.entries,
        }
    }
}

/// Dispatches capability requests against a frozen registry
#[derive(Clone)]
pub struct CapabilityExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Option<Duration>,
}

impl CapabilityExecutor {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    pub fn with_registry(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bound each invocation. Unbounded unless set.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Dispatch and fold the outcome into a response value
    pub async fn dispatch(&self, request: CapabilityRequest) -> CapabilityResponse {
        match self.execute(request).await {
            Ok(result) => CapabilityResponse::success(result),
            Err(RunError::CapabilityDenied { .. }) => CapabilityResponse::not_allowed(),
            Err(e) => CapabilityResponse::failure(e.to_string()),
        }
    }

    /// Dispatch, rejecting unknown names with `CapabilityDenied` before the
    /// arguments are looked at
    pub async fn execute(&self, request: CapabilityRequest) -> RunResult<Value> {
        let CapabilityRequest {
            run_id,
            capability: name,
            args,
        } = request;

        let Some(capability) = self.registry.get(&name) else {
            warn!(capability = %name, run_id = ?run_id, "Capability not allowed");
            return Err(RunError::CapabilityDenied { capability: name });
        };

        debug!(capability = %name, run_id = ?run_id, args = args.len(), "Invoking capability");

        // Separate task so a panicking capability becomes a failure result
        let mut task = tokio::spawn(async move { capability.invoke(args).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(RunError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RunError::Handler(e.to_string())),
            Err(e) if e.is_panic() => Err(RunError::Handler(format!(
                "capability '{}' panicked",
                name
            ))),
            Err(e) => Err(RunError::Context(e.to_string())),
        }
    }
}
