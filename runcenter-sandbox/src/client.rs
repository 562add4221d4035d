//! Run client - drives one isolated context per request to a single outcome

use crate::config::SandboxConfig;
use crate::context::{ContextSpawner, ExecutionContext, ProcessSpawner};
use crate::error::{RunError, RunResult};
use runcenter_common::{ContextFrame, ExecEvent, ExecRequest, FailureKind, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Successful end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: String,
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

/// Streaming view of a run started with [`RunClient::execute`]
pub struct RunStream {
    /// Lifecycle events in emission order
    pub events: mpsc::UnboundedReceiver<ExecEvent>,

    /// Final outcome when the run settles
    pub outcome: oneshot::Receiver<RunResult<RunOutcome>>,
}

/// Orchestrates isolated contexts: one fresh context per request, a hard
/// timeout, external cancellation, and guaranteed teardown.
#[derive(Clone)]
pub struct RunClient {
    spawner: Arc<dyn ContextSpawner>,
    default_timeout_ms: u64,
}

impl RunClient {
    pub fn new(spawner: impl ContextSpawner + 'static) -> Self {
        Self::with_spawner(Arc::new(spawner))
    }

    pub fn with_spawner(spawner: Arc<dyn ContextSpawner>) -> Self {
        Self {
            spawner,
            default_timeout_ms: runcenter_common::DEFAULT_TIMEOUT_MS,
        }
    }

    /// Process-backed client configured from `config`
    pub fn from_config(config: SandboxConfig) -> Self {
        let default_timeout_ms = config.default_timeout_ms;
        Self::new(ProcessSpawner::new(config)).with_default_timeout_ms(default_timeout_ms)
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Timeout enforced for `request`
    pub fn effective_timeout_ms(&self, request: &ExecRequest) -> u64 {
        request.controls.effective_timeout_ms(self.default_timeout_ms)
    }

    /// Run `request` to completion, handing every lifecycle event to
    /// `on_event` as it arrives.
    ///
    /// Resolves with the handler output, or rejects with exactly one of the
    /// [`RunError`] kinds. The context is terminated before this returns,
    /// whichever way it settles, and also if the future is dropped early.
    pub async fn run<F>(
        &self,
        request: ExecRequest,
        on_event: F,
        cancel: CancellationToken,
    ) -> RunResult<RunOutcome>
    where
        F: FnMut(ExecEvent) + Send,
    {
        request.validate()?;

        let timeout_ms = self.effective_timeout_ms(&request);
        let span = info_span!(
            "run",
            run_id = %request.run_id,
            flow_id = %request.flow_id,
            node_id = %request.node_id,
            language = %request.language,
            runtime = %self.spawner.name(),
        );

        async move {
            let started = std::time::Instant::now();
            info!(timeout_ms, retries = ?request.controls.retries, "Starting run");

            let result = self.drive(&request, timeout_ms, on_event, &cancel).await;

            match &result {
                Ok(outcome) => info!(
                    duration_ms = outcome.duration_ms,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run completed"
                ),
                Err(e) => warn!(kind = %e.kind(), "Run failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Start `request` in the background and stream its events
    pub fn execute(&self, request: ExecRequest, cancel: CancellationToken) -> RunStream {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let client = self.clone();
        tokio::spawn(async move {
            let result = client
                .run(
                    request,
                    move |event| {
                        let _ = events_tx.send(event);
                    },
                    cancel,
                )
                .await;
            let _ = outcome_tx.send(result);
        });

        RunStream {
            events: events_rx,
            outcome: outcome_rx,
        }
    }

    /// Run `request` and collect every event alongside the outcome
    pub async fn run_collect(
        &self,
        request: ExecRequest,
        cancel: CancellationToken,
    ) -> (Vec<ExecEvent>, RunResult<RunOutcome>) {
        let mut events = Vec::new();
        let result = self.run(request, |event| events.push(event), cancel).await;
        (events, result)
    }

    async fn drive<F>(
        &self,
        request: &ExecRequest,
        timeout_ms: u64,
        on_event: F,
        cancel: &CancellationToken,
    ) -> RunResult<RunOutcome>
    where
        F: FnMut(ExecEvent) + Send,
    {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let mut context = ContextGuard::new(self.spawner.spawn(request).await?);
        let mut relay = Relay::new(&request.run_id, on_event);

        let timer = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(timer);

        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    context.terminate();
                    debug!("Run cancelled by caller");
                    break Err(RunError::Cancelled);
                }

                _ = &mut timer => {
                    context.terminate();
                    relay.timed_out(timeout_ms);
                    break Err(RunError::Timeout { timeout_ms });
                }

                frame = context.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(settled) = relay.accept(frame) {
                            break settled;
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        let status = context
                            .exit_status()
                            .await
                            .unwrap_or_else(|| "unknown status".to_string());
                        break Err(RunError::Context(format!(
                            "context exited before reporting an outcome ({})",
                            status
                        )));
                    }
                },
            }
        };

        context.terminate();
        result
    }
}

/// Owns the context for one run and terminates it when dropped
struct ContextGuard {
    context: Box<dyn ExecutionContext>,
}

impl ContextGuard {
    fn new(context: Box<dyn ExecutionContext>) -> Self {
        Self { context }
    }

    async fn next_frame(&mut self) -> Option<RunResult<ContextFrame>> {
        self.context.next_frame().await
    }

    async fn exit_status(&mut self) -> Option<String> {
        self.context.exit_status().await
    }

    fn terminate(&mut self) {
        self.context.terminate();
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.context.terminate();
    }
}

/// Checks frame ordering for one run and forwards events to the caller
struct Relay<'a, F> {
    run_id: &'a str,
    sink: F,
    started: bool,
}

impl<'a, F> Relay<'a, F>
where
    F: FnMut(ExecEvent),
{
    fn new(run_id: &'a str, sink: F) -> Self {
        Self {
            run_id,
            sink,
            started: false,
        }
    }

    /// Handle one frame. Returns the settled result once the run is over.
    fn accept(&mut self, frame: ContextFrame) -> Option<RunResult<RunOutcome>> {
        if frame.run_id() != self.run_id {
            return Some(Err(RunError::Protocol(format!(
                "frame for run '{}' received on run '{}'",
                frame.run_id(),
                self.run_id
            ))));
        }

        let event = match frame {
            ContextFrame::Failed(failure) => {
                if !self.started {
                    return Some(Err(RunError::Protocol("FAILED before STARTED".to_string())));
                }
                return Some(Err(match failure.kind {
                    FailureKind::Load => RunError::Load(failure.message),
                    FailureKind::Handler => RunError::Handler(failure.message),
                }));
            }
            ContextFrame::Event(event) => event,
        };

        match &event {
            ExecEvent::Started { .. } if self.started => {
                return Some(Err(RunError::Protocol("duplicate STARTED".to_string())));
            }
            ExecEvent::Started { .. } => self.started = true,
            other if !self.started => {
                return Some(Err(RunError::Protocol(format!(
                    "{} before STARTED",
                    other.kind()
                ))));
            }
            _ => {}
        }

        let settled = match &event {
            ExecEvent::Result {
                duration_ms,
                output,
                ..
            } => Some(Ok(RunOutcome {
                run_id: self.run_id.to_string(),
                output: output.clone(),
                duration_ms: *duration_ms,
            })),
            _ => None,
        };

        (self.sink)(event);
        settled
    }

    /// Emit the synthetic timeout log, preceded by a synthetic STARTED when
    /// the context never got that far.
    fn timed_out(&mut self, timeout_ms: u64) {
        if !self.started {
            self.started = true;
            (self.sink)(ExecEvent::started(self.run_id));
        }
        (self.sink)(ExecEvent::log(
            self.run_id,
            LogLevel::Error,
            format!("Timeout {}ms", timeout_ms),
            Some(json!({ "timeoutMs": timeout_ms })),
        ));
    }
}
