//! Process-backed isolated context - one interpreter process per request

use super::{ContextSpawner, ExecutionContext};
use crate::config::SandboxConfig;
use crate::error::{RunError, RunResult};
use async_trait::async_trait;
use futures::StreamExt;
use runcenter_common::{ContextFrame, ExecRequest};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Bootstrap script that loads the submitted code inside the interpreter
pub const HARNESS: &str = include_str!("harness.js");

/// Spawns a dedicated interpreter process for every request
pub struct ProcessSpawner {
    config: Arc<SandboxConfig>,
}

impl ProcessSpawner {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let interpreter = self.config.interpreter(request.language);

        let mut command = Command::new(&interpreter.program);
        command.args(&interpreter.args);
        if interpreter.harness {
            command.arg("-e").arg(HARNESS);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();

        for key in &self.config.passthrough_env {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }

        command
    }
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl ContextSpawner for ProcessSpawner {
    async fn spawn(&self, request: &ExecRequest) -> RunResult<Box<dyn ExecutionContext>> {
        let program = &self.config.interpreter(request.language).program;

        let mut child = self.command(request).spawn().map_err(|e| {
            RunError::Context(format!("Failed to spawn '{}': {}", program, e))
        })?;

        debug!(
            run_id = %request.run_id,
            pid = ?child.id(),
            program = %program,
            language = %request.language,
            "Spawned isolated context"
        );

        let mut payload = serde_json::to_vec(request)
            .map_err(|e| RunError::Protocol(format!("Failed to encode request: {}", e)))?;
        payload.push(b'\n');

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.start_kill();
            return Err(RunError::Context("Context pipes unavailable".to_string()));
        };

        // Written from a task so a context that never drains stdin cannot
        // stall the caller.
        let run_id = request.run_id.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(run_id = %run_id, "Failed to deliver request to context: {}", e);
            }
            let _ = stdin.shutdown().await;
        });

        if let Some(stderr) = stderr {
            let run_id = request.run_id.clone();
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(run_id = %run_id, "context stderr: {}", line);
                }
            });
        }

        Ok(Box::new(ProcessContext {
            run_id: request.run_id.clone(),
            child,
            frames: FramedRead::new(
                stdout,
                LinesCodec::new_with_max_length(self.config.max_frame_bytes),
            ),
            max_frame_bytes: self.config.max_frame_bytes,
            terminated: false,
        }))
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Handle to one running interpreter process
pub struct ProcessContext {
    run_id: String,
    child: Child,
    frames: FramedRead<ChildStdout, LinesCodec>,
    max_frame_bytes: usize,
    terminated: bool,
}

#[async_trait]
impl ExecutionContext for ProcessContext {
    async fn next_frame(&mut self) -> Option<RunResult<ContextFrame>> {
        loop {
            let line = match self.frames.next().await? {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Some(Err(RunError::Protocol(format!(
                        "frame exceeds {} bytes",
                        self.max_frame_bytes
                    ))))
                }
                Err(LinesCodecError::Io(e)) => {
                    return Some(Err(RunError::Context(format!(
                        "Failed to read from context: {}",
                        e
                    ))))
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            return Some(ContextFrame::parse(&line).map_err(RunError::from));
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        match self.child.start_kill() {
            Ok(()) => debug!(run_id = %self.run_id, "Terminated isolated context"),
            // Already exited and reaped
            Err(e) => debug!(run_id = %self.run_id, "Context already stopped: {}", e),
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    async fn exit_status(&mut self) -> Option<String> {
        match tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await {
            Ok(Ok(status)) => Some(status.to_string()),
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, "Failed to collect context exit status: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}
