use anyhow::{anyhow, bail, Context, Result};
use runcenter_common::{CapabilityRequest, ExecEvent, ExecRequest, Language, LogLevel};
use runcenter_sandbox::{
    CancellationToken, CapabilityExecutor, CapabilityRegistry, ErrorKind, RunClient, RunError,
    RunStream, SandboxConfig,
};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// Exit status used for timed out runs
const EXIT_TIMEOUT: i32 = 124;
/// Exit status used for cancelled runs
const EXIT_CANCELLED: i32 = 130;

/// Initialize tracing to stderr, and to `log_file` when given
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "runcenter={},runcenter_sandbox={},runcenter_common={}",
            log_level, log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Read a file, or stdin for "-"
fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Load a complete ExecRequest document
pub fn load_request(path: &Path) -> Result<ExecRequest> {
    let raw = read_source(path)?;
    Ok(ExecRequest::from_json(&raw)?)
}

/// Assemble a request from individual command line options
pub fn build_request(
    file: Option<&Path>,
    language: &str,
    input: Option<&str>,
    timeout_ms: Option<u64>,
    run_id: Option<String>,
    env: &[String],
) -> Result<ExecRequest> {
    let Some(file) = file else {
        bail!("either --file or --request is required");
    };

    let code = read_source(file)?;
    let language: Language = language.parse()?;
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut request = ExecRequest::new(run_id, code).with_language(language);

    if let Some(raw) = input {
        let value: Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
        request = request.with_input(value);
    }
    if let Some(ms) = timeout_ms {
        request = request.with_timeout_ms(ms);
    }
    for pair in env {
        let (key, value) = parse_env_pair(pair)?;
        request = request.with_env(key, value);
    }

    request.validate()?;
    Ok(request)
}

fn parse_env_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("invalid --env '{}', expected KEY=VALUE", pair),
    }
}

/// Forward a handler log line to the process-wide diagnostic sink
pub fn mirror_to_tracing(event: &ExecEvent) {
    match event {
        ExecEvent::Log {
            run_id,
            level,
            event,
            data,
            ..
        } => {
            let data = data.as_ref().map(Value::to_string).unwrap_or_default();
            match level {
                LogLevel::Debug => debug!(run_id = %run_id, data = %data, "{}", event),
                LogLevel::Info => info!(run_id = %run_id, data = %data, "{}", event),
                LogLevel::Warn => warn!(run_id = %run_id, data = %data, "{}", event),
                LogLevel::Error => error!(run_id = %run_id, data = %data, "{}", event),
            }
        }
        other => debug!(run_id = %other.run_id(), "{}", other.kind()),
    }
}

fn exit_code(err: &RunError) -> i32 {
    match err.kind() {
        ErrorKind::TimeoutError => EXIT_TIMEOUT,
        ErrorKind::CancelledError => EXIT_CANCELLED,
        _ => 1,
    }
}

/// Run a request, printing each event as a JSON line on stdout
pub async fn execute_run(config_path: Option<&Path>, request: ExecRequest) -> Result<i32> {
    let config = SandboxConfig::load(config_path)?;
    let client = RunClient::from_config(config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let RunStream {
        mut events,
        outcome,
    } = client.execute(request, cancel);

    while let Some(event) = events.recv().await {
        mirror_to_tracing(&event);
        println!("{}", serde_json::to_string(&event)?);
    }

    match outcome.await.context("Run task ended without an outcome")? {
        Ok(_) => Ok(0),
        Err(e) => {
            eprintln!("✗ {}: {}", e.kind(), e);
            Ok(exit_code(&e))
        }
    }
}

/// Capabilities this binary exposes
pub fn builtin_registry() -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .register_fn("echo", |args| Ok(Value::Array(args)))
        .register_fn("sum", |args| {
            let mut total = 0.0;
            for (i, arg) in args.iter().enumerate() {
                total += arg
                    .as_f64()
                    .ok_or_else(|| anyhow!("argument {} is not a number", i))?;
            }
            Ok(serde_json::json!(total))
        })
        .build()
}

/// Invoke a builtin capability and print the response
pub async fn execute_invoke(capability: String, args: &str) -> Result<i32> {
    let args: Vec<Value> = serde_json::from_str(args).context("--args must be a JSON array")?;
    let executor = CapabilityExecutor::new(builtin_registry());

    let response = executor
        .dispatch(CapabilityRequest::new(capability, args))
        .await;
    println!("{}", serde_json::to_string(&response)?);

    Ok(if response.ok { 0 } else { 1 })
}

/// Print the effective configuration as TOML
pub fn execute_config(config_path: Option<&Path>) -> Result<()> {
    let config = SandboxConfig::load(config_path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
