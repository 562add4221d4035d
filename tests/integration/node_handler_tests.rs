//! End-to-end handler execution through the bundled node harness

use crate::common::{node_client, node_strips_types, setup_test_logging};
use crate::require_node;
use assert_matches::assert_matches;
use runcenter_common::{ExecEvent, ExecRequest, Language, LogLevel};
use runcenter_sandbox::{CancellationToken, ErrorKind, RunError};
use serde_json::json;
use std::time::{Duration, Instant};

fn kinds(events: &[ExecEvent]) -> Vec<&'static str> {
    events.iter().map(ExecEvent::kind).collect()
}

fn logs(events: &[ExecEvent]) -> Vec<(LogLevel, &str)> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecEvent::Log { level, event, .. } => Some((*level, event.as_str())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_handler_increments_input() {
    require_node!();
    setup_test_logging();

    let request = ExecRequest::new(
        "r1",
        "async function handler(input) { return input + 1; }",
    )
    .with_input(json!(1))
    .with_provenance("f1", "n1");

    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    let outcome = result.unwrap();
    assert_eq!(outcome.run_id, "r1");
    assert_eq!(outcome.output, json!(2));
    assert_eq!(kinds(&events), vec!["STARTED", "RESULT"]);
    assert!(events.iter().all(|e| e.run_id() == "r1"));
    assert_matches!(
        events.last(),
        Some(ExecEvent::Result { output, .. }) if *output == json!(2)
    );
}

#[tokio::test]
async fn test_missing_handler_is_load_error() {
    require_node!();
    setup_test_logging();

    let request = ExecRequest::new("r2", "const x = 1;");
    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_matches!(
        result,
        Err(RunError::Load(msg)) if msg == "handler is not exported as a function"
    );
    assert_eq!(kinds(&events), vec!["STARTED"]);
}

#[tokio::test]
async fn test_syntax_error_is_load_error() {
    require_node!();
    setup_test_logging();

    let request = ExecRequest::new("r3", "function handler( {");
    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::LoadError);
    assert!(!events.iter().any(ExecEvent::is_terminal));
}

#[tokio::test]
async fn test_thrown_error_is_logged_then_rejected() {
    require_node!();
    setup_test_logging();

    let request = ExecRequest::new(
        "r4",
        "async function handler() { throw new Error('boom'); }",
    );
    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_matches!(result, Err(RunError::Handler(msg)) if msg == "boom");
    assert_eq!(kinds(&events), vec!["STARTED", "LOG"]);
    assert_eq!(logs(&events), vec![(LogLevel::Error, "boom")]);
}

#[tokio::test]
async fn test_thrown_string_keeps_message() {
    require_node!();
    setup_test_logging();

    let request = ExecRequest::new("r5", "function handler() { throw 'plain'; }");
    let (_, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_matches!(result, Err(RunError::Handler(msg)) if msg == "plain");
}

#[tokio::test]
async fn test_logger_and_env_reach_handler() {
    require_node!();
    setup_test_logging();

    let code = r#"
        async function handler(input, context) {
            context.log.info('fetching', { region: context.env.REGION });
            context.log.warn('slow');
            return { region: context.env.REGION, seen: input.n };
        }
    "#;
    let request = ExecRequest::new("r6", code)
        .with_input(json!({"n": 3}))
        .with_env("REGION", "eu");

    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_eq!(result.unwrap().output, json!({"region": "eu", "seen": 3}));
    assert_eq!(kinds(&events), vec!["STARTED", "LOG", "LOG", "RESULT"]);
    assert_matches!(
        &events[1],
        ExecEvent::Log { level: LogLevel::Info, event, data: Some(data), .. }
            if event == "fetching" && *data == json!({"region": "eu"})
    );
    assert_eq!(logs(&events)[1], (LogLevel::Warn, "slow"));
}

#[tokio::test]
async fn test_console_output_does_not_corrupt_stream() {
    require_node!();
    setup_test_logging();

    let code = r#"
        function handler(input) {
            console.log('chatty');
            process.stdout.write('raw\n');
            return input;
        }
    "#;
    let request = ExecRequest::new("r7", code).with_input(json!("ok"));
    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_eq!(result.unwrap().output, json!("ok"));
    assert_eq!(kinds(&events), vec!["STARTED", "RESULT"]);
}

#[tokio::test]
async fn test_busy_loop_hits_timeout() {
    require_node!();
    setup_test_logging();

    let request =
        ExecRequest::new("r8", "function handler() { while (true) {} }").with_timeout_ms(500);

    let begin = Instant::now();
    let (events, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_matches!(result, Err(RunError::Timeout { timeout_ms: 500 }));
    assert!(begin.elapsed() < Duration::from_secs(10));
    assert_eq!(logs(&events), vec![(LogLevel::Error, "Timeout 500ms")]);
}

#[tokio::test]
async fn test_export_forms() {
    require_node!();
    setup_test_logging();

    let sources = [
        "module.exports.handler = async (input) => input + 1;",
        "module.exports = (input) => input + 1;",
        "export async function handler(input) { return input + 1; }",
        "export default function (input) { return input + 1; }",
        "const handler = (input) => input + 1;\nexport { handler };",
        "function run(input) { return input + 1; }\nexport { run as handler };",
    ];

    let client = node_client();
    for (i, code) in sources.iter().enumerate() {
        let request = ExecRequest::new(format!("exp-{}", i), *code).with_input(json!(41));
        let (_, result) = client.run_collect(request, CancellationToken::new()).await;
        assert_eq!(result.unwrap().output, json!(42), "source: {}", code);
    }
}

#[tokio::test]
async fn test_async_handler_and_undefined_output() {
    require_node!();
    setup_test_logging();

    let code = r#"
        async function handler() {
            await new Promise((resolve) => setTimeout(resolve, 50));
        }
    "#;
    let (_, result) = node_client()
        .run_collect(ExecRequest::new("r9", code), CancellationToken::new())
        .await;

    assert_eq!(result.unwrap().output, serde_json::Value::Null);
}

#[tokio::test]
async fn test_typescript_handler() {
    require_node!();
    if !node_strips_types() {
        eprintln!("skipping: node cannot strip TypeScript types");
        return;
    }
    setup_test_logging();

    let code = r#"
        interface Input { n: number }
        export async function handler(input: Input): Promise<number> {
            const doubled: number = input.n * 2;
            return doubled;
        }
    "#;
    let request = ExecRequest::new("r10", code)
        .with_language(Language::TypeScript)
        .with_input(json!({"n": 21}));

    let (_, result) = node_client()
        .run_collect(request, CancellationToken::new())
        .await;

    assert_eq!(result.unwrap().output, json!(42));
}
