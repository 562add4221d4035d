//! Run client against real child processes speaking the frame protocol

use crate::common::{self, setup_test_logging, shell_client};
use assert_matches::assert_matches;
use futures::future::join_all;
use runcenter_common::{ExecEvent, ExecRequest, LogLevel};
use runcenter_sandbox::{CancellationToken, ErrorKind, RunError};
use serde_json::json;
use std::time::{Duration, Instant};

fn request(run_id: &str) -> ExecRequest {
    ExecRequest::new(run_id, "function handler(input) { return input; }")
}

fn kinds(events: &[ExecEvent]) -> Vec<&'static str> {
    events.iter().map(ExecEvent::kind).collect()
}

#[tokio::test]
async fn test_success_stream() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        common::log("info", "loading"),
        common::log("debug", "computing"),
        common::result(7, "2"),
    ]));

    let (events, result) = client.run_collect(request("p1"), CancellationToken::new()).await;

    let outcome = result.unwrap();
    assert_eq!(outcome.run_id, "p1");
    assert_eq!(outcome.output, json!(2));
    assert_eq!(outcome.duration_ms, 7);
    assert_eq!(kinds(&events), vec!["STARTED", "LOG", "LOG", "RESULT"]);
    assert!(events.iter().all(|e| e.run_id() == "p1"));
}

#[tokio::test]
async fn test_handler_failure_logged_then_rejected() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        common::log("error", "bad things"),
        common::failed("handler", "bad things"),
    ]));

    let (events, result) = client.run_collect(request("p2"), CancellationToken::new()).await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandlerError);
    assert_eq!(err.to_string(), "bad things");
    assert_matches!(
        events.last(),
        Some(ExecEvent::Log { level: LogLevel::Error, event, .. }) if event == "bad things"
    );
    assert!(!events.iter().any(ExecEvent::is_terminal));
}

#[tokio::test]
async fn test_timeout_kills_context() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        "exec sleep 30".to_string(),
    ]));

    let begin = Instant::now();
    let (events, result) = client
        .run_collect(request("p3").with_timeout_ms(300), CancellationToken::new())
        .await;

    assert_matches!(result, Err(RunError::Timeout { timeout_ms: 300 }));
    assert!(begin.elapsed() < Duration::from_secs(10));
    assert_eq!(kinds(&events), vec!["STARTED", "LOG"]);
    assert_matches!(
        &events[1],
        ExecEvent::Log { level: LogLevel::Error, event, .. } if event.contains("300")
    );
}

#[tokio::test]
async fn test_cancellation_kills_context() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        "sleep 5".to_string(),
        common::result(5000, "\"late\""),
    ]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let begin = Instant::now();
    let (events, result) = client.run_collect(request("p4"), cancel).await;

    assert_matches!(result, Err(RunError::Cancelled));
    assert!(begin.elapsed() < Duration::from_secs(4));
    assert!(!events.iter().any(ExecEvent::is_terminal));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecEvent::Log { level: LogLevel::Error, .. })));
}

#[tokio::test]
async fn test_nothing_relayed_after_terminal() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        common::result(1, "null"),
        common::log("info", "straggler"),
        common::result(2, "null"),
    ]));

    let (events, result) = client.run_collect(request("p5"), CancellationToken::new()).await;

    assert!(result.is_ok());
    assert_eq!(kinds(&events), vec!["STARTED", "RESULT"]);
}

#[tokio::test]
async fn test_context_exit_without_outcome() {
    setup_test_logging();
    let client = shell_client(&common::script(&[common::started(), "exit 3".to_string()]));

    let (_, result) = client.run_collect(request("p6"), CancellationToken::new()).await;

    assert_matches!(result, Err(RunError::Context(msg)) if msg.contains("exit status: 3"));
}

#[tokio::test]
async fn test_console_noise_is_protocol_violation() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        "echo 'debug: about to compute'".to_string(),
        common::result(1, "1"),
    ]));

    let (_, result) = client.run_collect(request("p7"), CancellationToken::new()).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    setup_test_logging();
    let client = shell_client(&common::script(&[
        common::started(),
        common::log("info", "tick"),
        "sleep 0.2".to_string(),
        common::result(200, "\"done\""),
    ]));

    let runs = (0..8).map(|i| {
        let client = client.clone();
        async move {
            let run_id = format!("c{}", i);
            let (events, result) = client
                .run_collect(request(&run_id), CancellationToken::new())
                .await;
            (run_id, events, result)
        }
    });

    let begin = Instant::now();
    for (run_id, events, result) in join_all(runs).await {
        assert_eq!(result.unwrap().run_id, run_id);
        assert_eq!(kinds(&events), vec!["STARTED", "LOG", "RESULT"]);
        assert!(events.iter().all(|e| e.run_id() == run_id));
    }
    // Runs overlap rather than queueing behind each other
    assert!(begin.elapsed() < Duration::from_secs(4));
}
