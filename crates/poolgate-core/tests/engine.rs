mod common;

use poolgate_core::engine::StreamItem;
use poolgate_core::upstream::StreamError;
use poolgate_pool::Availability;
use poolgate_protocol::error::ErrorCode;
use poolgate_protocol::upstream::request::ResponsesRequestBody;
use poolgate_protocol::upstream::types::ResponseUsage;

use common::{Outcome, ScriptedConnector, completed, created, harness, text};

fn simple_request() -> ResponsesRequestBody {
    ResponsesRequestBody {
        model: "gw-test".to_string(),
        stream: Some(true),
        ..Default::default()
    }
}

/// Drain the proxy stream to completion, returning all delivered items.
/// The pump settles the ledger before it closes the channel, so assertions
/// made after this returns observe the final state.
async fn drain(mut events: tokio::sync::mpsc::Receiver<StreamItem>) -> Vec<StreamItem> {
    let mut items = Vec::new();
    while let Some(item) = events.recv().await {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn auth_failure_retries_on_a_different_account() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Http(401),
        Outcome::Events(vec![created(), text("hi"), completed(None)]),
    ]);
    let h = harness(&[1, 2], connector.clone()).await;

    let proxy = h.engine.run("t", simple_request(), None).await.unwrap();
    let items = drain(proxy.events).await;

    let calls = connector.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0], calls[1]);
    assert_eq!(items.len(), 3);
    assert!(matches!(items[2], StreamItem::Event(ref e) if e.is_terminal()));
}

#[tokio::test]
async fn rate_limit_marks_account_and_retries() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Http(429),
        Outcome::Events(vec![created(), completed(None)]),
    ]);
    let h = harness(&[1, 2], connector.clone()).await;

    let proxy = h.engine.run("t", simple_request(), None).await.unwrap();
    drain(proxy.events).await;

    let first_tried = connector.calls()[0];
    assert!(matches!(
        h.pool.availability(first_tried).await,
        Availability::RateLimited { .. }
    ));
}

#[tokio::test]
async fn exhausted_rate_limit_surfaces_specific_code() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Http(429),
        Outcome::Http(429),
        Outcome::Http(429),
    ]);
    let h = harness(&[1, 2, 3], connector.clone()).await;

    let err = h.engine.run("t", simple_request(), None).await.unwrap_err();
    assert_eq!(err.envelope.error.code, ErrorCode::RateLimitExceeded);

    // Three attempts, three distinct accounts: no account tried twice.
    let mut calls = connector.calls();
    calls.sort_unstable();
    calls.dedup();
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn upstream_unavailable_not_collapsed_into_generic_error() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Http(500),
        Outcome::Http(502),
        Outcome::Http(503),
    ]);
    let h = harness(&[1, 2, 3], connector).await;

    let err = h.engine.run("t", simple_request(), None).await.unwrap_err();
    assert_eq!(err.envelope.error.code, ErrorCode::UpstreamUnavailable);
    assert_eq!(err.envelope.error.kind, "upstream_unavailable");
}

#[tokio::test]
async fn no_healthy_accounts_yields_no_accounts() {
    let connector = ScriptedConnector::new(vec![]);
    let h = harness(&[], connector).await;

    let err = h.engine.run("t", simple_request(), None).await.unwrap_err();
    assert_eq!(err.envelope.error.code, ErrorCode::NoAccounts);
}

#[tokio::test]
async fn failure_after_commit_point_never_retries() {
    let connector = ScriptedConnector::new(vec![Outcome::Events(vec![
        created(),
        text("partial"),
        Err(StreamError {
            message: "reset by peer".to_string(),
        }),
    ])]);
    let h = harness(&[1, 2], connector.clone()).await;

    let proxy = h.engine.run("t", simple_request(), None).await.unwrap();
    let items = drain(proxy.events).await;

    // One upstream call only: the second account is never consulted once
    // bytes have been forwarded.
    assert_eq!(connector.calls().len(), 1);
    assert!(matches!(items.last(), Some(StreamItem::Aborted { .. })));
}

#[tokio::test]
async fn completed_stream_records_usage() {
    let usage = ResponseUsage {
        input_tokens: 12,
        output_tokens: 7,
        total_tokens: 19,
    };
    let connector =
        ScriptedConnector::new(vec![Outcome::Events(vec![created(), completed(Some(usage))])]);
    let h = harness(&[1], connector).await;

    let proxy = h.engine.run("t", simple_request(), None).await.unwrap();
    let account_id = proxy.account.id;
    drain(proxy.events).await;

    let totals = h.ledger.totals(account_id).await;
    assert_eq!(totals.rows, 1);
    assert_eq!(totals.input_tokens, 12);
    assert_eq!(totals.output_tokens, 7);
}

#[tokio::test]
async fn session_sticks_to_account_across_requests() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Events(vec![created(), completed(None)]),
        Outcome::Events(vec![created(), completed(None)]),
    ]);
    let h = harness(&[1, 2, 3], connector.clone()).await;

    let first = h
        .engine
        .run("t1", simple_request(), Some("sess-a".to_string()))
        .await
        .unwrap();
    let first_account = first.account.id;
    drain(first.events).await;

    let second = h
        .engine
        .run("t2", simple_request(), Some("sess-a".to_string()))
        .await
        .unwrap();
    assert_eq!(second.account.id, first_account);
    drain(second.events).await;
}

#[tokio::test]
async fn transport_error_retries_then_succeeds() {
    let connector = ScriptedConnector::new(vec![
        Outcome::Transport,
        Outcome::Events(vec![created(), text("ok"), completed(None)]),
    ]);
    let h = harness(&[1, 2], connector.clone()).await;

    let proxy = h.engine.run("t", simple_request(), None).await.unwrap();
    let items = drain(proxy.events).await;
    assert_eq!(connector.calls().len(), 2);
    assert_eq!(items.len(), 3);
}
