use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, header};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use poolgate_common::new_trace_id;

use poolgate_protocol::chat::request::ChatCompletionsRequestBody;
use poolgate_protocol::error::{ErrorCode, ErrorEnvelope};
use poolgate_protocol::sse::{frame_data, frame_done, frame_typed};
use poolgate_protocol::upstream::request::ResponsesRequestBody;
use poolgate_protocol::upstream::stream::{UpstreamEvent, UpstreamEventKnown};
use poolgate_protocol::upstream::types::Response as UpstreamResponse;
use poolgate_transform::{ChatAggregator, UpstreamToChatStream, chat_to_upstream_request};

use crate::classify::session_affinity;
use crate::core::CoreState;
use crate::engine::{ProxyStream, StreamItem};
use crate::error::GatewayError;

const SSE_CHANNEL_CAPACITY: usize = 16;

pub async fn responses_handler(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = new_trace_id();
    let mut request: ResponsesRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return GatewayError::invalid_request(format!("invalid json: {err}")).into_response();
        }
    };

    let stream_requested = request.stream.unwrap_or(false);
    // The upstream is always driven in streaming mode; non-streaming
    // clients get the aggregated terminal response.
    request.stream = Some(true);

    let session_key = session_affinity(
        &headers,
        request.prompt_cache_key.as_deref(),
        request.extra.get("user").and_then(|value| value.as_str()),
    );
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        op = "responses",
        model = %request.model,
        is_stream = stream_requested,
    );

    let proxy = match state.engine.run(&trace_id, request, session_key).await {
        Ok(proxy) => proxy,
        Err(err) => return err.into_response(),
    };

    if stream_requested {
        passthrough_stream(proxy)
    } else {
        aggregate_responses(proxy).await
    }
}

pub async fn chat_completions_handler(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let trace_id = new_trace_id();
    let request: ChatCompletionsRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return GatewayError::invalid_request(format!("invalid json: {err}")).into_response();
        }
    };

    let stream_requested = request.stream.unwrap_or(false);
    let include_usage = request
        .stream_options
        .as_ref()
        .and_then(|options| options.include_usage)
        .unwrap_or(false);

    let mut upstream_request = match chat_to_upstream_request(&request) {
        Ok(upstream) => upstream,
        Err(err) => return GatewayError::invalid_request(err.message()).into_response(),
    };
    upstream_request.stream = Some(true);

    let session_key = session_affinity(
        &headers,
        request.prompt_cache_key.as_deref(),
        request.user.as_deref(),
    );
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        op = "chat_completions",
        model = %request.model,
        is_stream = stream_requested,
    );

    let proxy = match state
        .engine
        .run(&trace_id, upstream_request, session_key)
        .await
    {
        Ok(proxy) => proxy,
        Err(err) => return err.into_response(),
    };

    if stream_requested {
        chat_stream(proxy, include_usage, trace_id)
    } else {
        aggregate_chat(proxy).await
    }
}

pub async fn usage_handler(State(state): State<Arc<CoreState>>) -> Response {
    let accounts = state.ledger.capacity_summary().await;
    Json(json!({ "accounts": accounts })).into_response()
}

/// Forward upstream events verbatim, preserving event identity on the wire.
fn passthrough_stream(proxy: ProxyStream) -> Response {
    let ProxyStream {
        account,
        mut events,
    } = proxy;
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(SSE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(item) = events.recv().await {
            let frame = match item {
                StreamItem::Event(event) => event_frame(&event),
                StreamItem::Aborted { message } => {
                    let _ = tx.send(Ok(incomplete_frame(&message))).await;
                    return;
                }
            };
            if let Some(frame) = frame
                && tx.send(Ok(frame)).await.is_err()
            {
                return;
            }
        }
    });

    sse_response(rx, &account.label)
}

/// Transcode upstream events into chat-completion chunks.
fn chat_stream(proxy: ProxyStream, include_usage: bool, trace_id: String) -> Response {
    let ProxyStream {
        account,
        mut events,
    } = proxy;
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(SSE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut transcoder = UpstreamToChatStream::new(include_usage);
        while let Some(item) = events.recv().await {
            match item {
                StreamItem::Event(event) => {
                    let chunks = transcoder.transform_event(&event);
                    if let Some(anomaly) = transcoder.take_anomaly() {
                        warn!(
                            event = "protocol_anomaly",
                            trace_id = %trace_id,
                            dropped = %anomaly.event,
                        );
                    }
                    for chunk in chunks {
                        let Some(frame) = frame_data(&chunk) else {
                            continue;
                        };
                        if tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                }
                StreamItem::Aborted { message } => {
                    let _ = tx.send(Ok(incomplete_frame(&message))).await;
                    return;
                }
            }
        }
        if transcoder.finished() {
            let _ = tx.send(Ok(frame_done())).await;
        }
    });

    sse_response(rx, &account.label)
}

/// Drain the stream and answer with the terminal response object.
async fn aggregate_responses(mut proxy: ProxyStream) -> Response {
    let mut terminal: Option<UpstreamResponse> = None;
    while let Some(item) = proxy.events.recv().await {
        match item {
            StreamItem::Event(UpstreamEvent::Known(
                UpstreamEventKnown::Completed(event)
                | UpstreamEventKnown::Incomplete(event)
                | UpstreamEventKnown::Failed(event),
            )) => terminal = Some(event.response),
            StreamItem::Event(_) => {}
            StreamItem::Aborted { .. } => {
                return GatewayError::from_failure(&crate::classify::FailureKind::StreamIncomplete)
                    .into_response();
            }
        }
    }
    match terminal {
        Some(response) => Json(response).into_response(),
        None => GatewayError::from_failure(&crate::classify::FailureKind::StreamIncomplete)
            .into_response(),
    }
}

async fn aggregate_chat(mut proxy: ProxyStream) -> Response {
    let mut aggregator = ChatAggregator::new();
    while let Some(item) = proxy.events.recv().await {
        match item {
            StreamItem::Event(event) => aggregator.absorb(&event),
            StreamItem::Aborted { .. } => {
                return GatewayError::from_failure(&crate::classify::FailureKind::StreamIncomplete)
                    .into_response();
            }
        }
    }
    if !aggregator.finished() {
        return GatewayError::from_failure(&crate::classify::FailureKind::StreamIncomplete)
            .into_response();
    }
    Json(aggregator.into_response()).into_response()
}

fn event_frame(event: &UpstreamEvent) -> Option<Bytes> {
    match event.event_name() {
        Some(name) => frame_typed(name, event),
        None => frame_data(event),
    }
}

/// Terminal error appended to a committed stream. The partial output the
/// client already has cannot be reconciled with a retry.
fn incomplete_frame(message: &str) -> Bytes {
    let envelope = ErrorEnvelope::new(
        "stream_incomplete",
        ErrorCode::StreamIncomplete,
        format!("the upstream stream ended before completion: {message}"),
    );
    let payload = json!({ "type": "error", "error": envelope.error });
    frame_typed("error", &payload)
        .unwrap_or_else(|| Bytes::from_static(b"event: error\ndata: {}\n\n"))
}

fn sse_response(rx: mpsc::Receiver<Result<Bytes, Infallible>>, account_label: &str) -> Response {
    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(account_label) {
        headers.insert("x-poolgate-account", value);
    }
    response
}
