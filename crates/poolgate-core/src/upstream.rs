use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::HeaderMap;
use wreq::{Client, Proxy};

use poolgate_pool::Account;
use poolgate_protocol::sse::SseParser;
use poolgate_protocol::upstream::request::ResponsesRequestBody;
use poolgate_protocol::upstream::stream::UpstreamEvent;

/// Transport failure after the stream was established.
#[derive(Debug, Clone)]
pub struct StreamError {
    pub message: String,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent, StreamError>> + Send>>;

/// Failure to establish the upstream stream. HTTP errors keep the status,
/// headers and body for classification; transport errors keep the message.
#[derive(Debug)]
pub enum ConnectError {
    Http {
        status: u16,
        headers: HeaderMap,
        body: Bytes,
    },
    Transport {
        message: String,
    },
}

/// Seam between the retry engine and the network. The engine only ever sees
/// decoded events; tests drive it with scripted connectors.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn open(
        &self,
        account: &Account,
        request: &ResponsesRequestBody,
    ) -> Result<EventStream, ConnectError>;
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub base_url: String,
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.upstream.example/v1".to_string(),
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// wreq-backed connector for `POST {base}/responses` with SSE decoding.
pub struct WreqConnector {
    client: Client,
    base_url: String,
}

impl WreqConnector {
    pub fn new(config: ConnectorConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.stream_idle_timeout);
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UpstreamConnector for WreqConnector {
    async fn open(
        &self,
        account: &Account,
        request: &ResponsesRequestBody,
    ) -> Result<EventStream, ConnectError> {
        let url = format!("{}/responses", self.base_url);
        let payload = serde_json::to_vec(request).map_err(|err| ConnectError::Transport {
            message: format!("serialize upstream request: {err}"),
        })?;

        let response = self
            .client
            .request(wreq::Method::POST, &url)
            .header(
                "authorization",
                format!("Bearer {}", account.credential.bearer()),
            )
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .body(payload)
            .send()
            .await
            .map_err(|err| ConnectError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let headers = http_headers_from_wreq(response.headers());
            let body = response.bytes().await.unwrap_or_default();
            return Err(ConnectError::Http {
                status,
                headers,
                body,
            });
        }

        Ok(decode_sse(Box::pin(response.bytes_stream())))
    }
}

fn http_headers_from_wreq(map: &wreq::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in map {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_str().as_bytes()),
            http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

struct DecodeState<S> {
    bytes: S,
    parser: SseParser,
    queue: VecDeque<UpstreamEvent>,
    done: bool,
}

/// Turn a raw byte stream into decoded upstream events. Frames that are not
/// JSON are skipped; a `[DONE]` sentinel ends the stream.
fn decode_sse<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display,
{
    let state = DecodeState {
        bytes,
        parser: SseParser::new(),
        queue: VecDeque::new(),
        done: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.parser.push_bytes(&chunk) {
                        if frame.data == "[DONE]" {
                            state.done = true;
                            break;
                        }
                        if let Ok(event) = serde_json::from_str::<UpstreamEvent>(&frame.data) {
                            state.queue.push_back(event);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((
                        Err(StreamError {
                            message: err.to_string(),
                        }),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    for frame in state.parser.finish() {
                        if frame.data == "[DONE]" {
                            continue;
                        }
                        if let Ok(event) = serde_json::from_str::<UpstreamEvent>(&frame.data) {
                            state.queue.push_back(event);
                        }
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn decodes_events_across_chunk_boundaries() {
        let chunks: Vec<Result<Bytes, Infallible>> = vec![
            Ok(Bytes::from_static(b"event: response.output_text.delta\nda")),
            Ok(Bytes::from_static(
                b"ta: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\"hi\"}\n\n",
            )),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let mut stream = decode_sse(futures_util::stream::iter(chunks));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_name(), Some("response.output_text.delta"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_event_kind_survives_decoding() {
        let chunks: Vec<Result<Bytes, Infallible>> = vec![Ok(Bytes::from_static(
            b"data: {\"type\":\"response.novel.event\",\"payload\":1}\n\n",
        ))];
        let mut stream = decode_sse(futures_util::stream::iter(chunks));
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.event_name(), Some("response.novel.event"));
        assert!(matches!(event, UpstreamEvent::Unknown(_)));
    }
}
