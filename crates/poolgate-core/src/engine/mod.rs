pub mod attempt;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use poolgate_pool::{
    Account, AccountPool, Ledger, LimitReason, SelectError, StickyRouter, TerminalStatus,
    UsagePayload,
};
use poolgate_protocol::upstream::request::ResponsesRequestBody;
use poolgate_protocol::upstream::stream::{UpstreamEvent, UpstreamEventKnown};

use crate::classify::{ConnectClass, FailureKind, classify_connect_error};
use crate::engine::attempt::RequestAttempt;
use crate::error::GatewayError;
use crate::upstream::{EventStream, UpstreamConnector};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Additional attempts after the first, each on a not-yet-tried account.
    pub max_retries: u32,
    /// Bound on the in-flight event hand-off between the upstream pump and
    /// the transcoder; when the client stalls, the pump stalls.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            channel_capacity: 32,
        }
    }
}

/// Items delivered to the transcoder, in upstream order.
#[derive(Debug)]
pub enum StreamItem {
    Event(UpstreamEvent),
    /// The upstream died after the commit point. Terminal; the transcoder
    /// appends a `stream_incomplete` error to whatever already went out.
    Aborted { message: String },
}

#[derive(Debug)]
pub struct ProxyStream {
    pub account: Account,
    pub events: mpsc::Receiver<StreamItem>,
}

/// The streaming proxy: selects an account, opens the upstream, and drives
/// bounded retry across re-selected accounts until the first event arrives.
/// From that commit point on, the stream belongs to exactly one account and
/// failures terminate rather than retry.
pub struct StreamProxy {
    pool: Arc<AccountPool>,
    ledger: Arc<Ledger>,
    sticky: Arc<StickyRouter>,
    connector: Arc<dyn UpstreamConnector>,
    config: EngineConfig,
}

impl StreamProxy {
    pub fn new(
        pool: Arc<AccountPool>,
        ledger: Arc<Ledger>,
        sticky: Arc<StickyRouter>,
        connector: Arc<dyn UpstreamConnector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            ledger,
            sticky,
            connector,
            config,
        }
    }

    /// Run the attempt loop until a stream is committed or retries are
    /// exhausted. On success the returned receiver yields the upstream
    /// events (first event included) in order.
    pub async fn run(
        &self,
        trace_id: &str,
        request: ResponsesRequestBody,
        session_key: Option<String>,
    ) -> Result<ProxyStream, GatewayError> {
        let mut attempt = RequestAttempt::new(self.config.max_retries);

        loop {
            // Selecting: sticky affinity on the first attempt, plain pool
            // selection (excluding everything tried) afterwards.
            let selected = if attempt.is_first() {
                self.sticky.resolve(session_key.as_deref()).await
            } else {
                self.pool.select(attempt.tried()).await
            };
            let account = match selected {
                Ok(account) => account,
                Err(SelectError::NoneAvailable) => {
                    warn!(
                        event = "no_accounts",
                        trace_id,
                        attempt_no = attempt.attempt_no(),
                    );
                    return Err(GatewayError::no_accounts());
                }
            };
            attempt.begin(account.id);

            // Selection can race with a concurrent rate-limit mark; the
            // reserve pre-check catches the account that just went dark.
            if !self.ledger.reserve(account.id).await {
                if attempt.can_retry() {
                    continue;
                }
                return Err(GatewayError::no_accounts());
            }
            info!(
                event = "upstream_attempt",
                trace_id,
                account_id = account.id,
                attempt_no = attempt.attempt_no(),
            );

            // Connecting.
            let mut events = match self.connector.open(&account, &request).await {
                Ok(events) => events,
                Err(error) => {
                    match classify_connect_error(&error) {
                        ConnectClass::Rejected { status, message } => {
                            info!(
                                event = "upstream_rejected",
                                trace_id,
                                account_id = account.id,
                                status,
                            );
                            return Err(GatewayError::invalid_request(message));
                        }
                        ConnectClass::Failure(kind) => {
                            self.apply_failure(&account, &kind).await;
                            attempt.record_failure(kind);
                            if attempt.can_retry() {
                                continue;
                            }
                            let last = attempt
                                .last_failure()
                                .copied()
                                .unwrap_or(FailureKind::TransportError);
                            return Err(GatewayError::from_failure(&last));
                        }
                    }
                }
            };

            // The stream is only committed once the upstream produces its
            // first event; anything earlier is still a connection failure.
            let first = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(stream_error)) => {
                    warn!(
                        event = "upstream_stream_error",
                        trace_id,
                        account_id = account.id,
                        error = %stream_error.message,
                    );
                    attempt.record_failure(FailureKind::TransportError);
                    if attempt.can_retry() {
                        continue;
                    }
                    return Err(GatewayError::from_failure(&FailureKind::TransportError));
                }
                None => {
                    attempt.record_failure(FailureKind::TransportError);
                    if attempt.can_retry() {
                        continue;
                    }
                    return Err(GatewayError::from_failure(&FailureKind::TransportError));
                }
            };

            info!(
                event = "stream_committed",
                trace_id,
                account_id = account.id,
                attempt_no = attempt.attempt_no(),
            );
            let (tx, rx) = mpsc::channel(self.config.channel_capacity);
            let pump = StreamPump {
                ledger: self.ledger.clone(),
                sticky: self.sticky.clone(),
                account: account.clone(),
                session_key,
                trace_id: trace_id.to_string(),
            };
            tokio::spawn(pump.run(first, events, tx));
            return Ok(ProxyStream {
                account,
                events: rx,
            });
        }
    }

    async fn apply_failure(&self, account: &Account, kind: &FailureKind) {
        match kind {
            FailureKind::RateLimited { reset_after } => {
                self.ledger
                    .mark_rate_limited(account.id, *reset_after, LimitReason::Quota)
                    .await;
            }
            FailureKind::AuthExpired => {
                // Held out of rotation until the credential provider has
                // rotated the token; the hold window doubles as the retry
                // cadence for that rotation.
                self.ledger
                    .mark_rate_limited(account.id, None, LimitReason::AuthExpired)
                    .await;
            }
            FailureKind::UpstreamUnavailable | FailureKind::TransportError => {}
            FailureKind::StreamIncomplete => {}
        }
    }
}

/// Owns one committed upstream stream: forwards events downstream in order,
/// tracks usage, and settles the ledger and sticky binding at the end.
struct StreamPump {
    ledger: Arc<Ledger>,
    sticky: Arc<StickyRouter>,
    account: Account,
    session_key: Option<String>,
    trace_id: String,
}

impl StreamPump {
    async fn run(
        self,
        first: UpstreamEvent,
        mut events: EventStream,
        tx: mpsc::Sender<StreamItem>,
    ) {
        let mut usage: Option<UsagePayload> = None;
        let mut terminal: Option<TerminalStatus> = None;

        let mut pending = Some(first);
        loop {
            let event = match pending.take() {
                Some(event) => Ok(Some(event)),
                None => match events.next().await {
                    Some(Ok(event)) => Ok(Some(event)),
                    Some(Err(error)) => Err(error.message),
                    None => Ok(None),
                },
            };

            match event {
                Ok(Some(event)) => {
                    if let Some(found) = usage_of(&event) {
                        usage = Some(found);
                    }
                    if let Some(status) = terminal_of(&event) {
                        terminal = Some(status);
                    }
                    // A send failure means the client went away; cancel the
                    // upstream by dropping it and settle what we know.
                    if tx.send(StreamItem::Event(event)).await.is_err() {
                        self.settle_cancelled(usage).await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(message) => {
                    // Committed stream, upstream died: stream_incomplete,
                    // never a silent retry.
                    warn!(
                        event = "stream_incomplete",
                        trace_id = %self.trace_id,
                        account_id = self.account.id,
                        error = %message,
                    );
                    let _ = tx.send(StreamItem::Aborted { message }).await;
                    self.settle(usage, TerminalStatus::Incomplete).await;
                    return;
                }
            }
        }

        match terminal {
            Some(status) => {
                if status == TerminalStatus::Completed
                    && let Some(key) = self.session_key.as_deref()
                {
                    // Successful completion refreshes the session's
                    // affinity, or repoints it after a failover.
                    match self.sticky.bound_account(key).await {
                        Some(bound) if bound == self.account.id => {
                            self.sticky.touch(key).await;
                        }
                        _ => self.sticky.bind(key, self.account.id).await,
                    }
                }
                self.settle(usage, status).await;
            }
            None => {
                warn!(
                    event = "stream_incomplete",
                    trace_id = %self.trace_id,
                    account_id = self.account.id,
                    error = "upstream closed without a terminal event",
                );
                let _ = tx
                    .send(StreamItem::Aborted {
                        message: "upstream closed without a terminal event".to_string(),
                    })
                    .await;
                self.settle(usage, TerminalStatus::Incomplete).await;
            }
        }
    }

    async fn settle(&self, usage: Option<UsagePayload>, status: TerminalStatus) {
        let payload = usage.unwrap_or_default();
        if let Err(error) = self
            .ledger
            .record_usage(self.account.id, payload, status)
            .await
        {
            warn!(
                event = "usage_rejected",
                trace_id = %self.trace_id,
                account_id = self.account.id,
                error = %error,
            );
        }
    }

    /// Client disconnect: write usage only if the upstream reported some
    /// before the disconnect; otherwise there is nothing truthful to record.
    async fn settle_cancelled(&self, usage: Option<UsagePayload>) {
        info!(
            event = "client_disconnected",
            trace_id = %self.trace_id,
            account_id = self.account.id,
        );
        if usage.is_some() {
            self.settle(usage, TerminalStatus::Cancelled).await;
        }
    }
}

fn usage_of(event: &UpstreamEvent) -> Option<UsagePayload> {
    let UpstreamEvent::Known(known) = event else {
        return None;
    };
    let response = match known {
        UpstreamEventKnown::Created(event)
        | UpstreamEventKnown::InProgress(event)
        | UpstreamEventKnown::Completed(event)
        | UpstreamEventKnown::Incomplete(event)
        | UpstreamEventKnown::Failed(event) => &event.response,
        _ => return None,
    };
    response.usage.map(|usage| UsagePayload {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    })
}

fn terminal_of(event: &UpstreamEvent) -> Option<TerminalStatus> {
    match event {
        UpstreamEvent::Known(UpstreamEventKnown::Completed(_)) => Some(TerminalStatus::Completed),
        UpstreamEvent::Known(UpstreamEventKnown::Incomplete(_)) => Some(TerminalStatus::Incomplete),
        UpstreamEvent::Known(UpstreamEventKnown::Failed(_)) => Some(TerminalStatus::Failed),
        _ => None,
    }
}
