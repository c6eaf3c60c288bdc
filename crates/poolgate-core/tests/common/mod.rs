use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use poolgate_core::engine::{EngineConfig, StreamProxy};
use poolgate_core::upstream::{ConnectError, EventStream, StreamError, UpstreamConnector};
use poolgate_pool::{
    Account, AccountPool, CostModel, CredentialRef, Ledger, NoopSink, StickyRouter,
};
use poolgate_protocol::upstream::request::ResponsesRequestBody;
use poolgate_protocol::upstream::stream::{
    ResponseLifecycleEvent, TextDeltaEvent, UpstreamEvent, UpstreamEventKnown,
};
use poolgate_protocol::upstream::types::{Response, ResponseStatus, ResponseUsage};

pub enum Outcome {
    Http(u16),
    Transport,
    Events(Vec<Result<UpstreamEvent, StreamError>>),
}

pub struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<i64>>,
}

impl ScriptedConnector {
    pub fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn open(
        &self,
        account: &Account,
        _request: &ResponsesRequestBody,
    ) -> Result<EventStream, ConnectError> {
        self.calls.lock().unwrap().push(account.id);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Transport);
        match outcome {
            Outcome::Http(status) => Err(ConnectError::Http {
                status,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }),
            Outcome::Transport => Err(ConnectError::Transport {
                message: "connection refused".to_string(),
            }),
            Outcome::Events(events) => Ok(Box::pin(futures_util::stream::iter(events))),
        }
    }
}

pub fn response(status: ResponseStatus, usage: Option<ResponseUsage>) -> Response {
    Response {
        id: "resp_1".to_string(),
        model: "gw-test".to_string(),
        created_at: 1_700_000_000,
        status: Some(status),
        usage,
        incomplete_details: None,
        error: None,
    }
}

pub fn created() -> Result<UpstreamEvent, StreamError> {
    Ok(UpstreamEvent::Known(UpstreamEventKnown::Created(
        ResponseLifecycleEvent {
            response: response(ResponseStatus::InProgress, None),
            sequence_number: None,
        },
    )))
}

pub fn text(delta: &str) -> Result<UpstreamEvent, StreamError> {
    Ok(UpstreamEvent::Known(UpstreamEventKnown::OutputTextDelta(
        TextDeltaEvent {
            output_index: 0,
            content_index: 0,
            delta: delta.to_string(),
            item_id: None,
        },
    )))
}

pub fn completed(usage: Option<ResponseUsage>) -> Result<UpstreamEvent, StreamError> {
    Ok(UpstreamEvent::Known(UpstreamEventKnown::Completed(
        ResponseLifecycleEvent {
            response: response(ResponseStatus::Completed, usage),
            sequence_number: None,
        },
    )))
}

pub struct Harness {
    pub pool: Arc<AccountPool>,
    pub ledger: Arc<Ledger>,
    pub engine: StreamProxy,
}

pub async fn harness(account_ids: &[i64], connector: Arc<ScriptedConnector>) -> Harness {
    let pool = Arc::new(AccountPool::new(Duration::from_secs(300)));
    for id in account_ids {
        pool.insert(Account {
            id: *id,
            label: format!("acct-{id}"),
            credential: CredentialRef::new("tok"),
        })
        .await;
    }
    let ledger = Arc::new(Ledger::new(
        pool.clone(),
        Arc::new(NoopSink),
        CostModel::default(),
        0,
    ));
    let sticky = Arc::new(StickyRouter::new(
        pool.clone(),
        Arc::new(NoopSink),
        Duration::from_secs(60),
    ));
    let engine = StreamProxy::new(
        pool.clone(),
        ledger.clone(),
        sticky,
        connector,
        EngineConfig {
            max_retries: 2,
            channel_capacity: 32,
        },
    );
    Harness {
        pool,
        ledger,
        engine,
    }
}
