use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time as tokio_time;
use tracing::warn;

use poolgate_pool::{BindingUpsert, GatewaySink, UsageRecord};

use crate::store::GatewayStore;

#[derive(Debug, Clone)]
pub struct UsageBusConfig {
    pub usage_capacity: usize,
    pub binding_capacity: usize,
    pub retry_delay: Duration,
    /// Writes that still fail after this many retries are dropped with an
    /// error log; an unwritable database must not pin memory forever.
    pub max_write_attempts: u32,
}

impl Default for UsageBusConfig {
    fn default() -> Self {
        Self {
            usage_capacity: 16_384,
            binding_capacity: 16_384,
            retry_delay: Duration::from_millis(200),
            max_write_attempts: 25,
        }
    }
}

/// Write-behind persistence for usage rows and sticky bindings.
///
/// The request path hands records to the bus and moves on; a storage write
/// failure is logged and retried here, never surfaced to a client whose
/// stream already finished.
pub struct UsageBus {
    usage_tx: mpsc::Sender<UsageRecord>,
    binding_tx: mpsc::Sender<BindingUpsert>,
    _handles: Vec<JoinHandle<()>>,
}

impl UsageBus {
    pub fn spawn(storage: Arc<dyn GatewayStore>, config: UsageBusConfig) -> Self {
        let (usage_tx, usage_rx) = mpsc::channel(config.usage_capacity);
        let (binding_tx, binding_rx) = mpsc::channel(config.binding_capacity);

        let handles = vec![
            tokio::spawn(usage_writer(
                storage.clone(),
                usage_rx,
                config.retry_delay,
                config.max_write_attempts,
            )),
            tokio::spawn(binding_writer(
                storage,
                binding_rx,
                config.retry_delay,
                config.max_write_attempts,
            )),
        ];

        Self {
            usage_tx,
            binding_tx,
            _handles: handles,
        }
    }

    pub fn sink(&self) -> BusSink {
        BusSink {
            usage_tx: self.usage_tx.clone(),
            binding_tx: self.binding_tx.clone(),
        }
    }
}

/// The pool-facing side of the bus. Sends never block the request path; if
/// the queue is full the record is dropped and counted against us in logs.
#[derive(Clone)]
pub struct BusSink {
    usage_tx: mpsc::Sender<UsageRecord>,
    binding_tx: mpsc::Sender<BindingUpsert>,
}

impl GatewaySink for BusSink {
    fn record_usage(&self, record: UsageRecord) {
        if self.usage_tx.try_send(record).is_err() {
            warn!(event = "usage_queue_full", "dropping usage record");
        }
    }

    fn record_binding(&self, upsert: BindingUpsert) {
        if self.binding_tx.try_send(upsert).is_err() {
            warn!(event = "binding_queue_full", "dropping binding upsert");
        }
    }
}

async fn usage_writer(
    storage: Arc<dyn GatewayStore>,
    mut rx: mpsc::Receiver<UsageRecord>,
    retry_delay: Duration,
    max_attempts: u32,
) {
    while let Some(record) = rx.recv().await {
        retry_write(
            "usage",
            || storage.write_usage(&record),
            retry_delay,
            max_attempts,
        )
        .await;
    }
}

async fn binding_writer(
    storage: Arc<dyn GatewayStore>,
    mut rx: mpsc::Receiver<BindingUpsert>,
    retry_delay: Duration,
    max_attempts: u32,
) {
    while let Some(upsert) = rx.recv().await {
        retry_write(
            "binding",
            || storage.upsert_binding(&upsert),
            retry_delay,
            max_attempts,
        )
        .await;
    }
}

async fn retry_write<F, Fut>(label: &'static str, mut f: F, retry_delay: Duration, max_attempts: u32)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::store::StorageResult<()>>,
{
    for attempt in 1..=max_attempts {
        match f().await {
            Ok(()) => return,
            Err(err) => {
                warn!(
                    event = "usage_write_failed",
                    kind = label,
                    attempt,
                    error = %err,
                );
                tokio_time::sleep(retry_delay).await;
            }
        }
    }
    warn!(event = "usage_write_abandoned", kind = label);
}
