use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use poolgate_common::{AccountId, SessionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Incomplete,
    Failed,
    Cancelled,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Completed => "completed",
            TerminalStatus::Incomplete => "incomplete",
            TerminalStatus::Failed => "failed",
            TerminalStatus::Cancelled => "cancelled",
        }
    }
}

/// One row per completed (or partially completed) stream.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub account_id: AccountId,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub status: TerminalStatus,
    pub recorded_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct BindingUpsert {
    pub session_key: SessionKey,
    pub account_id: AccountId,
    pub touched_at: SystemTime,
}

/// Durability seam. Implementations hand records to a write-behind queue;
/// a failed write is the implementation's problem to retry and must never
/// surface back into the request path.
pub trait GatewaySink: Send + Sync {
    fn record_usage(&self, record: UsageRecord);
    fn record_binding(&self, upsert: BindingUpsert);
}

pub type SharedSink = Arc<dyn GatewaySink>;

pub struct NoopSink;

impl GatewaySink for NoopSink {
    fn record_usage(&self, _record: UsageRecord) {}
    fn record_binding(&self, _upsert: BindingUpsert) {}
}
