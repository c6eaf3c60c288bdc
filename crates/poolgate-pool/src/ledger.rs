use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use poolgate_common::AccountId;

use crate::account::{Availability, LimitReason};
use crate::pool::AccountPool;
use crate::sink::{SharedSink, TerminalStatus, UsageRecord};

/// Token counts reported by the upstream for one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsagePayload {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone)]
pub enum UsageError {
    /// Negative counts in an incoming payload are bad input and are
    /// rejected, not coerced to zero.
    InvalidUsagePayload { field: &'static str, value: i64 },
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::InvalidUsagePayload { field, value } => {
                write!(f, "invalid usage payload: {field} = {value}")
            }
        }
    }
}

impl Error for UsageError {}

/// In-memory per-account aggregate, mirrored to storage by the sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountTotals {
    pub rows: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl CostModel {
    pub fn cost(&self, input_tokens: i64, output_tokens: i64) -> f64 {
        (input_tokens as f64 * self.input_per_mtok
            + output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Per-account capacity picture for the usage surface.
#[derive(Debug, Clone, Serialize)]
pub struct AccountCapacity {
    pub account_id: AccountId,
    pub label: String,
    pub availability: &'static str,
    pub used_percent: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at_epoch_secs: Option<u64>,
}

/// Owns per-account usage aggregates and the rules for updating them.
///
/// `record_usage` applies the whole aggregate delta under one write lock and
/// emits one record to the sink, whose storage write is itself one
/// transaction; primary and derived state cannot drift apart.
pub struct Ledger {
    pool: Arc<AccountPool>,
    totals: RwLock<HashMap<AccountId, AccountTotals>>,
    sink: SharedSink,
    cost: CostModel,
    /// Tokens one account may spend per quota window; 0 disables the
    /// percent computation (reported as 0 consumed).
    window_capacity_tokens: i64,
}

impl Ledger {
    pub fn new(
        pool: Arc<AccountPool>,
        sink: SharedSink,
        cost: CostModel,
        window_capacity_tokens: i64,
    ) -> Self {
        Self {
            pool,
            totals: RwLock::new(HashMap::new()),
            sink,
            cost,
            window_capacity_tokens,
        }
    }

    /// Best-effort availability pre-check; not a reservation or lock.
    pub async fn reserve(&self, id: AccountId) -> bool {
        self.pool.availability(id).await.is_healthy()
    }

    pub async fn availability(&self, id: AccountId) -> Availability {
        self.pool.availability(id).await
    }

    pub async fn mark_rate_limited(
        &self,
        id: AccountId,
        reset_after: Option<Duration>,
        reason: LimitReason,
    ) {
        self.pool.mark_rate_limited(id, reset_after, reason).await;
    }

    /// Validate, price and record one stream's usage. The in-memory
    /// aggregate update is atomic; the durable write goes through the sink
    /// and never blocks the caller.
    pub async fn record_usage(
        &self,
        account_id: AccountId,
        payload: UsagePayload,
        status: TerminalStatus,
    ) -> Result<UsageRecord, UsageError> {
        if payload.input_tokens < 0 {
            return Err(UsageError::InvalidUsagePayload {
                field: "input_tokens",
                value: payload.input_tokens,
            });
        }
        if payload.output_tokens < 0 {
            return Err(UsageError::InvalidUsagePayload {
                field: "output_tokens",
                value: payload.output_tokens,
            });
        }

        let record = UsageRecord {
            account_id,
            input_tokens: payload.input_tokens,
            output_tokens: payload.output_tokens,
            cost: self.cost.cost(payload.input_tokens, payload.output_tokens),
            status,
            recorded_at: SystemTime::now(),
        };

        {
            let mut totals = self.totals.write().await;
            let entry = totals.entry(account_id).or_default();
            entry.rows += 1;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
            entry.cost += record.cost;
        }
        self.sink.record_usage(record.clone());
        Ok(record)
    }

    /// Seed aggregates from storage at boot. Counts read back from cache
    /// can be corrupted; negative values are sanitized to zero rather than
    /// rejected, since the stream they came from is long gone.
    pub async fn hydrate(&self, account_id: AccountId, cached: AccountTotals) {
        let sanitized = AccountTotals {
            rows: cached.rows.max(0),
            input_tokens: cached.input_tokens.max(0),
            output_tokens: cached.output_tokens.max(0),
            cost: cached.cost.max(0.0),
        };
        self.totals.write().await.insert(account_id, sanitized);
    }

    pub async fn totals(&self, account_id: AccountId) -> AccountTotals {
        // An account with no usage rows has consumed nothing; missing means
        // zero, never "unknown" or "full".
        self.totals
            .read()
            .await
            .get(&account_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn capacity_summary(&self) -> Vec<AccountCapacity> {
        let mut summary = Vec::new();
        for id in self.pool.ids().await {
            let Some(account) = self.pool.get(id).await else {
                continue;
            };
            let availability = self.pool.availability(id).await;
            let totals = self.totals(id).await;
            let used_percent = if self.window_capacity_tokens > 0 {
                let spent = (totals.input_tokens + totals.output_tokens) as f64;
                (spent / self.window_capacity_tokens as f64 * 100.0).min(100.0)
            } else {
                0.0
            };
            summary.push(AccountCapacity {
                account_id: id,
                label: account.label,
                availability: availability.kind(),
                used_percent,
                input_tokens: totals.input_tokens,
                output_tokens: totals.output_tokens,
                cost: totals.cost,
                reset_at_epoch_secs: availability.limited_until().map(instant_to_epoch_secs),
            });
        }
        summary
    }
}

fn instant_to_epoch_secs(until: Instant) -> u64 {
    let remaining = until.saturating_duration_since(Instant::now());
    SystemTime::now()
        .checked_add(remaining)
        .and_then(|at| at.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since| since.as_secs())
        .unwrap_or_default()
}
