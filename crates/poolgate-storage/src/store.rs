use async_trait::async_trait;
use time::OffsetDateTime;

use poolgate_common::AccountId;
use poolgate_pool::{BindingUpsert, UsageRecord};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: AccountId,
    pub label: String,
    pub credential: String,
    pub disabled: bool,
    pub totals: TotalsRow,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TotalsRow {
    pub rows: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct BindingRow {
    pub session_key: String,
    pub account_id: AccountId,
    pub last_touched_at: OffsetDateTime,
}

/// Storage is used for bootstrap (schema sync + account/binding hydration)
/// and for write-behind persistence. Runtime reads never hit the database;
/// they are served from the pool/ledger in-memory state.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Entity-first schema sync, enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    /// Insert-or-update an account by label; returns its id.
    async fn upsert_account(
        &self,
        label: &str,
        credential: &str,
        disabled: bool,
    ) -> StorageResult<AccountId>;

    async fn load_accounts(&self) -> StorageResult<Vec<AccountRow>>;

    /// One transaction: append the usage row and fold it into the account's
    /// aggregate columns. Partial application is impossible by construction.
    async fn write_usage(&self, record: &UsageRecord) -> StorageResult<()>;

    /// Atomic insert-or-update keyed on the session; no read-then-write.
    async fn upsert_binding(&self, upsert: &BindingUpsert) -> StorageResult<()>;

    async fn load_bindings(&self) -> StorageResult<Vec<BindingRow>>;

    /// Recompute one account's totals from its usage rows. Accounts with no
    /// rows report zeros, not NULLs.
    async fn totals_from_rows(&self, account_id: AccountId) -> StorageResult<TotalsRow>;
}
