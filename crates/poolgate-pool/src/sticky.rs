use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use poolgate_common::{AccountId, SessionKey};

use crate::account::Account;
use crate::pool::{AccountPool, SelectError};
use crate::sink::{BindingUpsert, SharedSink};

#[derive(Debug, Clone, Copy)]
struct StickyBinding {
    account_id: AccountId,
    last_touched_at: Instant,
}

/// Session-to-account affinity with TTL. A binding is honored only while it
/// is fresh and its account is healthy; anything else falls through to pool
/// selection and the binding is replaced. Every hit refreshes the TTL,
/// including hits on requests that complete without any retry.
pub struct StickyRouter {
    bindings: RwLock<HashMap<SessionKey, StickyBinding>>,
    ttl: Duration,
    pool: Arc<AccountPool>,
    sink: SharedSink,
}

impl StickyRouter {
    pub fn new(pool: Arc<AccountPool>, sink: SharedSink, ttl: Duration) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            ttl,
            pool,
            sink,
        }
    }

    pub async fn resolve(&self, session_key: Option<&str>) -> Result<Account, SelectError> {
        let Some(key) = session_key.filter(|key| !key.is_empty()) else {
            return self.pool.select(&HashSet::new()).await;
        };

        if let Some(account) = self.lookup(key).await {
            return Ok(account);
        }

        let account = self.pool.select(&HashSet::new()).await?;
        self.bind(key, account.id).await;
        Ok(account)
    }

    /// Honor a fresh binding to a healthy account, touching it; evict it
    /// lazily otherwise.
    async fn lookup(&self, key: &str) -> Option<Account> {
        let now = Instant::now();
        let mut bindings = self.bindings.write().await;
        let (account_id, last_touched_at) = {
            let binding = bindings.get(key)?;
            (binding.account_id, binding.last_touched_at)
        };

        if now.duration_since(last_touched_at) > self.ttl {
            debug!(event = "sticky_expired", session = key);
            bindings.remove(key);
            return None;
        }
        if !self.pool.availability(account_id).await.is_healthy() {
            debug!(event = "sticky_unhealthy", session = key, account_id);
            bindings.remove(key);
            return None;
        }

        if let Some(binding) = bindings.get_mut(key) {
            binding.last_touched_at = now;
        }
        drop(bindings);
        self.persist(key, account_id);
        self.pool.get(account_id).await
    }

    /// Point a session at an account, overwriting any previous binding.
    /// Concurrent writers for one session converge last-writer-wins.
    pub async fn bind(&self, key: &str, account_id: AccountId) {
        self.bindings.write().await.insert(
            key.to_string(),
            StickyBinding {
                account_id,
                last_touched_at: Instant::now(),
            },
        );
        self.persist(key, account_id);
    }

    /// Refresh the TTL after a successful stream. No-op when the session
    /// has no binding (e.g. it was evicted concurrently).
    pub async fn touch(&self, key: &str) {
        let touched = {
            let mut bindings = self.bindings.write().await;
            bindings.get_mut(key).map(|binding| {
                binding.last_touched_at = Instant::now();
                binding.account_id
            })
        };
        if let Some(account_id) = touched {
            self.persist(key, account_id);
        }
    }

    /// Seed a binding from storage at boot without counting it as a touch.
    pub async fn hydrate(&self, key: String, account_id: AccountId, age: Duration) {
        let now = Instant::now();
        let last_touched_at = now.checked_sub(age).unwrap_or(now);
        self.bindings.write().await.insert(
            key,
            StickyBinding {
                account_id,
                last_touched_at,
            },
        );
    }

    pub async fn bound_account(&self, key: &str) -> Option<AccountId> {
        self.bindings
            .read()
            .await
            .get(key)
            .map(|binding| binding.account_id)
    }

    fn persist(&self, key: &str, account_id: AccountId) {
        self.sink.record_binding(BindingUpsert {
            session_key: key.to_string(),
            account_id,
            touched_at: SystemTime::now(),
        });
    }
}
