use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use poolgate_common::AccountId;

use crate::account::{Account, Availability, LimitReason};
use crate::recovery::RecoveryQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    NoneAvailable,
}

/// Registry of accounts plus their availability state. Selection reads
/// state; only `mark_rate_limited` / `set_disabled` (and the recovery task)
/// write it, each under a single per-map lock so transitions are atomic per
/// account.
pub struct AccountPool {
    accounts: RwLock<HashMap<AccountId, Account>>,
    states: Arc<RwLock<HashMap<AccountId, Availability>>>,
    last_selected: RwLock<HashMap<AccountId, Instant>>,
    queue: Arc<RecoveryQueue>,
    quota_window: Duration,
}

impl AccountPool {
    /// `quota_window` is the fallback rate-limit hold applied when the
    /// upstream supplies no reset boundary.
    pub fn new(quota_window: Duration) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(RecoveryQueue::new());
        queue.clone().spawn_recover_task(states.clone());
        Self {
            accounts: RwLock::new(HashMap::new()),
            states,
            last_selected: RwLock::new(HashMap::new()),
            queue,
            quota_window,
        }
    }

    pub async fn insert(&self, account: Account) {
        let id = account.id;
        self.accounts.write().await.insert(id, account);
        self.states
            .write()
            .await
            .entry(id)
            .or_insert(Availability::Healthy);
    }

    pub async fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().await.get(&id).cloned()
    }

    pub async fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn availability(&self, id: AccountId) -> Availability {
        match self.states.read().await.get(&id) {
            Some(state) => *state,
            None => Availability::Disabled,
        }
    }

    /// Pick a healthy account outside `excluding`, least-recently-selected
    /// first so load spreads across the pool.
    pub async fn select(&self, excluding: &HashSet<AccountId>) -> Result<Account, SelectError> {
        let chosen = {
            let states = self.states.read().await;
            let last_selected = self.last_selected.read().await;
            let accounts = self.accounts.read().await;
            accounts
                .keys()
                .copied()
                .filter(|id| !excluding.contains(id))
                .filter(|id| states.get(id).is_some_and(Availability::is_healthy))
                .min_by_key(|id| (last_selected.get(id).copied(), *id))
        };
        let Some(id) = chosen else {
            return Err(SelectError::NoneAvailable);
        };

        self.last_selected.write().await.insert(id, Instant::now());
        self.accounts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SelectError::NoneAvailable)
    }

    /// Move an account to `rate_limited` until the given boundary, or until
    /// the configured quota window elapses when the upstream supplied none.
    /// The state holds until the boundary passes; it is never cleared just
    /// because a later request would like it to be.
    pub async fn mark_rate_limited(
        &self,
        id: AccountId,
        reset_after: Option<Duration>,
        reason: LimitReason,
    ) {
        let hold = reset_after.unwrap_or(self.quota_window);
        let until = Instant::now() + hold;
        {
            let mut states = self.states.write().await;
            match states.get(&id) {
                // Disabled is an operator decision; a quota signal on a
                // disabled account must not resurrect it later.
                Some(Availability::Disabled) => return,
                _ => states.insert(id, Availability::RateLimited { until, reason }),
            };
        }
        self.queue.push(until, id).await;
        warn!(
            event = "account_rate_limited",
            account_id = id,
            reason = ?reason,
            hold_secs = hold.as_secs(),
        );
    }

    pub async fn set_disabled(&self, id: AccountId, disabled: bool) {
        let mut states = self.states.write().await;
        if disabled {
            states.insert(id, Availability::Disabled);
        } else if matches!(states.get(&id), Some(Availability::Disabled)) {
            states.insert(id, Availability::Healthy);
        }
    }
}
