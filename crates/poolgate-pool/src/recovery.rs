use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Instant, sleep_until};
use tracing::info;

use poolgate_common::AccountId;

use crate::account::Availability;

/// Deadline queue that flips rate-limited accounts back to healthy once
/// their reset boundary passes. The boundary is authoritative: an account is
/// never recovered early, only exactly at (or after) its deadline.
#[derive(Debug)]
pub struct RecoveryQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, AccountId)>>>,
    notify: Notify,
}

impl RecoveryQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, until: Instant, account_id: AccountId) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, account_id)));
        }
        // Always notify: the background task re-computes the next deadline.
        self.notify.notify_one();
    }

    pub fn spawn_recover_task(
        self: Arc<Self>,
        states: Arc<RwLock<HashMap<AccountId, Availability>>>,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((deadline, _))| *deadline)
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some(deadline) => {
                        tokio::select! {
                            () = sleep_until(deadline) => {}
                            () = self.notify.notified() => continue,
                        }
                    }
                }

                let now = Instant::now();
                let mut due: Vec<AccountId> = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((deadline, id))) = heap.peek().copied()
                        && deadline <= now
                    {
                        heap.pop();
                        due.push(id);
                    }
                }
                if due.is_empty() {
                    continue;
                }

                // Recover due accounts, guarding against stale queue entries
                // left behind by a later mark on the same account.
                let mut guard = states.write().await;
                for id in due {
                    let should_recover = match guard.get(&id) {
                        Some(Availability::RateLimited { until, .. }) => *until <= now,
                        _ => false,
                    };
                    if should_recover {
                        guard.insert(id, Availability::Healthy);
                        info!(event = "account_recovered", account_id = id);
                    }
                }
            }
        });
    }
}

impl Default for RecoveryQueue {
    fn default() -> Self {
        Self::new()
    }
}
