//! The provider registry: immutable [`Provider`] entries plus their mutable
//! health state, selectable by name+account or by walking a router's
//! candidate list.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use llmproxy_common::{FileConfig, SelectionStrategy};

use crate::provider::{Provider, ProviderId};
use crate::state::{CountTokensHealth, ProviderHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("provider unknown")]
    ProviderUnknown,
    #[error("all candidates unavailable")]
    AllUnavailable,
}

struct RecoveryQueue {
    heap: tokio::sync::Mutex<BinaryHeap<Reverse<(Instant, ProviderId)>>>,
    notify: Notify,
}

impl RecoveryQueue {
    fn new() -> Self {
        Self {
            heap: tokio::sync::Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, until: Instant, id: ProviderId) {
        self.heap.lock().await.push(Reverse((until, id)));
        self.notify.notify_one();
    }

    fn spawn_recover_task(
        self: Arc<Self>,
        health: Arc<RwLock<HashMap<ProviderId, ProviderHealth>>>,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, id))| (*t, *id))
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some((deadline, _)) => sleep_until(deadline).await,
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id))) = heap.peek().copied() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push((t, id));
                    }
                }

                if due.is_empty() {
                    continue;
                }

                let mut guard = health.write().await;
                for (deadline, id) in due {
                    if let Some(entry) = guard.get_mut(&id) {
                        entry.recover_if_due(deadline);
                        debug!(provider_id = id, "provider cooldown elapsed, recovered");
                    }
                }
            }
        });
    }
}

/// Immutable provider entries plus their health state, keyed by id. Health
/// is behind an `RwLock<HashMap<..>>` rather than per-provider locks: the
/// map is small (dozens of entries at most) and contention is brief.
pub struct ProviderPool {
    providers: Vec<Provider>,
    health: Arc<RwLock<HashMap<ProviderId, ProviderHealth>>>,
    count_tokens_health: RwLock<HashMap<ProviderId, CountTokensHealth>>,
    recovery: Arc<RecoveryQueue>,
    round_robin_cursor: AtomicUsize,
    unhealthy_threshold: u32,
    failure_cooldown: Duration,
    count_tokens_cooldown: Duration,
}

impl ProviderPool {
    pub fn from_file_config(
        config: &FileConfig,
        unhealthy_threshold: u32,
        failure_cooldown: Duration,
        count_tokens_cooldown: Duration,
        default_proxy: Option<&str>,
    ) -> Self {
        let providers: Vec<Provider> = config
            .providers
            .iter()
            .enumerate()
            .map(|(idx, p)| Provider::from_config(idx as ProviderId, p, default_proxy))
            .collect();

        let health: HashMap<ProviderId, ProviderHealth> = providers
            .iter()
            .map(|p| (p.id, ProviderHealth::default()))
            .collect();
        let count_tokens_health = providers
            .iter()
            .map(|p| (p.id, CountTokensHealth::default()))
            .collect();

        let health = Arc::new(RwLock::new(health));
        let recovery = Arc::new(RecoveryQueue::new());
        recovery.clone().spawn_recover_task(health.clone());

        Self {
            providers,
            health,
            count_tokens_health: RwLock::new(count_tokens_health),
            recovery,
            round_robin_cursor: AtomicUsize::new(0),
            unhealthy_threshold,
            failure_cooldown,
            count_tokens_cooldown,
        }
    }

    pub fn all(&self) -> &[Provider] {
        &self.providers
    }

    pub fn get(&self, id: ProviderId) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn get_by_name_and_account(
        &self,
        name: &str,
        account_email: Option<&str>,
    ) -> Option<&Provider> {
        self.providers
            .iter()
            .find(|p| p.enabled && p.name == name && p.matches_account(account_email))
    }

    pub async fn is_healthy(&self, id: ProviderId) -> bool {
        self.health
            .read()
            .await
            .get(&id)
            .map(|h| h.is_active())
            .unwrap_or(false)
    }

    pub async fn mark_success(&self, id: ProviderId) {
        if let Some(entry) = self.health.write().await.get_mut(&id) {
            entry.record_success();
        }
    }

    pub async fn mark_failure(&self, id: ProviderId) {
        let deadline = {
            let mut guard = self.health.write().await;
            guard
                .get_mut(&id)
                .and_then(|entry| entry.record_failure(self.unhealthy_threshold, self.failure_cooldown))
        };
        if let Some(deadline) = deadline {
            self.recovery.push(deadline, id).await;
            debug!(provider_id = id, "provider tripped into cooldown");
        }
    }

    pub async fn count_tokens_available(&self, id: ProviderId) -> bool {
        self.count_tokens_health
            .write()
            .await
            .get_mut(&id)
            .map(|h| h.is_available())
            .unwrap_or(false)
    }

    pub async fn mark_count_tokens_success(&self, id: ProviderId) {
        if let Some(entry) = self.count_tokens_health.write().await.get_mut(&id) {
            entry.mark_success();
        }
    }

    pub async fn mark_count_tokens_failed(&self, id: ProviderId) {
        if let Some(entry) = self.count_tokens_health.write().await.get_mut(&id) {
            entry.mark_failed(self.count_tokens_cooldown);
        }
    }

    /// Full ordered candidate list for the failover walk: first drops any
    /// candidate currently in cooldown (§4.2 "filter out providers whose
    /// `cooldown_until` is in the future", P2), then orders the survivors —
    /// `priority` keeps them in entry order; `round_robin` rotates the list
    /// by one shared cursor step per call (advancing once regardless of how
    /// many of the returned candidates are later tried), keeping the
    /// relative order of the rest intact (§4.2 "ties broken by stable
    /// insertion order").
    pub async fn ordered_candidates<'a>(
        &self,
        strategy: SelectionStrategy,
        candidates: &[&'a Provider],
    ) -> Vec<&'a Provider> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let healthy: Vec<&'a Provider> = {
            let guard = self.health.read().await;
            candidates
                .iter()
                .copied()
                .filter(|p| guard.get(&p.id).map(|h| h.is_active()).unwrap_or(false))
                .collect()
        };
        if healthy.is_empty() {
            return Vec::new();
        }
        match strategy {
            SelectionStrategy::Priority => healthy,
            SelectionStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                let mut rotated = Vec::with_capacity(healthy.len());
                rotated.extend_from_slice(&healthy[idx..]);
                rotated.extend_from_slice(&healthy[..idx]);
                rotated
            }
        }
    }

    /// The token counter's own candidate search: the first enabled,
    /// currently-healthy anthropic-typed provider in config order, ignoring
    /// model routes entirely (§4.2, §4.7). `None` means the counter must
    /// fall back to the local estimate.
    pub async fn select_healthy_anthropic(&self) -> Option<&Provider> {
        let guard = self.health.read().await;
        self.providers.iter().find(|p| {
            p.enabled
                && p.is_anthropic()
                && guard.get(&p.id).map(|h| h.is_active()).unwrap_or(false)
        })
    }
}
