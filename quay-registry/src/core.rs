//! Registry state: current leader, in-sync set, and the set of brokers ever
//! seen. Otherwise stateless — there is no log, no replication, just the
//! bookkeeping that makes leader election safe without quorum.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use quay_transport::Socket;
use tokio::sync::Mutex;

use crate::config::RegistryConfig;

struct RegistryState {
    leader: Option<String>,
    insync: HashSet<String>,
    seen: HashSet<String>,
}

/// Owns the registry's state behind one lock. Leader registration is
/// exclusive: only one broker may hold the "leader" slot at a time, enforced
/// by checking and setting `leader` atomically under that same lock.
pub struct RegistryCore {
    state: Mutex<RegistryState>,
    leader_wait: Duration,
}

impl RegistryCore {
    /// Build a fresh core from configuration.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                leader: None,
                insync: HashSet::new(),
                seen: HashSet::new(),
            }),
            leader_wait: Duration::from_millis(config.leader_wait_ms),
        }
    }

    /// Current leader, if one is registered.
    pub async fn current_leader(&self) -> Option<String> {
        self.state.lock().await.leader.clone()
    }

    /// The in-sync set, for consumer discovery.
    pub async fn insync_set(&self) -> Vec<String> {
        self.state.lock().await.insync.iter().cloned().collect()
    }

    /// Try to claim the leader slot for `hostport`. Returns `false` if a
    /// leader is already registered.
    pub async fn register_leader(&self, hostport: String) -> bool {
        let mut state = self.state.lock().await;
        if state.leader.is_some() {
            return false;
        }
        state.seen.insert(hostport.clone());
        state.insync.clear();
        state.leader = Some(hostport);
        true
    }

    /// Release the leader slot, but only if `hostport` still holds it (a
    /// stale disconnect from a broker that already lost the slot to a race
    /// must not clobber a newer registration).
    pub async fn clear_leader(&self, hostport: &str) {
        let mut state = self.state.lock().await;
        if state.leader.as_deref() == Some(hostport) {
            state.leader = None;
        }
    }

    /// Mutate the in-sync set per a leader's `InsyncChange` push.
    pub async fn apply_insync_change(&self, change: quay_core::InsyncChange) {
        let mut state = self.state.lock().await;
        match change.kind {
            quay_core::InsyncChangeKind::Add => {
                state.insync.insert(change.hostport.clone());
                state.seen.insert(change.hostport);
            }
            quay_core::InsyncChangeKind::Remove => {
                state.insync.remove(&change.hostport);
            }
        }
    }

    /// The set to broadcast on a swap: the in-sync set if non-empty,
    /// otherwise every broker ever seen.
    async fn swap_targets(&self) -> Vec<String> {
        let state = self.state.lock().await;
        if state.insync.is_empty() {
            state.seen.iter().cloned().collect()
        } else {
            state.insync.iter().cloned().collect()
        }
    }

    /// Broadcast the current swap target set to every broker in it, on
    /// their `/swap` endpoint, once.
    async fn broadcast_swap_once(&self, targets: &[String]) {
        for hostport in targets {
            let socket = Socket::new(hostport.clone(), "/swap");
            if let Err(err) = socket.send_value(&targets.to_vec()).await {
                tracing::warn!(hostport, error = %err, "swap broadcast failed");
            }
        }
    }

    /// Repeatedly broadcast the swap target set every `leader_wait` until a
    /// new leader registers. Intended to be spawned once per leader-loss
    /// event; returns as soon as `current_leader` becomes `Some`.
    pub async fn run_swap_broadcast(self: &Arc<Self>) {
        loop {
            if self.current_leader().await.is_some() {
                return;
            }
            let targets = self.swap_targets().await;
            if !targets.is_empty() {
                tracing::info!(count = targets.len(), "broadcasting swap to known brokers");
                self.broadcast_swap_once(&targets).await;
            }
            tokio::time::sleep(self.leader_wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_core::{InsyncChange, InsyncChangeKind};

    fn core() -> RegistryCore {
        RegistryCore::new(&RegistryConfig {
            port: 12345,
            leader_wait_ms: 50,
        })
    }

    #[tokio::test]
    async fn register_leader_is_exclusive() {
        let core = core();
        assert!(core.register_leader("b1:5050".to_string()).await);
        assert!(!core.register_leader("b2:5050".to_string()).await);
        assert_eq!(core.current_leader().await, Some("b1:5050".to_string()));
    }

    #[tokio::test]
    async fn clear_leader_ignores_stale_hostport() {
        let core = core();
        core.register_leader("b1:5050".to_string()).await;
        core.clear_leader("b2:5050").await;
        assert_eq!(core.current_leader().await, Some("b1:5050".to_string()));

        core.clear_leader("b1:5050").await;
        assert_eq!(core.current_leader().await, None);
    }

    #[tokio::test]
    async fn apply_insync_change_add_and_remove() {
        let core = core();
        core.apply_insync_change(InsyncChange {
            kind: InsyncChangeKind::Add,
            hostport: "f1:5050".to_string(),
        })
        .await;
        assert_eq!(core.insync_set().await, vec!["f1:5050".to_string()]);

        core.apply_insync_change(InsyncChange {
            kind: InsyncChangeKind::Remove,
            hostport: "f1:5050".to_string(),
        })
        .await;
        assert!(core.insync_set().await.is_empty());
    }

    #[tokio::test]
    async fn swap_targets_falls_back_to_seen_when_insync_empty() {
        let core = core();
        core.register_leader("b1:5050".to_string()).await;
        core.apply_insync_change(InsyncChange {
            kind: InsyncChangeKind::Add,
            hostport: "f1:5050".to_string(),
        })
        .await;
        core.apply_insync_change(InsyncChange {
            kind: InsyncChangeKind::Remove,
            hostport: "f1:5050".to_string(),
        })
        .await;

        let targets = core.swap_targets().await;
        assert_eq!(targets, vec!["b1:5050".to_string()]);
    }
}
