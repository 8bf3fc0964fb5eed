//! The broker's single state machine: role, open logs, in-sync followers,
//! and the publish/subscribe entry points that orchestrate them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quay_core::{Ack, BrokerError, InsyncChange, InsyncChangeKind, LogEntry, Message, Sync, SyncAck};
use quay_runtime::{CircuitBreaker, CircuitBreakerError};
use quay_storage::Log;
use quay_transport::Socket;
use quay_web::handlers::{JsonSink, JsonStream};
use tokio::sync::{Mutex, Notify};

use crate::config::{BrokerConfig, Role};

/// A follower the leader currently considers in-sync: its replication
/// connection plus the per-topic offsets it has acknowledged.
pub struct FollowerHandle {
    pub(crate) sink: JsonSink,
    pub(crate) stream: JsonStream,
    pub(crate) tails: HashMap<String, i64>,
    pub(crate) quit: Arc<Notify>,
}

struct BrokerState {
    role: Role,
    logs: HashMap<String, Log>,
    followers: HashMap<String, FollowerHandle>,
    checkpoints: HashMap<String, i64>,
    /// The leader this broker currently knows about, for redirecting
    /// producers while in the follower role.
    leader_hostport: Option<String>,
    /// Active subscription count per topic, kept only for tracing context.
    subscriptions: HashMap<String, u64>,
}

/// Owns every piece of mutable broker state behind one lock, matching the
/// single-mutex-plus-condition-variable model: `notify` plays the role of
/// the broadcast condition variable, woken on every successful publish.
pub struct BrokerCore {
    host: String,
    port: u16,
    log_dir: PathBuf,
    wait_for_followers: bool,
    registry_hostport: String,
    state: Mutex<BrokerState>,
    notify: Notify,
    registry_breaker: CircuitBreaker,
    /// Persistent client connection to the registry's `/leader` endpoint,
    /// held only while this broker is leader.
    registry_leader_link: Mutex<Option<Socket>>,
}

impl BrokerCore {
    /// Build a fresh core from a loaded configuration. Does not touch the
    /// network or the filesystem beyond validating `log_dir` is a directory.
    #[must_use]
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            log_dir: config.log_dir.clone(),
            wait_for_followers: config.wait_for_followers,
            registry_hostport: config.register.clone(),
            state: Mutex::new(BrokerState {
                role: config.role,
                logs: HashMap::new(),
                followers: HashMap::new(),
                checkpoints: HashMap::new(),
                leader_hostport: None,
                subscriptions: HashMap::new(),
            }),
            notify: Notify::new(),
            registry_breaker: CircuitBreaker::new(config.registry_link_breaker.clone().into()),
            registry_leader_link: Mutex::new(None),
        }
    }

    /// This broker's own dialable `host:port`.
    #[must_use]
    pub fn own_hostport(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding `<topic>.ocp` files.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The registry's `host:port`.
    #[must_use]
    pub fn registry_hostport(&self) -> &str {
        &self.registry_hostport
    }

    /// Current role.
    pub async fn role(&self) -> Role {
        self.state.lock().await.role
    }

    /// Health of the circuit breaker guarding the registry link, for the
    /// `/health` route.
    pub async fn registry_link_state(&self) -> quay_runtime::CircuitState {
        self.registry_breaker.state().await
    }

    /// The leader this broker last learned about, if any.
    pub async fn known_leader(&self) -> Option<String> {
        self.state.lock().await.leader_hostport.clone()
    }

    /// Create (but do not yet await) a future that resolves on the next
    /// publish broadcast.
    ///
    /// Callers must create this future *before* checking whatever predicate
    /// decides whether they need to wait at all (e.g. `stat_size` against a
    /// last-seen offset): `notify_waiters` only wakes `Notified` futures
    /// that already existed at the moment it was called, so checking the
    /// predicate first and creating the future second can silently miss a
    /// publish that lands in the gap between the two. This fires for every
    /// publish regardless of topic; callers re-check their own predicate on
    /// each wakeup.
    pub fn notified(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }

    /// Record that a subscription started, for tracing context only.
    pub async fn subscription_started(&self, topic: &str) {
        *self.state.lock().await.subscriptions.entry(topic.to_string()).or_insert(0) += 1;
    }

    /// Record that a subscription ended.
    pub async fn subscription_ended(&self, topic: &str) {
        if let Some(count) = self.state.lock().await.subscriptions.get_mut(topic) {
            *count = count.saturating_sub(1);
        }
    }

    /// Accept a publish. Only the leader accepts; followers reply
    /// `Redirect` toward the last known leader, or `NotReady` if none is
    /// known yet.
    ///
    /// Replication is synchronous: every in-sync follower must ACK (or be
    /// evicted) before this returns, per the wait-then-ack design.
    pub async fn publish(self: &Arc<Self>, topic: &str, producer_id: &str, message: Message) -> Ack {
        let mut state = self.state.lock().await;

        if state.role != Role::Leader {
            return match &state.leader_hostport {
                Some(hostport) => Ack::redirect(hostport),
                None => Ack::not_ready(),
            };
        }

        if self.registry_breaker.state().await == quay_runtime::CircuitState::Open {
            tracing::warn!(%topic, "registry link down, refusing publish");
            return Ack::failure();
        }

        let log = match Self::open_log(&mut state.logs, &self.log_dir, topic) {
            Ok(log) => log,
            Err(err) => {
                tracing::error!(%topic, error = %err, "failed to open log for publish");
                return Ack::failure();
            }
        };

        let entry = match log.append(producer_id, message) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(%topic, error = %err, "append failed");
                return Ack::failure();
            }
        };

        if self.wait_for_followers {
            self.replicate(&mut state, topic, &entry).await;
        }

        drop(state);
        self.notify.notify_waiters();
        Ack::success(Vec::new())
    }

    /// Send `entry` to every in-sync follower and await its `SyncAck`,
    /// evicting any that fail to send or ack. Runs while the broker lock is
    /// held, trading replication throughput for a simple, obviously
    /// correct commit path.
    async fn replicate(&self, state: &mut BrokerState, topic: &str, entry: &LogEntry) {
        let sync = Sync {
            topic: topic.to_string(),
            message: entry.message.clone(),
            request_id: entry.request_id,
        };

        let mut evicted = Vec::new();
        for (hostport, follower) in &mut state.followers {
            match Self::send_sync(follower, &sync).await {
                Ok(offset) => {
                    follower.tails.insert(topic.to_string(), offset);
                }
                Err(err) => {
                    tracing::warn!(hostport, error = %err, "follower failed to ack, evicting");
                    evicted.push(hostport.clone());
                }
            }
        }

        for hostport in evicted {
            self.evict_follower_locked(state, &hostport).await;
        }
    }

    async fn send_sync(follower: &mut FollowerHandle, sync: &Sync) -> Result<i64, BrokerError> {
        follower
            .sink
            .send_json(sync)
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        let ack: SyncAck = follower
            .stream
            .recv_json()
            .await
            .ok_or_else(|| BrokerError::Transport("connection closed".to_string()))?
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        Ok(ack.offset)
    }

    /// Remove `hostport` from the in-sync set, wake its session task via
    /// `quit`, and notify the registry. Caller already holds the lock.
    async fn evict_follower_locked(&self, state: &mut BrokerState, hostport: &str) {
        if let Some(follower) = state.followers.remove(hostport) {
            follower.quit.notify_waiters();
        }
        self.push_insync_change(InsyncChangeKind::Remove, hostport)
            .await;
    }

    /// Evict a follower from outside the publish path (e.g. a catch-up
    /// session discovering its connection is already dead).
    pub async fn evict_follower(&self, hostport: &str) {
        let mut state = self.state.lock().await;
        self.evict_follower_locked(&mut state, hostport).await;
    }

    /// Insert a caught-up follower into the in-sync set and announce it to
    /// the registry.
    pub async fn admit_follower(&self, hostport: String, handle: FollowerHandle) {
        {
            let mut state = self.state.lock().await;
            state.followers.insert(hostport.clone(), handle);
        }
        self.push_insync_change(InsyncChangeKind::Add, &hostport)
            .await;
    }

    async fn push_insync_change(&self, kind: InsyncChangeKind, hostport: &str) {
        let change = InsyncChange {
            kind,
            hostport: hostport.to_string(),
        };
        let link = self.registry_leader_link.lock().await;
        let Some(socket) = link.as_ref() else {
            tracing::warn!(hostport, "no registry link to report insync change on");
            return;
        };
        let result = self
            .registry_breaker
            .call(|| async { socket.send_value(&change).await.map_err(|e| e.to_string()) })
            .await;
        if let Err(CircuitBreakerError::Inner(err)) = result {
            tracing::warn!(hostport, error = %err, "failed to push insync change");
        }
    }

    /// Follower-side write path: persist one replicated entry under the
    /// lock, then wake any subscriptions blocked at end-of-log.
    pub async fn apply_replicated(&self, topic: &str, entry: &LogEntry) -> Result<i64, BrokerError> {
        let size = {
            let mut state = self.state.lock().await;
            let log = Self::open_log(&mut state.logs, &self.log_dir, topic)?;
            log.write_next(entry)?;
            log.stat_size()?
        };
        self.notify.notify_waiters();
        Ok(size)
    }

    /// Per-topic sizes of every currently open log, used both as the
    /// leader's checkpoint snapshot and to drive catch-up.
    pub async fn log_sizes(&self) -> Result<HashMap<String, i64>, BrokerError> {
        let state = self.state.lock().await;
        state
            .logs
            .iter()
            .map(|(topic, log)| log.stat_size().map(|size| (topic.clone(), size)))
            .collect()
    }

    /// The checkpoint recorded at the moment this broker last became leader.
    pub async fn checkpoints(&self) -> HashMap<String, i64> {
        self.state.lock().await.checkpoints.clone()
    }

    fn open_log<'a>(
        logs: &'a mut HashMap<String, Log>,
        dir: &Path,
        topic: &str,
    ) -> Result<&'a mut Log, BrokerError> {
        if !logs.contains_key(topic) {
            let log = Log::open(dir, topic, -1)?;
            logs.insert(topic.to_string(), log);
        }
        Ok(logs.get_mut(topic).expect("just inserted"))
    }

    /// Transition to leader: snapshot every open log's size as this epoch's
    /// checkpoint, clear the prior follower set (each epoch earns its
    /// followers back via fresh `/follow` catch-up), and register with the
    /// registry's `/leader` endpoint.
    pub async fn become_leader(self: &Arc<Self>) -> Result<(), BrokerError> {
        self.discover_known_topics().await?;

        let hostport = self.own_hostport();
        let socket = Socket::new(self.registry_hostport.to_string(), "/leader");
        socket
            .send_value(&hostport)
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        let ack: Ack = socket
            .receive()
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;
        if !matches!(ack.status, quay_core::Status::Success) {
            return Err(BrokerError::Other("registry refused leader registration".to_string()));
        }

        {
            let mut state = self.state.lock().await;
            state.role = Role::Leader;
            state.leader_hostport = Some(hostport);
            state.followers.clear();
            state.checkpoints = state
                .logs
                .iter()
                .map(|(topic, log)| log.stat_size().map(|size| (topic.clone(), size)))
                .collect::<Result<_, _>>()?;
        }

        *self.registry_leader_link.lock().await = Some(socket);
        self.registry_breaker.reset().await;
        tracing::info!(hostport = %self.own_hostport(), "became leader");
        Ok(())
    }

    /// Transition to follower: drop the registry leader link (if any) and
    /// record the newly learned leader hostport for redirecting producers.
    pub async fn become_follower(&self, leader_hostport: Option<String>) {
        *self.registry_leader_link.lock().await = None;
        let mut state = self.state.lock().await;
        state.role = Role::Follower;
        state.leader_hostport = leader_hostport;
        state.followers.clear();
        tracing::info!(leader = ?state.leader_hostport, "became follower");
    }

    /// Handle a `/swap` broadcast: compute the deterministic winner over
    /// the given in-sync set and either become leader or reset to follow
    /// the winner.
    pub async fn handle_swap(self: &Arc<Self>, insync: &[String]) -> Result<(), BrokerError> {
        let own = self.own_hostport();
        let winner = election_winner(&own, insync);

        if winner == own {
            self.become_leader().await
        } else {
            self.become_follower(Some(winner)).await;
            Ok(())
        }
    }

    /// Open every `<topic>.ocp` file already on disk, so a restarted broker
    /// knows about topics nobody has published to since it came back up.
    async fn discover_known_topics(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let entries = std::fs::read_dir(&self.log_dir)?;
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(topic) = name.strip_suffix(".ocp") {
                Self::open_log(&mut state.logs, &self.log_dir, topic)?;
            }
        }
        Ok(())
    }
}

/// Deterministic leader pick: `argmax CRC32(hostport)` over the received
/// in-sync set alone. A broker not present in `insync` never wins, even if
/// its own hash would exceed every member's — only brokers the registry
/// actually brokered into the in-sync set are eligible. `own` is used only
/// as the bootstrap fallback when `insync` is empty (nobody else to compare
/// against), never injected into the candidate pool.
fn election_winner(own: &str, insync: &[String]) -> String {
    insync
        .iter()
        .map(String::as_str)
        .max_by_key(|hostport| crc32fast::hash(hostport.as_bytes()))
        .unwrap_or(own)
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::BreakerConfigDto;

    fn test_config(role: Role, dir: &Path) -> BrokerConfig {
        BrokerConfig {
            role,
            register: "registry:12345".to_string(),
            log_dir: dir.to_path_buf(),
            host: "b1".to_string(),
            port: 5050,
            wait_for_followers: true,
            registry_link_breaker: BreakerConfigDto::default(),
        }
    }

    #[test]
    fn own_hostport_formats_host_and_port() {
        let dir = quay_testing::TempLogDir::new();
        let core = BrokerCore::new(&test_config(Role::Leader, dir.path()));
        assert_eq!(core.own_hostport(), "b1:5050");
    }

    #[tokio::test]
    async fn publish_as_follower_without_known_leader_replies_not_ready() {
        let dir = quay_testing::TempLogDir::new();
        let core = Arc::new(BrokerCore::new(&test_config(Role::Follower, dir.path())));

        let ack = core.publish("t", "x", Message::new(1, b"a".to_vec())).await;
        assert_eq!(ack.status, quay_core::Status::NotReady);
    }

    #[tokio::test]
    async fn publish_as_follower_with_known_leader_replies_redirect() {
        let dir = quay_testing::TempLogDir::new();
        let core = Arc::new(BrokerCore::new(&test_config(Role::Follower, dir.path())));
        core.become_follower(Some("leader:5050".to_string())).await;

        let ack = core.publish("t", "x", Message::new(1, b"a".to_vec())).await;
        assert_eq!(ack.status, quay_core::Status::Redirect);
        assert_eq!(ack.payload, b"leader:5050");
    }

    #[tokio::test]
    async fn apply_replicated_wakes_waiter_and_grows_log() {
        let dir = quay_testing::TempLogDir::new();
        let core = Arc::new(BrokerCore::new(&test_config(Role::Follower, dir.path())));

        let entry = LogEntry {
            message: Message::new(1, b"hello".to_vec()),
            request_id: quay_core::request_id_for("x", 1),
        };
        let size = core.apply_replicated("t", &entry).await.expect("apply");
        assert_eq!(size, 40 + 5);

        let sizes = core.log_sizes().await.expect("log_sizes");
        assert_eq!(sizes.get("t"), Some(&(40 + 5)));
    }

    #[test]
    fn election_winner_is_deterministic_across_orderings() {
        let set_a = vec!["h1:5050".to_string(), "h2:5050".to_string(), "h3:5050".to_string()];
        let set_b = vec!["h3:5050".to_string(), "h1:5050".to_string(), "h2:5050".to_string()];
        assert_eq!(election_winner("self:5050", &set_a), election_winner("self:5050", &set_b));
    }

    #[test]
    fn election_winner_never_returns_own_when_absent_from_insync() {
        // Regression: the winner must always come from the received in-sync
        // set, never from injecting `own` into the candidate pool, no
        // matter how `own`'s hash compares to the set's members.
        let insync = vec!["a:5050".to_string(), "b:5050".to_string(), "c:5050".to_string()];
        for own in ["self:5050", "z-outranks-everyone:5050", "a-prefix:5050"] {
            let winner = election_winner(own, &insync);
            assert!(insync.contains(&winner), "winner {winner} must be a member of insync");
        }
    }

    #[test]
    fn election_winner_falls_back_to_own_when_insync_empty() {
        assert_eq!(election_winner("self:5050", &[]), "self:5050");
    }

    #[tokio::test]
    async fn handle_swap_becomes_follower_when_own_hostport_does_not_win() {
        let dir = quay_testing::TempLogDir::new();
        let core = Arc::new(BrokerCore::new(&test_config(Role::Follower, dir.path())));
        let own = core.own_hostport();

        // Construct a candidate set containing a hostport engineered to
        // out-hash `own`: brute-force a suffix until its CRC32 exceeds
        // `own`'s, which always terminates quickly over a 32-bit codomain.
        let mut winner = None;
        for i in 0u32.. {
            let candidate = format!("peer-{i}:5050");
            if crc32fast::hash(candidate.as_bytes()) > crc32fast::hash(own.as_bytes()) {
                winner = Some(candidate);
                break;
            }
        }
        let winner = winner.expect("a higher-hashing candidate exists");

        core.handle_swap(std::slice::from_ref(&winner)).await.expect("handle_swap");
        assert_eq!(core.role().await, Role::Follower);
        assert_eq!(core.known_leader().await, Some(winner));
    }

    #[tokio::test]
    async fn handle_swap_does_not_win_on_own_hash_when_absent_from_insync() {
        let dir = quay_testing::TempLogDir::new();
        let core = Arc::new(BrokerCore::new(&test_config(Role::Follower, dir.path())));
        let own = core.own_hostport();

        // Engineer a broadcast set that does NOT contain `own`, but whose
        // only member hashes lower than `own` -- the exact scenario where
        // self-injection would have wrongly elected `own`.
        let mut loser = None;
        for i in 0u32.. {
            let candidate = format!("peer-{i}:5050");
            if crc32fast::hash(candidate.as_bytes()) < crc32fast::hash(own.as_bytes()) {
                loser = Some(candidate);
                break;
            }
        }
        let loser = loser.expect("a lower-hashing candidate exists");

        core.handle_swap(std::slice::from_ref(&loser)).await.expect("handle_swap");
        // `own` is not a member of the broadcast in-sync set, so it must
        // never become leader here even though its own hash is higher.
        assert_eq!(core.role().await, Role::Follower);
        assert_eq!(core.known_leader().await, Some(loser));
    }

    #[tokio::test]
    async fn concurrent_producers_each_keep_their_own_message_order() {
        use proptest::strategy::{Strategy, ValueTree};
        use proptest::test_runner::TestRunner;
        use quay_testing::strategies::multi_producer_sequences;

        let mut runner = TestRunner::default();
        let producers = multi_producer_sequences(4, 6)
            .new_tree(&mut runner)
            .expect("generate sequences")
            .current();

        let dir = quay_testing::TempLogDir::new();
        let mut config = test_config(Role::Leader, dir.path());
        config.wait_for_followers = false;
        let core = Arc::new(BrokerCore::new(&config));

        // Each producer gets its own topic (named after itself) so its log
        // can be checked in isolation: the point is that publishing from
        // several producers concurrently never disturbs the order *within*
        // one producer's own sequence, even though they all go through the
        // same broker lock.
        let handles: Vec<_> = producers
            .into_iter()
            .map(|(producer_id, messages)| {
                let core = Arc::clone(&core);
                tokio::spawn(async move {
                    for message in &messages {
                        let ack = core.publish(&producer_id, &producer_id, message.clone()).await;
                        assert_eq!(ack.status, quay_core::Status::Success);
                    }
                    (producer_id, messages)
                })
            })
            .collect();

        for handle in handles {
            let (producer_id, messages) = handle.await.expect("producer task");
            let mut reader = Log::open(core.log_dir(), &producer_id, 0).expect("open log");
            let mut seen_ids = Vec::new();
            loop {
                match reader.read_next(&producer_id) {
                    Ok(entry) => seen_ids.push(entry.message.id),
                    Err(BrokerError::EndOfLog) => break,
                    Err(err) => panic!("read_next failed: {err}"),
                }
            }
            let expected_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
            assert_eq!(
                seen_ids, expected_ids,
                "producer {producer_id}'s messages must land in the order it sent them"
            );
        }
    }

    #[tokio::test]
    async fn publish_dedups_immediate_retry_with_same_request_id() {
        use proptest::strategy::{Strategy, ValueTree};
        use proptest::test_runner::TestRunner;
        use quay_testing::strategies::multi_producer_sequences;

        let mut runner = TestRunner::default();
        let (producer_id, messages) = multi_producer_sequences(1, 3)
            .new_tree(&mut runner)
            .expect("generate sequences")
            .current()
            .remove(0);
        let message = messages.into_iter().next().expect("at least one message");

        let dir = quay_testing::TempLogDir::new();
        let mut config = test_config(Role::Leader, dir.path());
        config.wait_for_followers = false;
        let core = Arc::new(BrokerCore::new(&config));

        let first = core.publish("orders", &producer_id, message.clone()).await;
        assert_eq!(first.status, quay_core::Status::Success);
        let retry = core.publish("orders", &producer_id, message.clone()).await;
        assert_eq!(retry.status, quay_core::Status::Success);

        let mut reader = Log::open(core.log_dir(), "orders", 0).expect("open log");
        let mut count = 0;
        loop {
            match reader.read_next("orders") {
                Ok(_) => count += 1,
                Err(BrokerError::EndOfLog) => break,
                Err(err) => panic!("read_next failed: {err}"),
            }
        }
        assert_eq!(count, 1, "an immediate retry with the same producer id and message id must dedup");
    }
}
