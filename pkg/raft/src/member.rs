use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use executor::sync::SyncMutex;
use rand::Rng;

use crate::catchup::{CatchUpHost, CatchUpManager};
use crate::config::RaftConfig;
use crate::dispatcher::{Dispatcher, DispatcherHost};
use crate::election::{ElectionContext, ElectionOutcome};
use crate::log::LogManager;
use crate::persist::{HardState, HardStateStore};
use crate::proto::{
    AppendEntriesRequest, AppendEntryResult, AppendEntryStatus, ElectionRequest, ElectionResponse,
    ExecuteResponse, ExecuteStatus, GroupId, HeartBeatRequest, HeartBeatResponse, MatchTermRequest,
    NodeId, Peer, RequestCommitIndexResponse, RequestCommitIndexStatus, SendSnapshotRequest,
};
use crate::rpc::{RaftRpc, RpcEndpoint};
use crate::snapshot::Snapshot;
use crate::state::MemberState;
use crate::voting::{quorum_size, VotingLog, VotingTracker};

/// The replicated state machine this group drives (Section 1's `apply(entry)
/// → status` external collaborator). A real deployment plugs in whatever
/// applies committed bytes to the query engine/storage layer; this crate
/// only needs the contract.
pub trait StateMachine: Send + Sync {
    fn apply(&self, payload: &[u8]) -> Vec<u8>;
}

pub struct RaftMemberOptions {
    pub group_id: GroupId,
    pub self_id: NodeId,
    pub peers: Vec<Peer>,
    pub config: RaftConfig,
}

/// Ties together every component in Section 2's dependency order
/// (LogManager -> Dispatcher/CatchUp/Election -> Member -> RPC surface).
/// Holds the one piece of truly global mutable state (`MemberState`) and
/// wires everything else to it via a weak self-reference, since the
/// dispatcher/catch-up manager need to call back into the member without
/// creating a reference cycle.
pub struct RaftMember {
    group_id: GroupId,
    self_id: NodeId,
    config: RaftConfig,
    state: Arc<MemberState>,
    log: Arc<dyn LogManager>,
    persist: Arc<HardStateStore>,
    rpc: Arc<dyn RaftRpc>,
    state_machine: Arc<dyn StateMachine>,
    dispatcher: Arc<Dispatcher>,
    catch_up: Arc<CatchUpManager>,
    tracker: Arc<VotingTracker>,
    peers: SyncMutex<HashMap<NodeId, Peer>>,
    election: SyncMutex<Option<Arc<ElectionContext>>>,
    last_applied: AtomicU64,
    apply_results: SyncMutex<HashMap<u64, Vec<u8>>>,
    /// Set once a voter tells us we're no longer in the group (Section 4.2
    /// rule 5). Once set, the election timer stops calling `start_election`
    /// entirely instead of just waiting out another timeout.
    removed_from_group: AtomicBool,
}

/// Forwards dispatcher/catch-up callbacks to the member they belong to,
/// without the two owning an `Arc` back to each other (Section 9's cyclic
/// ownership note, applied here to Member <-> Dispatcher instead of
/// VotingLog <-> handler).
struct MemberHandle(Weak<RaftMember>);

impl MemberHandle {
    fn upgrade(&self) -> Arc<RaftMember> {
        self.0.upgrade().expect("dispatcher/catch-up outlived its member")
    }
}

#[async_trait]
impl DispatcherHost for MemberHandle {
    fn current_term(&self) -> u64 {
        self.upgrade().state.current_term()
    }

    fn self_id(&self) -> NodeId {
        self.upgrade().self_id.clone()
    }

    fn record_ack(&self, index: u64, peer: NodeId) {
        let member = self.upgrade();
        let term = member.state.current_term();
        member.tracker.record_ack(index, peer, term);
    }

    fn record_weak_ack(&self, index: u64, peer: NodeId) {
        self.upgrade().tracker.record_weak_ack(index, peer);
    }

    fn observe_higher_term(&self, new_term: u64) {
        let member = self.upgrade();
        member.state.step_down(new_term, None);
        member.tracker.abort_all();
        member.catch_up.abort_all();
    }

    fn trigger_catch_up(&self, peer: NodeId) {
        let member = self.upgrade();
        let next_index = member.log.last_index() + 1;
        member.catch_up.trigger(peer, next_index);
    }
}

#[async_trait]
impl CatchUpHost for MemberHandle {
    fn is_still_leader(&self, term: u64) -> bool {
        let member = self.upgrade();
        member.state.is_leader() && member.state.current_term() == term
    }
}

impl RaftMember {
    pub fn new(
        options: RaftMemberOptions,
        hard_state: Option<HardState>,
        log: Arc<dyn LogManager>,
        persist: Arc<HardStateStore>,
        rpc: Arc<dyn RaftRpc>,
        state_machine: Arc<dyn StateMachine>,
    ) -> Arc<Self> {
        let (current_term, voted_for) = match hard_state {
            Some(hs) => (hs.current_term, hs.voted_for),
            None => (0, None),
        };

        Arc::new_cyclic(|weak| {
            let handle: Arc<dyn DispatcherHost> = Arc::new(MemberHandle(weak.clone()));
            let catch_up_handle: Arc<dyn CatchUpHost> = Arc::new(MemberHandle(weak.clone()));

            let dispatcher = Dispatcher::new(
                options.group_id.clone(),
                options.config.clone(),
                log.clone(),
                rpc.clone(),
                handle,
            );
            for peer in &options.peers {
                dispatcher.add_peer(peer.clone());
            }

            let catch_up = CatchUpManager::new(
                options.group_id.clone(),
                options.config.clone(),
                log.clone(),
                rpc.clone(),
                catch_up_handle,
            );

            let peers = options.peers.into_iter().map(|p| (p.id.clone(), p)).collect();
            let tracker = Arc::new(VotingTracker::new(log.clone()));

            Self {
                group_id: options.group_id,
                self_id: options.self_id,
                config: options.config,
                state: Arc::new(MemberState::new(current_term, voted_for)),
                log,
                persist,
                rpc,
                state_machine,
                dispatcher,
                catch_up,
                tracker,
                peers: SyncMutex::new(peers),
                election: SyncMutex::new(None),
                last_applied: AtomicU64::new(0),
                apply_results: SyncMutex::new(HashMap::new()),
                removed_from_group: AtomicBool::new(false),
            }
        })
    }

    /// Spawns the background loops (election timer, heartbeat, apply) that
    /// make this member actually participate in the group. Separate from
    /// `new` so tests can construct a member and drive it purely via the
    /// `RpcEndpoint`/`execute` surface without any timer racing them.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        executor::spawn(async move { this.election_timer_loop().await });

        let this = self.clone();
        executor::spawn(async move { this.heartbeat_loop().await });

        let this = self.clone();
        executor::spawn(async move { this.apply_loop().await });
    }

    fn peer_list(&self) -> Vec<Peer> {
        self.peers.apply(|m| m.values().cloned().collect()).unwrap_or_default()
    }

    fn is_known_peer(&self, id: &NodeId) -> bool {
        self.peers.apply(|m| m.contains_key(id)).unwrap_or(false)
    }

    fn voting_member_count(&self) -> usize {
        self.peer_list().len() + 1
    }

    async fn persist_hard_state(&self, term: u64, voted_for: Option<NodeId>) {
        let state = HardState {
            current_term: term,
            voted_for,
        };
        let _ = self.persist.persist_hard_state(&state).await;
    }

    fn random_election_timeout(&self) -> Duration {
        let (lo, hi) = self.config.election_timeout_range;
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=span);
        lo + Duration::from_millis(jitter)
    }

    async fn election_timer_loop(self: Arc<Self>) {
        loop {
            let timeout = self.random_election_timeout();
            let _ = executor::sleep(timeout).await;

            if self.removed_from_group.load(Ordering::SeqCst) {
                continue;
            }
            if self.state.is_leader() {
                continue;
            }
            if self.state.time_since_leader_contact() < timeout {
                continue;
            }

            self.start_election().await;
        }
    }

    /// Drives one election attempt in `currTerm + 1` (Section 4.2).
    async fn start_election(self: &Arc<Self>) {
        let term = match self.state.become_candidate(&self.self_id) {
            Some(term) => term,
            None => return,
        };
        self.persist_hard_state(term, Some(self.self_id.clone())).await;

        let peers = self.peer_list();
        let total_voting_members = peers.len() + 1;
        let quorum = quorum_size(total_voting_members);
        let (ctx, waiter) = ElectionContext::new(term, quorum, total_voting_members);
        let _ = self.election.apply(|slot| *slot = Some(ctx.clone()));

        let last_index = self.log.last_index();
        let last_term = self.log.last_term();

        for peer in peers {
            let this = self.clone();
            let ctx = ctx.clone();
            let request = ElectionRequest {
                term,
                group_id: self.group_id.clone(),
                elector: self.self_id.clone(),
                last_log_index: last_index,
                last_log_term: last_term,
            };
            executor::spawn(async move {
                let outcome = match this.rpc.request_vote(&peer.id, request).await {
                    Ok(response) => ctx.handle_response(response),
                    Err(_) => ctx.handle_transport_error(),
                };
                this.handle_election_outcome(outcome).await;
            });
        }

        // Bounded by the upper end of the election timeout range: a stalled
        // quorum must not wedge the timer loop forever (Section 4.2's
        // "wake the waiter so a fresh election can start").
        let _ = executor::timeout(self.config.election_timeout_range.1, waiter.recv()).await;

        if ctx.is_valid() && self.state.become_leader(term, &self.self_id) {
            self.on_become_leader(term).await;
        }
    }

    async fn handle_election_outcome(&self, outcome: ElectionOutcome) {
        match outcome {
            ElectionOutcome::StepDown { new_term } => {
                self.state.step_down(new_term, None);
                self.persist_hard_state(new_term, None).await;
                self.tracker.abort_all();
                self.catch_up.abort_all();
            }
            ElectionOutcome::Removed => {
                self.removed_from_group.store(true, Ordering::SeqCst);
            }
            ElectionOutcome::Ignored | ElectionOutcome::Pending | ElectionOutcome::Won => {}
        }
    }

    async fn on_become_leader(&self, term: u64) {
        log::info!("{} became leader at term {}", self.self_id, term);
        self.send_heartbeats(term);
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            let _ = executor::sleep(self.config.heartbeat_interval).await;
            if !self.state.is_leader() {
                continue;
            }
            self.send_heartbeats(self.state.current_term());
        }
    }

    /// Fans a heartbeat out to every peer without waiting for replies; a
    /// reply carrying a higher term triggers stepdown as it arrives
    /// (Section 4.1, LEADER -> FOLLOWER transition).
    fn send_heartbeats(&self, term: u64) {
        let commit_index = self.log.commit_index();
        let commit_term = self.log.term_at(commit_index).unwrap_or(0);

        for peer in self.peer_list() {
            let rpc = self.rpc.clone();
            let state = self.state.clone();
            let request = HeartBeatRequest {
                term,
                commit_log_index: commit_index,
                commit_log_term: commit_term,
                leader: self.self_id.clone(),
                group_id: self.group_id.clone(),
                require_identifier: None,
                regenerate_identifier: None,
            };
            let peer_id = peer.id.clone();
            executor::spawn(async move {
                if let Ok(response) = rpc.heartbeat(&peer_id, request).await {
                    if response.term > state.current_term() {
                        state.step_down(response.term, None);
                    }
                }
            });
        }
    }

    /// Applies every newly committed entry in order (Section 2's data-flow
    /// diagram: "commit -> apply").
    async fn apply_loop(self: Arc<Self>) {
        loop {
            self.apply_committed();
            let _ = executor::sleep(Duration::from_millis(5)).await;
        }
    }

    fn apply_committed(&self) {
        let commit_index = self.log.commit_index();
        loop {
            let last_applied = self.last_applied.load(Ordering::SeqCst);
            if last_applied >= commit_index {
                return;
            }

            let next_index = last_applied + 1;
            let entries = self.log.entries_from(last_applied);
            let entry = match entries.into_iter().next() {
                Some(e) if e.index == next_index => e,
                _ => return,
            };

            let result = self.state_machine.apply(&entry.payload);
            self.last_applied.store(entry.index, Ordering::SeqCst);
            let _ = self.apply_results.apply(|m| {
                m.insert(entry.index, result);
            });
        }
    }

    /// `executeForwardedRequest` (Section 4.1): appends locally and waits
    /// for the entry to commit and apply, bounded by `catchUpTimeoutMS`
    /// reused here as the client-visible request deadline.
    pub async fn execute(self: &Arc<Self>, request_bytes: Vec<u8>) -> ExecuteResponse {
        if !self.state.is_leader() {
            return ExecuteResponse {
                status: if self.state.leader().is_some() {
                    ExecuteStatus::NotLeader
                } else {
                    ExecuteStatus::UnknownLeader
                },
                response_bytes: Vec::new(),
            };
        }

        let term = self.state.current_term();
        let entry = match self.log.append_local(term, request_bytes) {
            Ok(entry) => entry,
            Err(_) => {
                // Persistence failure is fatal to the leader role (Section
                // 4.1, "Failure semantics").
                self.state.step_down(term, None);
                return ExecuteResponse {
                    status: ExecuteStatus::Timeout,
                    response_bytes: Vec::new(),
                };
            }
        };

        let quorum = quorum_size(self.voting_member_count());
        let voting_log = VotingLog::new(entry.clone(), quorum);
        self.tracker.track(voting_log.clone(), self.self_id.clone());
        self.dispatcher.offer(voting_log.clone());

        let deadline = Instant::now() + self.config.catch_up_timeout;
        loop {
            if let Some(bytes) = self.apply_results.apply(|m| m.get(&entry.index).cloned()).unwrap_or(None) {
                return ExecuteResponse {
                    status: ExecuteStatus::Ok,
                    response_bytes: bytes,
                };
            }

            if voting_log.is_terminated() && !voting_log.has_quorum() {
                return ExecuteResponse {
                    status: ExecuteStatus::Timeout,
                    response_bytes: Vec::new(),
                };
            }

            if Instant::now() >= deadline {
                return ExecuteResponse {
                    status: ExecuteStatus::Timeout,
                    response_bytes: Vec::new(),
                };
            }

            let _ = executor::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn request_commit_index(&self) -> RequestCommitIndexResponse {
        if !self.state.is_leader() {
            return RequestCommitIndexResponse {
                status: RequestCommitIndexStatus::NotLeader,
                commit_index: 0,
                commit_term: 0,
            };
        }

        let commit_index = self.log.commit_index();
        RequestCommitIndexResponse {
            status: RequestCommitIndexStatus::Ok,
            commit_index,
            commit_term: self.log.term_at(commit_index).unwrap_or(0),
        }
    }
}

#[async_trait]
impl RpcEndpoint for RaftMember {
    async fn handle_heartbeat(&self, req: HeartBeatRequest) -> HeartBeatResponse {
        let current_term = self.state.current_term();
        if req.term < current_term {
            return HeartBeatResponse {
                term: current_term,
                follower_identifier: None,
                require_partition_table: None,
                last_log_index: self.log.last_index(),
                last_log_term: self.log.last_term(),
            };
        }

        self.state.observe_leader_contact(req.term, req.leader);
        self.persist_hard_state(req.term, self.state.voted_for()).await;

        HeartBeatResponse {
            term: self.state.current_term(),
            follower_identifier: None,
            require_partition_table: None,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    async fn handle_election(&self, req: ElectionRequest) -> ElectionResponse {
        if !self.is_known_peer(&req.elector) {
            return ElectionResponse::node_is_not_in_group();
        }

        let current_term = self.state.current_term();
        if req.term < current_term {
            return ElectionResponse::term(current_term);
        }

        if self.state.leader().is_some()
            && self.state.time_since_leader_contact() < self.config.leader_stickiness_window
        {
            return ElectionResponse::leader_still_online();
        }

        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let candidate_behind = req.last_log_term < last_term
            || (req.last_log_term == last_term && req.last_log_index < last_index);
        if candidate_behind {
            return ElectionResponse::term(self.state.current_term().max(req.term));
        }

        if self.state.try_grant_vote(req.term, &req.elector) {
            self.persist_hard_state(req.term, Some(req.elector)).await;
            ElectionResponse::agree()
        } else {
            ElectionResponse::term(self.state.current_term())
        }
    }

    async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntryResult {
        let current_term = self.state.current_term();
        if req.term < current_term {
            return AppendEntryResult {
                status: AppendEntryStatus::Stale,
                term: Some(current_term),
                last_log_index: Some(self.log.last_index()),
                last_log_term: Some(self.log.last_term()),
                receiver: Some(self.self_id.clone()),
            };
        }

        self.state.observe_leader_contact(req.term, req.leader.clone());
        self.persist_hard_state(req.term, self.state.voted_for()).await;

        if !self.log.matches(req.prev_log_index, req.prev_log_term) {
            return AppendEntryResult {
                status: AppendEntryStatus::LogMismatch,
                term: Some(self.state.current_term()),
                last_log_index: Some(self.log.last_index()),
                last_log_term: Some(self.log.last_term()),
                receiver: Some(self.self_id.clone()),
            };
        }

        if self
            .log
            .append_entries(req.prev_log_index, req.prev_log_term, &req.entries)
            .is_err()
        {
            return AppendEntryResult {
                status: AppendEntryStatus::Stale,
                term: Some(self.state.current_term()),
                last_log_index: Some(self.log.last_index()),
                last_log_term: Some(self.log.last_term()),
                receiver: Some(self.self_id.clone()),
            };
        }

        let new_commit = req.leader_commit.min(self.log.last_index());
        if new_commit > self.log.commit_index() {
            self.log.set_commit_index(new_commit);
        }

        // A synchronous in-memory log has no "received but not durable"
        // window of its own; when weak acceptance is configured, the reply
        // still distinguishes itself so a follower-sliding-window deployment
        // can tell the two codepaths apart end-to-end.
        let status = if self.config.enable_weak_acceptance {
            AppendEntryStatus::WeakAccept
        } else {
            AppendEntryStatus::Ok
        };

        AppendEntryResult {
            status,
            term: Some(self.state.current_term()),
            last_log_index: Some(self.log.last_index()),
            last_log_term: Some(self.log.last_term()),
            receiver: Some(self.self_id.clone()),
        }
    }

    async fn handle_send_snapshot(&self, req: SendSnapshotRequest) {
        if let Some(snapshot) = Snapshot::deserialize(&req.snapshot_bytes) {
            self.log.install_snapshot(snapshot.clone());
            let _ = self.persist.persist_snapshot(&snapshot).await;
            self.last_applied.store(snapshot.last_included_index, Ordering::SeqCst);
        }
    }

    async fn handle_match_term(&self, req: MatchTermRequest) -> bool {
        self.log.matches(req.index, req.term)
    }
}
