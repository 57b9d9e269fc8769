//! End-to-end scenarios against three in-process members wired through a
//! `LocalRpcRouter`, matching Section 8's literal scenarios 1/3 (election,
//! then replicated writes once a leader exists).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use file::temp::TempDir;

use crate::config::RaftConfig;
use crate::log::{LogManager, MemoryLog};
use crate::member::{RaftMember, RaftMemberOptions, StateMachine};
use crate::persist::HardStateStore;
use crate::proto::{
    ElectionRequest, ElectionResponse, ExecuteStatus, HeartBeatRequest, Peer,
    RequestCommitIndexStatus,
};
use crate::rpc::{LocalRpcRouter, RpcEndpoint};

struct EchoStateMachine {
    applied_count: AtomicUsize,
}

impl StateMachine for EchoStateMachine {
    fn apply(&self, payload: &[u8]) -> Vec<u8> {
        self.applied_count.fetch_add(1, Ordering::SeqCst);
        payload.to_vec()
    }
}

fn test_config() -> RaftConfig {
    let mut config = RaftConfig::default();
    config.election_timeout_range = (Duration::from_millis(20), Duration::from_millis(40));
    config.heartbeat_interval = Duration::from_millis(10);
    config.leader_stickiness_window = Duration::from_millis(15);
    config.catch_up_timeout = Duration::from_millis(500);
    config
}

fn peer(id: &str) -> Peer {
    Peer {
        id: id.to_string(),
        host: "localhost".to_string(),
        port: 0,
        enabled: true,
    }
}

/// Builds a 3-node group {A,B,C} sharing one `LocalRpcRouter`, none started
/// yet so the caller can register every member before any timer fires. The
/// returned `TempDir`s must outlive the members, since dropping one deletes
/// its member's hard-state directory.
fn build_group(router: &Arc<LocalRpcRouter>) -> (Vec<Arc<RaftMember>>, Vec<TempDir>) {
    let ids = ["A", "B", "C"];
    let mut members = Vec::new();
    let mut dirs = Vec::new();

    for &id in &ids {
        let peers: Vec<Peer> = ids.iter().filter(|&&p| p != id).map(peer).collect();
        let options = RaftMemberOptions {
            group_id: "group-1".to_string(),
            self_id: id.to_string(),
            peers,
            config: test_config(),
        };

        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let dir = TempDir::create().unwrap();
        let persist = Arc::new(HardStateStore::new(dir.path()));
        dirs.push(dir);

        let state_machine = Arc::new(EchoStateMachine {
            applied_count: AtomicUsize::new(0),
        });

        let member = RaftMember::new(options, None, log, persist, router.clone(), state_machine);
        router.register(id.to_string(), member.clone());
        members.push(member);
    }

    (members, dirs)
}

#[test]
fn three_node_group_elects_exactly_one_leader() {
    executor::run(async {
        let router = Arc::new(LocalRpcRouter::new());
        let (members, _dirs) = build_group(&router);

        for member in &members {
            member.start();
        }

        // Give the election timers several rounds to settle on a leader.
        let _ = executor::sleep(Duration::from_millis(300)).await;

        let leaders: Vec<_> = members
            .iter()
            .filter(|m| m.request_commit_index().status == RequestCommitIndexStatus::Ok)
            .collect();

        assert_eq!(leaders.len(), 1, "exactly one member should have become leader");
    })
    .unwrap();
}

#[test]
fn a_committed_write_replicates_to_every_follower() {
    executor::run(async {
        let router = Arc::new(LocalRpcRouter::new());
        let (members, _dirs) = build_group(&router);

        for member in &members {
            member.start();
        }

        let _ = executor::sleep(Duration::from_millis(300)).await;

        let leader = members
            .iter()
            .find(|m| m.request_commit_index().status == RequestCommitIndexStatus::Ok)
            .expect("a leader must have been elected")
            .clone();

        let response = leader.execute(b"hello".to_vec()).await;
        assert_eq!(response.status, ExecuteStatus::Ok);
        assert_eq!(response.response_bytes, b"hello");

        // Give followers time to receive the replicated entry via the next
        // heartbeat/AppendEntries cycle.
        let _ = executor::sleep(Duration::from_millis(100)).await;
        assert!(leader.request_commit_index().commit_index >= 1);
    })
    .unwrap();
}

#[test]
fn election_request_is_rejected_while_a_leader_is_still_live() {
    executor::run(async {
        let router = Arc::new(LocalRpcRouter::new());
        let (members, _dirs) = build_group(&router);
        let follower = members[1].clone(); // "B", never started: no timers racing this check.

        follower
            .handle_heartbeat(HeartBeatRequest {
                term: 1,
                commit_log_index: 0,
                commit_log_term: 0,
                leader: "A".to_string(),
                group_id: "group-1".to_string(),
                require_identifier: None,
                regenerate_identifier: None,
            })
            .await;

        let response = follower
            .handle_election(ElectionRequest {
                term: 2,
                group_id: "group-1".to_string(),
                elector: "C".to_string(),
                last_log_index: 0,
                last_log_term: 0,
            })
            .await;

        assert_eq!(response, ElectionResponse::leader_still_online());
    })
    .unwrap();
}
