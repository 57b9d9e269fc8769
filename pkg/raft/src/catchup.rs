use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use executor::sync::SyncMutex;

use crate::backoff::{ExponentialBackoff, ExponentialBackoffOptions, ExponentialBackoffResult};
use crate::config::RaftConfig;
use crate::dispatcher::DispatcherHost;
use crate::log::LogManager;
use crate::proto::{AppendEntriesRequest, AppendEntryStatus, GroupId, NodeId, SendSnapshotRequest};
use crate::rpc::RaftRpc;

/// Extends `DispatcherHost` with the term-locked leadership recheck the
/// snapshot path needs (Section 4.4: "before sending, re-checks under the
/// term-lock that role is still LEADER").
pub trait CatchUpHost: DispatcherHost {
    fn is_still_leader(&self, term: u64) -> bool;
}

/// Resynchronizes a follower whose log has fallen behind or been compacted
/// past (Section 4.4). Registers at most one task per peer; a second
/// trigger against an already-registered peer is a no-op, since the running
/// task will recheck the peer's state once it finishes anyway.
pub struct CatchUpManager {
    group_id: GroupId,
    config: RaftConfig,
    log: Arc<dyn LogManager>,
    rpc: Arc<dyn RaftRpc>,
    host: Arc<dyn CatchUpHost>,
    active: SyncMutex<HashSet<NodeId>>,
    backoffs: SyncMutex<HashMap<NodeId, ExponentialBackoff>>,
    /// One abort flag per in-flight task (Section 3's `CatchUpTask` data
    /// model, Section 5's "catch-up tasks check `abort` between steps").
    /// Set wholesale by `abort_all` on stepdown; a task clears its own entry
    /// when it finishes.
    abort_flags: SyncMutex<HashMap<NodeId, Arc<AtomicBool>>>,
}

impl CatchUpManager {
    pub fn new(
        group_id: GroupId,
        config: RaftConfig,
        log: Arc<dyn LogManager>,
        rpc: Arc<dyn RaftRpc>,
        host: Arc<dyn CatchUpHost>,
    ) -> Arc<Self> {
        Arc::new(Self {
            group_id,
            config,
            log,
            rpc,
            host,
            active: SyncMutex::new(HashSet::new()),
            backoffs: SyncMutex::new(HashMap::new()),
            abort_flags: SyncMutex::new(HashMap::new()),
        })
    }

    fn register_task(&self, peer: &NodeId) -> bool {
        self.active
            .apply(|s| s.insert(peer.clone()))
            .unwrap_or(false)
    }

    fn unregister_task(&self, peer: &NodeId) {
        let _ = self.active.apply(|s| {
            s.remove(peer);
        });
        let _ = self.abort_flags.apply(|m| {
            m.remove(peer);
        });
    }

    /// Tells every in-flight task to abort at its next check (Section 5):
    /// a stepdown must not leave a stale leader's catch-up loop still
    /// pushing log chunks to a peer.
    pub fn abort_all(&self) {
        let _ = self.abort_flags.apply(|m| {
            for flag in m.values() {
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    /// Spawns a catch-up attempt for `peer` starting at `next_index`
    /// (Section 4.4(a)/(b)'s triggers); a no-op if `peer` already has a task
    /// registered.
    pub fn trigger(self: &Arc<Self>, peer: NodeId, next_index: u64) {
        if !self.register_task(&peer) {
            return;
        }

        let abort = Arc::new(AtomicBool::new(false));
        let _ = self.abort_flags.apply(|m| {
            m.insert(peer.clone(), abort.clone());
        });

        let this = self.clone();
        executor::spawn(async move {
            this.run(peer, next_index, abort).await;
        });
    }

    async fn run(self: Arc<Self>, peer: NodeId, next_index: u64, abort: Arc<AtomicBool>) {
        let wait = self
            .backoffs
            .apply(|m| {
                m.entry(peer.clone())
                    .or_insert_with(|| ExponentialBackoff::new(ExponentialBackoffOptions::default()))
                    .start_attempt()
            })
            .unwrap_or(ExponentialBackoffResult::Start);

        match wait {
            ExponentialBackoffResult::Stop => {
                self.unregister_task(&peer);
                return;
            }
            ExponentialBackoffResult::StartAfter(d) => {
                let _ = executor::sleep(d).await;
            }
            ExponentialBackoffResult::Start => {}
        }

        let term = self.host.current_term();
        let mut next_index = next_index;

        if self.log.term_at(next_index.saturating_sub(1)).is_none() && next_index > 1 {
            match self.send_snapshot_to(&peer, term).await {
                Some(resume_from) => next_index = resume_from,
                None => {
                    self.finish(&peer, false);
                    return;
                }
            }
        }

        if abort.load(Ordering::SeqCst) {
            self.finish(&peer, false);
            return;
        }

        let ok = self.run_log_catch_up(&peer, term, next_index, &abort).await;
        self.finish(&peer, ok);
    }

    fn finish(&self, peer: &NodeId, success: bool) {
        let _ = self.backoffs.apply(|m| {
            if let Some(b) = m.get_mut(peer) {
                b.end_attempt(success);
            }
        });
        self.unregister_task(peer);
    }

    /// Sends `SendSnapshotRequest` with the extended `catchUpTimeoutMS`
    /// bound; returns the index to resume `LogCatchUpTask` from on success.
    /// Re-checks leadership under the term lock immediately before sending
    /// (Section 4.4): a stepdown that raced with this task must not leave a
    /// stale leader pushing snapshot bytes.
    async fn send_snapshot_to(&self, peer: &NodeId, term: u64) -> Option<u64> {
        if !self.host.is_still_leader(term) {
            return None;
        }

        let snapshot = self.log.latest_snapshot()?;
        let request = SendSnapshotRequest {
            group_id: self.group_id.clone(),
            snapshot_bytes: snapshot.serialize(),
        };

        let send = self.rpc.send_snapshot(peer, request);
        match executor::timeout(self.config.catch_up_timeout, send).await {
            Ok(Ok(())) => Some(snapshot.last_included_index + 1),
            _ => None,
        }
    }

    /// Sends a contiguous slice of entries via the normal AppendEntries path
    /// but outside the dispatcher queue (Section 4.4): bypasses rate limits,
    /// still honors frame size. Rechecks `abort` before every chunk (Section
    /// 5), not just once up front, since a stepdown can land mid-loop.
    async fn run_log_catch_up(
        &self,
        peer: &NodeId,
        term: u64,
        from_index: u64,
        abort: &Arc<AtomicBool>,
    ) -> bool {
        let entries = self.log.entries_from(from_index.saturating_sub(1));
        if entries.is_empty() {
            return true;
        }

        const RESERVED: usize = 128;
        let budget = self.config.thrift_max_frame_size.saturating_sub(RESERVED);

        let mut chunk = Vec::new();
        let mut chunk_bytes = 0usize;

        for entry in entries {
            if abort.load(Ordering::SeqCst) {
                return false;
            }

            let size = entry.byte_size();
            if !chunk.is_empty() && chunk_bytes + size > budget {
                if !self.send_log_chunk(peer, term, std::mem::take(&mut chunk)).await {
                    return false;
                }
                chunk_bytes = 0;
            }
            chunk_bytes += size;
            chunk.push(entry);
        }

        if abort.load(Ordering::SeqCst) {
            return false;
        }

        if !chunk.is_empty() {
            return self.send_log_chunk(peer, term, chunk).await;
        }

        true
    }

    async fn send_log_chunk(
        &self,
        peer: &NodeId,
        term: u64,
        chunk: Vec<crate::proto::Entry>,
    ) -> bool {
        let prev_log_index = chunk[0].index - 1;
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);

        let request = AppendEntriesRequest {
            group_id: self.group_id.clone(),
            term,
            leader: self.host.self_id(),
            leader_commit: self.log.commit_index(),
            prev_log_index,
            prev_log_term,
            entries: chunk.clone(),
        };

        match self.rpc.append_entries(peer, request).await {
            Ok(result) if result.status == AppendEntryStatus::Ok => {
                for entry in &chunk {
                    self.host.record_ack(entry.index, peer.clone());
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool as TestAtomicBool, AtomicU64 as TestAtomicU64};

    use super::*;
    use crate::log::MemoryLog;
    use crate::proto::{
        AppendEntryResult, ElectionRequest, ElectionResponse, Entry, HeartBeatRequest, HeartBeatResponse,
        MatchTermRequest,
    };
    use crate::rpc::TransportError;
    use crate::snapshot::Snapshot;

    struct FakeHost {
        term: TestAtomicU64,
        leader: TestAtomicBool,
        acked: SyncMutex<Vec<(u64, NodeId)>>,
    }

    #[async_trait::async_trait]
    impl DispatcherHost for FakeHost {
        fn current_term(&self) -> u64 {
            self.term.load(Ordering::SeqCst)
        }

        fn self_id(&self) -> NodeId {
            "leader".to_string()
        }

        fn record_ack(&self, index: u64, peer: NodeId) {
            let _ = self.acked.apply(|v| v.push((index, peer)));
        }

        fn record_weak_ack(&self, _index: u64, _peer: NodeId) {}

        fn observe_higher_term(&self, new_term: u64) {
            self.term.store(new_term, Ordering::SeqCst);
        }

        fn trigger_catch_up(&self, _peer: NodeId) {}
    }

    impl CatchUpHost for FakeHost {
        fn is_still_leader(&self, term: u64) -> bool {
            self.leader.load(Ordering::SeqCst) && self.term.load(Ordering::SeqCst) == term
        }
    }

    struct FakeRpc {
        snapshot_calls: SyncMutex<Vec<NodeId>>,
        append_calls: SyncMutex<Vec<AppendEntriesRequest>>,
        snapshot_ok: bool,
    }

    #[async_trait::async_trait]
    impl RaftRpc for FakeRpc {
        async fn heartbeat(
            &self,
            _peer: &NodeId,
            _req: HeartBeatRequest,
        ) -> std::result::Result<HeartBeatResponse, TransportError> {
            unimplemented!()
        }

        async fn request_vote(
            &self,
            _peer: &NodeId,
            _req: ElectionRequest,
        ) -> std::result::Result<ElectionResponse, TransportError> {
            unimplemented!()
        }

        async fn append_entries(
            &self,
            _peer: &NodeId,
            req: AppendEntriesRequest,
        ) -> std::result::Result<AppendEntryResult, TransportError> {
            let last_log_index = req.entries.last().map(|e| e.index);
            let last_log_term = req.entries.last().map(|e| e.term);
            let _ = self.append_calls.apply(|v| v.push(req));
            Ok(AppendEntryResult {
                status: AppendEntryStatus::Ok,
                term: None,
                last_log_index,
                last_log_term,
                receiver: None,
            })
        }

        async fn send_snapshot(
            &self,
            peer: &NodeId,
            _req: SendSnapshotRequest,
        ) -> std::result::Result<(), TransportError> {
            let _ = self.snapshot_calls.apply(|v| v.push(peer.clone()));
            if self.snapshot_ok {
                Ok(())
            } else {
                Err(TransportError("snapshot send failed".to_string()))
            }
        }

        async fn match_term(
            &self,
            _peer: &NodeId,
            _req: MatchTermRequest,
        ) -> std::result::Result<bool, TransportError> {
            unimplemented!()
        }
    }

    fn entry(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            payload: vec![1, 2, 3],
        }
    }

    fn manager(log: Arc<dyn LogManager>, rpc: Arc<FakeRpc>, host: Arc<FakeHost>) -> Arc<CatchUpManager> {
        CatchUpManager::new("group-1".to_string(), RaftConfig::default(), log, rpc, host)
    }

    #[test]
    fn register_task_dedups_against_an_already_active_peer() {
        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let rpc = Arc::new(FakeRpc {
            snapshot_calls: SyncMutex::new(Vec::new()),
            append_calls: SyncMutex::new(Vec::new()),
            snapshot_ok: true,
        });
        let host = Arc::new(FakeHost {
            term: TestAtomicU64::new(1),
            leader: TestAtomicBool::new(true),
            acked: SyncMutex::new(Vec::new()),
        });

        let m = manager(log, rpc, host);
        assert!(m.register_task(&"peer-a".to_string()));
        // Second registration against the same peer while the first is
        // still active is a no-op (Section 4.4: at most one task per peer).
        assert!(!m.register_task(&"peer-a".to_string()));

        m.unregister_task(&"peer-a".to_string());
        assert!(m.register_task(&"peer-a".to_string()));
    }

    #[test]
    fn send_snapshot_to_rechecks_leadership_before_sending() {
        executor::run(async {
            let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
            log.install_snapshot(Snapshot {
                last_included_index: 5,
                last_included_term: 1,
                state: vec![0xAB],
            });

            let rpc = Arc::new(FakeRpc {
                snapshot_calls: SyncMutex::new(Vec::new()),
                append_calls: SyncMutex::new(Vec::new()),
                snapshot_ok: true,
            });
            let host = Arc::new(FakeHost {
                term: TestAtomicU64::new(1),
                leader: TestAtomicBool::new(false),
                acked: SyncMutex::new(Vec::new()),
            });

            let m = manager(log, rpc.clone(), host.clone());

            // No longer leader by the time we'd send: must bail out without
            // ever calling the transport.
            assert_eq!(m.send_snapshot_to(&"peer-a".to_string(), 1).await, None);
            assert!(rpc.snapshot_calls.apply(|v| v.clone()).unwrap().is_empty());

            host.leader.store(true, Ordering::SeqCst);
            let resume_from = m.send_snapshot_to(&"peer-a".to_string(), 1).await;
            assert_eq!(resume_from, Some(6));
            assert_eq!(
                rpc.snapshot_calls.apply(|v| v.clone()).unwrap(),
                vec!["peer-a".to_string()]
            );
        })
        .unwrap();
    }

    #[test]
    fn run_resumes_log_catch_up_from_the_snapshot_boundary() {
        executor::run(async {
            let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
            log.install_snapshot(Snapshot {
                last_included_index: 5,
                last_included_term: 1,
                state: vec![0xAB],
            });
            // Entries the follower still needs after the snapshot boundary.
            log.append_entries(5, 1, &[entry(6, 1), entry(7, 1)]).unwrap();

            let rpc = Arc::new(FakeRpc {
                snapshot_calls: SyncMutex::new(Vec::new()),
                append_calls: SyncMutex::new(Vec::new()),
                snapshot_ok: true,
            });
            let host = Arc::new(FakeHost {
                term: TestAtomicU64::new(1),
                leader: TestAtomicBool::new(true),
                acked: SyncMutex::new(Vec::new()),
            });

            let m = manager(log, rpc.clone(), host.clone());

            // The follower's next index falls inside the compacted prefix
            // (no local term for it): `run` must send the snapshot first,
            // then resume the log catch-up from `last_included_index + 1`
            // rather than from the index we were originally triggered with.
            let abort = Arc::new(TestAtomicBool::new(false));
            Arc::clone(&m).run("peer-a".to_string(), 2, abort).await;

            assert_eq!(
                rpc.snapshot_calls.apply(|v| v.clone()).unwrap(),
                vec!["peer-a".to_string()]
            );

            let append_calls = rpc.append_calls.apply(|v| v.clone()).unwrap();
            assert_eq!(append_calls.len(), 1);
            assert_eq!(append_calls[0].prev_log_index, 5);
            assert_eq!(
                append_calls[0].entries.iter().map(|e| e.index).collect::<Vec<_>>(),
                vec![6, 7]
            );

            assert_eq!(
                host.acked.apply(|v| v.clone()).unwrap(),
                vec![(6, "peer-a".to_string()), (7, "peer-a".to_string())]
            );
        })
        .unwrap();
    }
}
