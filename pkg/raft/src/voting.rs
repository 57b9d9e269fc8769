use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use executor::sync::SyncMutex;

use crate::log::LogManager;
use crate::proto::{Entry, NodeId};

struct VotingLogInner {
    acks: HashSet<NodeId>,
    weak_acks: HashSet<NodeId>,
    terminated: bool,
}

/// An uncommitted entry plus the acks required to commit it (Section 3,
/// Glossary). Shared between the producer (the appender, via the Voting
/// Tracker) and every per-peer `AppendNodeEntryHandler` that may ack it; the
/// handlers hold a shared reference, the tracker holds the strong reference
/// and drops it on commit/abort (Section 9).
pub struct VotingLog {
    entry: Entry,
    quorum_size: usize,
    inner: SyncMutex<VotingLogInner>,
}

impl VotingLog {
    /// `quorum_size` is fixed at creation time (leader computes
    /// `ceil((peers + 1) / 2)` at append time, Section 4.5) and never
    /// changes for the lifetime of this VotingLog.
    pub fn new(entry: Entry, quorum_size: usize) -> Arc<Self> {
        Arc::new(Self {
            entry,
            quorum_size,
            inner: SyncMutex::new(VotingLogInner {
                acks: HashSet::new(),
                weak_acks: HashSet::new(),
                terminated: false,
            }),
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.apply(|s| s.terminated).unwrap_or(true)
    }

    pub fn terminate(&self) {
        let _ = self.inner.apply(|s| s.terminated = true);
    }

    /// Records a durable ack from `peer`. Returns the total ack count
    /// (including self, which the caller pre-seeds at creation) after this
    /// ack is applied; a no-op once terminated.
    pub fn record_ack(&self, peer: NodeId) -> usize {
        self.inner
            .apply(|s| {
                if !s.terminated {
                    s.acks.insert(peer);
                }
                s.acks.len()
            })
            .unwrap_or(0)
    }

    pub fn ack_count(&self) -> usize {
        self.inner.apply(|s| s.acks.len()).unwrap_or(0)
    }

    pub fn has_quorum(&self) -> bool {
        self.ack_count() >= self.quorum_size
    }

    /// Weak acceptance (Section 4.5): a follower's "received but not yet
    /// durable" reply. Tracked separately and never drives commit.
    pub fn record_weak_ack(&self, peer: NodeId) {
        let _ = self.inner.apply(|s| {
            s.weak_acks.insert(peer);
        });
    }

    pub fn weak_ack_count(&self) -> usize {
        self.inner.apply(|s| s.weak_acks.len()).unwrap_or(0)
    }
}

/// Tracks every in-flight VotingLog and advances the leader's commit index
/// once the lowest-pending entry reaches quorum in the current term
/// (Section 4.5). Owns the authoritative ack-set bookkeeping; handlers only
/// ever call `record_ack`/`record_weak_ack` through the shared `VotingLog`.
pub struct VotingTracker {
    log: Arc<dyn LogManager>,
    pending: SyncMutex<BTreeMap<u64, Arc<VotingLog>>>,
}

impl VotingTracker {
    pub fn new(log: Arc<dyn LogManager>) -> Self {
        Self {
            log,
            pending: SyncMutex::new(BTreeMap::new()),
        }
    }

    /// Starts tracking `voting_log`, pre-seeding the leader's own ack (a
    /// leader always counts itself towards quorum).
    pub fn track(&self, voting_log: Arc<VotingLog>, self_id: NodeId) {
        voting_log.record_ack(self_id);
        let index = voting_log.entry().index;
        let _ = self.pending.apply(|m| {
            m.insert(index, voting_log);
        });
    }

    pub fn get(&self, index: u64) -> Option<Arc<VotingLog>> {
        self.pending.apply(|m| m.get(&index).cloned()).unwrap_or(None)
    }

    /// Records `peer`'s durable ack for `index` and attempts to advance the
    /// commit index. `current_term` is the leader's term at the time of the
    /// call; only entries from that term ever drive commit advancement
    /// (Section 4.5, the Raft safety restriction against committing prior
    /// terms' entries by counting replicas).
    ///
    /// Returns the new commit index if it advanced.
    pub fn record_ack(&self, index: u64, peer: NodeId, current_term: u64) -> Option<u64> {
        if let Some(voting_log) = self.get(index) {
            voting_log.record_ack(peer);
        }
        self.try_advance(current_term)
    }

    pub fn record_weak_ack(&self, index: u64, peer: NodeId) {
        if let Some(voting_log) = self.get(index) {
            voting_log.record_weak_ack(peer);
        }
    }

    fn try_advance(&self, current_term: u64) -> Option<u64> {
        let mut new_commit = None;

        let _ = self.pending.apply(|m| {
            loop {
                let front_index = match m.iter().next() {
                    Some((idx, _)) => *idx,
                    None => break,
                };

                let voting_log = m.get(&front_index).unwrap().clone();

                if voting_log.entry().term != current_term {
                    // Can't advance past an entry from a different term
                    // until it is superseded by a newer append at our own
                    // term (classic Raft "don't commit prior-term entries
                    // by counting").
                    break;
                }

                if !voting_log.has_quorum() {
                    break;
                }

                voting_log.terminate();
                m.remove(&front_index);
                new_commit = Some(front_index);
            }
        });

        if let Some(index) = new_commit {
            self.log.set_commit_index(index);
        }

        new_commit
    }

    /// Drops every pending VotingLog without committing it — used on
    /// stepdown, since a former leader's in-flight entries no longer have a
    /// quorum-counting owner (Section 9, "Cyclic ownership").
    pub fn abort_all(&self) {
        let _ = self.pending.apply(|m| {
            for (_, voting_log) in m.iter() {
                voting_log.terminate();
            }
            m.clear();
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.apply(|m| m.len()).unwrap_or(0)
    }
}

/// `quorumSize = ceil((peers + 1) / 2)` where `peers` counts voting peers
/// excluding self (Glossary: "Quorum — ceil((N+1)/2) of the group, where N
/// counts voting peers including self").
pub fn quorum_size(total_voting_members: usize) -> usize {
    (total_voting_members + 1) / 2 + (total_voting_members + 1) % 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;

    fn entry(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            payload: vec![],
        }
    }

    #[test]
    fn quorum_size_matches_glossary_formula() {
        // N=1 (single node): quorum = 1.
        assert_eq!(quorum_size(1), 1);
        // N=3: quorum = 2.
        assert_eq!(quorum_size(3), 2);
        // N=5: quorum = 3.
        assert_eq!(quorum_size(5), 3);
    }

    #[test]
    fn single_node_group_commits_on_self_append() {
        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let tracker = VotingTracker::new(log.clone());

        let e = log.append_local(1, vec![]).unwrap();
        let vl = VotingLog::new(e, quorum_size(1));
        tracker.track(vl, "A".to_string());

        // Self-ack alone already satisfies quorum of 1.
        let advanced = tracker.record_ack(1, "A".to_string(), 1);
        assert_eq!(advanced, Some(1));
    }

    #[test]
    fn commit_advances_only_in_order() {
        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let tracker = VotingTracker::new(log.clone());

        for i in 1..=3u64 {
            let e = entry(i, 1);
            let vl = VotingLog::new(e, 2);
            tracker.track(vl, "A".to_string());
        }

        // Ack index 2 and 3 first: commit shouldn't move since index 1 is
        // still pending.
        assert_eq!(tracker.record_ack(2, "B".to_string(), 1), None);
        assert_eq!(tracker.record_ack(3, "B".to_string(), 1), None);

        // Now ack index 1: commit should jump straight to 3, since 2 and 3
        // were already at quorum.
        assert_eq!(tracker.record_ack(1, "B".to_string(), 1), Some(3));
        assert_eq!(log.commit_index(), 3);
    }

    #[test]
    fn prior_term_entries_never_commit_by_counting_alone() {
        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let tracker = VotingTracker::new(log.clone());

        let vl = VotingLog::new(entry(1, 1), 2);
        tracker.track(vl, "A".to_string());

        // Leader is now at term 2; acking the term-1 entry must not commit
        // it even with quorum.
        assert_eq!(tracker.record_ack(1, "B".to_string(), 2), None);
    }

    #[test]
    fn weak_acks_never_drive_commit() {
        let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
        let tracker = VotingTracker::new(log.clone());

        let vl = VotingLog::new(entry(1, 1), 2);
        tracker.track(vl.clone(), "A".to_string());

        tracker.record_weak_ack(1, "B".to_string());
        assert_eq!(vl.weak_ack_count(), 1);
        assert_eq!(vl.ack_count(), 1); // only self
        assert!(tracker.try_advance(1).is_none());
    }
}
