use executor::sync::SyncMutex;

use common::errors::*;

use crate::proto::Entry;
use crate::snapshot::Snapshot;

/// The boundary-contract kept by any log manager implementation (Section
/// 4.1/2, Glossary): append, truncate, commit-index, match-index,
/// term-at-index, snapshot boundary. The consensus core only ever talks to
/// this interface; durable storage lives outside this crate in the real
/// system (Section 1, "storage/TSFile layer" as external collaborator).
pub trait LogManager: Send + Sync {
    /// Appends `entries` starting at `prev_log_index + 1`, truncating any
    /// conflicting suffix first. Returns an error only on a genuine
    /// persistence failure (fatal to the role per Section 4.1).
    fn append_entries(&self, prev_log_index: u64, prev_log_term: u64, entries: &[Entry]) -> Result<()>;

    /// Appends a single leader-originated entry at the next index, returning
    /// the index it was assigned.
    fn append_local(&self, term: u64, payload: Vec<u8>) -> Result<Entry>;

    /// Drops every entry with index > `index` (inclusive truncation of the
    /// conflicting suffix).
    fn truncate_suffix(&self, index: u64);

    /// The term stored at `index`, or `None` if `index` is before the
    /// retained log (i.e. before the snapshot boundary) or past the end.
    fn term_at(&self, index: u64) -> Option<u64>;

    fn last_index(&self) -> u64;

    fn last_term(&self) -> u64;

    fn commit_index(&self) -> u64;

    /// Advances the commit index; the caller (Voting Tracker) guarantees
    /// monotonicity, but the implementation re-checks defensively.
    fn set_commit_index(&self, index: u64);

    /// Every entry with index in `(from, last_index]`, in order. Used by the
    /// dispatcher to form batches and by LogCatchUpTask to form a
    /// contiguous backfill slice.
    fn entries_from(&self, from: u64) -> Vec<Entry>;

    /// `true` iff the local log contains `(index, term)` — used for
    /// `matchLog`/`matchTerm` and for log-matching checks in `appendEntries`.
    fn matches(&self, index: u64, term: u64) -> bool {
        if index == 0 {
            return term == 0;
        }
        self.term_at(index) == Some(term)
    }

    /// Replaces local state with a snapshot, discarding the log prefix up to
    /// `snapshot.last_included_index` (Section 4.1, `installSnapshot`).
    fn install_snapshot(&self, snapshot: Snapshot);

    fn latest_snapshot(&self) -> Option<Snapshot>;
}

struct MemoryLogState {
    entries: Vec<Entry>,
    // Index of entries[0]; entries[i] has index `base_index + i + 1`.
    base_index: u64,
    base_term: u64,
    commit_index: u64,
    snapshot: Option<Snapshot>,
}

impl MemoryLogState {
    fn position_of(&self, index: u64) -> Option<usize> {
        if index <= self.base_index {
            return None;
        }
        let offset = (index - self.base_index - 1) as usize;
        if offset < self.entries.len() {
            Some(offset)
        } else {
            None
        }
    }
}

/// A bounded, in-memory reference implementation of `LogManager`, used by
/// this crate's own tests and standing in for a real durable log until the
/// owning process wires one up (Section 0 "Persistence" in SPEC_FULL.md).
pub struct MemoryLog {
    state: SyncMutex<MemoryLogState>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            state: SyncMutex::new(MemoryLogState {
                entries: vec![],
                base_index: 0,
                base_term: 0,
                commit_index: 0,
                snapshot: None,
            }),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager for MemoryLog {
    fn append_entries(
        &self,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: &[Entry],
    ) -> Result<()> {
        self.state
            .apply(|s| -> Result<()> {
                let prev_ok = if prev_log_index == 0 {
                    prev_log_term == 0
                } else if prev_log_index == s.base_index {
                    prev_log_term == s.base_term
                } else {
                    match s.position_of(prev_log_index) {
                        Some(pos) => s.entries[pos].term == prev_log_term,
                        None => false,
                    }
                };

                if !prev_ok {
                    return Err(err_msg("appendEntries: prevLogIndex/Term do not match"));
                }

                for entry in entries {
                    match s.position_of(entry.index) {
                        Some(pos) => {
                            if s.entries[pos].term != entry.term {
                                // Conflicting suffix: truncate from here and
                                // re-append everything from this point on.
                                s.entries.truncate(pos);
                                s.entries.push(entry.clone());
                            }
                            // Same (index, term): already present, no-op
                            // (Section 8, re-delivery idempotence).
                        }
                        None => {
                            s.entries.push(entry.clone());
                        }
                    }
                }

                Ok(())
            })
            .map_err(|_| err_msg("log manager lock poisoned"))?
    }

    fn append_local(&self, term: u64, payload: Vec<u8>) -> Result<Entry> {
        self.state
            .apply(|s| {
                let index = s.base_index + s.entries.len() as u64 + 1;
                let entry = Entry {
                    index,
                    term,
                    payload,
                };
                s.entries.push(entry.clone());
                entry
            })
            .map_err(|_| err_msg("log manager lock poisoned"))
    }

    fn truncate_suffix(&self, index: u64) {
        let _ = self.state.apply(|s| {
            if let Some(pos) = s.position_of(index + 1) {
                s.entries.truncate(pos);
            }
        });
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        self.state
            .apply(|s| {
                if index == s.base_index {
                    return Some(s.base_term);
                }
                s.position_of(index).map(|pos| s.entries[pos].term)
            })
            .unwrap_or(None)
    }

    fn last_index(&self) -> u64 {
        self.state
            .apply(|s| s.base_index + s.entries.len() as u64)
            .unwrap_or(0)
    }

    fn last_term(&self) -> u64 {
        self.state
            .apply(|s| s.entries.last().map(|e| e.term).unwrap_or(s.base_term))
            .unwrap_or(0)
    }

    fn commit_index(&self) -> u64 {
        self.state.apply(|s| s.commit_index).unwrap_or(0)
    }

    fn set_commit_index(&self, index: u64) {
        let _ = self.state.apply(|s| {
            if index > s.commit_index {
                s.commit_index = index;
            }
        });
    }

    fn entries_from(&self, from: u64) -> Vec<Entry> {
        self.state
            .apply(|s| match s.position_of(from + 1) {
                Some(pos) => s.entries[pos..].to_vec(),
                None => {
                    if from < s.base_index {
                        // Requested range starts before the retained log:
                        // caller must fall back to snapshot catch-up.
                        vec![]
                    } else {
                        vec![]
                    }
                }
            })
            .unwrap_or_default()
    }

    fn install_snapshot(&self, snapshot: Snapshot) {
        let _ = self.state.apply(|s| {
            if let Some(pos) = s.position_of(snapshot.last_included_index + 1) {
                s.entries.drain(0..pos);
            } else {
                s.entries.clear();
            }
            s.base_index = snapshot.last_included_index;
            s.base_term = snapshot.last_included_term;
            if s.commit_index < snapshot.last_included_index {
                s.commit_index = snapshot.last_included_index;
            }
            s.snapshot = Some(snapshot);
        });
    }

    fn latest_snapshot(&self) -> Option<Snapshot> {
        self.state.apply(|s| s.snapshot.clone()).unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_dense_and_ordered() {
        let log = MemoryLog::new();
        log.append_local(1, b"a".to_vec()).unwrap();
        log.append_local(1, b"b".to_vec()).unwrap();

        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 1);
        assert!(log.matches(2, 1));
        assert!(!log.matches(2, 2));
    }

    #[test]
    fn append_entries_rejects_on_prev_mismatch() {
        let log = MemoryLog::new();
        log.append_local(1, b"a".to_vec()).unwrap();

        let err = log.append_entries(
            5,
            1,
            &[Entry {
                index: 6,
                term: 1,
                payload: vec![],
            }],
        );
        assert!(err.is_err());
    }

    #[test]
    fn append_entries_truncates_conflicting_suffix() {
        let log = MemoryLog::new();
        log.append_local(1, b"a".to_vec()).unwrap(); // index 1, term 1
        log.append_local(1, b"b".to_vec()).unwrap(); // index 2, term 1

        // A new leader at term 2 overwrites index 2 onward.
        log.append_entries(
            1,
            1,
            &[Entry {
                index: 2,
                term: 2,
                payload: b"c".to_vec(),
            }],
        )
        .unwrap();

        assert_eq!(log.term_at(2), Some(2));
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn redelivering_present_entries_is_a_no_op() {
        let log = MemoryLog::new();
        let e = log.append_local(1, b"a".to_vec()).unwrap();

        log.append_entries(0, 0, &[e.clone()]).unwrap();
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.term_at(1), Some(1));
    }

    #[test]
    fn install_snapshot_discards_prefix() {
        let log = MemoryLog::new();
        for i in 1..=10u64 {
            log.append_local(1, vec![i as u8]).unwrap();
        }

        log.install_snapshot(Snapshot {
            last_included_index: 5,
            last_included_term: 1,
            state: vec![0xAB],
        });

        assert_eq!(log.term_at(5), Some(1));
        assert_eq!(log.entries_from(5).len(), 5);
        assert!(log.commit_index() >= 5);
    }
}
