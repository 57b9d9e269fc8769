use std::time::Instant;

use executor::sync::SyncMutex;

use crate::proto::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

struct StateInner {
    current_term: u64,
    role: Role,
    voted_for: Option<NodeId>,
    /// Best-known current leader, set by heartbeats/AppendEntries at a term
    /// `>=` our own; cleared on every term bump.
    leader: Option<NodeId>,
    /// Last time we heard from a live leader at a term `>=` our own. Drives
    /// both the election timer and the leader-stickiness window used by
    /// `processElectionRequest`.
    last_leader_contact: Instant,
}

/// The global mutable (term, role) pair (Section 5, "Shared-resource
/// policy" / Section 9 "Global mutable state"). All reads used for a safety
/// decision and all writes go through this type's critical sections;
/// nothing outside `state.rs` mutates `current_term` or `role` directly.
pub struct MemberState {
    inner: SyncMutex<StateInner>,
}

/// A consistent snapshot of (term, role, leader) taken under one critical
/// section, for callers that need to make a single safety decision from
/// several fields at once.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub term: u64,
    pub role: Role,
    pub leader: Option<NodeId>,
}

impl MemberState {
    pub fn new(current_term: u64, voted_for: Option<NodeId>) -> Self {
        Self {
            inner: SyncMutex::new(StateInner {
                current_term,
                role: Role::Follower,
                voted_for,
                leader: None,
                last_leader_contact: Instant::now(),
            }),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner
            .apply(|s| StateSnapshot {
                term: s.current_term,
                role: s.role,
                leader: s.leader.clone(),
            })
            .expect("member state lock poisoned")
    }

    pub fn current_term(&self) -> u64 {
        self.inner.apply(|s| s.current_term).expect("member state lock poisoned")
    }

    pub fn role(&self) -> Role {
        self.inner.apply(|s| s.role).expect("member state lock poisoned")
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.inner.apply(|s| s.voted_for.clone()).expect("member state lock poisoned")
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.inner.apply(|s| s.leader.clone()).expect("member state lock poisoned")
    }

    pub fn time_since_leader_contact(&self) -> std::time::Duration {
        self.inner
            .apply(|s| s.last_leader_contact.elapsed())
            .expect("member state lock poisoned")
    }

    /// Records that we heard from a live leader at `term >= currentTerm`,
    /// adopting the term if it is newer and resetting the election timer
    /// (Section 4.1 `processHeartbeatRequest`/`appendEntries`).
    ///
    /// Returns `true` iff the request's term was stale and should be
    /// rejected by the caller (caller still gets the current term to return
    /// to the RPC peer via `current_term()` after this call).
    pub fn observe_leader_contact(&self, term: u64, leader: NodeId) -> bool {
        self.inner
            .apply(|s| {
                if term < s.current_term {
                    return true; // stale
                }

                s.current_term = term;
                s.role = Role::Follower;
                s.voted_for = None;
                s.leader = Some(leader);
                s.last_leader_contact = Instant::now();
                false
            })
            .expect("member state lock poisoned")
    }

    /// Unconditional stepdown on observing a larger term (Section 4.1,
    /// `stepDown(newTerm, leaderHint)`). Idempotent: stepping down twice to
    /// the same or a lower term is a no-op, matching "stepdown is
    /// idempotent and safe under concurrent observation" (Section 5).
    pub fn step_down(&self, new_term: u64, leader_hint: Option<NodeId>) {
        let _ = self.inner.apply(|s| {
            if new_term < s.current_term {
                return;
            }
            if new_term > s.current_term {
                s.voted_for = None;
            }
            s.current_term = new_term;
            s.role = Role::Follower;
            if leader_hint.is_some() {
                s.leader = leader_hint;
                s.last_leader_contact = Instant::now();
            }
        });
    }

    /// Attempts the FOLLOWER/CANDIDATE -> CANDIDATE transition on election
    /// timeout, bumping the term to `currTerm + 1` and voting for self.
    /// Returns the new term, or `None` if we are already a LEADER (leaders
    /// don't run an election timer).
    pub fn become_candidate(&self, self_id: &NodeId) -> Option<u64> {
        self.inner
            .apply(|s| {
                if s.role == Role::Leader {
                    return None;
                }
                s.current_term += 1;
                s.role = Role::Candidate;
                s.voted_for = Some(self_id.clone());
                s.leader = None;
                Some(s.current_term)
            })
            .expect("member state lock poisoned")
    }

    /// CANDIDATE -> LEADER, only if we are still a candidate in `term`
    /// (nothing stepped us down or moved the term on while the election was
    /// outstanding).
    pub fn become_leader(&self, term: u64, self_id: &NodeId) -> bool {
        self.inner
            .apply(|s| {
                if s.role == Role::Candidate && s.current_term == term {
                    s.role = Role::Leader;
                    s.leader = Some(self_id.clone());
                    true
                } else {
                    false
                }
            })
            .expect("member state lock poisoned")
    }

    /// Records a vote grant for `term` (only valid if not already voted for
    /// someone else this term); returns whether the vote was granted.
    pub fn try_grant_vote(&self, term: u64, candidate: &NodeId) -> bool {
        self.inner
            .apply(|s| {
                if term < s.current_term {
                    return false;
                }
                if term > s.current_term {
                    s.current_term = term;
                    s.role = Role::Follower;
                    s.voted_for = None;
                }

                match &s.voted_for {
                    None => {
                        s.voted_for = Some(candidate.clone());
                        true
                    }
                    Some(v) => v == candidate,
                }
            })
            .expect("member state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_timeout_bumps_term_and_votes_self() {
        let state = MemberState::new(5, None);
        let term = state.become_candidate(&"A".to_string()).unwrap();
        assert_eq!(term, 6);
        assert_eq!(state.role(), Role::Candidate);
        assert_eq!(state.voted_for(), Some("A".to_string()));
    }

    #[test]
    fn leader_never_runs_election_timer() {
        let state = MemberState::new(5, None);
        state.become_candidate(&"A".to_string());
        assert!(state.become_leader(6, &"A".to_string()));
        assert!(state.become_candidate(&"A".to_string()).is_none());
    }

    #[test]
    fn become_leader_fails_if_term_moved_on() {
        let state = MemberState::new(5, None);
        let term = state.become_candidate(&"A".to_string()).unwrap();
        state.step_down(term + 1, None);
        assert!(!state.become_leader(term, &"A".to_string()));
    }

    #[test]
    fn higher_term_observation_steps_down_leader() {
        let state = MemberState::new(5, None);
        state.become_candidate(&"A".to_string());
        state.become_leader(6, &"A".to_string());

        state.step_down(8, Some("B".to_string()));
        assert_eq!(state.role(), Role::Follower);
        assert_eq!(state.current_term(), 8);
        assert_eq!(state.leader(), Some("B".to_string()));
    }

    #[test]
    fn term_never_decreases() {
        let state = MemberState::new(5, None);
        state.step_down(3, None);
        assert_eq!(state.current_term(), 5);
    }

    #[test]
    fn vote_once_per_term() {
        let state = MemberState::new(5, None);
        assert!(state.try_grant_vote(6, &"A".to_string()));
        assert!(!state.try_grant_vote(6, &"B".to_string()));
        assert!(state.try_grant_vote(6, &"A".to_string()));
    }
}
