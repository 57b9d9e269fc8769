use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use executor::channel::oneshot;
use executor::sync::SyncMutex;

use crate::proto::{ElectionResponse, RESPONSE_AGREE, RESPONSE_LEADER_STILL_ONLINE, RESPONSE_NODE_IS_NOT_IN_GROUP};

/// Outcome of folding one voter's response (or a transport failure) into an
/// in-flight `ElectionContext` (Section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// The election already terminated before this response arrived.
    Ignored,
    /// Neither counter has hit zero yet.
    Pending,
    /// `requiredVoteNum` reached zero: the election is won.
    Won,
    /// `failingVoteCounter` reached zero: the election cannot be won; the
    /// caller should start a fresh attempt without waiting out the timeout.
    Lost,
    /// A voter reported a term higher than ours: stepdown to that term.
    StepDown { new_term: u64 },
    /// A voter told us we are no longer a member of the group (Section 4.2
    /// rule 5): distinct from a soft rejection, this terminates the election
    /// immediately and the caller above must stop re-contesting entirely,
    /// not just wait for the next timeout.
    Removed,
}

/// Drives one election attempt in `currTerm + 1` (Section 4.2). Two
/// independent counters let success and failure be decided without
/// enumerating every response: `requiredVoteNum` hitting zero means we won;
/// `failingVoteCounter` hitting zero means the election is unwinnable.
pub struct ElectionContext {
    current_term: u64,
    required_vote_num: AtomicI64,
    failing_vote_counter: AtomicI64,
    terminated: AtomicBool,
    election_valid: AtomicBool,
    waiter: SyncMutex<Option<oneshot::Sender<()>>>,
}

impl ElectionContext {
    /// `quorum` is `ceil((N+1)/2)` where `total_voting_members` is `N`, the
    /// full voting group size including self (Glossary). `requiredVoteNum`
    /// starts at `quorum - 1` (self-vote pre-counted); `failingVoteCounter`
    /// starts at `N - quorum + 1`, the minimum number of rejections that
    /// make the election unwinnable (Section 4.2, matches scenario 6's
    /// literal numbers: N=5, quorum=3 -> failingVoteCounter=3).
    pub fn new(
        current_term: u64,
        quorum: usize,
        total_voting_members: usize,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();

        let ctx = Arc::new(Self {
            current_term,
            required_vote_num: AtomicI64::new(quorum as i64 - 1),
            failing_vote_counter: AtomicI64::new(total_voting_members as i64 - quorum as i64 + 1),
            terminated: AtomicBool::new(false),
            election_valid: AtomicBool::new(false),
            waiter: SyncMutex::new(Some(tx)),
        });

        (ctx, rx)
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn is_valid(&self) -> bool {
        self.election_valid.load(Ordering::SeqCst)
    }

    /// Wakes the election waiter exactly once, under the same
    /// compare-exchange that flips `terminated` (Section 9's open question
    /// about signalling without the monitor does not apply here: there is
    /// no separate monitor to reacquire, the sender consumption itself is
    /// the atomic signal).
    fn terminate_and_wake(&self, valid: bool) {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if valid {
                self.election_valid.store(true, Ordering::SeqCst);
            }
            if let Ok(mut guard) = self.waiter.apply(|w| w.take()) {
                if let Some(sender) = guard.take() {
                    let _ = sender.send(());
                }
            }
        }
    }

    /// Folds in one voter's response (Section 4.2, numbered rules 1-6).
    pub fn handle_response(&self, response: ElectionResponse) -> ElectionOutcome {
        if self.is_terminated() {
            return ElectionOutcome::Ignored;
        }

        match response.0 {
            RESPONSE_AGREE => {
                let remaining = self.required_vote_num.fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining <= 0 {
                    self.terminate_and_wake(true);
                    ElectionOutcome::Won
                } else {
                    ElectionOutcome::Pending
                }
            }
            RESPONSE_LEADER_STILL_ONLINE => self.register_soft_rejection(),
            RESPONSE_NODE_IS_NOT_IN_GROUP => {
                self.terminate_and_wake(false);
                ElectionOutcome::Removed
            }
            term => {
                let term = term as u64;
                if term > self.current_term {
                    self.terminate_and_wake(false);
                    ElectionOutcome::StepDown { new_term: term }
                } else {
                    // Hard rejection: voter's view of the world disagrees
                    // with ours on a different axis than a newer term.
                    self.register_soft_rejection()
                }
            }
        }
    }

    /// A transport-level failure (connect refused, timeout): counts the
    /// same as a hard rejection (Section 4.2, "On transport error").
    pub fn handle_transport_error(&self) -> ElectionOutcome {
        if self.is_terminated() {
            return ElectionOutcome::Ignored;
        }
        self.register_soft_rejection()
    }

    fn register_soft_rejection(&self) -> ElectionOutcome {
        let remaining = self.failing_vote_counter.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            self.terminate_and_wake(false);
            ElectionOutcome::Lost
        } else {
            ElectionOutcome::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_node_election_wins_on_two_agrees() {
        // Scenario 1: peers {A,B,C}, N=3, quorum=2.
        let (ctx, _rx) = ElectionContext::new(6, 2, 3);

        assert_eq!(ctx.handle_response(ElectionResponse::agree()), ElectionOutcome::Pending);
        assert_eq!(ctx.handle_response(ElectionResponse::agree()), ElectionOutcome::Won);
        assert!(ctx.is_valid());
    }

    #[test]
    fn higher_term_response_triggers_stepdown() {
        // Scenario 2: C responds with a persisted term of 8 > our 6.
        let (ctx, _rx) = ElectionContext::new(6, 2, 3);

        assert_eq!(ctx.handle_response(ElectionResponse::agree()), ElectionOutcome::Pending);
        assert_eq!(
            ctx.handle_response(ElectionResponse::term(8)),
            ElectionOutcome::StepDown { new_term: 8 }
        );
        assert!(ctx.is_terminated());
        assert!(!ctx.is_valid());
    }

    #[test]
    fn election_fast_fail_on_leader_still_online() {
        // Scenario 6: peers {A,B,C,D,E}, N=5, quorum=3,
        // requiredVoteNum=2, failingVoteCounter = 5-3+1 = 3. B,C,D all
        // reject with LEADER_STILL_ONLINE: the third rejection should hit
        // zero and wake the waiter before E ever responds.
        let (ctx, _rx) = ElectionContext::new(6, 3, 5);
        assert_eq!(
            ctx.handle_response(ElectionResponse::leader_still_online()),
            ElectionOutcome::Pending
        );
        assert_eq!(
            ctx.handle_response(ElectionResponse::leader_still_online()),
            ElectionOutcome::Pending
        );
        assert_eq!(
            ctx.handle_response(ElectionResponse::leader_still_online()),
            ElectionOutcome::Lost
        );
        assert!(ctx.is_terminated());
    }

    #[test]
    fn removal_from_group_terminates_immediately_without_counting_as_soft_rejection() {
        // Even with a large failingVoteCounter budget, a single
        // NODE_IS_NOT_IN_GROUP response must end the election right away.
        let (ctx, _rx) = ElectionContext::new(6, 3, 5);
        assert_eq!(
            ctx.handle_response(ElectionResponse::node_is_not_in_group()),
            ElectionOutcome::Removed
        );
        assert!(ctx.is_terminated());
        assert!(!ctx.is_valid());
    }

    #[test]
    fn terminated_election_ignores_late_responses() {
        let (ctx, _rx) = ElectionContext::new(6, 1, 1);
        assert_eq!(ctx.handle_response(ElectionResponse::agree()), ElectionOutcome::Won);
        assert_eq!(ctx.handle_response(ElectionResponse::agree()), ElectionOutcome::Ignored);
    }

    #[test]
    fn waiter_is_woken_on_completion() {
        executor::run(async {
            let (ctx, rx) = ElectionContext::new(6, 1, 1);
            ctx.handle_response(ElectionResponse::agree());
            assert_eq!(rx.recv().await, Ok(()));
        })
        .unwrap();
    }
}
