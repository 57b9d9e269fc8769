use std::time::Duration;

/// Knobs named in the external-interfaces contract (Section 6,
/// "Configuration (enumerated)"). Constructed once by the owning process and
/// handed to `RaftMember::new`; nothing in this crate reloads it from a file.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Per-peer dispatcher queue capacity (`maxNumOfLogsInMem`).
    pub max_num_of_logs_in_mem: usize,

    /// Dispatcher workers bound to each peer's queue.
    pub dispatcher_binding_thread_num: usize,

    /// Entries per AppendEntries batch before chunking by frame size.
    pub max_batch_size: usize,

    /// Maximum wire-level request payload size; batches are chunked to fit.
    pub thrift_max_frame_size: usize,

    /// How long a SnapshotCatchUpTask waits for completion before aborting.
    pub catch_up_timeout: Duration,

    /// Whether followers reorder entries received out of order (a sliding
    /// window keyed by index) instead of requiring strict FIFO delivery.
    pub use_follower_sliding_window: bool,

    /// Whether a follower's "received but not yet durable" ack is tracked
    /// and surfaced as a provisional notification.
    pub enable_weak_acceptance: bool,

    /// Bounds of the randomized election timeout.
    pub election_timeout_range: (Duration, Duration),

    /// Leader heartbeat period.
    pub heartbeat_interval: Duration,

    /// Window after hearing from a live leader during which a vote request
    /// is rejected with RESPONSE_LEADER_STILL_ONLINE rather than AGREE.
    pub leader_stickiness_window: Duration,
}

impl RaftConfig {
    /// `queueOrdered` is true only when neither weak acceptance nor the
    /// follower sliding window is enabled — i.e. when the dispatcher's
    /// single-worker-per-peer FIFO guarantee is the only ordering mechanism
    /// in play. Computed once by the caller (`Dispatcher::new`) and never
    /// re-read afterwards (Section 9, second open question).
    pub fn queue_ordered(&self) -> bool {
        !self.use_follower_sliding_window && !self.enable_weak_acceptance
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            max_num_of_logs_in_mem: 1000,
            dispatcher_binding_thread_num: 1,
            max_batch_size: 10,
            thrift_max_frame_size: 16 * 1024 * 1024,
            catch_up_timeout: Duration::from_secs(20),
            use_follower_sliding_window: false,
            enable_weak_acceptance: false,
            election_timeout_range: (Duration::from_millis(150), Duration::from_millis(300)),
            heartbeat_interval: Duration::from_millis(50),
            leader_stickiness_window: Duration::from_millis(150),
        }
    }
}
