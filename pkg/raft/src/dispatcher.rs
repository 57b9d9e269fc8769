use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::async_std::channel;
use common::errors::*;
use executor::sync::SyncMutex;
use executor::JoinHandle;

use crate::config::RaftConfig;
use crate::log::LogManager;
use crate::proto::{AppendEntriesRequest, AppendEntryStatus, GroupId, NodeId, Peer};
use crate::ratelimiter::{RateLimiter, RateLimiterOptions};
use crate::rpc::RaftRpc;
use crate::voting::VotingLog;

/// Everything the dispatcher reports back into the owning member (Section
/// 4.3's fan-out handler and 4.4's catch-up trigger). `RaftMember` implements
/// this; kept as a trait so `dispatcher.rs` never has to know about
/// `MemberState`/`ElectionContext` directly.
#[async_trait::async_trait]
pub trait DispatcherHost: Send + Sync {
    fn current_term(&self) -> u64;
    fn self_id(&self) -> NodeId;

    /// Folds a durable ack from `peer` for `index` into the voting tracker.
    fn record_ack(&self, index: u64, peer: NodeId);

    /// Folds a weak (not-yet-durable) ack.
    fn record_weak_ack(&self, index: u64, peer: NodeId);

    /// A peer rejected with a term greater than ours.
    fn observe_higher_term(&self, new_term: u64);

    /// Repeated log-mismatch rejections, or an explicit stale response:
    /// signals the catch-up manager that `peer` needs backfilling.
    fn trigger_catch_up(&self, peer: NodeId);
}

enum DispatchItem {
    Log(Arc<VotingLog>),
    Shutdown,
}

/// Accumulates bytes sent and time spent in flight against one peer over a
/// rolling window, closing the window out into a single throughput sample
/// once it's wide enough to not be noise (Section 4.3: the token bucket is
/// "updated out of band by `updateRateLimiter`" based on measured
/// throughput, not a fixed default).
struct ThroughputMeter {
    window_start: Instant,
    bytes_in_window: u64,
    busy_in_window: Duration,
}

impl ThroughputMeter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            bytes_in_window: 0,
            busy_in_window: Duration::ZERO,
        }
    }
}

const THROUGHPUT_MEASURE_WINDOW: Duration = Duration::from_secs(1);

struct PeerHandle {
    peer: Peer,
    sender: channel::Sender<DispatchItem>,
    receiver: channel::Receiver<DispatchItem>,
    rate_limiter: RateLimiter,
    failure_count: AtomicU32,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
    throughput: SyncMutex<ThroughputMeter>,
}

/// Three consecutive transport/log-mismatch failures against one peer is the
/// trigger threshold for catch-up (Section 4.4(a)); chosen since it is the
/// smallest count that rules out a single dropped packet.
const CATCH_UP_FAILURE_THRESHOLD: u32 = 3;

/// Per-peer bounded queue plus binding workers (Section 4.3). `offer` never
/// blocks the leader: a full queue means the entry is silently dropped for
/// that peer and left to the catch-up path to recover.
pub struct Dispatcher {
    group_id: GroupId,
    config: RaftConfig,
    log: Arc<dyn LogManager>,
    rpc: Arc<dyn RaftRpc>,
    host: Arc<dyn DispatcherHost>,
    queue_ordered: bool,
    peers: SyncMutex<HashMap<NodeId, Arc<PeerHandle>>>,
}

impl Dispatcher {
    pub fn new(
        group_id: GroupId,
        config: RaftConfig,
        log: Arc<dyn LogManager>,
        rpc: Arc<dyn RaftRpc>,
        host: Arc<dyn DispatcherHost>,
    ) -> Arc<Self> {
        let queue_ordered = config.queue_ordered();
        Arc::new(Self {
            group_id,
            config,
            log,
            rpc,
            host,
            queue_ordered,
            peers: SyncMutex::new(HashMap::new()),
        })
    }

    /// Registers `peer` and spawns its binding workers. A peer already
    /// registered is replaced, tearing down its old queue first.
    pub fn add_peer(self: &Arc<Self>, peer: Peer) {
        self.remove_peer(&peer.id);

        let (sender, receiver) = channel::bounded(self.config.max_num_of_logs_in_mem);
        let handle = Arc::new(PeerHandle {
            peer,
            sender,
            receiver,
            rate_limiter: RateLimiter::new(RateLimiterOptions::default()),
            failure_count: AtomicU32::new(0),
            workers: SyncMutex::new(Vec::new()),
            throughput: SyncMutex::new(ThroughputMeter::new()),
        });

        let mut workers = Vec::with_capacity(self.config.dispatcher_binding_thread_num);
        for _ in 0..self.config.dispatcher_binding_thread_num {
            let this = self.clone();
            let handle = handle.clone();
            workers.push(executor::spawn(async move {
                this.run_worker(handle).await;
            }));
        }
        let _ = handle.workers.apply(|w| *w = workers);

        let _ = self.peers.apply(|m| {
            m.insert(handle.peer.id.clone(), handle);
        });
    }

    pub fn remove_peer(&self, id: &NodeId) {
        let removed = self.peers.apply(|m| m.remove(id)).ok().flatten();
        if let Some(handle) = removed {
            // Dropping the handle drops its `Sender`/`Receiver`, which makes
            // every blocked `recv()` in its workers resolve to an error and
            // exit; `JoinHandle`'s own drop then cancels anything left.
            let _ = handle;
        }
    }

    pub fn update_peer_rate(&self, id: &NodeId, tokens_per_second: f64) {
        if let Ok(Some(handle)) = self.peers.apply(|m| m.get(id).cloned()) {
            handle.rate_limiter.update_rate(tokens_per_second);
        }
    }

    /// Non-blocking fan-out to every enabled peer's queue (Section 4.3,
    /// "Drops never block the leader").
    pub fn offer(&self, voting_log: Arc<VotingLog>) {
        let handles: Vec<Arc<PeerHandle>> = self
            .peers
            .apply(|m| m.values().filter(|h| h.peer.enabled).cloned().collect())
            .unwrap_or_default();

        for handle in handles {
            let _ = handle.sender.try_send(DispatchItem::Log(voting_log.clone()));
        }
    }

    /// Drains each peer's queue with a sentinel and waits (bounded 10s per
    /// peer) for its workers to exit (Section 5, "Cancellation").
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<PeerHandle>> =
            self.peers.apply(|m| m.drain().map(|(_, v)| v).collect()).unwrap_or_default();

        for handle in handles {
            for _ in 0..self.config.dispatcher_binding_thread_num {
                let _ = handle.sender.send(DispatchItem::Shutdown).await;
            }

            let workers = handle.workers.apply(|w| std::mem::take(w)).unwrap_or_default();
            for worker in workers {
                let _ = executor::timeout(std::time::Duration::from_secs(10), worker.join()).await;
            }
        }
    }

    async fn run_worker(self: Arc<Self>, handle: Arc<PeerHandle>) {
        loop {
            let first = match handle.receiver.recv().await {
                Ok(item) => item,
                Err(_) => return,
            };

            let mut batch = match first {
                DispatchItem::Shutdown => return,
                DispatchItem::Log(log) => vec![log],
            };

            while batch.len() < self.config.max_batch_size {
                match handle.receiver.try_recv() {
                    Ok(DispatchItem::Log(log)) => batch.push(log),
                    Ok(DispatchItem::Shutdown) => return,
                    Err(_) => break,
                }
            }

            if !self.queue_ordered {
                batch.sort_by_key(|l| l.entry().index);
            }

            self.flush_batch(&handle, batch).await;
        }
    }

    /// Chunks `batch` by frame size and sends each chunk (Section 4.3, steps
    /// 2-4). `reserved` accounts for the request's fixed fields so the wire
    /// frame never exceeds `thriftMaxFrameSize`.
    async fn flush_batch(&self, handle: &Arc<PeerHandle>, batch: Vec<Arc<VotingLog>>) {
        const RESERVED: usize = 128;
        let budget = self.config.thrift_max_frame_size.saturating_sub(RESERVED);

        let mut chunk: Vec<Arc<VotingLog>> = Vec::new();
        let mut chunk_bytes = 0usize;

        for log in batch {
            let size = log.entry().byte_size();
            if !chunk.is_empty() && chunk_bytes + size > budget {
                self.send_chunk(handle, std::mem::take(&mut chunk)).await;
                chunk_bytes = 0;
            }
            chunk_bytes += size;
            chunk.push(log);
        }

        if !chunk.is_empty() {
            self.send_chunk(handle, chunk).await;
        }
    }

    async fn send_chunk(&self, handle: &Arc<PeerHandle>, chunk: Vec<Arc<VotingLog>>) {
        let first = chunk[0].entry().clone();
        let prev_log_index = first.index - 1;
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);

        let log_size: usize = chunk.iter().map(|l| l.entry().byte_size()).sum();
        handle.rate_limiter.acquire(log_size).await;

        let request = AppendEntriesRequest {
            group_id: self.group_id.clone(),
            term: self.host.current_term(),
            leader: self.host.self_id(),
            leader_commit: self.log.commit_index(),
            prev_log_index,
            prev_log_term,
            entries: chunk.iter().map(|l| l.entry().clone()).collect(),
        };

        let started = Instant::now();
        let result = self.rpc.append_entries(&handle.peer.id, request).await;
        self.record_throughput(handle, log_size, started.elapsed());

        self.handle_response(handle, chunk, result);
    }

    /// Folds this chunk's send time into `handle`'s rolling window, and once
    /// the window is wide enough to be a meaningful sample, feeds the
    /// measured rate back into the peer's own bucket via `update_peer_rate`
    /// (Section 4.3).
    fn record_throughput(&self, handle: &Arc<PeerHandle>, bytes: usize, elapsed: Duration) {
        let rate = handle
            .throughput
            .apply(|m| {
                m.bytes_in_window += bytes as u64;
                m.busy_in_window += elapsed;

                if m.window_start.elapsed() < THROUGHPUT_MEASURE_WINDOW || m.busy_in_window.is_zero() {
                    return None;
                }

                let rate = m.bytes_in_window as f64 / m.busy_in_window.as_secs_f64();
                *m = ThroughputMeter::new();
                Some(rate)
            })
            .unwrap_or(None);

        if let Some(rate) = rate {
            self.update_peer_rate(&handle.peer.id, rate);
        }
    }

    /// Fans the single response out to every entry's VotingLog (Section
    /// 4.3's "Fan-out handler").
    fn handle_response(
        &self,
        handle: &Arc<PeerHandle>,
        chunk: Vec<Arc<VotingLog>>,
        result: std::result::Result<crate::proto::AppendEntryResult, crate::rpc::TransportError>,
    ) {
        match result {
            Ok(response) => {
                if let Some(term) = response.term {
                    if term > self.host.current_term() {
                        self.host.observe_higher_term(term);
                        return;
                    }
                }

                match response.status {
                    AppendEntryStatus::Ok => {
                        handle.failure_count.store(0, Ordering::SeqCst);
                        for log in chunk {
                            self.host.record_ack(log.entry().index, handle.peer.id.clone());
                        }
                    }
                    AppendEntryStatus::WeakAccept => {
                        handle.failure_count.store(0, Ordering::SeqCst);
                        for log in chunk {
                            self.host.record_weak_ack(log.entry().index, handle.peer.id.clone());
                        }
                    }
                    AppendEntryStatus::LogMismatch | AppendEntryStatus::Stale => {
                        self.register_failure(handle);
                    }
                }
            }
            Err(_) => {
                self.register_failure(handle);
            }
        }
    }

    fn register_failure(&self, handle: &Arc<PeerHandle>) {
        let count = handle.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= CATCH_UP_FAILURE_THRESHOLD {
            handle.failure_count.store(0, Ordering::SeqCst);
            self.host.trigger_catch_up(handle.peer.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::proto::{AppendEntryResult, Entry};
    use crate::rpc::{LocalRpcRouter, RpcEndpoint, TransportError};
    use std::sync::atomic::AtomicU64;

    struct RecordingHost {
        term: AtomicU64,
        acked: SyncMutex<Vec<(u64, NodeId)>>,
    }

    #[async_trait::async_trait]
    impl DispatcherHost for RecordingHost {
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

    struct AlwaysOkEndpoint;

    #[async_trait::async_trait]
    impl RpcEndpoint for AlwaysOkEndpoint {
        async fn handle_heartbeat(
            &self,
            _req: crate::proto::HeartBeatRequest,
        ) -> crate::proto::HeartBeatResponse {
            unimplemented!()
        }

        async fn handle_election(
            &self,
            _req: crate::proto::ElectionRequest,
        ) -> crate::proto::ElectionResponse {
            unimplemented!()
        }

        async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntryResult {
            AppendEntryResult {
                status: AppendEntryStatus::Ok,
                term: Some(req.term),
                last_log_index: req.entries.last().map(|e| e.index),
                last_log_term: req.entries.last().map(|e| e.term),
                receiver: None,
            }
        }

        async fn handle_send_snapshot(&self, _req: crate::proto::SendSnapshotRequest) {}

        async fn handle_match_term(&self, _req: crate::proto::MatchTermRequest) -> bool {
            true
        }
    }

    fn entry(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            payload: vec![0u8; 4],
        }
    }

    #[test]
    fn offer_drops_silently_when_queue_is_full() {
        executor::run(async {
            let router = Arc::new(LocalRpcRouter::new());
            router.register("peer-a".to_string(), Arc::new(AlwaysOkEndpoint));

            let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
            let host = Arc::new(RecordingHost {
                term: AtomicU64::new(1),
                acked: SyncMutex::new(Vec::new()),
            });

            let mut config = RaftConfig::default();
            config.max_num_of_logs_in_mem = 1;
            config.dispatcher_binding_thread_num = 0;

            let dispatcher =
                Dispatcher::new("group".to_string(), config, log.clone(), router.clone(), host.clone());
            dispatcher.add_peer(Peer {
                id: "peer-a".to_string(),
                host: String::new(),
                port: 0,
                enabled: true,
            });

            let vl1 = VotingLog::new(entry(1, 1), 2);
            let vl2 = VotingLog::new(entry(2, 1), 2);

            // With zero workers nothing drains the queue, so the second
            // offer against a capacity-1 queue must be dropped rather than
            // block.
            dispatcher.offer(vl1);
            dispatcher.offer(vl2);
        })
        .unwrap();
    }

    #[test]
    fn successful_append_records_ack_against_host() {
        executor::run(async {
            let router = Arc::new(LocalRpcRouter::new());
            router.register("peer-a".to_string(), Arc::new(AlwaysOkEndpoint));

            let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());
            log.append_local(1, vec![1, 2, 3]).unwrap();

            let host = Arc::new(RecordingHost {
                term: AtomicU64::new(1),
                acked: SyncMutex::new(Vec::new()),
            });

            let config = RaftConfig::default();
            let dispatcher =
                Dispatcher::new("group".to_string(), config, log.clone(), router.clone(), host.clone());
            dispatcher.add_peer(Peer {
                id: "peer-a".to_string(),
                host: String::new(),
                port: 0,
                enabled: true,
            });

            let vl = VotingLog::new(entry(1, 1), 2);
            dispatcher.offer(vl);

            // Give the worker a moment to drain and fan out the response.
            let _ = executor::sleep(std::time::Duration::from_millis(50)).await;

            let acked = host.acked.apply(|v| v.clone()).unwrap();
            assert_eq!(acked, vec![(1, "peer-a".to_string())]);

            dispatcher.shutdown().await;
        })
        .unwrap();
    }

    struct RecordingEndpoint {
        chunk_sizes: SyncMutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl RpcEndpoint for RecordingEndpoint {
        async fn handle_heartbeat(
            &self,
            _req: crate::proto::HeartBeatRequest,
        ) -> crate::proto::HeartBeatResponse {
            unimplemented!()
        }

        async fn handle_election(
            &self,
            _req: crate::proto::ElectionRequest,
        ) -> crate::proto::ElectionResponse {
            unimplemented!()
        }

        async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntryResult {
            let _ = self.chunk_sizes.apply(|v| v.push(req.entries.len()));
            AppendEntryResult {
                status: AppendEntryStatus::Ok,
                term: Some(req.term),
                last_log_index: req.entries.last().map(|e| e.index),
                last_log_term: req.entries.last().map(|e| e.term),
                receiver: None,
            }
        }

        async fn handle_send_snapshot(&self, _req: crate::proto::SendSnapshotRequest) {}

        async fn handle_match_term(&self, _req: crate::proto::MatchTermRequest) -> bool {
            true
        }
    }

    #[test]
    fn frame_size_chunking_splits_large_batches() {
        // Five entries of 20 bytes each (16-byte header + 4-byte payload)
        // sent through a real `Dispatcher`; a frame size leaving a 40-byte
        // budget after the 128-byte reservation fits at most 2 per chunk,
        // so the recording endpoint should observe chunks {2,2,1}.
        executor::run(async {
            let router = Arc::new(LocalRpcRouter::new());
            let endpoint = Arc::new(RecordingEndpoint {
                chunk_sizes: SyncMutex::new(Vec::new()),
            });
            router.register("peer-a".to_string(), endpoint.clone());

            let log: Arc<dyn LogManager> = Arc::new(MemoryLog::new());

            let host = Arc::new(RecordingHost {
                term: AtomicU64::new(1),
                acked: SyncMutex::new(Vec::new()),
            });

            let mut config = RaftConfig::default();
            config.thrift_max_frame_size = 168;

            let dispatcher =
                Dispatcher::new("group".to_string(), config, log.clone(), router.clone(), host.clone());
            dispatcher.add_peer(Peer {
                id: "peer-a".to_string(),
                host: String::new(),
                port: 0,
                enabled: true,
            });

            for i in 1..=5u64 {
                dispatcher.offer(VotingLog::new(entry(i, 1), 1));
            }

            let _ = executor::sleep(std::time::Duration::from_millis(100)).await;
            dispatcher.shutdown().await;

            let chunks = endpoint.chunk_sizes.apply(|v| v.clone()).unwrap();
            assert_eq!(chunks, vec![2, 2, 1]);
        })
        .unwrap();
    }
}
