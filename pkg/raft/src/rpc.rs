use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use executor::sync::SyncMutex;

use crate::proto::{
    AppendEntriesRequest, AppendEntryResult, ElectionRequest, ElectionResponse, HeartBeatRequest,
    HeartBeatResponse, MatchTermRequest, NodeId, SendSnapshotRequest,
};

/// A transport-level failure (Section 7, error taxonomy item 1): connect
/// refused, timeout, remote I/O. Never fatal; callers decrement a failure
/// counter and retry or trigger catch-up.
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

/// The async request/response transport Section 1 assumes exists
/// ("we assume an async request/response transport exists"; the
/// thrift-generated wire codec itself is out of scope). Implementations
/// adapt this to a real RPC client; this crate ships only an in-memory
/// transport (`LocalRpcRouter`) for its own tests.
#[async_trait]
pub trait RaftRpc: Send + Sync {
    async fn heartbeat(
        &self,
        peer: &NodeId,
        req: HeartBeatRequest,
    ) -> Result<HeartBeatResponse, TransportError>;

    async fn request_vote(
        &self,
        peer: &NodeId,
        req: ElectionRequest,
    ) -> Result<ElectionResponse, TransportError>;

    async fn append_entries(
        &self,
        peer: &NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntryResult, TransportError>;

    async fn send_snapshot(
        &self,
        peer: &NodeId,
        req: SendSnapshotRequest,
    ) -> Result<(), TransportError>;

    async fn match_term(&self, peer: &NodeId, req: MatchTermRequest) -> Result<bool, TransportError>;
}

/// One endpoint a `LocalRpcRouter` can dispatch to: anything that answers
/// the same inbound contracts a `RaftMember` exposes (Section 2, "RPC
/// Surface"). `RaftMember` implements this directly.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    async fn handle_heartbeat(&self, req: HeartBeatRequest) -> HeartBeatResponse;
    async fn handle_election(&self, req: ElectionRequest) -> ElectionResponse;
    async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntryResult;
    async fn handle_send_snapshot(&self, req: SendSnapshotRequest);
    async fn handle_match_term(&self, req: MatchTermRequest) -> bool;
}

/// In-process transport used by this crate's own multi-member tests: routes
/// each call directly to the target's `RpcEndpoint` implementation instead
/// of going over a socket. Peers can be marked unreachable to simulate
/// partitions/transport failures.
#[derive(Default)]
pub struct LocalRpcRouter {
    endpoints: SyncMutex<HashMap<NodeId, Arc<dyn RpcEndpoint>>>,
    unreachable: SyncMutex<std::collections::HashSet<NodeId>>,
}

impl LocalRpcRouter {
    pub fn new() -> Self {
        Self {
            endpoints: SyncMutex::new(HashMap::new()),
            unreachable: SyncMutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn register(&self, id: NodeId, endpoint: Arc<dyn RpcEndpoint>) {
        let _ = self.endpoints.apply(|m| {
            m.insert(id, endpoint);
        });
    }

    pub fn set_unreachable(&self, id: NodeId, unreachable: bool) {
        let _ = self.unreachable.apply(|s| {
            if unreachable {
                s.insert(id);
            } else {
                s.remove(&id);
            }
        });
    }

    fn lookup(&self, peer: &NodeId) -> Result<Arc<dyn RpcEndpoint>, TransportError> {
        if self.unreachable.apply(|s| s.contains(peer)).unwrap_or(false) {
            return Err(TransportError(format!("{} is unreachable", peer)));
        }

        self.endpoints
            .apply(|m| m.get(peer).cloned())
            .unwrap_or(None)
            .ok_or_else(|| TransportError(format!("no such peer: {}", peer)))
    }
}

#[async_trait]
impl RaftRpc for LocalRpcRouter {
    async fn heartbeat(
        &self,
        peer: &NodeId,
        req: HeartBeatRequest,
    ) -> Result<HeartBeatResponse, TransportError> {
        Ok(self.lookup(peer)?.handle_heartbeat(req).await)
    }

    async fn request_vote(
        &self,
        peer: &NodeId,
        req: ElectionRequest,
    ) -> Result<ElectionResponse, TransportError> {
        Ok(self.lookup(peer)?.handle_election(req).await)
    }

    async fn append_entries(
        &self,
        peer: &NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntryResult, TransportError> {
        Ok(self.lookup(peer)?.handle_append_entries(req).await)
    }

    async fn send_snapshot(
        &self,
        peer: &NodeId,
        req: SendSnapshotRequest,
    ) -> Result<(), TransportError> {
        self.lookup(peer)?.handle_send_snapshot(req).await;
        Ok(())
    }

    async fn match_term(&self, peer: &NodeId, req: MatchTermRequest) -> Result<bool, TransportError> {
        Ok(self.lookup(peer)?.handle_match_term(req).await)
    }
}
