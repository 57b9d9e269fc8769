//! Wire request/response types named in Section 6. These stand in for the
//! thrift-generated transport, which Section 1 names an external
//! collaborator: field order is kept exactly as the contract defines it
//! since it is "definitional for compatibility", but the encoding itself is
//! left to whatever `RaftRpc` implementation a caller wires in (`rpc.rs`).

pub type GroupId = String;
pub type NodeId = String;

/// Sentinel values carried inside an `ElectionResponse`'s `i64`. Any other
/// value is a term (Section 6, "Response codes"): receivers tell sentinels
/// from terms apart by these reserved negative values.
pub const RESPONSE_AGREE: i64 = -1;
pub const RESPONSE_LEADER_STILL_ONLINE: i64 = -2;
pub const RESPONSE_NODE_IS_NOT_IN_GROUP: i64 = -3;

#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn byte_size(&self) -> usize {
        // Fixed-width header fields plus the payload itself; used for
        // frame-size chunking and flow-monitor reporting.
        16 + self.payload.len()
    }
}

#[derive(Debug, Clone)]
pub struct HeartBeatRequest {
    pub term: u64,
    pub commit_log_index: u64,
    pub commit_log_term: u64,
    pub leader: NodeId,
    pub group_id: GroupId,
    pub require_identifier: Option<bool>,
    pub regenerate_identifier: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct HeartBeatResponse {
    pub term: u64,
    pub follower_identifier: Option<NodeId>,
    pub require_partition_table: Option<bool>,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone)]
pub struct ElectionRequest {
    pub term: u64,
    pub group_id: GroupId,
    pub elector: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// The election RPC's response is a bare `i64`: either a sentinel above or a
/// term value (Section 6). `ElectionResponse` wraps it so call sites don't
/// juggle raw integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectionResponse(pub i64);

impl ElectionResponse {
    pub fn agree() -> Self {
        Self(RESPONSE_AGREE)
    }

    pub fn leader_still_online() -> Self {
        Self(RESPONSE_LEADER_STILL_ONLINE)
    }

    pub fn node_is_not_in_group() -> Self {
        Self(RESPONSE_NODE_IS_NOT_IN_GROUP)
    }

    pub fn term(term: u64) -> Self {
        Self(term as i64)
    }

    pub fn as_term(&self) -> Option<u64> {
        if self.0 >= 0 {
            Some(self.0 as u64)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppendEntriesRequest {
    pub group_id: GroupId,
    pub term: u64,
    pub leader: NodeId,
    pub leader_commit: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendEntryStatus {
    Ok,
    WeakAccept,
    LogMismatch,
    Stale,
}

#[derive(Debug, Clone)]
pub struct AppendEntryResult {
    pub status: AppendEntryStatus,
    pub term: Option<u64>,
    pub last_log_index: Option<u64>,
    pub last_log_term: Option<u64>,
    pub receiver: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct SendSnapshotRequest {
    pub group_id: GroupId,
    pub snapshot_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MatchTermRequest {
    pub group_id: GroupId,
    pub index: u64,
    pub term: u64,
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub group_id: GroupId,
    pub request_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStatus {
    Ok,
    NotLeader,
    UnknownLeader,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub status: ExecuteStatus,
    pub response_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCommitIndexStatus {
    Ok,
    NotLeader,
}

#[derive(Debug, Clone)]
pub struct RequestCommitIndexResponse {
    pub status: RequestCommitIndexStatus,
    pub commit_index: u64,
    pub commit_term: u64,
}
