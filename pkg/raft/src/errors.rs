use common::errors::Error;
use failure::Fail;

/// Taxonomy of outcomes a member's contracts can return that are not plain
/// transport/persistence failures. Transport errors never reach this type:
/// they are absorbed locally as counter decrements (Section 7).
#[derive(Debug, Fail)]
pub enum RaftError {
    #[fail(display = "not the leader of this group")]
    NotLeader,

    #[fail(display = "node is not a member of this group")]
    NodeNotInGroup,

    #[fail(display = "leader is currently unknown")]
    UnknownLeader,

    #[fail(display = "operation timed out")]
    Timeout,

    #[fail(display = "stepped down to term {}", new_term)]
    Stepped { new_term: u64 },

    #[fail(display = "log entries do not match at the requested index")]
    LogMismatch,

    #[fail(display = "persistence failure: {}", _0)]
    Persistence(Error),
}

pub type Result<T> = std::result::Result<T, RaftError>;
