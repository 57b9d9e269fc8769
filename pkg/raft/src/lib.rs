//! A Raft-family consensus replication engine: leader election, per-peer
//! log dispatch with batching/rate-limiting, and snapshot/log catch-up for
//! followers that have fallen behind (Section 2, "System Overview").
//!
//! Durable storage, the wire codec, and the state machine a group
//! replicates are all external collaborators (Section 1); this crate
//! consumes them through the `LogManager`, `RaftRpc`/`RpcEndpoint`, and
//! `StateMachine` traits.

#[macro_use]
extern crate macros;

pub mod backoff;
pub mod catchup;
pub mod config;
pub mod dispatcher;
pub mod election;
pub mod errors;
pub mod log;
pub mod member;
pub mod persist;
pub mod proto;
pub mod ratelimiter;
pub mod rpc;
pub mod snapshot;
pub mod state;
pub mod voting;

pub use config::RaftConfig;
pub use errors::{RaftError, Result};
pub use member::{RaftMember, RaftMemberOptions, StateMachine};
pub use rpc::{LocalRpcRouter, RaftRpc, RpcEndpoint, TransportError};

#[cfg(test)]
mod integration_tests;
