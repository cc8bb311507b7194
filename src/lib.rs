//! Core cluster workload controller: node/partition/job data model,
//! scheduler, association/QoS accounting hierarchy, wire codec, and the
//! RPC surface that drives it.
//!
//! One `pub mod` per subsystem plus a handful of re-exports for the
//! types a caller reaches for most often.

pub mod assoc;
pub mod bitmap;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod node;
pub mod observability;
pub mod partition;
pub mod qos;
pub mod rollup;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod wire;

pub use config::AppConfig;
pub use context::ClusterContext;
pub use error::{ClusterError, ClusterResult, ErrorCode};
