//! RPC surface (spec §6): the core set of operations a client or the
//! accounting store drives the controller through —
//! `submit_job, allocate_resources, cancel_job, signal_job, suspend_job,
//! resume_job, complete_job, get_jobs, get_nodes, get_partitions,
//! update_node, update_partition, update_job, reconfigure, ping, shutdown`.
//!
//! Split into two layers: [`service`] holds the transport-independent
//! business logic as one struct wrapping a [`crate::context::ClusterContext`],
//! callable directly by tests or an in-process caller; [`server`] is the
//! one transport this crate ships — a length-prefixed TCP frame loop
//! reusing `wire::codec` rather than a second framing format.

pub mod server;
pub mod service;

pub use server::{serve, RpcOp};
pub use service::{AgentLink, AllocateOutcome, NullAgentLink, RpcService};
