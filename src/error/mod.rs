//! Error taxonomy for the cluster controller.
//!
//! Every fallible core operation returns `Result<T, ClusterError>`. The
//! variants mirror the RPC-visible error taxonomy (spec §7): callers branch
//! on the discriminant rather than matching message text, and the RPC layer
//! maps each variant to one of the exit codes in `ErrorCode`.
//!
//! `fatal_invariant` is the one variant that never reaches an RPC client:
//! it means a data-model invariant (nested-set shape, bitmap/arena
//! consistency) broke, and the only safe response is to checkpoint whatever
//! state is still trustworthy and abort before corrupting the save files.

use thiserror::Error;

/// Result alias used throughout the core.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Why a candidate job cannot be scheduled right now (or ever).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    /// No explicitly required node in `req_nodes` is currently usable.
    RequiredNodeUnavailable,
    /// A fitting node set exists but is not contiguous and `contiguous=true`.
    ContiguousUnavailable,
    /// No combination of nodes satisfies the static resource constraints.
    ResourcesUnavailable,
    /// The partition is closed to new work (`state_up = false`).
    PartitionDown,
    /// A group limit on the named association would be exceeded.
    GroupLimit {
        /// Which `grp_*` limit was hit.
        limit: &'static str,
        /// The association the limit is attached to.
        assoc_id: u32,
    },
    /// A per-job limit on the named association would be exceeded.
    PerJobLimit {
        /// Which `max_*_pj` limit was hit.
        limit: &'static str,
        /// The association the limit is attached to.
        assoc_id: u32,
    },
    /// A QoS-scoped limit would be exceeded.
    QosLimit {
        /// Which limit was hit.
        limit: &'static str,
        /// The QoS the limit is attached to.
        qos_id: u32,
    },
    /// The job is administratively held (`base_prio = 0`).
    Held,
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequiredNodeUnavailable => write!(f, "required-node-unavailable"),
            Self::ContiguousUnavailable => write!(f, "contiguous-unavailable"),
            Self::ResourcesUnavailable => write!(f, "resources-unavailable"),
            Self::PartitionDown => write!(f, "partition-down"),
            Self::GroupLimit { limit, assoc_id } => {
                write!(f, "group-limit:{limit}:assoc={assoc_id}")
            }
            Self::PerJobLimit { limit, assoc_id } => {
                write!(f, "per-job-limit:{limit}:assoc={assoc_id}")
            }
            Self::QosLimit { limit, qos_id } => write!(f, "qos-limit:{limit}:qos={qos_id}"),
            Self::Held => write!(f, "held"),
        }
    }
}

/// Core error taxonomy (spec §7).
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Malformed request, name too long, unknown flag.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// User lacks partition group or QoS access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Referenced job/node/partition/association does not exist.
    #[error("not found: {kind} {id}")]
    NotFound {
        /// Kind of record (`"job"`, `"node"`, `"partition"`, `"association"`, `"qos"`).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Duplicate job id, association cycle, `(lft, rgt)` overlap.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Quota or cap hit.
    #[error("resource exhausted: {reason}")]
    ResourceExhausted {
        /// Structured reason, reused as the job's "why pending" string.
        reason: PendingReason,
    },

    /// A valid request that cannot run right now; retryable.
    #[error("nodes busy: {reason}")]
    NodesBusy {
        /// Why the scheduler could not place the job this pass.
        reason: PendingReason,
    },

    /// A valid request that can never run given current configuration.
    #[error("nodes never: {reason}")]
    NodesNever {
        /// Why no configuration of current nodes could ever satisfy the request.
        reason: PendingReason,
    },

    /// Accounting store or state-save failure; caller should retry.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Wire protocol version mismatch.
    #[error("protocol version mismatch: got {got}, supported up to {max_supported}")]
    ProtocolVersion {
        /// Version tag the peer sent.
        got: u16,
        /// Highest version this build understands.
        max_supported: u16,
    },

    /// A data-model invariant is violated. The controller must checkpoint
    /// and abort rather than risk persisting corrupted state.
    #[error("fatal invariant violated: {0}")]
    FatalInvariant(String),
}

impl ClusterError {
    /// Map to the client-visible exit code from spec §6.
    pub fn exit_code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidArguments,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::TransientFailure,
            Self::ResourceExhausted { .. } => ErrorCode::PermanentFailure,
            Self::NodesBusy { .. } => ErrorCode::TransientFailure,
            Self::NodesNever { .. } => ErrorCode::PermanentFailure,
            Self::TransientIo(_) => ErrorCode::TransientFailure,
            Self::ProtocolVersion { .. } => ErrorCode::InvalidArguments,
            Self::FatalInvariant(_) => ErrorCode::PermanentFailure,
        }
    }

    /// True if the RPC handler may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodesBusy { .. } | Self::TransientIo(_))
    }
}

/// CLI-visible exit codes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// 0 — success.
    Success = 0,
    /// 1 — invalid arguments.
    InvalidArguments = 1,
    /// 2 — permission denied.
    PermissionDenied = 2,
    /// 3 — resource not found.
    NotFound = 3,
    /// 4 — transient failure (retryable).
    TransientFailure = 4,
    /// 5 — permanent failure.
    PermanentFailure = 5,
}
