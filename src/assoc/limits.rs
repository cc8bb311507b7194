//! Group and per-job limit checks for the Association Tree (spec §4.C).

use super::{Association, JobFootprint};
use crate::error::PendingReason;

/// Limits charged against the whole subtree rooted at an association.
#[derive(Debug, Clone, Default)]
pub struct GroupLimits {
    pub grp_cpu_mins: Option<u64>,
    pub grp_cpus: Option<u32>,
    pub grp_jobs: Option<u32>,
    pub grp_nodes: Option<u32>,
    pub grp_submit_jobs: Option<u32>,
    pub grp_wall_secs: Option<u64>,
}

/// Limits charged against a single job under a given association.
#[derive(Debug, Clone, Default)]
pub struct PerJobLimits {
    pub max_cpu_mins_pj: Option<u64>,
    pub max_cpus_pj: Option<u32>,
    pub max_nodes_pj: Option<u32>,
    pub max_jobs: Option<u32>,
    pub max_submit_jobs: Option<u32>,
    pub max_wall_pj_secs: Option<u64>,
}

/// Check one ancestor's `grp_*` ceilings against a candidate job joining.
pub fn check_group_limits(assoc: &Association, job: &JobFootprint) -> Result<(), PendingReason> {
    let limits = &assoc.group_limits;
    let usage = &assoc.usage;

    if let Some(max) = limits.grp_cpus {
        if usage.grp_used_cpus + job.num_procs > max {
            return Err(PendingReason::GroupLimit { limit: "grp_cpus", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.grp_nodes {
        if usage.grp_used_nodes + job.num_nodes > max {
            return Err(PendingReason::GroupLimit { limit: "grp_nodes", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.grp_jobs {
        if usage.grp_used_jobs + 1 > max {
            return Err(PendingReason::GroupLimit { limit: "grp_jobs", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.grp_submit_jobs {
        if usage.grp_used_submit_jobs + 1 > max {
            return Err(PendingReason::GroupLimit {
                limit: "grp_submit_jobs",
                assoc_id: assoc.assoc_id,
            });
        }
    }
    if let Some(max) = limits.grp_cpu_mins {
        if usage.grp_used_cpu_mins + job.cpu_mins() > max {
            return Err(PendingReason::GroupLimit {
                limit: "grp_cpu_mins",
                assoc_id: assoc.assoc_id,
            });
        }
    }
    if let Some(max) = limits.grp_wall_secs {
        let job_wall_secs = job.time_limit_mins * 60;
        if usage.grp_used_wall_secs + job_wall_secs > max {
            return Err(PendingReason::GroupLimit { limit: "grp_wall", assoc_id: assoc.assoc_id });
        }
    }
    Ok(())
}

/// Check an association's own `max_*_pj` ceilings against a candidate job.
pub fn check_per_job_limits(assoc: &Association, job: &JobFootprint) -> Result<(), PendingReason> {
    let limits = &assoc.per_job_limits;

    if let Some(max) = limits.max_cpus_pj {
        if job.num_procs > max {
            return Err(PendingReason::PerJobLimit { limit: "max_cpus_pj", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.max_nodes_pj {
        if job.num_nodes > max {
            return Err(PendingReason::PerJobLimit { limit: "max_nodes_pj", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.max_cpu_mins_pj {
        if job.cpu_mins() > max {
            return Err(PendingReason::PerJobLimit {
                limit: "max_cpu_mins_pj",
                assoc_id: assoc.assoc_id,
            });
        }
    }
    if let Some(max) = limits.max_wall_pj_secs {
        if job.time_limit_mins * 60 > max {
            return Err(PendingReason::PerJobLimit { limit: "max_wall_pj", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.max_jobs {
        if assoc.usage.used_jobs + 1 > max {
            return Err(PendingReason::PerJobLimit { limit: "max_jobs", assoc_id: assoc.assoc_id });
        }
    }
    if let Some(max) = limits.max_submit_jobs {
        if assoc.usage.used_submit_jobs + 1 > max {
            return Err(PendingReason::PerJobLimit {
                limit: "max_submit_jobs",
                assoc_id: assoc.assoc_id,
            });
        }
    }
    Ok(())
}
