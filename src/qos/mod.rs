//! QoS Set (spec §4.D): a flat table of named quality-of-service records,
//! each carrying its own limits and a preemption relationship to other
//! QoS entries.
//!
//! The preemption relation is a plain `Vec<u32>` of victim QoS ids per
//! entry, checked with a linear membership scan — the QoS set is small
//! enough (definitions change only via `update_qos`) that this never
//! shows up next to the bitmap-backed node-set operations on the
//! scheduling hot path.

use crate::assoc::JobFootprint;
use crate::error::{ClusterError, ClusterResult, PendingReason};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Limits and priority weighting scoped to a QoS (spec §3).
#[derive(Debug, Clone)]
pub struct Qos {
    pub qos_id: u32,
    pub name: String,
    pub priority: i32,
    pub grp_cpus: Option<u32>,
    pub grp_jobs: Option<u32>,
    pub grp_nodes: Option<u32>,
    pub max_cpus_pu: Option<u32>,
    pub max_jobs_pu: Option<u32>,
    pub max_nodes_pu: Option<u32>,
    pub max_wall_pj_secs: Option<u64>,
    /// QoS ids that jobs under this QoS may preempt when resources are short.
    pub preempts: Vec<u32>,
    pub used_cpus: u32,
    pub used_jobs: u32,
    pub used_nodes: u32,
}

impl Qos {
    fn blank(qos_id: u32, name: &str) -> Self {
        Self {
            qos_id,
            name: name.to_string(),
            priority: 0,
            grp_cpus: None,
            grp_jobs: None,
            grp_nodes: None,
            max_cpus_pu: None,
            max_jobs_pu: None,
            max_nodes_pu: None,
            max_wall_pj_secs: None,
            preempts: Vec::new(),
            used_cpus: 0,
            used_jobs: 0,
            used_nodes: 0,
        }
    }
}

struct Inner {
    by_id: HashMap<u32, Qos>,
    by_name: HashMap<String, u32>,
    next_id: u32,
}

/// The QoS Set: a small flat table, guarded by one writer lock (QoS
/// definitions change rarely, via `update_qos`, never on the scheduling
/// hot path).
pub struct QosSet {
    inner: RwLock<Inner>,
}

impl Default for QosSet {
    fn default() -> Self {
        Self::new()
    }
}

impl QosSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn create(&self, name: &str) -> ClusterResult<u32> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(ClusterError::Conflict(format!("qos {name} already exists")));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(id, Qos::blank(id, name));
        inner.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get(&self, qos_id: u32) -> ClusterResult<Qos> {
        self.inner
            .read()
            .by_id
            .get(&qos_id)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound { kind: "qos", id: qos_id.to_string() })
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn with_mut<R>(&self, qos_id: u32, f: impl FnOnce(&mut Qos) -> R) -> ClusterResult<R> {
        let mut inner = self.inner.write();
        inner
            .by_id
            .get_mut(&qos_id)
            .map(f)
            .ok_or_else(|| ClusterError::NotFound { kind: "qos", id: qos_id.to_string() })
    }

    /// True if `candidate`'s QoS may preempt a job running under `victim`'s
    /// QoS (spec §4.D's preemption relation).
    pub fn can_preempt(&self, candidate: u32, victim: u32) -> bool {
        self.inner
            .read()
            .by_id
            .get(&candidate)
            .map(|q| q.preempts.contains(&victim))
            .unwrap_or(false)
    }

    /// QoS-scoped limit check for admission, layered on top of
    /// `assoc::AssociationTree::check_admission` (spec §4.C step 3).
    pub fn check_admission(&self, qos_id: u32, job: &JobFootprint) -> Result<(), PendingReason> {
        let inner = self.inner.read();
        let qos = inner.by_id.get(&qos_id).ok_or(PendingReason::ResourcesUnavailable)?;

        if let Some(max) = qos.grp_cpus {
            if qos.used_cpus + job.num_procs > max {
                return Err(PendingReason::QosLimit { limit: "grp_cpus", qos_id });
            }
        }
        if let Some(max) = qos.grp_nodes {
            if qos.used_nodes + job.num_nodes > max {
                return Err(PendingReason::QosLimit { limit: "grp_nodes", qos_id });
            }
        }
        if let Some(max) = qos.grp_jobs {
            if qos.used_jobs + 1 > max {
                return Err(PendingReason::QosLimit { limit: "grp_jobs", qos_id });
            }
        }
        if let Some(max) = qos.max_wall_pj_secs {
            if job.time_limit_mins * 60 > max {
                return Err(PendingReason::QosLimit { limit: "max_wall_pj", qos_id });
            }
        }
        Ok(())
    }

    pub fn charge_job_start(&self, qos_id: u32, job: &JobFootprint) -> ClusterResult<()> {
        self.with_mut(qos_id, |q| {
            q.used_cpus += job.num_procs;
            q.used_nodes += job.num_nodes;
            q.used_jobs += 1;
        })
    }

    pub fn charge_job_end(&self, qos_id: u32, job: &JobFootprint) -> ClusterResult<()> {
        self.with_mut(qos_id, |q| {
            q.used_cpus = q.used_cpus.saturating_sub(job.num_procs);
            q.used_nodes = q.used_nodes.saturating_sub(job.num_nodes);
            q.used_jobs = q.used_jobs.saturating_sub(1);
        })
    }

    pub fn list(&self) -> Vec<Qos> {
        self.inner.read().by_id.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footprint(procs: u32) -> JobFootprint {
        JobFootprint { num_procs: procs, num_nodes: 1, time_limit_mins: 30 }
    }

    #[test]
    fn grp_cpus_limit_enforced() {
        let set = QosSet::new();
        let id = set.create("normal").unwrap();
        set.with_mut(id, |q| q.grp_cpus = Some(8)).unwrap();
        set.check_admission(id, &footprint(8)).unwrap();
        set.charge_job_start(id, &footprint(8)).unwrap();
        assert!(set.check_admission(id, &footprint(1)).is_err());
        set.charge_job_end(id, &footprint(8)).unwrap();
        assert!(set.check_admission(id, &footprint(8)).is_ok());
    }

    #[test]
    fn preemption_relation_is_directional() {
        let set = QosSet::new();
        let high = set.create("high").unwrap();
        let low = set.create("low").unwrap();
        set.with_mut(high, |q| q.preempts.push(low)).unwrap();
        assert!(set.can_preempt(high, low));
        assert!(!set.can_preempt(low, high));
    }

    #[test]
    fn duplicate_name_conflicts() {
        let set = QosSet::new();
        set.create("normal").unwrap();
        assert!(set.create("normal").is_err());
    }
}
