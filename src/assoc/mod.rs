//! Association Tree (spec §4.C): the parent/child hierarchy of
//! (cluster, account, user, partition) records that carries fair-share
//! weights and hierarchical resource limits.
//!
//! All mutations route through [`AssociationTree`]'s single writer lock, so
//! the `(lft, rgt)` nested-set shift that an add/remove requires is one
//! atomic pass — readers never observe a half-shifted tree.

pub mod limits;

use crate::error::{ClusterError, ClusterResult, PendingReason};
use limits::{GroupLimits, PerJobLimits};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Usage counters carried by an association (spec §3).
#[derive(Debug, Clone, Default)]
pub struct AssocUsage {
    pub used_jobs: u32,
    pub used_submit_jobs: u32,
    pub grp_used_cpu_mins: u64,
    pub grp_used_cpus: u32,
    pub grp_used_jobs: u32,
    pub grp_used_nodes: u32,
    pub grp_used_submit_jobs: u32,
    pub grp_used_wall_secs: u64,
    /// Long-lived raw usage (e.g. cpu-seconds charged), fed by Usage Roll-up.
    pub usage_raw: f64,
    /// `usage_raw` normalized against siblings; recomputed on read.
    pub usage_norm: f64,
    /// Parent-damped effective usage; recomputed top-down on read.
    pub usage_efctv: f64,
}

/// A single association record.
#[derive(Debug, Clone)]
pub struct Association {
    pub assoc_id: u32,
    pub cluster: String,
    pub account: String,
    pub user: Option<String>,
    pub partition: Option<String>,
    pub parent_id: Option<u32>,
    pub lft: u32,
    pub rgt: u32,
    pub shares_raw: f64,
    pub qos_ids: Vec<u32>,
    pub group_limits: GroupLimits,
    pub per_job_limits: PerJobLimits,
    pub usage: AssocUsage,
}

/// What the limit checker evaluates a candidate job against.
pub struct JobFootprint {
    pub num_procs: u32,
    pub num_nodes: u32,
    pub time_limit_mins: u64,
}

impl JobFootprint {
    fn cpu_mins(&self) -> u64 {
        self.num_procs as u64 * self.time_limit_mins
    }
}

struct Inner {
    by_id: HashMap<u32, Association>,
    next_id: u32,
    /// cluster name -> root assoc_id
    roots: HashMap<String, u32>,
}

/// The Association Tree: single writer, many readers.
pub struct AssociationTree {
    inner: RwLock<Inner>,
    damping: f64,
}

impl AssociationTree {
    /// `damping` is the configuration constant in `[0, 1]` from spec §4.C's
    /// `usage_efctv` formula (DESIGN.md open question #1).
    pub fn new(damping: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                next_id: 1,
                roots: HashMap::new(),
            }),
            damping: damping.clamp(0.0, 1.0),
        }
    }

    /// Create the root association for a cluster. Fails if one exists.
    pub fn create_root(&self, cluster: &str, shares_raw: f64) -> ClusterResult<u32> {
        let mut inner = self.inner.write();
        if inner.roots.contains_key(cluster) {
            return Err(ClusterError::Conflict(format!(
                "cluster {cluster} already has a root association"
            )));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(
            id,
            Association {
                assoc_id: id,
                cluster: cluster.to_string(),
                account: "root".to_string(),
                user: None,
                partition: None,
                parent_id: None,
                lft: 1,
                rgt: 2,
                shares_raw,
                qos_ids: Vec::new(),
                group_limits: GroupLimits::default(),
                per_job_limits: PerJobLimits::default(),
                usage: AssocUsage::default(),
            },
        );
        inner.roots.insert(cluster.to_string(), id);
        Ok(id)
    }

    /// Add a child association under `parent_id`. Shifts every sibling to
    /// the right of the insertion point and every ancestor's `rgt` by 2, in
    /// one pass under the write lock (spec §4.C).
    #[allow(clippy::too_many_arguments)]
    pub fn add_child(
        &self,
        parent_id: u32,
        account: &str,
        user: Option<&str>,
        partition: Option<&str>,
        shares_raw: f64,
    ) -> ClusterResult<u32> {
        let mut inner = self.inner.write();
        let (cluster, parent_rgt) = {
            let parent = inner
                .by_id
                .get(&parent_id)
                .ok_or_else(|| ClusterError::NotFound { kind: "association", id: parent_id.to_string() })?;
            (parent.cluster.clone(), parent.rgt)
        };
        let new_lft = parent_rgt;
        let new_rgt = parent_rgt + 1;

        for assoc in inner.by_id.values_mut() {
            if assoc.cluster != cluster {
                continue;
            }
            if assoc.lft >= new_lft {
                assoc.lft += 2;
            }
            if assoc.rgt >= new_lft {
                assoc.rgt += 2;
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(
            id,
            Association {
                assoc_id: id,
                cluster,
                account: account.to_string(),
                user: user.map(str::to_string),
                partition: partition.map(str::to_string),
                parent_id: Some(parent_id),
                lft: new_lft,
                rgt: new_rgt,
                shares_raw,
                qos_ids: Vec::new(),
                group_limits: GroupLimits::default(),
                per_job_limits: PerJobLimits::default(),
                usage: AssocUsage::default(),
            },
        );
        Ok(id)
    }

    /// Remove a leaf association, shifting the nested-set numbers back
    /// down in one pass. Fails if the association has children.
    pub fn remove(&self, assoc_id: u32) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let (cluster, lft, rgt) = {
            let a = inner
                .by_id
                .get(&assoc_id)
                .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
            (a.cluster.clone(), a.lft, a.rgt)
        };
        if rgt - lft != 1 {
            return Err(ClusterError::Conflict(format!(
                "association {assoc_id} has descendants and cannot be removed directly"
            )));
        }
        inner.by_id.remove(&assoc_id);
        for assoc in inner.by_id.values_mut() {
            if assoc.cluster != cluster {
                continue;
            }
            if assoc.lft > lft {
                assoc.lft -= 2;
            }
            if assoc.rgt > lft {
                assoc.rgt -= 2;
            }
        }
        Ok(())
    }

    pub fn get(&self, assoc_id: u32) -> ClusterResult<Association> {
        self.inner
            .read()
            .by_id
            .get(&assoc_id)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })
    }

    /// Every association across every cluster, in no particular order —
    /// used by the accounting-snapshot path, never on the scheduling hot
    /// path.
    pub fn list_all(&self) -> Vec<Association> {
        self.inner.read().by_id.values().cloned().collect()
    }

    /// Every ancestor of `assoc_id` from the association itself up to the
    /// root, root last-to-first... ordered root-first for top-down usage
    /// propagation.
    pub fn ancestors_root_first(&self, assoc_id: u32) -> ClusterResult<Vec<Association>> {
        let inner = self.inner.read();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        let mut chain: Vec<Association> = inner
            .by_id
            .values()
            .filter(|a| {
                a.cluster == target.cluster && a.lft <= target.lft && a.rgt >= target.rgt
            })
            .cloned()
            .collect();
        chain.sort_by_key(|a| a.lft);
        Ok(chain)
    }

    /// All descendants of `assoc_id`, `assoc_id` included (the nested-set
    /// closure predicate from spec §3).
    pub fn closure(&self, assoc_id: u32) -> ClusterResult<Vec<Association>> {
        let inner = self.inner.read();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        Ok(inner
            .by_id
            .values()
            .filter(|a| a.cluster == target.cluster && a.lft >= target.lft && a.rgt <= target.rgt)
            .cloned()
            .collect())
    }

    /// Resolve the `(cluster, account, user?, partition?)` tuple key to an
    /// assoc_id (spec §3). Tries the partition-scoped association first,
    /// then falls back to the cluster-wide one for that account/user.
    pub fn find_by_tuple(
        &self,
        cluster: &str,
        account: &str,
        user: Option<&str>,
        partition: Option<&str>,
    ) -> Option<u32> {
        let inner = self.inner.read();
        let matches = |a: &&Association, part: Option<&str>| {
            a.cluster == cluster
                && a.account == account
                && a.user.as_deref() == user
                && a.partition.as_deref() == part
        };
        if let Some(part) = partition {
            if let Some(a) = inner.by_id.values().find(|a| matches(a, Some(part))) {
                return Some(a.assoc_id);
            }
        }
        inner.by_id.values().find(|a| matches(a, None)).map(|a| a.assoc_id)
    }

    /// Bump `used_submit_jobs`/`grp_used_submit_jobs` across the ancestor
    /// chain at submission time, before the job has ever run.
    pub fn charge_job_submit(&self, assoc_id: u32) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        let (cluster, lft, rgt) = (target.cluster.clone(), target.lft, target.rgt);
        for a in inner.by_id.values_mut() {
            if a.cluster == cluster && a.lft <= lft && a.rgt >= rgt {
                a.usage.grp_used_submit_jobs += 1;
            }
        }
        if let Some(a) = inner.by_id.get_mut(&assoc_id) {
            a.usage.used_submit_jobs += 1;
        }
        Ok(())
    }

    /// Release `used_submit_jobs`/`grp_used_submit_jobs` once a job leaves
    /// the submitted pool entirely (terminal and reaped, or requeued away).
    pub fn release_job_submit(&self, assoc_id: u32) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        let (cluster, lft, rgt) = (target.cluster.clone(), target.lft, target.rgt);
        for a in inner.by_id.values_mut() {
            if a.cluster == cluster && a.lft <= lft && a.rgt >= rgt {
                a.usage.grp_used_submit_jobs = a.usage.grp_used_submit_jobs.saturating_sub(1);
            }
        }
        if let Some(a) = inner.by_id.get_mut(&assoc_id) {
            a.usage.used_submit_jobs = a.usage.used_submit_jobs.saturating_sub(1);
        }
        Ok(())
    }

    fn siblings(&self, assoc_id: u32) -> ClusterResult<Vec<Association>> {
        let inner = self.inner.read();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        match target.parent_id {
            None => Ok(vec![target.clone()]),
            Some(parent) => Ok(inner
                .by_id
                .values()
                .filter(|a| a.parent_id == Some(parent))
                .cloned()
                .collect()),
        }
    }

    /// `shares_norm(A) = A.shares_raw / sum(siblings' shares_raw)`.
    pub fn shares_norm(&self, assoc_id: u32) -> ClusterResult<f64> {
        let siblings = self.siblings(assoc_id)?;
        let total: f64 = siblings.iter().map(|s| s.shares_raw).sum();
        let me = self.get(assoc_id)?;
        Ok(if total == 0.0 { 0.0 } else { me.shares_raw / total })
    }

    /// `usage_norm(A) = A.usage_raw / sum(siblings' usage_raw)`.
    pub fn usage_norm(&self, assoc_id: u32) -> ClusterResult<f64> {
        let siblings = self.siblings(assoc_id)?;
        let total: f64 = siblings.iter().map(|s| s.usage.usage_raw).sum();
        let me = self.get(assoc_id)?;
        Ok(if total == 0.0 { 0.0 } else { me.usage.usage_raw / total })
    }

    /// `usage_efctv`, computed top-down from the root (spec §4.C).
    pub fn usage_efctv(&self, assoc_id: u32) -> ClusterResult<f64> {
        let chain = self.ancestors_root_first(assoc_id)?;
        let mut parent_efctv = 0.0;
        let mut result = 0.0;
        for (depth, a) in chain.iter().enumerate() {
            let norm = self.usage_norm(a.assoc_id)?;
            let efctv = if depth == 0 {
                norm
            } else {
                norm + (parent_efctv - norm) * self.damping
            };
            parent_efctv = efctv;
            result = efctv;
        }
        Ok(result)
    }

    /// Fair-share priority contribution: a monotonically decreasing
    /// function of `usage_efctv / shares_norm` (spec §4.C). An association
    /// with zero normalized share gets the lowest possible factor.
    pub fn fair_share_factor(&self, assoc_id: u32) -> ClusterResult<f64> {
        let shares_norm = self.shares_norm(assoc_id)?;
        if shares_norm <= 0.0 {
            return Ok(0.0);
        }
        let efctv = self.usage_efctv(assoc_id)?;
        let ratio = efctv / shares_norm;
        Ok(2f64.powf(-ratio))
    }

    /// Accrue raw usage onto an association (applied by the accounting
    /// worker when a committed usage sample arrives over the Update Bus).
    pub fn add_usage_raw(&self, assoc_id: u32, delta: f64) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let a = inner
            .by_id
            .get_mut(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        a.usage.usage_raw += delta;
        Ok(())
    }

    /// Limit check for admission of a candidate job under association
    /// `assoc_id` (spec §4.C): ancestor `grp_*` limits, then `max_*_pj` on
    /// the association itself. QoS-scoped limits are layered on top by
    /// `qos::QosSet::check_admission`.
    pub fn check_admission(&self, assoc_id: u32, job: &JobFootprint) -> Result<(), PendingReason> {
        let chain = self
            .ancestors_root_first(assoc_id)
            .map_err(|_| PendingReason::ResourcesUnavailable)?;

        for ancestor in &chain {
            limits::check_group_limits(ancestor, job)?;
        }

        let me = chain.last().expect("chain always includes self");
        limits::check_per_job_limits(me, job)?;
        Ok(())
    }

    /// Bump the running counters that make up `grp_used_*` across the
    /// ancestor chain when a job starts running.
    pub fn charge_job_start(&self, assoc_id: u32, job: &JobFootprint) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        let (cluster, lft, rgt) = (target.cluster.clone(), target.lft, target.rgt);
        for a in inner.by_id.values_mut() {
            if a.cluster == cluster && a.lft <= lft && a.rgt >= rgt {
                a.usage.grp_used_cpus += job.num_procs;
                a.usage.grp_used_nodes += job.num_nodes;
                a.usage.grp_used_jobs += 1;
                a.usage.grp_used_cpu_mins += job.cpu_mins();
            }
        }
        if let Some(a) = inner.by_id.get_mut(&assoc_id) {
            a.usage.used_jobs += 1;
        }
        Ok(())
    }

    /// Release the counters a job previously charged, on completion.
    pub fn charge_job_end(&self, assoc_id: u32, job: &JobFootprint) -> ClusterResult<()> {
        let mut inner = self.inner.write();
        let target = inner
            .by_id
            .get(&assoc_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "association", id: assoc_id.to_string() })?;
        let (cluster, lft, rgt) = (target.cluster.clone(), target.lft, target.rgt);
        for a in inner.by_id.values_mut() {
            if a.cluster == cluster && a.lft <= lft && a.rgt >= rgt {
                a.usage.grp_used_cpus = a.usage.grp_used_cpus.saturating_sub(job.num_procs);
                a.usage.grp_used_nodes = a.usage.grp_used_nodes.saturating_sub(job.num_nodes);
            }
        }
        if let Some(a) = inner.by_id.get_mut(&assoc_id) {
            a.usage.used_jobs = a.usage.used_jobs.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_set_shape_holds_after_adds() {
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("c1", 1.0).unwrap();
        let a = tree.add_child(root, "acctA", None, None, 1.0).unwrap();
        let b = tree.add_child(root, "acctB", None, None, 1.0).unwrap();
        let _c = tree.add_child(a, "acctA", Some("alice"), None, 1.0).unwrap();

        let root_rec = tree.get(root).unwrap();
        let a_rec = tree.get(a).unwrap();
        let b_rec = tree.get(b).unwrap();
        assert!(root_rec.lft < a_rec.lft);
        assert!(root_rec.lft < b_rec.lft);
        assert!(root_rec.rgt > a_rec.rgt);
        assert!(root_rec.rgt > b_rec.rgt);
        assert_eq!(root_rec.rgt, 2 * 4); // root + 3 descendants
    }

    #[test]
    fn shares_norm_sums_to_one_across_siblings() {
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("c1", 1.0).unwrap();
        let a = tree.add_child(root, "acctA", None, None, 30.0).unwrap();
        let b = tree.add_child(root, "acctB", None, None, 70.0).unwrap();
        let sa = tree.shares_norm(a).unwrap();
        let sb = tree.shares_norm(b).unwrap();
        assert!((sa + sb - 1.0).abs() < 1e-9);
        assert!((sa - 0.3).abs() < 1e-9);
    }

    #[test]
    fn fair_share_ordering_favors_less_used_sibling() {
        // Scenario 6 from spec §8: equal shares_raw, S1 has consumed usage, S2 none.
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("c1", 1.0).unwrap();
        let s1 = tree.add_child(root, "s1", None, None, 100.0).unwrap();
        let s2 = tree.add_child(root, "s2", None, None, 100.0).unwrap();
        tree.add_usage_raw(s1, 1000.0).unwrap();

        let f1 = tree.fair_share_factor(s1).unwrap();
        let f2 = tree.fair_share_factor(s2).unwrap();
        assert!(f2 > f1, "unused sibling must rank higher: f1={f1} f2={f2}");
    }

    #[test]
    fn remove_requires_leaf() {
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("c1", 1.0).unwrap();
        let a = tree.add_child(root, "acctA", None, None, 1.0).unwrap();
        let _child = tree.add_child(a, "acctA", Some("bob"), None, 1.0).unwrap();
        assert!(tree.remove(a).is_err());
    }

    #[test]
    fn group_cpu_limit_rejects_then_succeeds_at_lower_request() {
        // Scenario 4 from spec §8.
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("c1", 1.0).unwrap();
        let acct_x = tree.add_child(root, "acctX", None, None, 1.0).unwrap();
        tree.inner.write().by_id.get_mut(&acct_x).unwrap().group_limits.grp_cpus = Some(32);

        let user_a = tree.add_child(acct_x, "acctX", Some("userA"), None, 1.0).unwrap();
        let user_b = tree.add_child(acct_x, "acctX", Some("userB"), None, 1.0).unwrap();
        let user_c = tree.add_child(acct_x, "acctX", Some("userC"), None, 1.0).unwrap();

        let twelve = JobFootprint { num_procs: 12, num_nodes: 1, time_limit_mins: 60 };
        tree.check_admission(user_a, &twelve).unwrap();
        tree.charge_job_start(user_a, &twelve).unwrap();
        tree.check_admission(user_b, &twelve).unwrap();
        tree.charge_job_start(user_b, &twelve).unwrap();

        let sixteen = JobFootprint { num_procs: 16, num_nodes: 1, time_limit_mins: 60 };
        assert!(tree.check_admission(user_c, &sixteen).is_err());

        let eight = JobFootprint { num_procs: 8, num_nodes: 1, time_limit_mins: 60 };
        assert!(tree.check_admission(user_c, &eight).is_ok());
    }
}
