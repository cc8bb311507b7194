//! Conservative backfill pass (spec §4.F): start lower-priority jobs early
//! only when doing so provably cannot delay any existing reservation.
//!
//! Backfill only ever starts a job *now* — at `t=0` against the nodes idle
//! this instant. What it additionally checks is that doing so does not
//! intrude on the single highest-priority pending job's own reservation:
//! `P*`'s predicted `(start_time, node set)`, computed the same way
//! `will_run` would. A lower-priority job may use currently-idle nodes
//! freely as long as either it needs none of `P*`'s reserved nodes, or it
//! finishes before `P*`'s predicted start (spec §4.F step 3: "without
//! raising any existing reservation's effective start"). Candidates are
//! walked in descending priority so each promotion shrinks the idle pool
//! the next candidate sees.

use super::select_best;
use crate::bitmap::NodeBitmap;
use crate::job::JobRequest;
use crate::node::NodeRegistry;
use std::collections::HashMap;

/// A currently running job's footprint, for projecting future idle time.
pub struct RunningJob {
    pub job_id: u64,
    pub nodes: NodeBitmap,
    pub end_time_mins_from_now: u64,
}

/// A pending job considered for promotion.
pub struct BackfillCandidate {
    pub job_id: u64,
    pub request: JobRequest,
    pub priority: f64,
    /// Explicit node pinning, feature constraints, or `contiguous=true` —
    /// any of these disqualifies a job from the cheap locality filter
    /// (spec §4.F step 3).
    pub has_restrictions: bool,
}

/// Result of one backfill pass.
pub struct BackfillOutcome {
    pub promoted: Vec<u64>,
    pub chosen_nodes: HashMap<u64, NodeBitmap>,
    /// `P*`'s own effective priority, for seating a promoted job's
    /// `base_prio` at `P*+1` so the next scheduling pass starts it.
    pub p_star_priority: Option<f64>,
}

/// `P*`'s own predicted reservation, found by the same valley-walk
/// `will_run` uses.
struct Reservation {
    start_mins: u64,
    nodes: NodeBitmap,
}

fn find_reservation(
    job: &JobRequest,
    partition: &str,
    registry: &NodeRegistry,
    shared_allowed: bool,
    breakpoints: &[(u64, NodeBitmap)],
) -> Option<Reservation> {
    for (t, idle) in breakpoints {
        if let Ok(nodes) = select_best(job, partition, idle, registry, shared_allowed) {
            return Some(Reservation { start_mins: *t, nodes });
        }
    }
    None
}

/// Run one backfill pass for a single partition (spec §4.F). Callers
/// exclude `shared=force`/`exclusive`/`state_up=false` partitions before
/// calling this, per the pass's own partition-eligibility rule.
#[allow(clippy::too_many_arguments)]
pub fn run_pass(
    partition: &str,
    partition_members: &NodeBitmap,
    registry: &NodeRegistry,
    shared_allowed: bool,
    mut running: Vec<RunningJob>,
    mut pending: Vec<BackfillCandidate>,
    partition_min_procs: u32,
    partition_min_memory_mb: u64,
    partition_min_tmp_disk_mb: u64,
) -> BackfillOutcome {
    running.sort_by_key(|r| r.end_time_mins_from_now);
    pending.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));

    let mut breakpoints: Vec<(u64, NodeBitmap)> = Vec::new();
    let mut cumulative = super::run_now_candidate(registry, partition_members);
    breakpoints.push((0, cumulative.clone()));
    for r in &running {
        cumulative.or_assign(&r.nodes);
        breakpoints.push((r.end_time_mins_from_now, cumulative.clone()));
    }

    let mut idle_now = breakpoints[0].1.clone();

    // P* is the single highest-priority pending job (spec §4.F step 2).
    // Its own reservation, if it doesn't already fit now, bounds how
    // everyone walked below it may use currently-idle nodes.
    let reservation = match pending.first() {
        Some(top) => find_reservation(&top.request, partition, registry, shared_allowed, &breakpoints),
        None => None,
    };

    let p_star_priority = pending.first().map(|top| top.priority);
    let mut promoted = Vec::new();
    let mut chosen_nodes = HashMap::new();

    for job in &pending {
        if job.has_restrictions {
            continue;
        }
        if job.request.min_procs > partition_min_procs
            || job.request.min_memory_mb > partition_min_memory_mb
            || job.request.min_tmp_disk_mb > partition_min_tmp_disk_mb
        {
            continue;
        }

        let Ok(nodes) = select_best(&job.request, partition, &idle_now, registry, shared_allowed) else {
            continue;
        };

        let safe = match &reservation {
            None => true,
            Some(res) => {
                let mut overlap = nodes.clone();
                overlap.and_assign(&res.nodes);
                if overlap.is_empty() {
                    true
                } else {
                    job.request.time_limit_mins <= res.start_mins
                }
            }
        };

        if safe {
            for idx in nodes.iter_ones() {
                idle_now.clear(idx);
            }
            promoted.push(job.job_id);
            chosen_nodes.insert(job.job_id, nodes);
        }
    }

    BackfillOutcome { promoted, chosen_nodes, p_star_priority }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Distribution;
    use crate::node::NodeCapacity;

    fn cap(cpus: u32) -> NodeCapacity {
        NodeCapacity {
            cpus,
            cpu_speed_mhz: 2400,
            real_memory_mb: 32768,
            virtual_memory_mb: 32768,
            tmp_disk_mb: 10240,
            os_version: "5.10".to_string(),
            features: Vec::new(),
        }
    }

    fn req(num_nodes: u32, num_procs: u32, time_limit_mins: u64) -> JobRequest {
        JobRequest {
            num_procs,
            num_nodes,
            max_nodes: num_nodes,
            feature_expr: None,
            req_node_names: Vec::new(),
            exc_node_names: Vec::new(),
            contiguous: false,
            shared: false,
            min_procs: 1,
            min_memory_mb: 1024,
            min_tmp_disk_mb: 0,
            min_os_version: None,
            time_limit_mins,
            procs_per_task: 1,
            distribution: Distribution::Block,
        }
    }

    fn setup_16() -> (NodeRegistry, NodeBitmap) {
        let reg = NodeRegistry::new();
        let mut members = NodeBitmap::new(16);
        for i in 0..16 {
            let idx = reg.create(&format!("lx{i}"), cap(4)).unwrap();
            reg.with_mut(idx, |r| {
                r.state = crate::node::NodeState::Idle;
                r.partitions.push("batch".to_string());
            });
            members.set(idx as usize);
        }
        (reg, members)
    }

    #[test]
    fn promotes_job_fitting_in_idle_gap_without_delaying_longer_job() {
        // Scenario 3 from spec §8.
        let (reg, members) = setup_16();
        // A occupies lx[0..7], running, ends at t=60.
        let mut a_nodes = NodeBitmap::new(16);
        for i in 0..8 {
            a_nodes.set(i);
            reg.with_mut(i as u32, |r| r.state = crate::node::NodeState::Allocated);
        }
        let running = vec![RunningJob { job_id: 1, nodes: a_nodes, end_time_mins_from_now: 60 }];

        // B needs the whole cluster (16 nodes): it cannot fit in the 8
        // currently-idle nodes, so its own predicted start stays t=60 and
        // it is never promoted by backfill (which only ever starts a job
        // at t=0).
        let b = BackfillCandidate { job_id: 2, request: req(16, 64, 60), priority: 900.0, has_restrictions: false };
        let c = BackfillCandidate { job_id: 3, request: req(4, 16, 20), priority: 500.0, has_restrictions: false };

        let outcome = run_pass("batch", &members, &reg, false, running, vec![b, c], 1, 1024, 0);
        assert_eq!(outcome.promoted, vec![3]);
        let chosen = &outcome.chosen_nodes[&3];
        for i in 8..12 {
            assert!(chosen.test(i));
        }
    }

    #[test]
    fn refuses_promotion_that_would_delay_reservation() {
        let (reg, members) = setup_16();
        let mut a_nodes = NodeBitmap::new(16);
        for i in 0..8 {
            a_nodes.set(i);
            reg.with_mut(i as u32, |r| r.state = crate::node::NodeState::Allocated);
        }
        let running = vec![RunningJob { job_id: 1, nodes: a_nodes, end_time_mins_from_now: 60 }];

        // B again needs the full cluster, reserved at t=60.
        let b = BackfillCandidate { job_id: 2, request: req(16, 64, 60), priority: 900.0, has_restrictions: false };
        // D wants the currently-idle nodes but would run for 90 minutes —
        // longer than B's reservation start at t=60 — so it must not be
        // promoted.
        let d = BackfillCandidate { job_id: 4, request: req(8, 32, 90), priority: 500.0, has_restrictions: false };

        let outcome = run_pass("batch", &members, &reg, false, running, vec![b, d], 1, 1024, 0);
        assert!(outcome.promoted.is_empty());
    }

    #[test]
    fn locality_filter_skips_a_job_whose_minima_exceed_the_partition_minimum() {
        let (reg, members) = setup_16();
        // Nothing running, so the whole cluster is idle at t=0 and E would
        // otherwise fit easily; only its min_procs above the partition
        // minimum should keep it from being promoted.
        let mut e = req(4, 16, 20);
        e.min_procs = 2;
        let e = BackfillCandidate { job_id: 5, request: e, priority: 500.0, has_restrictions: false };

        let outcome = run_pass("batch", &members, &reg, false, Vec::new(), vec![e], 1, 1024, 0);
        assert!(outcome.promoted.is_empty());
    }
}
