//! Scheduler (spec §4.F): one selection kernel shared by three modes, plus
//! a conservative backfill pass and the priority formula that orders
//! pending work.
//!
//! The kernel runs as a staged filter → select pipeline — clear nodes that
//! fail a static test, then intersect/subtract explicit node lists, then
//! group into contiguous runs and pick — mirroring the filter-then-select
//! shape of a three-phase placement pass.

pub mod backfill;
pub mod priority;

use crate::bitmap::NodeBitmap;
use crate::error::PendingReason;
use crate::job::JobRequest;
use crate::node::{NodeRecord, NodeRegistry, NodeState};

/// Static, per-node admission test (spec §4.F step 1).
fn node_matches_static(rec: &NodeRecord, job: &JobRequest, partition: &str, shared_allowed: bool) -> bool {
    if rec.name.is_empty() {
        return false; // logically removed
    }
    if !rec.partitions.iter().any(|p| p == partition) {
        return false;
    }
    let usable = if shared_allowed { rec.state.is_usable_shared() } else { rec.state.is_usable_exclusive() };
    if !usable {
        return false;
    }
    if rec.capacity.cpus < job.min_procs {
        return false;
    }
    if rec.capacity.real_memory_mb < job.min_memory_mb {
        return false;
    }
    if rec.capacity.tmp_disk_mb < job.min_tmp_disk_mb {
        return false;
    }
    if let Some(min_os) = &job.min_os_version {
        if os_version_cmp(&rec.capacity.os_version, min_os) == std::cmp::Ordering::Less {
            return false;
        }
    }
    if let Some(expr) = &job.feature_expr {
        let required: Vec<String> = expr.split(&['&', ','][..]).map(|s| s.trim().to_string()).collect();
        if !rec.has_all_features(&required) {
            return false;
        }
    }
    true
}

/// Dotted-decimal version compare (`"5.10.2"` vs `"5.9"`), component-wise,
/// missing trailing components treated as 0.
fn os_version_cmp(have: &str, want: &str) -> std::cmp::Ordering {
    let have_parts: Vec<u32> = have.split('.').filter_map(|p| p.parse().ok()).collect();
    let want_parts: Vec<u32> = want.split('.').filter_map(|p| p.parse().ok()).collect();
    let len = have_parts.len().max(want_parts.len());
    for i in 0..len {
        let h = have_parts.get(i).copied().unwrap_or(0);
        let w = want_parts.get(i).copied().unwrap_or(0);
        match h.cmp(&w) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Take nodes from `[start, start+node_count)` in ascending order until
/// both `need_nodes` and `need_cpus` are satisfied (spec §4.F: "take only
/// as many prefix nodes as needed"). Shared by the best-fit and multi-set
/// packing paths.
fn take_prefix(
    chosen: &mut NodeBitmap,
    records: &[NodeRecord],
    start: usize,
    node_count: usize,
    have_nodes: &mut u32,
    have_cpus: &mut u32,
    need_nodes: u32,
    need_cpus: u32,
) {
    for i in start..start + node_count {
        if *have_nodes >= need_nodes && *have_cpus >= need_cpus {
            break;
        }
        chosen.set(i);
        *have_nodes += 1;
        *have_cpus += records.get(i).map(|r| r.capacity.cpus).unwrap_or(0);
    }
}

/// The shared selection kernel (spec §4.F). `candidate` is the working
/// bitmap to select from (its meaning differs per mode — see
/// `run_now`/`test_only`/`will_run` below); `partition` and
/// `shared_allowed` come from the partition's admission resolution.
pub fn select_best(
    job: &JobRequest,
    partition: &str,
    candidate: &NodeBitmap,
    registry: &NodeRegistry,
    shared_allowed: bool,
) -> Result<NodeBitmap, PendingReason> {
    let capacity = candidate.capacity();
    let records = registry.iterate_in_order();
    let mut working = candidate.clone();

    // Step 1: static constraint filter.
    for idx in candidate.iter_ones() {
        let keep = records
            .get(idx)
            .map(|rec| node_matches_static(rec, job, partition, shared_allowed))
            .unwrap_or(false);
        if !keep {
            working.clear(idx);
        }
    }

    // Step 2: req_nodes — working becomes exactly the intersection, and
    // every required node must have survived step 1.
    if !job.req_node_names.is_empty() {
        let mut required = NodeBitmap::new(capacity);
        for name in &job.req_node_names {
            match registry.lookup_by_name(name) {
                Some(idx) => required.set(idx as usize),
                None => return Err(PendingReason::RequiredNodeUnavailable),
            }
        }
        let mut surviving = required.clone();
        surviving.and_assign(&working);
        if surviving.popcount() != required.popcount() {
            return Err(PendingReason::RequiredNodeUnavailable);
        }
        working.and_assign(&required);
    }

    // Step 3: exc_nodes.
    for name in &job.exc_node_names {
        if let Some(idx) = registry.lookup_by_name(name) {
            working.clear(idx as usize);
        }
    }

    // Step 4: contiguous sets, with per-set cpu_count filled in.
    let mut sets = working.contiguous_sets();
    for set in &mut sets {
        set.cpu_count = (set.start..set.start + set.node_count)
            .filter_map(|i| records.get(i))
            .map(|r| r.capacity.cpus)
            .sum();
    }

    // Step 5: best-fit — smallest set that satisfies both counts, ties by
    // lower cpu_count then lower starting ordinal.
    let best = sets
        .iter()
        .filter(|s| s.node_count as u32 >= job.num_nodes && s.cpu_count >= job.num_procs)
        .min_by_key(|s| (s.node_count, s.cpu_count, s.start));

    if let Some(best) = best {
        let mut chosen = NodeBitmap::new(capacity);
        let mut have_nodes = 0;
        let mut have_cpus = 0;
        take_prefix(
            &mut chosen,
            &records,
            best.start,
            best.node_count,
            &mut have_nodes,
            &mut have_cpus,
            job.num_nodes,
            job.num_procs,
        );
        return Ok(chosen);
    }

    // Step 6.
    if job.contiguous {
        return Err(PendingReason::ContiguousUnavailable);
    }

    // Step 7: multi-set packing, largest set first.
    let mut ordered = sets;
    ordered.sort_by(|a, b| b.node_count.cmp(&a.node_count).then(a.start.cmp(&b.start)));

    let mut chosen = NodeBitmap::new(capacity);
    let mut have_nodes = 0;
    let mut have_cpus = 0;
    for set in &ordered {
        if have_nodes >= job.num_nodes && have_cpus >= job.num_procs {
            break;
        }
        take_prefix(
            &mut chosen,
            &records,
            set.start,
            set.node_count,
            &mut have_nodes,
            &mut have_cpus,
            job.num_nodes,
            job.num_procs,
        );
    }

    if have_nodes >= job.num_nodes && have_cpus >= job.num_procs {
        Ok(chosen)
    } else {
        Err(PendingReason::ResourcesUnavailable)
    }
}

/// Build the candidate bitmap for `run_now`: nodes currently usable and
/// free, restricted to the partition's membership.
pub fn run_now_candidate(registry: &NodeRegistry, partition_members: &NodeBitmap) -> NodeBitmap {
    let mut candidate = partition_members.clone();
    let records = registry.iterate_in_order();
    for idx in partition_members.iter_ones() {
        let usable = records.get(idx).map(|r| r.state == NodeState::Idle || r.state == NodeState::Mixed).unwrap_or(false);
        if !usable {
            candidate.clear(idx);
        }
    }
    candidate
}

/// Build the candidate bitmap for `test_only`: every node that could ever
/// be usable, ignoring current transient allocation (spec §4.F).
pub fn test_only_candidate(registry: &NodeRegistry, partition_members: &NodeBitmap) -> NodeBitmap {
    let mut candidate = partition_members.clone();
    let records = registry.iterate_in_order();
    for idx in partition_members.iter_ones() {
        let could_ever_run = records
            .get(idx)
            .map(|r| !matches!(r.state, NodeState::Down | NodeState::Failing))
            .unwrap_or(false);
        if !could_ever_run {
            candidate.clear(idx);
        }
    }
    candidate
}

/// One entry in the sorted-by-end-time schedule of currently running jobs,
/// used to advance `will_run`'s candidate set over time.
#[derive(Debug, Clone)]
pub struct RunningFootprint {
    pub end_time_mins_from_now: u64,
    pub nodes: NodeBitmap,
}

/// `will_run`: advance `T` over the sorted end-times of running jobs,
/// retrying selection against (idle ∪ nodes freeing before `T`) until it
/// succeeds. Returns the predicted start time in minutes from now, or the
/// reason selection never succeeds.
pub fn will_run(
    job: &JobRequest,
    partition: &str,
    registry: &NodeRegistry,
    partition_members: &NodeBitmap,
    shared_allowed: bool,
    mut running: Vec<RunningFootprint>,
) -> Result<u64, PendingReason> {
    running.sort_by_key(|r| r.end_time_mins_from_now);

    let mut candidate = run_now_candidate(registry, partition_members);
    if select_best(job, partition, &candidate, registry, shared_allowed).is_ok() {
        return Ok(0);
    }

    let mut last_err = PendingReason::ResourcesUnavailable;
    for freeing in &running {
        candidate.or_assign(&freeing.nodes);
        match select_best(job, partition, &candidate, registry, shared_allowed) {
            Ok(_) => return Ok(freeing.end_time_mins_from_now),
            Err(reason) => last_err = reason,
        }
    }
    Err(last_err)
}
