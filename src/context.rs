//! `ClusterContext` (spec §5/§9): one owned struct wiring every subsystem,
//! constructed fresh by every test and by `main.rs` — never a
//! process-global singleton.
//!
//! **Lock hierarchy** (spec §5, strictly in this order to prevent
//! cycles): configuration → node registry → partition registry →
//! association/QoS → job store. Every method here that must take more
//! than one subsystem's lock acquires them in that order; never hold a
//! job-store lock while trying to acquire an association-tree lock.
//! Synchronous `parking_lot` locks guard every registry, so none of them
//! can ever be held across an `.await` — the two async touch points in
//! this struct (`save_snapshot`, `recover`) only ever read a consistent
//! snapshot, then drop every lock before awaiting I/O.

use crate::assoc::{AssociationTree, JobFootprint};
use crate::bus::{apply as apply_update, AssocUsageDelta, UpdateBus};
use crate::config::AppConfig;
use crate::error::ClusterResult;
use crate::job::{Job, JobClose, JobState, JobStore, RunStart, SubmitDeps, SubmitRequest};
use crate::node::{NodeCapacity, NodeRegistry, NodeState};
use crate::partition::{Partition, PartitionRegistry, SharingPolicy};
use crate::qos::QosSet;
use crate::rollup::{RawUsage, Rollup};
use crate::scheduler;
use crate::state::{reconcile_stale_running, StateDir};
use crate::wire::{AssocUsageRecord, JobSummaryRecord, NodeRecordWire, PartitionRecordWire, QosUsageRecord};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Everything the daemon needs, owned in one place.
pub struct ClusterContext {
    config: watch::Sender<AppConfig>,
    pub nodes: NodeRegistry,
    pub partitions: PartitionRegistry,
    pub assoc_tree: AssociationTree,
    pub qos_set: QosSet,
    pub jobs: JobStore,
    pub bus: UpdateBus,
    pub rollup: Rollup,
    state_dir: StateDir,
}

fn sharing_policy(s: &str) -> SharingPolicy {
    match s {
        "yes" => SharingPolicy::Yes,
        "force" => SharingPolicy::Force,
        "exclusive" => SharingPolicy::Exclusive,
        _ => SharingPolicy::No,
    }
}

impl ClusterContext {
    /// Build a fresh context from a validated config: nodes and
    /// partitions are materialized, the default QoS is created if named,
    /// but no prior state is loaded — call `recover` for that.
    pub fn new(config: AppConfig) -> ClusterResult<Self> {
        let nodes = NodeRegistry::new();
        let mut expanded_names: Vec<(String, NodeCapacity, Vec<String>)> = Vec::new();
        for def in &config.nodes {
            for name in crate::node::hostlist::expand(&def.name_pattern)? {
                expanded_names.push((
                    name,
                    NodeCapacity {
                        cpus: def.cpus,
                        cpu_speed_mhz: def.cpu_speed_mhz,
                        real_memory_mb: def.real_memory_mb,
                        virtual_memory_mb: def.virtual_memory_mb,
                        tmp_disk_mb: def.tmp_disk_mb,
                        os_version: def.os_version.clone(),
                        features: def.features.clone(),
                    },
                    def.partitions.clone(),
                ));
            }
        }
        for (name, cap, parts) in &expanded_names {
            let idx = nodes.create(name, cap.clone())?;
            nodes.with_mut(idx, |r| {
                r.state = NodeState::Idle;
                r.partitions = parts.clone();
            });
        }

        let partitions = PartitionRegistry::new();
        for def in &config.partitions {
            let mut members = crate::bitmap::NodeBitmap::new(nodes.capacity());
            for rec in nodes.iterate_in_order() {
                if rec.partitions.iter().any(|p| p == &def.name) {
                    members.set(rec.idx as usize);
                }
            }
            partitions.upsert(Partition {
                name: def.name.clone(),
                max_time: Duration::from_secs(def.max_time_secs),
                max_nodes: def.max_nodes,
                min_nodes: def.min_nodes,
                allow_groups: def.allow_groups.clone(),
                key_required: def.key_required,
                state_up: def.state_up,
                sharing: sharing_policy(&def.sharing),
                members,
            });
            if def.is_default {
                partitions.set_default(&def.name)?;
            }
        }

        let assoc_tree = AssociationTree::new(config.scheduler.fairshare_damping);
        let qos_set = QosSet::new();
        if let Some(name) = &config.default_qos {
            qos_set.create(name)?;
        }

        let state_dir = StateDir::new(config.state_save_dir.clone());
        let (config_tx, _config_rx) = watch::channel(config);

        Ok(Self {
            config: config_tx,
            nodes,
            partitions,
            assoc_tree,
            qos_set,
            jobs: JobStore::new(Duration::from_secs(0)),
            bus: UpdateBus::new(256),
            rollup: Rollup::new(false),
            state_dir,
        })
    }

    pub fn config(&self) -> AppConfig {
        self.config.borrow().clone()
    }

    /// Validate-then-swap reload (spec §6, `SPEC_FULL.md` §A): the new
    /// config is validated by `AppConfig::from_toml` before this is ever
    /// called, so this just publishes it — every subscriber observes the
    /// new value at its own next read, never a half-applied one.
    pub fn reconfigure(&self, new_config: AppConfig) {
        let _ = self.config.send(new_config);
    }

    /// Submit a job (spec §4.E), resolving partition/association/QoS
    /// through the registries this context owns.
    pub fn submit_job(&self, req: SubmitRequest, user_groups: &[String], key_supplied: bool) -> ClusterResult<u64> {
        let deps = SubmitDeps { partitions: &self.partitions, assoc_tree: &self.assoc_tree, qos_set: &self.qos_set };
        self.jobs.submit(req, deps, user_groups, key_supplied)
    }

    pub fn cancel_job(&self, job_id: u64) -> ClusterResult<bool> {
        self.jobs.cancel(job_id)
    }

    /// Mark every node in `nodes` with the state a just-started job leaves
    /// them in. Exclusive jobs own the node outright; shared jobs leave it
    /// `Mixed` for further packing.
    fn apply_allocation_state(&self, nodes: &crate::bitmap::NodeBitmap, shared: bool) {
        for idx in nodes.iter_ones() {
            self.nodes.with_mut(idx as u32, |r| {
                r.state = if shared { NodeState::Mixed } else { NodeState::Allocated };
            });
        }
    }

    /// Release nodes back to `Idle` on job close. A node already `Down`/
    /// `Draining`/`Drained` by operator action keeps that state — freeing
    /// an allocation never un-does an administrative state.
    fn release_allocation_state(&self, nodes: &crate::bitmap::NodeBitmap) {
        for idx in nodes.iter_ones() {
            self.nodes.with_mut(idx as u32, |r| {
                if matches!(r.state, NodeState::Allocated | NodeState::Mixed) {
                    r.state = NodeState::Idle;
                }
            });
        }
    }

    /// Run one `run_now` scheduling pass over a partition's pending jobs,
    /// highest effective priority first (spec §4.F). Starts every job that
    /// fits; leaves the rest pending with an updated `pending_reason`.
    pub fn schedule_partition(&self, partition_name: &str) -> ClusterResult<Vec<u64>> {
        let partition = self.partitions.get(partition_name)?;
        let age_cfg = crate::scheduler::priority::AgeFactorConfig {
            points_per_hour: self.config().scheduler.age_points_per_hour,
            max_age_factor: self.config().scheduler.max_age_factor,
        };
        let now = SystemTime::now();

        let mut candidates: Vec<(f64, Job)> = Vec::new();
        for job_id in self.jobs.pending_for_partition(partition_name) {
            let job = self.jobs.get(job_id)?;
            if let Some(prio) =
                crate::scheduler::priority::effective_priority(&job, &self.assoc_tree, &self.qos_set, now, &age_cfg)?
            {
                candidates.push((prio, job));
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.job_id.cmp(&b.1.job_id)));

        let mut started = Vec::new();
        for (_, job) in candidates {
            let idle_candidate = scheduler::run_now_candidate(&self.nodes, &partition.members);
            match scheduler::select_best(&job.request, partition_name, &idle_candidate, &self.nodes, job.resolved_shared) {
                Ok(chosen) => {
                    self.apply_allocation_state(&chosen, job.resolved_shared);
                    let RunStart { assoc_id, qos_id, footprint } = self.jobs.mark_running(job.job_id, chosen)?;
                    self.assoc_tree.charge_job_start(assoc_id, &footprint)?;
                    if let Some(q) = qos_id {
                        self.qos_set.charge_job_start(q, &footprint)?;
                    }
                    started.push(job.job_id);
                }
                Err(reason) => {
                    self.jobs.with_mut(job.job_id, |j| j.pending_reason = Some(reason))?;
                }
            }
        }
        Ok(started)
    }

    /// Run one conservative backfill pass over a partition.
    /// Promotion only flips priority to `P*+1`; it does not itself start
    /// the job — the next `schedule_partition` call does that, now that
    /// the promoted job sorts first.
    pub fn backfill_partition(&self, partition_name: &str) -> ClusterResult<Vec<u64>> {
        let partition = self.partitions.get(partition_name)?;
        if matches!(partition.sharing, SharingPolicy::Force | SharingPolicy::Exclusive) || !partition.state_up {
            return Ok(Vec::new());
        }

        let age_cfg = crate::scheduler::priority::AgeFactorConfig {
            points_per_hour: self.config().scheduler.age_points_per_hour,
            max_age_factor: self.config().scheduler.max_age_factor,
        };
        let now = SystemTime::now();

        let mut pending = Vec::new();
        for job_id in self.jobs.pending_for_partition(partition_name) {
            let job = self.jobs.get(job_id)?;
            let Some(prio) =
                crate::scheduler::priority::effective_priority(&job, &self.assoc_tree, &self.qos_set, now, &age_cfg)?
            else {
                continue;
            };
            let has_restrictions = job.request.contiguous
                || !job.request.req_node_names.is_empty()
                || job.request.feature_expr.is_some();
            pending.push(scheduler::backfill::BackfillCandidate {
                job_id,
                request: job.request.clone(),
                priority: prio,
                has_restrictions,
            });
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut running = Vec::new();
        for assoc_jobs in self.jobs.list_all() {
            if assoc_jobs.partition != partition_name || assoc_jobs.state != JobState::Running {
                continue;
            }
            let (Some(nodes), Some(start)) = (&assoc_jobs.allocated_nodes, assoc_jobs.start_time) else { continue };
            let elapsed_mins = now.duration_since(start).unwrap_or_default().as_secs() / 60;
            let end_mins = assoc_jobs.request.time_limit_mins.saturating_sub(elapsed_mins);
            running.push(scheduler::backfill::RunningJob { job_id: assoc_jobs.job_id, nodes: nodes.clone(), end_time_mins_from_now: end_mins });
        }

        let partition_min_procs = pending.iter().map(|p| p.request.min_procs).min().unwrap_or(1);
        let partition_min_memory = pending.iter().map(|p| p.request.min_memory_mb).min().unwrap_or(0);
        let partition_min_disk = pending.iter().map(|p| p.request.min_tmp_disk_mb).min().unwrap_or(0);

        let outcome = scheduler::backfill::run_pass(
            partition_name,
            &partition.members,
            &self.nodes,
            false,
            running,
            pending,
            partition_min_procs,
            partition_min_memory,
            partition_min_disk,
        );

        if let Some(p_star) = outcome.p_star_priority {
            let seated_prio = (p_star + 1.0) as i64;
            for &job_id in &outcome.promoted {
                self.jobs.with_mut(job_id, |j| j.base_prio = seated_prio)?;
            }
        }
        Ok(outcome.promoted)
    }

    /// Close a job out (spec §4.E/§5): releases its allocation, charges
    /// association/QoS counters, and records its consumption for Usage
    /// Roll-up.
    pub fn complete_job(&self, job_id: u64, terminal: JobState, exit_code: Option<i32>) -> ClusterResult<()> {
        let JobClose { assoc_id, qos_id, footprint, freed_nodes, was_running, .. } =
            self.jobs.close(job_id, terminal, exit_code)?;

        if was_running {
            self.assoc_tree.charge_job_end(assoc_id, &footprint)?;
            if let Some(q) = qos_id {
                self.qos_set.charge_job_end(q, &footprint)?;
            }
            if let Some(nodes) = &freed_nodes {
                self.release_allocation_state(nodes);
            }

            let cpu_seconds = footprint.num_procs as u64 * footprint.time_limit_mins * 60;
            let now = SystemTime::now();
            self.rollup.record(RawUsage {
                assoc_id,
                qos_id,
                period_start: chrono::DateTime::<chrono::Utc>::from(now) - chrono::Duration::minutes(footprint.time_limit_mins as i64),
                period_end: chrono::DateTime::<chrono::Utc>::from(now),
                cpu_seconds,
                wall_seconds: footprint.time_limit_mins * 60,
                mem_mb_seconds: 0,
            });
            self.bus.publish_assoc_usage(&[AssocUsageDelta { assoc_id, raw_delta: cpu_seconds as f64 }]);
        }
        self.jobs.mark_persisted(job_id)
    }

    /// Apply one broadcast `UpdateObject` to the association tree this
    /// context owns (spec §4.I).
    pub fn apply_committed_update(&self, obj: &crate::wire::UpdateObject) -> ClusterResult<()> {
        apply_update(&self.assoc_tree, obj)
    }

    fn footprint_of(job: &Job) -> JobFootprint {
        job.footprint()
    }

    /// Snapshot every registry to the save directory (spec §6: atomic
    /// write-temp/fsync/rename per file, one file per record kind).
    pub async fn save_snapshot(&self) -> ClusterResult<()> {
        let node_records: Vec<NodeRecordWire> = self
            .nodes
            .iterate_in_order()
            .into_iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| NodeRecordWire {
                name: r.name,
                state: r.state as u16,
                down_reason: r.down_reason,
                last_response_unix_secs: r
                    .last_response
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            })
            .collect();
        self.state_dir.save_nodes(&node_records).await?;

        let part_records: Vec<PartitionRecordWire> = self
            .partitions
            .list()
            .into_iter()
            .map(|p| PartitionRecordWire {
                name: p.name,
                max_time_secs: p.max_time.as_secs(),
                max_nodes: p.max_nodes,
                min_nodes: p.min_nodes,
                state_up: p.state_up,
                sharing: p.sharing as u16,
            })
            .collect();
        self.state_dir.save_partitions(&part_records).await?;

        let job_records: Vec<JobSummaryRecord> = self
            .jobs
            .list_all()
            .into_iter()
            .map(|j| JobSummaryRecord {
                job_id: j.job_id,
                assoc_id: j.assoc_id,
                qos_id: j.qos_id,
                partition: j.partition.clone(),
                uid: j.uid,
                gid: j.gid,
                name: j.name.clone(),
                state: j.state as u16,
                submit_time_unix_secs: j.submit_time.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
                start_time_unix_secs: j.start_time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok()).map(|d| d.as_secs()),
                num_procs: Self::footprint_of(&j).num_procs,
                num_nodes: Self::footprint_of(&j).num_nodes,
                allocated_node_names: j
                    .allocated_nodes
                    .as_ref()
                    .map(|bm| {
                        bm.iter_ones()
                            .filter_map(|idx| self.nodes.get(idx as u32))
                            .map(|r| r.name)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        self.state_dir.save_jobs(&job_records).await?;

        let assoc_records: Vec<AssocUsageRecord> = self
            .assoc_tree
            .list_all()
            .into_iter()
            .map(|a| AssocUsageRecord {
                assoc_id: a.assoc_id,
                usage_raw: a.usage.usage_raw,
                used_jobs: a.usage.used_jobs,
                used_submit_jobs: a.usage.used_submit_jobs,
                grp_used_cpus: a.usage.grp_used_cpus,
                grp_used_nodes: a.usage.grp_used_nodes,
                grp_used_cpu_mins: a.usage.grp_used_cpu_mins,
            })
            .collect();
        self.state_dir.save_assoc_usage(&assoc_records).await?;

        let qos_records: Vec<QosUsageRecord> = self
            .qos_set
            .list()
            .into_iter()
            .map(|q| QosUsageRecord { qos_id: q.qos_id, used_cpus: q.used_cpus, used_jobs: q.used_jobs, used_nodes: q.used_nodes })
            .collect();
        self.state_dir.save_qos_usage(&qos_records).await?;

        Ok(())
    }

    /// Startup recovery (spec §6 + `SPEC_FULL.md` §C): reload node/
    /// partition/job state, then reconcile any job left `Running`/
    /// `Suspended` whose allocated nodes no longer confirm it.
    pub async fn recover(&self) -> ClusterResult<Vec<u64>> {
        let node_records = self.state_dir.load_nodes().await?;
        for rec in &node_records {
            if let Some(idx) = self.nodes.lookup_by_name(&rec.name) {
                self.nodes.with_mut(idx, |r| {
                    r.down_reason = rec.down_reason.clone();
                });
            }
        }

        let job_records = self.state_dir.load_jobs().await?;

        for rec in self.state_dir.load_assoc_usage().await? {
            if self.assoc_tree.get(rec.assoc_id).is_ok() {
                self.assoc_tree.add_usage_raw(rec.assoc_id, rec.usage_raw)?;
            }
        }
        for rec in self.state_dir.load_qos_usage().await? {
            let _ = self.qos_set.with_mut(rec.qos_id, |q| {
                q.used_cpus = rec.used_cpus;
                q.used_jobs = rec.used_jobs;
                q.used_nodes = rec.used_nodes;
            });
        }

        Ok(reconcile_stale_running(&job_records, &self.nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerHosts, NodeDef, PartitionDef, SchedulerConfig, TimingConfig};
    use crate::job::{Distribution, JobRequest};
    use std::collections::HashMap;

    fn cfg(tmp: &std::path::Path) -> AppConfig {
        AppConfig {
            controller: ControllerHosts { primary: "ctl0".to_string(), backup: None, port: 6817 },
            scheduler: SchedulerConfig::default(),
            timing: TimingConfig::default(),
            nodes: vec![NodeDef {
                name_pattern: "lx[0-3]".to_string(),
                cpus: 4,
                cpu_speed_mhz: 2400,
                real_memory_mb: 16384,
                virtual_memory_mb: 16384,
                tmp_disk_mb: 10240,
                os_version: "5.4.0".to_string(),
                features: Vec::new(),
                partitions: vec!["batch".to_string()],
            }],
            partitions: vec![PartitionDef {
                name: "batch".to_string(),
                max_time_secs: 3600,
                max_nodes: 4,
                min_nodes: 1,
                allow_groups: None,
                key_required: false,
                state_up: true,
                sharing: "no".to_string(),
                is_default: true,
            }],
            state_save_dir: tmp.display().to_string(),
            default_qos: None,
            plugins: HashMap::new(),
            rollup_archive_data: false,
        }
    }

    fn job_req() -> JobRequest {
        JobRequest {
            num_procs: 4,
            num_nodes: 1,
            max_nodes: 1,
            feature_expr: None,
            req_node_names: Vec::new(),
            exc_node_names: Vec::new(),
            contiguous: false,
            shared: false,
            min_procs: 1,
            min_memory_mb: 1024,
            min_tmp_disk_mb: 0,
            min_os_version: None,
            time_limit_mins: 30,
            procs_per_task: 1,
            distribution: Distribution::Block,
        }
    }

    #[test]
    fn submit_and_run_now_transitions_job_and_node() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ClusterContext::new(cfg(tmp.path())).unwrap();
        let root = ctx.assoc_tree.create_root("cluster0", 1.0).unwrap();
        ctx.assoc_tree.add_child(root, "acctA", Some("alice"), None, 1.0).unwrap();

        let job_id = ctx
            .submit_job(
                SubmitRequest {
                    name: "sim".to_string(),
                    uid: 1000,
                    gid: 1000,
                    cluster: "cluster0".to_string(),
                    account: "acctA".to_string(),
                    user: Some("alice".to_string()),
                    partition: "batch".to_string(),
                    qos_name: None,
                    job_id: None,
                    request: job_req(),
                    no_requeue: false,
                    priority: None,
                },
                &[],
                false,
            )
            .unwrap();

        let started = ctx.schedule_partition("batch").unwrap();
        assert_eq!(started, vec![job_id]);
        let job = ctx.jobs.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Running);

        ctx.complete_job(job_id, JobState::Complete, Some(0)).unwrap();
        let job = ctx.jobs.get(job_id).unwrap();
        assert_eq!(job.state, JobState::Complete);
    }
}
