//! Job Store (spec §4.E): pending/running/completed job records, their
//! secondary indexes, and the submit/requeue operations that create them.
//!
//! Usage counters on associations and QoS records are charged by whoever
//! drives a state transition (`submit` charges `used_submit_jobs`, the
//! scheduler charges `used_jobs`/`grp_used_cpus` on a run transition), never
//! by the Job Store itself — it owns records and indexes, not policy (spec
//! §5: "usage counters... updated only by the accounting worker"). The
//! store's job-facing methods return enough about the transition
//! (association, QoS, footprint) for the caller to do that charging.

use crate::assoc::{AssociationTree, JobFootprint};
use crate::bitmap::NodeBitmap;
use crate::error::{ClusterError, ClusterResult, PendingReason};
use crate::partition::PartitionRegistry;
use crate::qos::QosSet;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

const JOB_MAGIC: u32 = 0x4a4f_4221;
const DEFAULT_BASE_PRIO: i64 = 1000;

/// Job lifecycle states (spec §3). `pending → cancelled` is the only
/// transition legal before resource assignment; every other path to a
/// terminal state goes through `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    StageIn,
    Running,
    Suspended,
    StageOut,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    NodeFail,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Complete
                | JobState::Failed
                | JobState::Cancelled
                | JobState::Timeout
                | JobState::NodeFail
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Block,
    Cyclic,
    Arbitrary,
    Plane(u32),
}

/// A job's resource request (spec §3).
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub num_procs: u32,
    /// Minimum node count.
    pub num_nodes: u32,
    pub max_nodes: u32,
    pub feature_expr: Option<String>,
    pub req_node_names: Vec<String>,
    pub exc_node_names: Vec<String>,
    pub contiguous: bool,
    pub shared: bool,
    pub min_procs: u32,
    pub min_memory_mb: u64,
    pub min_tmp_disk_mb: u64,
    /// Dotted-decimal minimum OS version, compared component-wise
    /// (spec §4.F step 1). `None` imposes no constraint.
    pub min_os_version: Option<String>,
    pub time_limit_mins: u64,
    pub procs_per_task: u32,
    pub distribution: Distribution,
}

/// A parallel sub-execution launched inside a job's allocation.
#[derive(Debug, Clone)]
pub struct Step {
    pub step_id: u32,
    pub name: String,
    pub num_tasks: u32,
    pub state: JobState,
}

/// One append-only per-period usage sample (spec §3).
#[derive(Debug, Clone)]
pub struct UsageSample {
    pub period_start: SystemTime,
    pub period_end: SystemTime,
    pub cpu_seconds: u64,
    pub wall_seconds: u64,
    pub mem_mb_seconds: u64,
}

/// A single job record.
#[derive(Debug, Clone)]
pub struct Job {
    magic: u32,
    pub job_id: u64,
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub partition: String,
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub request: JobRequest,
    pub state: JobState,
    pub submit_time: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub base_prio: i64,
    pub allocated_nodes: Option<NodeBitmap>,
    pub resolved_shared: bool,
    pub no_requeue: bool,
    pub requeued_from: Option<u64>,
    pub cancel_requested: bool,
    pub exit_code: Option<i32>,
    pub pending_reason: Option<PendingReason>,
    pub persisted: bool,
    pub steps: Vec<Step>,
    pub accounting: Vec<UsageSample>,
}

impl Job {
    fn check_magic(&self) -> ClusterResult<()> {
        if self.magic != JOB_MAGIC {
            return Err(ClusterError::FatalInvariant(format!(
                "job {} failed magic check — use-after-free or corrupted record",
                self.job_id
            )));
        }
        Ok(())
    }

    pub fn footprint(&self) -> JobFootprint {
        JobFootprint {
            num_procs: self.request.num_procs,
            num_nodes: self.request.num_nodes,
            time_limit_mins: self.request.time_limit_mins,
        }
    }

    /// A held job has `base_prio = 0` and is skipped by every admission
    /// path (spec §4.F).
    pub fn is_held(&self) -> bool {
        self.base_prio == 0
    }
}

/// What submit/requeue needs from the rest of the controller to resolve a
/// request (spec §4.E's submit algorithm touches Partition, Association,
/// and QoS).
pub struct SubmitDeps<'a> {
    pub partitions: &'a PartitionRegistry,
    pub assoc_tree: &'a AssociationTree,
    pub qos_set: &'a QosSet,
}

/// Inbound submission (spec §4.E).
pub struct SubmitRequest {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub cluster: String,
    pub account: String,
    pub user: Option<String>,
    pub partition: String,
    pub qos_name: Option<String>,
    /// Caller-specified job_id, if privileged; `None` to auto-assign.
    pub job_id: Option<u64>,
    pub request: JobRequest,
    pub no_requeue: bool,
    /// Privileged-supplied priority; `None` gets the default.
    pub priority: Option<i64>,
}

/// What a transition into `running` hands back for the caller to charge.
pub struct RunStart {
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub footprint: JobFootprint,
}

/// What a transition out of `running` (to any terminal state) hands back.
pub struct JobClose {
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub footprint: JobFootprint,
    pub partition: String,
    pub freed_nodes: Option<NodeBitmap>,
    pub was_running: bool,
}

struct Inner {
    jobs: HashMap<u64, Job>,
    next_job_id: u64,
    pending_by_partition: HashMap<String, Vec<u64>>,
    running_by_assoc: HashMap<u32, Vec<u64>>,
    /// Terminal jobs not yet reaped, oldest `end_time` first.
    completion_queue: VecDeque<u64>,
}

/// The Job Store.
pub struct JobStore {
    inner: RwLock<Inner>,
    min_retention: Duration,
}

impl JobStore {
    pub fn new(min_retention: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                jobs: HashMap::new(),
                next_job_id: 1,
                pending_by_partition: HashMap::new(),
                running_by_assoc: HashMap::new(),
                completion_queue: VecDeque::new(),
            }),
            min_retention,
        }
    }

    fn resolve_admission(
        req: &SubmitRequest,
        deps: &SubmitDeps,
        user_groups: &[String],
        key_supplied: bool,
    ) -> ClusterResult<(bool, u32, Option<u32>)> {
        let shared = deps.partitions.admit(
            &req.partition,
            user_groups,
            key_supplied,
            req.request.shared,
            req.request.num_nodes,
        )?;

        let assoc_id = deps
            .assoc_tree
            .find_by_tuple(&req.cluster, &req.account, req.user.as_deref(), Some(&req.partition))
            .or_else(|| {
                deps.assoc_tree
                    .find_by_tuple(&req.cluster, &req.account, req.user.as_deref(), None)
            })
            .ok_or_else(|| {
                ClusterError::PermissionDenied(format!(
                    "no association for account {} on cluster {}",
                    req.account, req.cluster
                ))
            })?;

        let qos_id = match &req.qos_name {
            Some(name) => Some(
                deps.qos_set
                    .lookup_by_name(name)
                    .ok_or_else(|| ClusterError::NotFound { kind: "qos", id: name.clone() })?,
            ),
            None => None,
        };

        let footprint = JobFootprint {
            num_procs: req.request.num_procs,
            num_nodes: req.request.num_nodes,
            time_limit_mins: req.request.time_limit_mins,
        };
        deps.assoc_tree
            .check_admission(assoc_id, &footprint)
            .map_err(|reason| ClusterError::ResourceExhausted { reason })?;
        if let Some(q) = qos_id {
            deps.qos_set
                .check_admission(q, &footprint)
                .map_err(|reason| ClusterError::ResourceExhausted { reason })?;
        }

        Ok((shared, assoc_id, qos_id))
    }

    /// Submit a new job (spec §4.E). Validates the request, resolves
    /// partition/association/QoS, runs admission checks, and enqueues a
    /// pending record. Returns the assigned `job_id`.
    pub fn submit(
        &self,
        req: SubmitRequest,
        deps: SubmitDeps,
        user_groups: &[String],
        key_supplied: bool,
    ) -> ClusterResult<u64> {
        if req.name.is_empty() || req.name.len() > 512 {
            return Err(ClusterError::InvalidInput(format!(
                "job name length out of range: {}",
                req.name.len()
            )));
        }
        if req.request.num_procs == 0 || req.request.num_nodes == 0 {
            return Err(ClusterError::InvalidInput(
                "num_procs and num_nodes must be nonzero".to_string(),
            ));
        }
        if let Some(id) = req.job_id {
            if self.inner.read().jobs.contains_key(&id) {
                return Err(ClusterError::Conflict(format!("job {id} already exists")));
            }
        }

        let (shared, assoc_id, qos_id) = Self::resolve_admission(&req, &deps, user_groups, key_supplied)?;

        let mut inner = self.inner.write();
        let job_id = match req.job_id {
            Some(id) => id,
            None => {
                let id = inner.next_job_id;
                inner.next_job_id += 1;
                id
            }
        };
        if job_id >= inner.next_job_id {
            inner.next_job_id = job_id + 1;
        }

        let partition = req.partition.clone();
        let job = Job {
            magic: JOB_MAGIC,
            job_id,
            assoc_id,
            qos_id,
            partition: partition.clone(),
            uid: req.uid,
            gid: req.gid,
            name: req.name,
            request: req.request,
            state: JobState::Pending,
            submit_time: SystemTime::now(),
            start_time: None,
            end_time: None,
            base_prio: req.priority.unwrap_or(DEFAULT_BASE_PRIO),
            allocated_nodes: None,
            resolved_shared: shared,
            no_requeue: req.no_requeue,
            requeued_from: None,
            cancel_requested: false,
            exit_code: None,
            pending_reason: None,
            persisted: false,
            steps: Vec::new(),
            accounting: Vec::new(),
        };
        inner.jobs.insert(job_id, job);
        inner.pending_by_partition.entry(partition).or_default().push(job_id);
        drop(inner);

        deps.assoc_tree.charge_job_submit(assoc_id)?;
        Ok(job_id)
    }

    /// Re-enter a `node_fail`/`timeout` job as a fresh pending record
    /// (Section C: requeue). Fails if the original job is not in one of
    /// those states, is flagged `no_requeue`, or has no submit headroom.
    pub fn requeue(&self, original_job_id: u64, deps: SubmitDeps) -> ClusterResult<u64> {
        let original = self.get(original_job_id)?;
        if original.no_requeue {
            return Err(ClusterError::InvalidInput(format!(
                "job {original_job_id} is marked no_requeue"
            )));
        }
        if !matches!(original.state, JobState::NodeFail | JobState::Timeout) {
            return Err(ClusterError::InvalidInput(format!(
                "job {original_job_id} in state {:?} is not requeue-eligible",
                original.state
            )));
        }

        let footprint = original.footprint();
        deps.assoc_tree
            .check_admission(original.assoc_id, &footprint)
            .map_err(|reason| ClusterError::ResourceExhausted { reason })?;

        let mut inner = self.inner.write();
        let new_id = inner.next_job_id;
        inner.next_job_id += 1;
        let partition = original.partition.clone();
        let job = Job {
            magic: JOB_MAGIC,
            job_id: new_id,
            assoc_id: original.assoc_id,
            qos_id: original.qos_id,
            partition: partition.clone(),
            uid: original.uid,
            gid: original.gid,
            name: original.name.clone(),
            request: original.request.clone(),
            state: JobState::Pending,
            submit_time: SystemTime::now(),
            start_time: None,
            end_time: None,
            base_prio: original.base_prio,
            allocated_nodes: None,
            resolved_shared: original.resolved_shared,
            no_requeue: original.no_requeue,
            requeued_from: Some(original_job_id),
            cancel_requested: false,
            exit_code: None,
            pending_reason: None,
            persisted: false,
            steps: Vec::new(),
            accounting: Vec::new(),
        };
        inner.jobs.insert(new_id, job);
        inner.pending_by_partition.entry(partition).or_default().push(new_id);
        drop(inner);

        deps.assoc_tree.charge_job_submit(original.assoc_id)?;
        Ok(new_id)
    }

    pub fn get(&self, job_id: u64) -> ClusterResult<Job> {
        let inner = self.inner.read();
        let job = inner
            .jobs
            .get(&job_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "job", id: job_id.to_string() })?;
        job.check_magic()?;
        Ok(job.clone())
    }

    pub fn with_mut<R>(&self, job_id: u64, f: impl FnOnce(&mut Job) -> R) -> ClusterResult<R> {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "job", id: job_id.to_string() })?;
        job.check_magic()?;
        Ok(f(job))
    }

    /// Transition a pending job directly to `cancelled`, or — if it is
    /// already running — flag `cancel_requested` so the agent-RPC layer can
    /// dispatch a termination signal (spec §5's cancellation rule: a
    /// running job stays `running` until agents acknowledge or a deadline
    /// elapses).
    pub fn cancel(&self, job_id: u64) -> ClusterResult<bool> {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "job", id: job_id.to_string() })?;
        job.check_magic()?;

        match job.state {
            JobState::Pending => {
                job.state = JobState::Cancelled;
                job.end_time = Some(SystemTime::now());
                let partition = job.partition.clone();
                if let Some(list) = inner.pending_by_partition.get_mut(&partition) {
                    list.retain(|&id| id != job_id);
                }
                inner.completion_queue.push_back(job_id);
                Ok(true)
            }
            JobState::Running | JobState::Suspended | JobState::StageIn | JobState::StageOut => {
                job.cancel_requested = true;
                Ok(false)
            }
            terminal => Err(ClusterError::Conflict(format!(
                "job {job_id} already terminal ({terminal:?})"
            ))),
        }
    }

    /// Transition a pending job to `running`, installing its allocation.
    pub fn mark_running(&self, job_id: u64, nodes: NodeBitmap) -> ClusterResult<RunStart> {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "job", id: job_id.to_string() })?;
        job.check_magic()?;
        if job.state != JobState::Pending {
            return Err(ClusterError::Conflict(format!(
                "job {job_id} in state {:?} cannot start running",
                job.state
            )));
        }
        job.state = JobState::Running;
        job.start_time = Some(SystemTime::now());
        job.allocated_nodes = Some(nodes);
        let partition = job.partition.clone();
        let assoc_id = job.assoc_id;
        let qos_id = job.qos_id;
        let footprint = job.footprint();
        if let Some(list) = inner.pending_by_partition.get_mut(&partition) {
            list.retain(|&id| id != job_id);
        }
        inner.running_by_assoc.entry(assoc_id).or_default().push(job_id);
        Ok(RunStart { assoc_id, qos_id, footprint })
    }

    /// Transition into any terminal state, freeing the allocation if one
    /// existed. Used for `complete`, `failed`, `timeout`, `node_fail`, and
    /// the acknowledged completion of a previously `cancel_requested` job.
    pub fn close(&self, job_id: u64, terminal: JobState, exit_code: Option<i32>) -> ClusterResult<JobClose> {
        if !terminal.is_terminal() {
            return Err(ClusterError::FatalInvariant(format!(
                "close() called with non-terminal state {terminal:?}"
            )));
        }
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ClusterError::NotFound { kind: "job", id: job_id.to_string() })?;
        job.check_magic()?;
        if job.state.is_terminal() {
            return Err(ClusterError::Conflict(format!("job {job_id} already terminal")));
        }

        let was_running = matches!(
            job.state,
            JobState::Running | JobState::Suspended | JobState::StageIn | JobState::StageOut
        );
        let freed_nodes = job.allocated_nodes.take();
        let assoc_id = job.assoc_id;
        let qos_id = job.qos_id;
        let footprint = job.footprint();
        let partition = job.partition.clone();

        job.state = terminal;
        job.end_time = Some(SystemTime::now());
        job.exit_code = exit_code;

        if !was_running {
            if let Some(list) = inner.pending_by_partition.get_mut(&partition) {
                list.retain(|&id| id != job_id);
            }
        } else if let Some(list) = inner.running_by_assoc.get_mut(&assoc_id) {
            list.retain(|&id| id != job_id);
        }
        inner.completion_queue.push_back(job_id);

        Ok(JobClose { assoc_id, qos_id, footprint, partition, freed_nodes, was_running })
    }

    pub fn mark_persisted(&self, job_id: u64) -> ClusterResult<()> {
        self.with_mut(job_id, |job| job.persisted = true)
    }

    pub fn pending_for_partition(&self, partition: &str) -> Vec<u64> {
        self.inner
            .read()
            .pending_by_partition
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    pub fn running_for_assoc(&self, assoc_id: u32) -> Vec<u64> {
        self.inner.read().running_by_assoc.get(&assoc_id).cloned().unwrap_or_default()
    }

    pub fn list_all(&self) -> Vec<Job> {
        self.inner.read().jobs.values().cloned().collect()
    }

    /// Jobs eligible for reaping right now: terminal, persisted, and past
    /// `min_retention` since `end_time` (spec §4.E: "deletion is deferred").
    /// Removes them from the store and returns their ids.
    pub fn reap_eligible(&self, now: SystemTime) -> Vec<u64> {
        let mut inner = self.inner.write();
        let mut reaped = Vec::new();
        while let Some(&job_id) = inner.completion_queue.front() {
            let ready = match inner.jobs.get(&job_id) {
                Some(job) => {
                    job.persisted
                        && job
                            .end_time
                            .and_then(|end| now.duration_since(end).ok())
                            .map(|elapsed| elapsed >= self.min_retention)
                            .unwrap_or(false)
                }
                None => true,
            };
            if !ready {
                break;
            }
            inner.completion_queue.pop_front();
            inner.jobs.remove(&job_id);
            reaped.push(job_id);
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> JobRequest {
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
            time_limit_mins: 60,
            procs_per_task: 1,
            distribution: Distribution::Block,
        }
    }

    fn wired() -> (PartitionRegistry, AssociationTree, QosSet, u32) {
        let partitions = PartitionRegistry::new();
        partitions.upsert(crate::partition::Partition {
            name: "batch".to_string(),
            max_time: Duration::from_secs(3600),
            max_nodes: 16,
            min_nodes: 1,
            allow_groups: None,
            key_required: false,
            state_up: true,
            sharing: crate::partition::SharingPolicy::No,
            members: NodeBitmap::new(16),
        });
        let tree = AssociationTree::new(0.5);
        let root = tree.create_root("cluster1", 1.0).unwrap();
        let acct = tree.add_child(root, "acctA", Some("alice"), None, 1.0).unwrap();
        let qos = QosSet::new();
        (partitions, tree, qos, acct)
    }

    #[test]
    fn submit_then_get_roundtrips() {
        let (partitions, tree, qos, _acct) = wired();
        let store = JobStore::new(Duration::from_secs(60));
        let sub = SubmitRequest {
            name: "test".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster1".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            job_id: None,
            request: req(),
            no_requeue: false,
            priority: None,
        };
        let deps = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        let id = store.submit(sub, deps, &[], false).unwrap();
        let job = store.get(id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(store.pending_for_partition("batch"), vec![id]);
    }

    #[test]
    fn cancel_pending_is_immediate() {
        let (partitions, tree, qos, _acct) = wired();
        let store = JobStore::new(Duration::from_secs(60));
        let sub = SubmitRequest {
            name: "test".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster1".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            job_id: None,
            request: req(),
            no_requeue: false,
            priority: None,
        };
        let deps = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        let id = store.submit(sub, deps, &[], false).unwrap();
        assert!(store.cancel(id).unwrap());
        assert_eq!(store.get(id).unwrap().state, JobState::Cancelled);
        assert!(store.pending_for_partition("batch").is_empty());
    }

    #[test]
    fn running_cancel_only_requests() {
        let (partitions, tree, qos, _acct) = wired();
        let store = JobStore::new(Duration::from_secs(60));
        let sub = SubmitRequest {
            name: "test".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster1".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            job_id: None,
            request: req(),
            no_requeue: false,
            priority: None,
        };
        let deps = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        let id = store.submit(sub, deps, &[], false).unwrap();
        store.mark_running(id, NodeBitmap::new(16)).unwrap();
        assert!(!store.cancel(id).unwrap());
        assert!(store.get(id).unwrap().cancel_requested);
        assert_eq!(store.get(id).unwrap().state, JobState::Running);
    }

    #[test]
    fn requeue_rejects_no_requeue_flag() {
        let (partitions, tree, qos, _acct) = wired();
        let store = JobStore::new(Duration::from_secs(60));
        let mut r = req();
        r.num_procs = 4;
        let sub = SubmitRequest {
            name: "test".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster1".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            job_id: None,
            request: r,
            no_requeue: true,
            priority: None,
        };
        let deps = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        let id = store.submit(sub, deps, &[], false).unwrap();
        store.mark_running(id, NodeBitmap::new(16)).unwrap();
        store.close(id, JobState::NodeFail, None).unwrap();
        let deps2 = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        assert!(store.requeue(id, deps2).is_err());
    }

    #[test]
    fn reap_waits_for_persistence_and_retention() {
        let (partitions, tree, qos, _acct) = wired();
        let store = JobStore::new(Duration::from_secs(3600));
        let sub = SubmitRequest {
            name: "test".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster1".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            job_id: None,
            request: req(),
            no_requeue: false,
            priority: None,
        };
        let deps = SubmitDeps { partitions: &partitions, assoc_tree: &tree, qos_set: &qos };
        let id = store.submit(sub, deps, &[], false).unwrap();
        store.cancel(id).unwrap();
        assert!(store.reap_eligible(SystemTime::now()).is_empty());
        store.mark_persisted(id).unwrap();
        assert!(store.reap_eligible(SystemTime::now()).is_empty());
        let far_future = SystemTime::now() + Duration::from_secs(7200);
        assert_eq!(store.reap_eligible(far_future), vec![id]);
    }
}
