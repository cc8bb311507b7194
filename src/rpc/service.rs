//! Business logic for the controller's core RPC set, transport-agnostic:
//! a struct wrapping the shared cluster context, one async method per
//! operation, no framing concerns here.

use crate::bitmap::NodeBitmap;
use crate::config::AppConfig;
use crate::context::ClusterContext;
use crate::error::{ClusterError, ClusterResult};
use crate::job::{Job, JobRequest, JobState, SubmitRequest};
use crate::node::NodeRecord;
use crate::observability::{ClusterMetrics, ClusterTracer};
use crate::partition::Partition;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The process-launch agent capability spec §1 treats as an external
/// collaborator ("assumed to expose: start-step, signal-step, attach-I/O,
/// report-state") and spec §9 asks to be defined as an interface the core
/// consumes, not implements (the "polymorphism over storage/auth/
/// job-launch backends" design note).
pub trait AgentLink: Send + Sync {
    fn start_step(&self, job_id: u64, nodes: &NodeBitmap) -> ClusterResult<()>;
    fn signal_step(&self, job_id: u64, signal: u32) -> ClusterResult<()>;
    fn attach_io(&self, job_id: u64) -> ClusterResult<()>;
    fn report_state(&self, job_id: u64) -> ClusterResult<JobState>;
}

/// No-op agent link: logs what it was asked to do and succeeds. Good
/// enough for a controller under test or running with no real compute
/// fleet attached; a deployment wires a real transport to its agents in
/// place of this one.
pub struct NullAgentLink;

impl AgentLink for NullAgentLink {
    fn start_step(&self, job_id: u64, nodes: &NodeBitmap) -> ClusterResult<()> {
        tracing::debug!(job_id, nodes = nodes.popcount(), "agent link: start_step (no-op)");
        Ok(())
    }

    fn signal_step(&self, job_id: u64, signal: u32) -> ClusterResult<()> {
        tracing::debug!(job_id, signal, "agent link: signal_step (no-op)");
        Ok(())
    }

    fn attach_io(&self, job_id: u64) -> ClusterResult<()> {
        tracing::debug!(job_id, "agent link: attach_io (no-op)");
        Ok(())
    }

    fn report_state(&self, job_id: u64) -> ClusterResult<JobState> {
        tracing::debug!(job_id, "agent link: report_state (no-op)");
        Ok(JobState::Running)
    }
}

/// Result of `allocate_resources`: either the job started immediately and
/// these are the nodes it landed on, or it is pending with a reason.
#[derive(Debug, Clone)]
pub enum AllocateOutcome {
    Started { job_id: u64, node_names: Vec<String> },
    Pending { job_id: u64, reason: Option<String> },
}

/// One submission accepted by `submit_job` or `allocate_resources`.
pub struct SubmitArgs {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub cluster: String,
    pub account: String,
    pub user: Option<String>,
    pub partition: String,
    pub qos_name: Option<String>,
    pub request: JobRequest,
    pub no_requeue: bool,
    pub priority: Option<i64>,
    pub user_groups: Vec<String>,
    pub key_supplied: bool,
}

fn job_state_from_wire(v: u16) -> ClusterResult<JobState> {
    Ok(match v {
        0 => JobState::Pending,
        1 => JobState::StageIn,
        2 => JobState::Running,
        3 => JobState::Suspended,
        4 => JobState::StageOut,
        5 => JobState::Complete,
        6 => JobState::Failed,
        7 => JobState::Cancelled,
        8 => JobState::Timeout,
        9 => JobState::NodeFail,
        other => return Err(ClusterError::InvalidInput(format!("unknown job state tag {other}"))),
    })
}

/// The RPC service: transport-independent, callable directly by tests.
pub struct RpcService {
    ctx: Arc<ClusterContext>,
    agents: Arc<dyn AgentLink>,
    shutdown: broadcast::Sender<()>,
    metrics: Arc<ClusterMetrics>,
    tracer: ClusterTracer,
}

impl RpcService {
    pub fn new(ctx: Arc<ClusterContext>, agents: Arc<dyn AgentLink>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { ctx, agents, shutdown, metrics: Arc::new(ClusterMetrics::new()), tracer: ClusterTracer::default() }
    }

    pub fn ctx(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    pub fn metrics(&self) -> &Arc<ClusterMetrics> {
        &self.metrics
    }

    pub fn trace_rpc(&self, op_name: &str) -> tracing::Span {
        self.tracer.start_rpc_span(op_name)
    }

    /// Run one backfill pass over `partition`, tracing and counting the
    /// jobs it starts alongside the `run_now` pass already instrumented
    /// in `allocate_resources`.
    pub fn backfill_partition(&self, partition: &str) -> ClusterResult<Vec<u64>> {
        let _span = self.tracer.start_backfill_pass_span(partition).entered();
        let started = self.ctx.backfill_partition(partition)?;
        if !started.is_empty() {
            self.metrics.record_backfill_starts(started.len() as u64);
        }
        Ok(started)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    fn submit(&self, args: SubmitArgs) -> ClusterResult<u64> {
        self.ctx.submit_job(
            SubmitRequest {
                name: args.name,
                uid: args.uid,
                gid: args.gid,
                cluster: args.cluster,
                account: args.account,
                user: args.user,
                partition: args.partition,
                qos_name: args.qos_name,
                job_id: None,
                request: args.request,
                no_requeue: args.no_requeue,
                priority: args.priority,
            },
            &args.user_groups,
            args.key_supplied,
        )
    }

    pub async fn submit_job(&self, args: SubmitArgs) -> ClusterResult<u64> {
        let partition = args.partition.clone();
        let job_id = self.submit(args)?;
        let _span = self.tracer.start_submit_span(job_id, &partition).entered();
        self.metrics.record_job_submitted();
        Ok(job_id)
    }

    /// Submit, then immediately try one `run_now` pass over the target
    /// partition: an interactive `salloc`-style allocation request, not
    /// just an enqueue (spec §6 lists it distinct from `submit_job`).
    pub async fn allocate_resources(&self, args: SubmitArgs) -> ClusterResult<AllocateOutcome> {
        let partition = args.partition.clone();
        let job_id = self.submit(args)?;
        self.metrics.record_job_submitted();
        let _span = self.tracer.start_schedule_pass_span(&partition).entered();
        let started = self.ctx.schedule_partition(&partition)?;
        self.metrics.record_schedule_pass();
        self.metrics.record_jobs_started(started.len() as u64);
        if started.contains(&job_id) {
            let job = self.ctx.jobs.get(job_id)?;
            let node_names = job
                .allocated_nodes
                .as_ref()
                .map(|bm| bm.iter_ones().filter_map(|idx| self.ctx.nodes.get(idx as u32)).map(|r| r.name).collect())
                .unwrap_or_default();
            self.agents.start_step(job_id, job.allocated_nodes.as_ref().unwrap())?;
            Ok(AllocateOutcome::Started { job_id, node_names })
        } else {
            let job = self.ctx.jobs.get(job_id)?;
            Ok(AllocateOutcome::Pending { job_id, reason: job.pending_reason.map(|r| r.to_string()) })
        }
    }

    pub async fn cancel_job(&self, job_id: u64) -> ClusterResult<bool> {
        let cancelled_now = self.ctx.cancel_job(job_id)?;
        if cancelled_now {
            self.metrics.record_job_cancelled();
        }
        Ok(cancelled_now)
    }

    /// Dispatch a termination/user signal to the agents holding a running
    /// job's allocation. The agent transport itself is out of scope (spec
    /// §1); this only validates the job is actually running and forwards
    /// the request to whatever [`AgentLink`] this service was built with.
    pub async fn signal_job(&self, job_id: u64, signal: u32) -> ClusterResult<()> {
        let job = self.ctx.jobs.get(job_id)?;
        if job.state != JobState::Running {
            return Err(ClusterError::Conflict(format!("job {job_id} is not running, cannot signal")));
        }
        self.agents.signal_step(job_id, signal)
    }

    /// `running -> suspended` (spec §3's lateral transition).
    pub async fn suspend_job(&self, job_id: u64) -> ClusterResult<()> {
        self.ctx.jobs.with_mut(job_id, |job| {
            if job.state != JobState::Running {
                return Err(ClusterError::Conflict(format!("job {job_id} is not running, cannot suspend")));
            }
            job.state = JobState::Suspended;
            Ok(())
        })?
    }

    /// `suspended -> running` (spec §3's lateral transition).
    pub async fn resume_job(&self, job_id: u64) -> ClusterResult<()> {
        self.ctx.jobs.with_mut(job_id, |job| {
            if job.state != JobState::Suspended {
                return Err(ClusterError::Conflict(format!("job {job_id} is not suspended, cannot resume")));
            }
            job.state = JobState::Running;
            Ok(())
        })?
    }

    pub async fn complete_job(&self, job_id: u64, terminal: u16, exit_code: Option<i32>) -> ClusterResult<()> {
        let state = job_state_from_wire(terminal)?;
        let from = self.ctx.jobs.get(job_id).map(|j| format!("{:?}", j.state)).unwrap_or_default();
        let _span = self.tracer.start_job_state_transition_span(job_id, &from, &format!("{state:?}")).entered();
        self.ctx.complete_job(job_id, state, exit_code)?;
        self.metrics.record_job_completed(state == JobState::Complete);
        Ok(())
    }

    pub async fn get_jobs(&self, partition_filter: Option<&str>) -> ClusterResult<Vec<Job>> {
        let mut jobs = self.ctx.jobs.list_all();
        if let Some(name) = partition_filter {
            jobs.retain(|j| j.partition == name);
        }
        jobs.sort_by_key(|j| j.job_id);
        Ok(jobs)
    }

    pub async fn get_nodes(&self) -> ClusterResult<Vec<NodeRecord>> {
        Ok(self.ctx.nodes.iterate_in_order().into_iter().filter(|r| !r.name.is_empty()).collect())
    }

    pub async fn get_partitions(&self) -> ClusterResult<Vec<Partition>> {
        Ok(self.ctx.partitions.list())
    }

    /// Operator-driven node state change (spec §4.A / `SPEC_FULL.md` §C's
    /// `down_reason`). This is the one path allowed to move a `Drained`
    /// node to `Down` — see DESIGN.md open question #2.
    pub async fn update_node(&self, name: &str, new_state: crate::node::NodeState, down_reason: Option<String>) -> ClusterResult<()> {
        let idx = self
            .ctx
            .nodes
            .lookup_by_name(name)
            .ok_or_else(|| ClusterError::NotFound { kind: "node", id: name.to_string() })?;
        self.ctx
            .nodes
            .with_mut(idx, |r| {
                r.state = new_state;
                r.down_reason = down_reason;
            })
            .ok_or_else(|| ClusterError::NotFound { kind: "node", id: name.to_string() })
    }

    pub async fn update_partition(&self, name: &str, state_up: bool, max_nodes: u32, min_nodes: u32) -> ClusterResult<()> {
        let mut partition = self.ctx.partitions.get(name)?;
        partition.state_up = state_up;
        partition.max_nodes = max_nodes;
        partition.min_nodes = min_nodes;
        self.ctx.partitions.upsert(partition);
        Ok(())
    }

    /// Operator re-priority / hold-release (`base_prio = 0` is the hold
    /// sentinel per spec §4.F).
    pub async fn update_job(&self, job_id: u64, new_base_prio: i64) -> ClusterResult<()> {
        self.ctx.jobs.with_mut(job_id, |job| job.base_prio = new_base_prio)
    }

    /// Reload config from TOML text: validate, then swap (spec §6).
    pub async fn reconfigure(&self, config_toml: &str) -> ClusterResult<()> {
        let new_config = AppConfig::from_toml(config_toml).map_err(|e| ClusterError::InvalidInput(e.to_string()))?;
        self.ctx.reconfigure(new_config);
        Ok(())
    }

    /// Liveness check (`SPEC_FULL.md` §C: given a real handler, not just
    /// listed as a surface name).
    pub async fn ping(&self) -> ClusterResult<bool> {
        Ok(true)
    }

    /// Graceful drain: broadcasts the shutdown signal every worker loop in
    /// `main.rs` observes on its `select!` (spec §9's "shutdown is a
    /// broadcast close").
    pub async fn shutdown(&self) -> ClusterResult<()> {
        let _ = self.shutdown.send(());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerHosts, NodeDef, PartitionDef, SchedulerConfig, TimingConfig};
    use crate::job::Distribution;
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

    fn service(tmp: &std::path::Path) -> RpcService {
        let ctx = Arc::new(ClusterContext::new(cfg(tmp)).unwrap());
        let root = ctx.assoc_tree.create_root("cluster0", 1.0).unwrap();
        ctx.assoc_tree.add_child(root, "acctA", Some("alice"), None, 1.0).unwrap();
        RpcService::new(ctx, Arc::new(NullAgentLink))
    }

    fn submit_args() -> SubmitArgs {
        SubmitArgs {
            name: "sim".to_string(),
            uid: 1000,
            gid: 1000,
            cluster: "cluster0".to_string(),
            account: "acctA".to_string(),
            user: Some("alice".to_string()),
            partition: "batch".to_string(),
            qos_name: None,
            request: job_req(),
            no_requeue: false,
            priority: None,
            user_groups: Vec::new(),
            key_supplied: false,
        }
    }

    #[tokio::test]
    async fn allocate_resources_starts_job_immediately_when_nodes_are_free() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        let outcome = svc.allocate_resources(submit_args()).await.unwrap();
        match outcome {
            AllocateOutcome::Started { node_names, .. } => assert_eq!(node_names.len(), 1),
            AllocateOutcome::Pending { .. } => panic!("expected immediate start on an idle cluster"),
        }
    }

    #[tokio::test]
    async fn suspend_then_resume_round_trips_job_state() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        let job_id = svc.submit_job(submit_args()).await.unwrap();
        svc.ctx.schedule_partition("batch").unwrap();

        svc.suspend_job(job_id).await.unwrap();
        assert_eq!(svc.ctx.jobs.get(job_id).unwrap().state, JobState::Suspended);

        svc.resume_job(job_id).await.unwrap();
        assert_eq!(svc.ctx.jobs.get(job_id).unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn suspend_a_pending_job_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        let job_id = svc.submit_job(submit_args()).await.unwrap();
        assert!(svc.suspend_job(job_id).await.is_err());
    }

    #[tokio::test]
    async fn update_node_can_move_drained_to_down_as_operator_action() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        svc.update_node("lx0", crate::node::NodeState::Drained, Some("maintenance".to_string())).await.unwrap();
        svc.update_node("lx0", crate::node::NodeState::Down, Some("decommissioned".to_string())).await.unwrap();
        let idx = svc.ctx.nodes.lookup_by_name("lx0").unwrap();
        let rec = svc.ctx.nodes.get(idx).unwrap();
        assert_eq!(rec.state, crate::node::NodeState::Down);
        assert_eq!(rec.down_reason.as_deref(), Some("decommissioned"));
    }

    #[tokio::test]
    async fn get_nodes_and_partitions_reflect_materialized_config() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        assert_eq!(svc.get_nodes().await.unwrap().len(), 4);
        assert_eq!(svc.get_partitions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ping_succeeds_and_shutdown_notifies_subscribers() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        assert!(svc.ping().await.unwrap());

        let mut rx = svc.subscribe_shutdown();
        svc.shutdown().await.unwrap();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn signal_job_rejects_a_job_that_is_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path());
        let job_id = svc.submit_job(submit_args()).await.unwrap();
        assert!(svc.signal_job(job_id, 15).await.is_err());
    }
}
