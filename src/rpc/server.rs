//! The one transport this crate ships: a length-prefixed TCP frame loop
//! reusing `wire::codec`'s `Writer`/`Reader` rather than inventing a
//! second framing format, the same codec shared by client RPC and
//! daemon/accounting-store RPC. A thin transport wraps the service layer
//! it dispatches into.
//!
//! Frame shape, request and response alike: `[len:u32][u16][body]` where
//! the leading `u16` is the opcode on a request and an [`ErrorCode`] (0 =
//! success) on a response.

use crate::error::{ClusterError, ClusterResult, ErrorCode};
use crate::job::{Distribution, Job, JobRequest};
use crate::node::{NodeRecord, NodeState};
use crate::partition::Partition;
use crate::wire::{JobSummaryRecord, NodeRecordWire, PartitionRecordWire, Reader, WireRecord, Writer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use super::service::{AllocateOutcome, RpcService, SubmitArgs};

/// The 16 operations of spec §6's "core set", in RPC-opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RpcOp {
    SubmitJob = 0,
    AllocateResources = 1,
    CancelJob = 2,
    SignalJob = 3,
    SuspendJob = 4,
    ResumeJob = 5,
    CompleteJob = 6,
    GetJobs = 7,
    GetNodes = 8,
    GetPartitions = 9,
    UpdateNode = 10,
    UpdatePartition = 11,
    UpdateJob = 12,
    Reconfigure = 13,
    Ping = 14,
    Shutdown = 15,
}

impl RpcOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::SubmitJob => "submit_job",
            Self::AllocateResources => "allocate_resources",
            Self::CancelJob => "cancel_job",
            Self::SignalJob => "signal_job",
            Self::SuspendJob => "suspend_job",
            Self::ResumeJob => "resume_job",
            Self::CompleteJob => "complete_job",
            Self::GetJobs => "get_jobs",
            Self::GetNodes => "get_nodes",
            Self::GetPartitions => "get_partitions",
            Self::UpdateNode => "update_node",
            Self::UpdatePartition => "update_partition",
            Self::UpdateJob => "update_job",
            Self::Reconfigure => "reconfigure",
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
        }
    }
}

impl TryFrom<u16> for RpcOp {
    type Error = ClusterError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::SubmitJob,
            1 => Self::AllocateResources,
            2 => Self::CancelJob,
            3 => Self::SignalJob,
            4 => Self::SuspendJob,
            5 => Self::ResumeJob,
            6 => Self::CompleteJob,
            7 => Self::GetJobs,
            8 => Self::GetNodes,
            9 => Self::GetPartitions,
            10 => Self::UpdateNode,
            11 => Self::UpdatePartition,
            12 => Self::UpdateJob,
            13 => Self::Reconfigure,
            14 => Self::Ping,
            15 => Self::Shutdown,
            other => return Err(ClusterError::InvalidInput(format!("unknown RPC opcode {other}"))),
        })
    }
}

fn put_opt_i32(w: &mut Writer, v: Option<i32>) {
    match v {
        None => w.put_bool(false),
        Some(n) => {
            w.put_bool(true);
            w.put_i64(n as i64);
        }
    }
}

fn get_opt_i32(r: &mut Reader) -> ClusterResult<Option<i32>> {
    if r.get_bool()? {
        Ok(Some(r.get_i64()? as i32))
    } else {
        Ok(None)
    }
}

fn put_distribution(w: &mut Writer, d: Distribution) {
    match d {
        Distribution::Block => w.put_u16(0),
        Distribution::Cyclic => w.put_u16(1),
        Distribution::Arbitrary => w.put_u16(2),
        Distribution::Plane(k) => {
            w.put_u16(3);
            w.put_u32(k);
        }
    }
}

fn get_distribution(r: &mut Reader) -> ClusterResult<Distribution> {
    Ok(match r.get_u16()? {
        0 => Distribution::Block,
        1 => Distribution::Cyclic,
        2 => Distribution::Arbitrary,
        3 => Distribution::Plane(r.get_u32()?),
        other => return Err(ClusterError::InvalidInput(format!("unknown distribution tag {other}"))),
    })
}

fn encode_submit_args(w: &mut Writer, args: &SubmitArgs) {
    w.put_str(Some(&args.name));
    w.put_u32(args.uid);
    w.put_u32(args.gid);
    w.put_str(Some(&args.cluster));
    w.put_str(Some(&args.account));
    w.put_str(args.user.as_deref());
    w.put_str(Some(&args.partition));
    w.put_str(args.qos_name.as_deref());
    w.put_bool(args.no_requeue);
    match args.priority {
        None => w.put_bool(false),
        Some(p) => {
            w.put_bool(true);
            w.put_i64(p);
        }
    }
    let req = &args.request;
    w.put_u32(req.num_procs);
    w.put_u32(req.num_nodes);
    w.put_u32(req.max_nodes);
    w.put_str(req.feature_expr.as_deref());
    w.put_list(&req.req_node_names, |w, s| w.put_str(Some(s)));
    w.put_list(&req.exc_node_names, |w, s| w.put_str(Some(s)));
    w.put_bool(req.contiguous);
    w.put_bool(req.shared);
    w.put_u32(req.min_procs);
    w.put_u64(req.min_memory_mb);
    w.put_u64(req.min_tmp_disk_mb);
    w.put_str(req.min_os_version.as_deref());
    w.put_u64(req.time_limit_mins);
    w.put_u32(req.procs_per_task);
    put_distribution(w, req.distribution);
    w.put_list(&args.user_groups, |w, s| w.put_str(Some(s)));
    w.put_bool(args.key_supplied);
}

fn decode_submit_args(r: &mut Reader) -> ClusterResult<SubmitArgs> {
    let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing job name".to_string()))?;
    let uid = r.get_u32()?;
    let gid = r.get_u32()?;
    let cluster = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing cluster".to_string()))?;
    let account = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing account".to_string()))?;
    let user = r.get_str()?;
    let partition = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing partition".to_string()))?;
    let qos_name = r.get_str()?;
    let no_requeue = r.get_bool()?;
    let priority = if r.get_bool()? { Some(r.get_i64()?) } else { None };

    let num_procs = r.get_u32()?;
    let num_nodes = r.get_u32()?;
    let max_nodes = r.get_u32()?;
    let feature_expr = r.get_str()?;
    let req_node_names = r.get_list(|r| Ok(r.get_str()?.unwrap_or_default()))?;
    let exc_node_names = r.get_list(|r| Ok(r.get_str()?.unwrap_or_default()))?;
    let contiguous = r.get_bool()?;
    let shared = r.get_bool()?;
    let min_procs = r.get_u32()?;
    let min_memory_mb = r.get_u64()?;
    let min_tmp_disk_mb = r.get_u64()?;
    let min_os_version = r.get_str()?;
    let time_limit_mins = r.get_u64()?;
    let procs_per_task = r.get_u32()?;
    let distribution = get_distribution(r)?;
    let user_groups = r.get_list(|r| Ok(r.get_str()?.unwrap_or_default()))?;
    let key_supplied = r.get_bool()?;

    Ok(SubmitArgs {
        name,
        uid,
        gid,
        cluster,
        account,
        user,
        partition,
        qos_name,
        request: JobRequest {
            num_procs,
            num_nodes,
            max_nodes,
            feature_expr,
            req_node_names,
            exc_node_names,
            contiguous,
            shared,
            min_procs,
            min_memory_mb,
            min_tmp_disk_mb,
            min_os_version,
            time_limit_mins,
            procs_per_task,
            distribution,
        },
        no_requeue,
        priority,
        user_groups,
        key_supplied,
    })
}

fn node_state_from_wire(v: u16) -> ClusterResult<NodeState> {
    Ok(match v {
        0 => NodeState::Unknown,
        1 => NodeState::Idle,
        2 => NodeState::Allocated,
        3 => NodeState::Mixed,
        4 => NodeState::Down,
        5 => NodeState::Draining,
        6 => NodeState::Drained,
        7 => NodeState::Failing,
        other => return Err(ClusterError::InvalidInput(format!("unknown node state tag {other}"))),
    })
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn job_to_wire(job: &Job, svc: &RpcService) -> JobSummaryRecord {
    let footprint = job.footprint();
    JobSummaryRecord {
        job_id: job.job_id,
        assoc_id: job.assoc_id,
        qos_id: job.qos_id,
        partition: job.partition.clone(),
        uid: job.uid,
        gid: job.gid,
        name: job.name.clone(),
        state: job.state as u16,
        submit_time_unix_secs: unix_secs(job.submit_time),
        start_time_unix_secs: job.start_time.map(unix_secs),
        num_procs: footprint.num_procs,
        num_nodes: footprint.num_nodes,
        allocated_node_names: job
            .allocated_nodes
            .as_ref()
            .map(|bm| bm.iter_ones().filter_map(|idx| svc.ctx().nodes.get(idx as u32)).map(|r| r.name).collect())
            .unwrap_or_default(),
    }
}

fn node_to_wire(r: &NodeRecord) -> NodeRecordWire {
    NodeRecordWire {
        name: r.name.clone(),
        state: r.state as u16,
        down_reason: r.down_reason.clone(),
        last_response_unix_secs: unix_secs(r.last_response),
    }
}

fn partition_to_wire(p: &Partition) -> PartitionRecordWire {
    PartitionRecordWire {
        name: p.name.clone(),
        max_time_secs: p.max_time.as_secs(),
        max_nodes: p.max_nodes,
        min_nodes: p.min_nodes,
        state_up: p.state_up,
        sharing: p.sharing as u16,
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<(u16, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e);
    }
    let total = u32::from_be_bytes(len_buf) as usize;
    if total < 2 {
        return Ok(Some((0, Vec::new())));
    }
    let mut rest = vec![0u8; total];
    stream.read_exact(&mut rest).await?;
    let tag = u16::from_be_bytes([rest[0], rest[1]]);
    Ok(Some((tag, rest[2..].to_vec())))
}

async fn write_frame(stream: &mut TcpStream, tag: u16, body: &[u8]) -> std::io::Result<()> {
    let total = 2 + body.len();
    stream.write_all(&(total as u32).to_be_bytes()).await?;
    stream.write_all(&tag.to_be_bytes()).await?;
    stream.write_all(body).await?;
    Ok(())
}

/// Dispatch one decoded request to the service and encode its response
/// body. The leading status word is written by the caller.
async fn dispatch(op: RpcOp, body: &[u8], svc: &RpcService) -> ClusterResult<Vec<u8>> {
    let span = svc.trace_rpc(op.as_str());
    dispatch_inner(op, body, svc).instrument(span).await
}

async fn dispatch_inner(op: RpcOp, body: &[u8], svc: &RpcService) -> ClusterResult<Vec<u8>> {
    let mut r = Reader::new(body);
    let mut w = Writer::new();
    match op {
        RpcOp::SubmitJob => {
            let args = decode_submit_args(&mut r)?;
            let job_id = svc.submit_job(args).await?;
            w.put_u64(job_id);
        }
        RpcOp::AllocateResources => {
            let args = decode_submit_args(&mut r)?;
            match svc.allocate_resources(args).await? {
                AllocateOutcome::Started { job_id, node_names } => {
                    w.put_bool(true);
                    w.put_u64(job_id);
                    w.put_list(&node_names, |w, n| w.put_str(Some(n)));
                }
                AllocateOutcome::Pending { job_id, reason } => {
                    w.put_bool(false);
                    w.put_u64(job_id);
                    w.put_str(reason.as_deref());
                }
            }
        }
        RpcOp::CancelJob => {
            let job_id = r.get_u64()?;
            let cancelled_now = svc.cancel_job(job_id).await?;
            w.put_bool(cancelled_now);
        }
        RpcOp::SignalJob => {
            let job_id = r.get_u64()?;
            let signal = r.get_u32()?;
            svc.signal_job(job_id, signal).await?;
        }
        RpcOp::SuspendJob => {
            let job_id = r.get_u64()?;
            svc.suspend_job(job_id).await?;
        }
        RpcOp::ResumeJob => {
            let job_id = r.get_u64()?;
            svc.resume_job(job_id).await?;
        }
        RpcOp::CompleteJob => {
            let job_id = r.get_u64()?;
            let terminal = r.get_u16()?;
            let exit_code = get_opt_i32(&mut r)?;
            svc.complete_job(job_id, terminal, exit_code).await?;
        }
        RpcOp::GetJobs => {
            let filter = r.get_str()?;
            let jobs = svc.get_jobs(filter.as_deref()).await?;
            let records: Vec<JobSummaryRecord> = jobs.iter().map(|j| job_to_wire(j, svc)).collect();
            w.put_list(&records, |w, rec| rec.encode(w));
        }
        RpcOp::GetNodes => {
            let nodes = svc.get_nodes().await?;
            let records: Vec<NodeRecordWire> = nodes.iter().map(node_to_wire).collect();
            w.put_list(&records, |w, rec| rec.encode(w));
        }
        RpcOp::GetPartitions => {
            let partitions = svc.get_partitions().await?;
            let records: Vec<PartitionRecordWire> = partitions.iter().map(partition_to_wire).collect();
            w.put_list(&records, |w, rec| rec.encode(w));
        }
        RpcOp::UpdateNode => {
            let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing node name".to_string()))?;
            let state_tag = r.get_u16()?;
            let down_reason = r.get_str()?;
            let state = node_state_from_wire(state_tag)?;
            svc.update_node(&name, state, down_reason).await?;
        }
        RpcOp::UpdatePartition => {
            let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing partition name".to_string()))?;
            let state_up = r.get_bool()?;
            let max_nodes = r.get_u32()?;
            let min_nodes = r.get_u32()?;
            svc.update_partition(&name, state_up, max_nodes, min_nodes).await?;
        }
        RpcOp::UpdateJob => {
            let job_id = r.get_u64()?;
            let new_base_prio = r.get_i64()?;
            svc.update_job(job_id, new_base_prio).await?;
        }
        RpcOp::Reconfigure => {
            let config_toml = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("missing config body".to_string()))?;
            svc.reconfigure(&config_toml).await?;
        }
        RpcOp::Ping => {
            let ok = svc.ping().await?;
            w.put_bool(ok);
        }
        RpcOp::Shutdown => {
            svc.shutdown().await?;
        }
    }
    Ok(w.into_bytes())
}

async fn handle_connection(mut stream: TcpStream, svc: Arc<RpcService>) {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(f)) => f,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "rpc connection read error");
                return;
            }
        };
        let (op_tag, body) = frame;
        let response = match RpcOp::try_from(op_tag) {
            Ok(op) => dispatch(op, &body, &svc).await,
            Err(e) => Err(e),
        };
        svc.metrics().record_rpc_request(response.is_ok());
        let (status, payload) = match response {
            Ok(bytes) => (ErrorCode::Success as u16, bytes),
            Err(e) => {
                let code = e.exit_code() as u16;
                let mut w = Writer::new();
                w.put_str(Some(&e.to_string()));
                (code, w.into_bytes())
            }
        };
        if write_frame(&mut stream, status, &payload).await.is_err() {
            return;
        }
    }
}

/// Bind the RPC listener. Split out from [`serve`] so a caller (tests,
/// `main.rs`) can read back the actual bound port before the accept loop
/// starts running, e.g. when `addr`'s port is `0`.
pub async fn bind(addr: SocketAddr) -> ClusterResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| ClusterError::TransientIo(format!("binding RPC listener on {addr}: {e}")))
}

/// Accept loop: the "main control loop and RPC dispatcher" role of spec
/// §5. Spawns one task per connection; stops accepting as soon as the
/// service's shutdown broadcast fires.
pub async fn serve(listener: TcpListener, svc: Arc<RpcService>) -> ClusterResult<()> {
    let mut shutdown_rx = svc.subscribe_shutdown();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted RPC connection");
                        let svc = svc.clone();
                        tokio::spawn(async move { handle_connection(stream, svc).await });
                    }
                    Err(e) => tracing::warn!(error = %e, "RPC accept failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("RPC server observed shutdown signal");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ControllerHosts, NodeDef, PartitionDef, SchedulerConfig, TimingConfig};
    use crate::context::ClusterContext;
    use crate::job::Distribution;
    use crate::rpc::service::{NullAgentLink, RpcService};
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

    /// Bring up a real listener on an ephemeral port and spawn the accept
    /// loop in the background; returns the address a client can dial.
    async fn spawn_server(tmp: &std::path::Path) -> (SocketAddr, Arc<RpcService>) {
        let ctx = Arc::new(ClusterContext::new(cfg(tmp)).unwrap());
        let root = ctx.assoc_tree.create_root("cluster0", 1.0).unwrap();
        ctx.assoc_tree.add_child(root, "acctA", Some("alice"), None, 1.0).unwrap();
        let svc = Arc::new(RpcService::new(ctx, Arc::new(NullAgentLink)));

        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let svc_for_accept = svc.clone();
        tokio::spawn(async move {
            let _ = serve(listener, svc_for_accept).await;
        });
        (addr, svc)
    }

    async fn roundtrip(addr: SocketAddr, op: RpcOp, body: Vec<u8>) -> (u16, Vec<u8>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, op as u16, &body).await.unwrap();
        read_frame(&mut stream).await.unwrap().expect("server closed without responding")
    }

    #[tokio::test]
    async fn ping_round_trips_over_tcp() {
        let tmp = tempfile::tempdir().unwrap();
        let (addr, _svc) = spawn_server(tmp.path()).await;

        let (status, payload) = roundtrip(addr, RpcOp::Ping, Vec::new()).await;
        assert_eq!(status, ErrorCode::Success as u16);
        let mut r = Reader::new(&payload);
        assert!(r.get_bool().unwrap());
    }

    #[tokio::test]
    async fn submit_job_then_get_nodes_over_tcp() {
        let tmp = tempfile::tempdir().unwrap();
        let (addr, svc) = spawn_server(tmp.path()).await;

        let mut w = Writer::new();
        encode_submit_args(&mut w, &submit_args());
        let (status, payload) = roundtrip(addr, RpcOp::SubmitJob, w.into_bytes()).await;
        assert_eq!(status, ErrorCode::Success as u16);
        let mut r = Reader::new(&payload);
        let job_id = r.get_u64().unwrap();
        assert_eq!(job_id, svc.ctx().jobs.list_all()[0].job_id);

        let (status, payload) = roundtrip(addr, RpcOp::GetNodes, Vec::new()).await;
        assert_eq!(status, ErrorCode::Success as u16);
        let mut r = Reader::new(&payload);
        let nodes = r.get_list(|r| NodeRecordWire::decode(r)).unwrap();
        assert_eq!(nodes.len(), 4);
    }

    #[tokio::test]
    async fn complete_job_carries_an_optional_exit_code_over_tcp() {
        let tmp = tempfile::tempdir().unwrap();
        let (addr, svc) = spawn_server(tmp.path()).await;

        let mut w = Writer::new();
        encode_submit_args(&mut w, &submit_args());
        let (_, payload) = roundtrip(addr, RpcOp::SubmitJob, w.into_bytes()).await;
        let job_id = Reader::new(&payload).get_u64().unwrap();

        svc.ctx().schedule_partition("batch").unwrap();

        let mut w = Writer::new();
        w.put_u64(job_id);
        w.put_u16(crate::job::JobState::Complete as u16);
        put_opt_i32(&mut w, Some(0));
        let (status, _) = roundtrip(addr, RpcOp::CompleteJob, w.into_bytes()).await;
        assert_eq!(status, ErrorCode::Success as u16);
        assert_eq!(svc.ctx().jobs.get(job_id).unwrap().state, crate::job::JobState::Complete);
    }

    #[tokio::test]
    async fn unknown_opcode_reports_an_invalid_input_status() {
        let tmp = tempfile::tempdir().unwrap();
        let (addr, _svc) = spawn_server(tmp.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, 999, &[]).await.unwrap();
        let (status, _) = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(status, ErrorCode::InvalidArguments as u16);
    }

    #[tokio::test]
    async fn shutdown_stops_the_accept_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let (addr, svc) = spawn_server(tmp.path()).await;

        roundtrip(addr, RpcOp::Ping, Vec::new()).await;
        svc.shutdown().await.unwrap();
        // give the accept loop's select! a moment to observe the close.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
