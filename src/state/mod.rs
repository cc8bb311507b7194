//! Persisted state (spec §6): one file per record kind under a save
//! directory, each written atomically (write-to-temp, fsync, rename) and
//! readable back with the same versioned wire codec used for RPC
//! (`SPEC_FULL.md` §B) — there is exactly one encoder/decoder pair in this
//! crate, not a second ad hoc on-disk format.
//!
//! Loading happens once at startup, before the daemon accepts RPCs; after
//! that, `save` is called periodically and on clean shutdown. Missing
//! files are not an error — an empty save directory is simply a fresh
//! cluster.

use crate::error::{ClusterError, ClusterResult};
use crate::job::JobState;
use crate::node::{NodeRegistry, NodeState};
use crate::wire::{
    AssocUsageRecord, JobSummaryRecord, NodeRecordWire, PartitionRecordWire, QosUsageRecord,
    Reader, WireRecord, Writer, CURRENT_VERSION,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const NODE_STATE_FILE: &str = "node_state";
const PART_STATE_FILE: &str = "part_state";
const JOB_STATE_FILE: &str = "job_state";
const ASSOC_USAGE_FILE: &str = "assoc_usage";
const QOS_USAGE_FILE: &str = "qos_usage";

/// The save directory, addressed by record kind.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

fn encode_list<T: WireRecord>(items: &[T]) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(CURRENT_VERSION);
    w.put_list(items, |w, item| item.encode(w));
    w.into_bytes()
}

fn decode_list<T: WireRecord>(bytes: &[u8]) -> ClusterResult<Vec<T>> {
    let mut r = Reader::new(bytes);
    let version = r.get_u16()?;
    if version > CURRENT_VERSION {
        return Err(ClusterError::ProtocolVersion { got: version, max_supported: CURRENT_VERSION });
    }
    r.get_list(|r| T::decode(r))
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Write `bytes` to `<file>.tmp`, fsync it, then rename over `<file>` —
    /// the rename is atomic on the same filesystem, so a crash mid-write
    /// never leaves a half-written `<file>` visible to the next startup.
    async fn write_atomic(&self, file: &str, bytes: &[u8]) -> ClusterResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ClusterError::TransientIo(format!("creating save dir: {e}")))?;
        let final_path = self.path_for(file);
        let tmp_path = self.path_for(&format!("{file}.tmp"));

        let mut f = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ClusterError::TransientIo(format!("creating {}: {e}", tmp_path.display())))?;
        f.write_all(bytes)
            .await
            .map_err(|e| ClusterError::TransientIo(format!("writing {}: {e}", tmp_path.display())))?;
        f.sync_all()
            .await
            .map_err(|e| ClusterError::TransientIo(format!("fsync {}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| ClusterError::TransientIo(format!("renaming into {}: {e}", final_path.display())))?;
        Ok(())
    }

    async fn read_optional(&self, file: &str) -> ClusterResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(file)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClusterError::TransientIo(format!("reading {file}: {e}"))),
        }
    }

    pub async fn save_nodes(&self, records: &[NodeRecordWire]) -> ClusterResult<()> {
        self.write_atomic(NODE_STATE_FILE, &encode_list(records)).await
    }

    pub async fn load_nodes(&self) -> ClusterResult<Vec<NodeRecordWire>> {
        match self.read_optional(NODE_STATE_FILE).await? {
            Some(bytes) => decode_list(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_partitions(&self, records: &[PartitionRecordWire]) -> ClusterResult<()> {
        self.write_atomic(PART_STATE_FILE, &encode_list(records)).await
    }

    pub async fn load_partitions(&self) -> ClusterResult<Vec<PartitionRecordWire>> {
        match self.read_optional(PART_STATE_FILE).await? {
            Some(bytes) => decode_list(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_jobs(&self, records: &[JobSummaryRecord]) -> ClusterResult<()> {
        self.write_atomic(JOB_STATE_FILE, &encode_list(records)).await
    }

    pub async fn load_jobs(&self) -> ClusterResult<Vec<JobSummaryRecord>> {
        match self.read_optional(JOB_STATE_FILE).await? {
            Some(bytes) => decode_list(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_assoc_usage(&self, records: &[AssocUsageRecord]) -> ClusterResult<()> {
        self.write_atomic(ASSOC_USAGE_FILE, &encode_list(records)).await
    }

    pub async fn load_assoc_usage(&self) -> ClusterResult<Vec<AssocUsageRecord>> {
        match self.read_optional(ASSOC_USAGE_FILE).await? {
            Some(bytes) => decode_list(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_qos_usage(&self, records: &[QosUsageRecord]) -> ClusterResult<()> {
        self.write_atomic(QOS_USAGE_FILE, &encode_list(records)).await
    }

    pub async fn load_qos_usage(&self) -> ClusterResult<Vec<QosUsageRecord>> {
        match self.read_optional(QOS_USAGE_FILE).await? {
            Some(bytes) => decode_list(&bytes),
            None => Ok(Vec::new()),
        }
    }
}

/// Cold-start job reconciliation (`SPEC_FULL.md` §C): any job reloaded as
/// `Running`/`Suspended` whose allocated nodes no longer all report that
/// allocation — blanked by a logical `remove`, or down — did not survive
/// the crash with its agents. It must be flushed rather than left open
/// forever, mirroring the original controller's
/// `acct_storage_g_flush_jobs_on_cluster` step.
pub fn reconcile_stale_running(jobs: &[JobSummaryRecord], registry: &NodeRegistry) -> Vec<u64> {
    let running_or_suspended = |state: u16| state == JobState::Running as u16 || state == JobState::Suspended as u16;

    jobs.iter()
        .filter(|j| running_or_suspended(j.state))
        .filter(|j| {
            j.allocated_node_names.is_empty()
                || j.allocated_node_names.iter().any(|name| match registry.lookup_by_name(name) {
                    None => true,
                    Some(idx) => registry
                        .get(idx)
                        .map(|rec| rec.name.is_empty() || rec.state == NodeState::Down)
                        .unwrap_or(true),
                })
        })
        .map(|j| j.job_id)
        .collect()
}

fn path_exists(dir: &Path, file: &str) -> bool {
    dir.join(file).exists()
}

/// `true` if the save directory has any record file at all — distinguishes
/// "fresh cluster" from "restart of a known one" for callers deciding
/// whether to skip reconciliation entirely.
pub fn has_prior_state(dir: &Path) -> bool {
    [NODE_STATE_FILE, PART_STATE_FILE, JOB_STATE_FILE, ASSOC_USAGE_FILE, QOS_USAGE_FILE]
        .iter()
        .any(|f| path_exists(dir, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeCapacity;

    fn cap() -> NodeCapacity {
        NodeCapacity {
            cpus: 4,
            cpu_speed_mhz: 2400,
            real_memory_mb: 16384,
            virtual_memory_mb: 16384,
            tmp_disk_mb: 10240,
            os_version: "5.4.0".to_string(),
            features: Vec::new(),
        }
    }

    #[tokio::test]
    async fn node_state_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StateDir::new(tmp.path());
        let records = vec![NodeRecordWire {
            name: "lx0".to_string(),
            state: NodeState::Idle as u16,
            down_reason: None,
            last_response_unix_secs: 1_700_000_000,
        }];
        dir.save_nodes(&records).await.unwrap();
        let back = dir.load_nodes().await.unwrap();
        assert_eq!(back, records);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StateDir::new(tmp.path());
        assert!(dir.load_jobs().await.unwrap().is_empty());
        assert!(!has_prior_state(tmp.path()));
    }

    #[test]
    fn running_job_on_down_node_is_flagged_for_reconciliation() {
        let registry = NodeRegistry::new();
        let idx = registry.create("lx0", cap()).unwrap();
        registry.with_mut(idx, |r| r.state = NodeState::Down);

        let job = JobSummaryRecord {
            job_id: 7,
            assoc_id: 1,
            qos_id: None,
            partition: "batch".to_string(),
            uid: 1000,
            gid: 1000,
            name: "sim".to_string(),
            state: JobState::Running as u16,
            submit_time_unix_secs: 0,
            start_time_unix_secs: Some(0),
            num_procs: 4,
            num_nodes: 1,
            allocated_node_names: vec!["lx0".to_string()],
        };
        let stale = reconcile_stale_running(&[job], &registry);
        assert_eq!(stale, vec![7]);
    }

    #[test]
    fn running_job_on_healthy_node_is_left_alone() {
        let registry = NodeRegistry::new();
        registry.create("lx0", cap()).unwrap();
        registry.with_mut(0, |r| r.state = NodeState::Allocated);

        let job = JobSummaryRecord {
            job_id: 8,
            assoc_id: 1,
            qos_id: None,
            partition: "batch".to_string(),
            uid: 1000,
            gid: 1000,
            name: "sim".to_string(),
            state: JobState::Running as u16,
            submit_time_unix_secs: 0,
            start_time_unix_secs: Some(0),
            num_procs: 4,
            num_nodes: 1,
            allocated_node_names: vec!["lx0".to_string()],
        };
        assert!(reconcile_stale_running(&[job], &registry).is_empty());
    }
}
