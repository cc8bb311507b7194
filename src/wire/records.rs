//! Concrete record layouts carried over the wire and in state files.
//!
//! These mirror the persisted-state layout of spec §6 (`node_state`,
//! `part_state`, `job_state`, `assoc_usage`, `qos_usage`) directly: each
//! struct here is exactly what `state::save`/`state::recover` reads and
//! writes, reusing the same `WireRecord` impl RPC responses use.

use super::{Reader, WireRecord, Writer};
use crate::error::{ClusterError, ClusterResult};

/// `node_state` entry: name, dynamic state, last-response (spec §6).
/// Static capacity is config-derived on reload, so it is not persisted
/// here — only what can drift at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecordWire {
    pub name: String,
    pub state: u16,
    pub down_reason: Option<String>,
    pub last_response_unix_secs: u64,
}

impl WireRecord for NodeRecordWire {
    fn encode(&self, w: &mut Writer) {
        w.put_str(Some(&self.name));
        w.put_u16(self.state);
        w.put_str(self.down_reason.as_deref());
        w.put_u64(self.last_response_unix_secs);
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("node record missing name".to_string()))?;
        let state = r.get_u16()?;
        let down_reason = r.get_str()?;
        let last_response_unix_secs = r.get_u64()?;
        Ok(Self { name, state, down_reason, last_response_unix_secs })
    }
}

/// `part_state` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRecordWire {
    pub name: String,
    pub max_time_secs: u64,
    pub max_nodes: u32,
    pub min_nodes: u32,
    pub state_up: bool,
    pub sharing: u16,
}

impl WireRecord for PartitionRecordWire {
    fn encode(&self, w: &mut Writer) {
        w.put_str(Some(&self.name));
        w.put_u64(self.max_time_secs);
        w.put_u32(self.max_nodes);
        w.put_u32(self.min_nodes);
        w.put_bool(self.state_up);
        w.put_u16(self.sharing);
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("partition record missing name".to_string()))?;
        let max_time_secs = r.get_u64()?;
        let max_nodes = r.get_u32()?;
        let min_nodes = r.get_u32()?;
        let state_up = r.get_bool()?;
        let sharing = r.get_u16()?;
        Ok(Self { name, max_time_secs, max_nodes, min_nodes, state_up, sharing })
    }
}

/// `job_state` entry: the subset of a `Job` that must survive restart —
/// enough to resume indexing and to drive the cold-start reconciliation
/// in `SPEC_FULL.md` §C. Step/accounting sub-records are reloaded from
/// the accounting store, not from this file.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummaryRecord {
    pub job_id: u64,
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub partition: String,
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub state: u16,
    pub submit_time_unix_secs: u64,
    pub start_time_unix_secs: Option<u64>,
    pub num_procs: u32,
    pub num_nodes: u32,
    pub allocated_node_names: Vec<String>,
}

impl WireRecord for JobSummaryRecord {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.job_id);
        w.put_u32(self.assoc_id);
        w.put_u32(self.qos_id.unwrap_or(u32::MAX));
        w.put_str(Some(&self.partition));
        w.put_u32(self.uid);
        w.put_u32(self.gid);
        w.put_str(Some(&self.name));
        w.put_u16(self.state);
        w.put_u64(self.submit_time_unix_secs);
        w.put_u64(self.start_time_unix_secs.unwrap_or(u64::MAX));
        w.put_u32(self.num_procs);
        w.put_u32(self.num_nodes);
        w.put_list(&self.allocated_node_names, |w, n| w.put_str(Some(n)));
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        let job_id = r.get_u64()?;
        let assoc_id = r.get_u32()?;
        let qos_raw = r.get_u32()?;
        let qos_id = if qos_raw == u32::MAX { None } else { Some(qos_raw) };
        let partition = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("job record missing partition".to_string()))?;
        let uid = r.get_u32()?;
        let gid = r.get_u32()?;
        let name = r.get_str()?.ok_or_else(|| ClusterError::InvalidInput("job record missing name".to_string()))?;
        let state = r.get_u16()?;
        let submit_time_unix_secs = r.get_u64()?;
        let start_raw = r.get_u64()?;
        let start_time_unix_secs = if start_raw == u64::MAX { None } else { Some(start_raw) };
        let num_procs = r.get_u32()?;
        let num_nodes = r.get_u32()?;
        let allocated_node_names = r.get_list(|r| Ok(r.get_str()?.unwrap_or_default()))?;
        Ok(Self {
            job_id,
            assoc_id,
            qos_id,
            partition,
            uid,
            gid,
            name,
            state,
            submit_time_unix_secs,
            start_time_unix_secs,
            num_procs,
            num_nodes,
            allocated_node_names,
        })
    }
}

/// `assoc_usage` entry — the counters that must survive restart for
/// fair-share continuity (spec §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssocUsageRecord {
    pub assoc_id: u32,
    pub usage_raw: f64,
    pub used_jobs: u32,
    pub used_submit_jobs: u32,
    pub grp_used_cpus: u32,
    pub grp_used_nodes: u32,
    pub grp_used_cpu_mins: u64,
}

impl WireRecord for AssocUsageRecord {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.assoc_id);
        w.put_f64(self.usage_raw);
        w.put_u32(self.used_jobs);
        w.put_u32(self.used_submit_jobs);
        w.put_u32(self.grp_used_cpus);
        w.put_u32(self.grp_used_nodes);
        w.put_u64(self.grp_used_cpu_mins);
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        Ok(Self {
            assoc_id: r.get_u32()?,
            usage_raw: r.get_f64()?,
            used_jobs: r.get_u32()?,
            used_submit_jobs: r.get_u32()?,
            grp_used_cpus: r.get_u32()?,
            grp_used_nodes: r.get_u32()?,
            grp_used_cpu_mins: r.get_u64()?,
        })
    }
}

/// `qos_usage` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QosUsageRecord {
    pub qos_id: u32,
    pub used_cpus: u32,
    pub used_jobs: u32,
    pub used_nodes: u32,
}

impl WireRecord for QosUsageRecord {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.qos_id);
        w.put_u32(self.used_cpus);
        w.put_u32(self.used_jobs);
        w.put_u32(self.used_nodes);
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        Ok(Self {
            qos_id: r.get_u32()?,
            used_cpus: r.get_u32()?,
            used_jobs: r.get_u32()?,
            used_nodes: r.get_u32()?,
        })
    }
}
