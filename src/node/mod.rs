//! Node Registry (spec §4.A): every node's identity, capacity, dynamic
//! state, and the stable ordinal used as its bitmap coordinate.
//!
//! Node names in this domain are overwhelmingly `prefix<decimal>` (`lx42`,
//! `compute008`), so the name→ordinal index is keyed with a hasher that
//! hashes on the trailing decimal suffix when one is present. The
//! optimization is isolated behind [`SuffixHasher`] so a deployment whose
//! names don't follow that shape can swap in `std`'s default hasher
//! without touching the registry itself (spec §9's "pluggable hasher"
//! design note).

pub mod hostlist;

use crate::error::{ClusterError, ClusterResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::hash::{BuildHasherDefault, Hasher};
use std::time::SystemTime;

/// Dynamic node state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Idle,
    Allocated,
    Mixed,
    Down,
    Draining,
    Drained,
    Failing,
}

impl NodeState {
    /// Nodes a job may be placed on when sharing is disallowed.
    pub fn is_usable_exclusive(self) -> bool {
        matches!(self, NodeState::Idle)
    }

    /// Nodes a job may be placed on when sharing is allowed.
    pub fn is_usable_shared(self) -> bool {
        matches!(self, NodeState::Idle | NodeState::Mixed)
    }
}

/// Static capacity vector for a node (spec §3).
#[derive(Debug, Clone)]
pub struct NodeCapacity {
    pub cpus: u32,
    pub cpu_speed_mhz: u32,
    pub real_memory_mb: u64,
    pub virtual_memory_mb: u64,
    pub tmp_disk_mb: u64,
    pub os_version: String,
    pub features: Vec<String>,
}

/// A single node record. `idx` never changes for the lifetime of the
/// registry, including across a logical `remove` (spec §4.A: "the ordinal
/// is preserved for bitmap stability").
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub idx: u32,
    pub name: String,
    pub capacity: NodeCapacity,
    pub state: NodeState,
    /// Set only while `state == Down`; cleared on the next `update_node`
    /// that brings the node back up (open design question #2 in DESIGN.md).
    pub down_reason: Option<String>,
    pub last_response: SystemTime,
    pub partitions: Vec<String>,
    /// Per-partition count of CPUs currently allocated on this node.
    pub partition_alloc_cpus: Vec<(String, u32)>,
}

impl NodeRecord {
    fn blank(idx: u32) -> Self {
        Self {
            idx,
            name: String::new(),
            capacity: NodeCapacity {
                cpus: 0,
                cpu_speed_mhz: 0,
                real_memory_mb: 0,
                virtual_memory_mb: 0,
                tmp_disk_mb: 0,
                os_version: String::new(),
                features: Vec::new(),
            },
            state: NodeState::Down,
            down_reason: Some("removed".to_string()),
            last_response: SystemTime::UNIX_EPOCH,
            partitions: Vec::new(),
            partition_alloc_cpus: Vec::new(),
        }
    }

    /// Features satisfy a simple `AND`-of-tags expression. Richer boolean
    /// expressions (`&`, `|`, `!`) are left to `scheduler::feature_expr`.
    pub fn has_all_features(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.capacity.features.contains(f))
    }
}

/// Hashes a name on its trailing decimal-digit suffix when present,
/// falling back to a standard FNV-1a hash of the whole string otherwise.
/// `DashMap` still resolves exact-key collisions on its own buckets; this
/// only changes which bucket same-prefix, different-suffix names land in,
/// which is the performance property spec §4.A asks for.
#[derive(Default)]
pub struct SuffixHasher(u64);

impl Hasher for SuffixHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let digits_start = bytes
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map(|p| p + 1)
            .unwrap_or(0);
        if digits_start < bytes.len() {
            // Pure numeric suffix: hash the prefix length and the numeric
            // value, so `lx7` and `lx007` land in different buckets (they
            // are different names) but the suffix itself drives locality.
            let mut acc = 0xcbf29ce484222325u64 ^ digits_start as u64;
            for &b in &bytes[..digits_start] {
                acc = (acc ^ b as u64).wrapping_mul(0x100000001b3);
            }
            for &b in &bytes[digits_start..] {
                acc = acc.wrapping_mul(10).wrapping_add((b - b'0') as u64);
            }
            self.0 = acc;
        } else {
            // No decimal suffix: plain FNV-1a over the whole name.
            let mut acc = 0xcbf29ce484222325u64;
            for &b in bytes {
                acc = (acc ^ b as u64).wrapping_mul(0x100000001b3);
            }
            self.0 = acc;
        }
    }
}

type NameIndex = DashMap<String, u32, BuildHasherDefault<SuffixHasher>>;

/// The Node Registry: arena of node records plus a fast name index.
pub struct NodeRegistry {
    arena: RwLock<Vec<NodeRecord>>,
    index: NameIndex,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Vec::new()),
            index: DashMap::default(),
        }
    }

    /// Number of ordinals ever assigned (including logically removed
    /// nodes) — the capacity every bitmap in the system must match.
    pub fn capacity(&self) -> usize {
        self.arena.read().len()
    }

    /// Create a node, assigning it the next stable ordinal.
    pub fn create(&self, name: &str, capacity: NodeCapacity) -> ClusterResult<u32> {
        if name.is_empty() || name.len() > 64 {
            return Err(ClusterError::InvalidInput(format!(
                "invalid node name length: {name:?}"
            )));
        }
        if self.index.contains_key(name) {
            return Err(ClusterError::Conflict(format!("node {name} already exists")));
        }

        let mut arena = self.arena.write();
        let idx = arena.len() as u32;
        arena.push(NodeRecord {
            idx,
            name: name.to_string(),
            capacity,
            state: NodeState::Unknown,
            down_reason: None,
            last_response: SystemTime::now(),
            partitions: Vec::new(),
            partition_alloc_cpus: Vec::new(),
        });
        self.index.insert(name.to_string(), idx);
        Ok(idx)
    }

    /// Look up a node's ordinal by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.index.get(name).map(|r| *r)
    }

    /// Read a snapshot copy of a node record by ordinal.
    pub fn get(&self, idx: u32) -> Option<NodeRecord> {
        self.arena.read().get(idx as usize).cloned()
    }

    /// Mutate a node record in place under the arena writer lock.
    pub fn with_mut<R>(&self, idx: u32, f: impl FnOnce(&mut NodeRecord) -> R) -> Option<R> {
        let mut arena = self.arena.write();
        arena.get_mut(idx as usize).map(f)
    }

    /// Logical removal: the ordinal survives so every outstanding bitmap
    /// stays valid, but the record is blanked and marked `Down` (spec
    /// §4.A).
    pub fn remove(&self, name: &str) -> ClusterResult<()> {
        let idx = self
            .lookup_by_name(name)
            .ok_or_else(|| ClusterError::NotFound { kind: "node", id: name.to_string() })?;
        self.index.remove(name);
        let mut arena = self.arena.write();
        if let Some(rec) = arena.get_mut(idx as usize) {
            *rec = NodeRecord::blank(idx);
        }
        Ok(())
    }

    /// Iterate every node record in ordinal order (including blanked
    /// removed nodes, which callers distinguish via `name.is_empty()`).
    pub fn iterate_in_order(&self) -> Vec<NodeRecord> {
        self.arena.read().clone()
    }

    /// Fully rebuild the name index from the arena. Called after a
    /// configuration reload adds nodes in bulk, so no lookup can observe a
    /// half-rebuilt index (spec §4.A: "reallocated and fully rebuilt
    /// before any lookup returns stale values").
    pub fn rebuild_index(&self) {
        let arena = self.arena.read();
        self.index.clear();
        for rec in arena.iter() {
            if !rec.name.is_empty() {
                self.index.insert(rec.name.clone(), rec.idx);
            }
        }
    }

    /// `True` if `idx`'s last heartbeat exceeds `slurmd_timeout`, used by
    /// the daemon's health sweep. See DESIGN.md open question #2 for why a
    /// `Drained` node is exempt.
    pub fn is_unresponsive(&self, idx: u32, slurmd_timeout: std::time::Duration) -> bool {
        let Some(rec) = self.get(idx) else { return false };
        if rec.state == NodeState::Drained {
            return false;
        }
        SystemTime::now()
            .duration_since(rec.last_response)
            .map(|elapsed| elapsed > slurmd_timeout)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> NodeCapacity {
        NodeCapacity {
            cpus: 4,
            cpu_speed_mhz: 2400,
            real_memory_mb: 16384,
            virtual_memory_mb: 16384,
            tmp_disk_mb: 10240,
            os_version: "5.4.0".to_string(),
            features: vec!["gpu".to_string()],
        }
    }

    #[test]
    fn create_then_lookup_matches_idx() {
        let reg = NodeRegistry::new();
        let idx = reg.create("lx0", cap()).unwrap();
        assert_eq!(reg.lookup_by_name("lx0"), Some(idx));
        assert_eq!(reg.get(idx).unwrap().name, "lx0");
    }

    #[test]
    fn every_mutation_keeps_hash_lookup_consistent() {
        let reg = NodeRegistry::new();
        let names: Vec<String> = (0..64).map(|i| format!("lx{i}")).collect();
        for n in &names {
            reg.create(n, cap()).unwrap();
        }
        reg.rebuild_index();
        for n in &names {
            let idx = reg.lookup_by_name(n).unwrap();
            assert_eq!(reg.get(idx).unwrap().idx, idx);
            assert_eq!(reg.get(idx).unwrap().name, *n);
        }
    }

    #[test]
    fn remove_preserves_ordinal_but_blanks_record() {
        let reg = NodeRegistry::new();
        let idx = reg.create("lx0", cap()).unwrap();
        reg.create("lx1", cap()).unwrap();
        reg.remove("lx0").unwrap();
        assert_eq!(reg.lookup_by_name("lx0"), None);
        let rec = reg.get(idx).unwrap();
        assert_eq!(rec.idx, idx);
        assert_eq!(rec.state, NodeState::Down);
        assert!(rec.name.is_empty());
        // lx1 keeps its own ordinal untouched.
        assert!(reg.lookup_by_name("lx1").is_some());
    }

    #[test]
    fn duplicate_create_conflicts() {
        let reg = NodeRegistry::new();
        reg.create("lx0", cap()).unwrap();
        assert!(reg.create("lx0", cap()).is_err());
    }
}
