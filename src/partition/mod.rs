//! Partition Registry (spec §4.B): named pools of nodes with admission
//! rules. A small `name → Partition` map, plus a distinguished default
//! pointer swapped atomically on reload.

use crate::bitmap::NodeBitmap;
use crate::error::{ClusterError, ClusterResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Sharing policy for a partition (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingPolicy {
    No,
    Yes,
    Force,
    Exclusive,
}

/// A logical pool of nodes with admission rules.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub max_time: std::time::Duration,
    pub max_nodes: u32,
    pub min_nodes: u32,
    /// `None` means "no group restriction — all groups admitted".
    pub allow_groups: Option<Vec<String>>,
    pub key_required: bool,
    pub state_up: bool,
    pub sharing: SharingPolicy,
    pub members: NodeBitmap,
}

impl Partition {
    /// Derived: total member node count.
    pub fn total_nodes(&self) -> usize {
        self.members.popcount()
    }

    /// A submitting user's unix groups are checked against `allow_groups`.
    pub fn group_admitted(&self, user_groups: &[String]) -> bool {
        match &self.allow_groups {
            None => true,
            Some(allowed) => user_groups.iter().any(|g| allowed.contains(g)),
        }
    }

    /// `sharing=no` overrides a user-requested `shared=yes`;
    /// `sharing=force` overrides the user either way (spec §4.E).
    pub fn resolve_shared(&self, user_requested_shared: bool) -> bool {
        match self.sharing {
            SharingPolicy::Force => true,
            SharingPolicy::No => false,
            SharingPolicy::Exclusive => false,
            SharingPolicy::Yes => user_requested_shared,
        }
    }
}

/// The Partition Registry.
pub struct PartitionRegistry {
    partitions: RwLock<HashMap<String, Partition>>,
    default_name: RwLock<Option<String>>,
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            default_name: RwLock::new(None),
        }
    }

    pub fn upsert(&self, partition: Partition) {
        self.partitions.write().insert(partition.name.clone(), partition);
    }

    pub fn get(&self, name: &str) -> ClusterResult<Partition> {
        self.partitions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound { kind: "partition", id: name.to_string() })
    }

    pub fn remove(&self, name: &str) -> ClusterResult<()> {
        self.partitions
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound { kind: "partition", id: name.to_string() })
    }

    pub fn list(&self) -> Vec<Partition> {
        self.partitions.read().values().cloned().collect()
    }

    /// Atomically swap the default partition pointer on config reload.
    pub fn set_default(&self, name: &str) -> ClusterResult<()> {
        if !self.partitions.read().contains_key(name) {
            return Err(ClusterError::NotFound { kind: "partition", id: name.to_string() });
        }
        *self.default_name.write() = Some(name.to_string());
        Ok(())
    }

    pub fn default_partition(&self) -> Option<Partition> {
        let name = self.default_name.read().clone()?;
        self.partitions.read().get(&name).cloned()
    }

    /// Apply partition-level admission rules to a submission. Returns the
    /// resolved `shared` flag on success.
    pub fn admit(
        &self,
        partition_name: &str,
        user_groups: &[String],
        key_supplied: bool,
        user_requested_shared: bool,
        requested_nodes: u32,
    ) -> ClusterResult<bool> {
        let part = self.get(partition_name)?;
        if !part.state_up {
            return Err(ClusterError::InvalidInput(format!(
                "partition {partition_name} is closed to new jobs"
            )));
        }
        if !part.group_admitted(user_groups) {
            return Err(ClusterError::PermissionDenied(format!(
                "user's groups are not in partition {partition_name}'s allow_groups"
            )));
        }
        if part.key_required && !key_supplied {
            return Err(ClusterError::PermissionDenied(format!(
                "partition {partition_name} requires a signed partition key"
            )));
        }
        if requested_nodes < part.min_nodes || requested_nodes > part.max_nodes {
            return Err(ClusterError::InvalidInput(format!(
                "requested {requested_nodes} nodes outside partition {partition_name}'s [{}, {}]",
                part.min_nodes, part.max_nodes
            )));
        }
        Ok(part.resolve_shared(user_requested_shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(name: &str) -> Partition {
        Partition {
            name: name.to_string(),
            max_time: Duration::from_secs(3600),
            max_nodes: 16,
            min_nodes: 1,
            allow_groups: Some(vec!["staff".to_string()]),
            key_required: false,
            state_up: true,
            sharing: SharingPolicy::No,
            members: NodeBitmap::new(16),
        }
    }

    #[test]
    fn closed_partition_rejects_submission() {
        let reg = PartitionRegistry::new();
        let mut p = sample("batch");
        p.state_up = false;
        reg.upsert(p);
        assert!(reg.admit("batch", &["staff".into()], false, false, 1).is_err());
    }

    #[test]
    fn group_acl_enforced() {
        let reg = PartitionRegistry::new();
        reg.upsert(sample("batch"));
        assert!(reg.admit("batch", &["guest".into()], false, false, 1).is_err());
        assert!(reg.admit("batch", &["staff".into()], false, false, 1).is_ok());
    }

    #[test]
    fn force_share_overrides_user() {
        let mut p = sample("batch");
        p.sharing = SharingPolicy::Force;
        assert!(p.resolve_shared(false));
        p.sharing = SharingPolicy::No;
        assert!(!p.resolve_shared(true));
    }
}
