//! Config surface (spec §6, `SPEC_FULL.md` §A): partition/node definitions,
//! controller host pair, timing knobs, and the fair-share damping constant
//! left open by spec §9 — loaded from TOML, validated, and swapped into
//! the running context on reload without a restart.
//!
//! Each sub-config validates itself before the whole tree is accepted:
//! reject the new config outright rather than partially apply it, and
//! never publish a config a validation pass hasn't already cleared.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised validating a loaded config. Kept distinct from
/// `ClusterError` since a bad config is a bootstrap-time concern, not a
/// runtime operation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config field {field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

/// One statically configured node definition.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDef {
    pub name_pattern: String,
    pub cpus: u32,
    pub cpu_speed_mhz: u32,
    pub real_memory_mb: u64,
    pub virtual_memory_mb: u64,
    pub tmp_disk_mb: u64,
    pub os_version: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub partitions: Vec<String>,
}

impl NodeDef {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name_pattern.is_empty() {
            return Err(ConfigError::Invalid { field: "node.name_pattern", reason: "empty".to_string() });
        }
        if self.cpus == 0 {
            return Err(ConfigError::Invalid { field: "node.cpus", reason: "must be > 0".to_string() });
        }
        Ok(())
    }
}

/// One statically configured partition definition.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionDef {
    pub name: String,
    pub max_time_secs: u64,
    pub max_nodes: u32,
    pub min_nodes: u32,
    #[serde(default)]
    pub allow_groups: Option<Vec<String>>,
    #[serde(default)]
    pub key_required: bool,
    #[serde(default = "default_true")]
    pub state_up: bool,
    /// One of `no`, `yes`, `force`, `exclusive` (spec §3).
    pub sharing: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

impl PartitionDef {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid { field: "partition.name", reason: "empty".to_string() });
        }
        if self.min_nodes > self.max_nodes {
            return Err(ConfigError::Invalid {
                field: "partition.min_nodes",
                reason: format!("min_nodes {} exceeds max_nodes {}", self.min_nodes, self.max_nodes),
            });
        }
        match self.sharing.as_str() {
            "no" | "yes" | "force" | "exclusive" => Ok(()),
            other => Err(ConfigError::Invalid {
                field: "partition.sharing",
                reason: format!("unknown sharing policy {other:?}"),
            }),
        }
    }
}

/// Primary/backup controller host pair (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerHosts {
    pub primary: String,
    pub backup: Option<String>,
    pub port: u16,
}

impl ControllerHosts {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.is_empty() {
            return Err(ConfigError::Invalid { field: "controller.primary", reason: "empty".to_string() });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid { field: "controller.port", reason: "must be nonzero".to_string() });
        }
        Ok(())
    }
}

/// Scheduling/backfill timing and the fair-share damping constant
/// (DESIGN.md open question #1 — defaulted to `0.5`).
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_backfill_secs")]
    pub backfill_interval_secs: u64,
    #[serde(default = "default_damping")]
    pub fairshare_damping: f64,
    #[serde(default = "default_age_points_per_hour")]
    pub age_points_per_hour: f64,
    #[serde(default = "default_max_age_factor")]
    pub max_age_factor: f64,
}

fn default_tick_secs() -> u64 {
    30
}
fn default_backfill_secs() -> u64 {
    60
}
fn default_damping() -> f64 {
    0.5
}
fn default_age_points_per_hour() -> f64 {
    10.0
}
fn default_max_age_factor() -> f64 {
    500.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_secs(),
            backfill_interval_secs: default_backfill_secs(),
            fairshare_damping: default_damping(),
            age_points_per_hour: default_age_points_per_hour(),
            max_age_factor: default_max_age_factor(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid { field: "scheduler.tick_interval_secs", reason: "must be > 0".to_string() });
        }
        if !(0.0..=1.0).contains(&self.fairshare_damping) {
            return Err(ConfigError::Invalid {
                field: "scheduler.fairshare_damping",
                reason: format!("{} outside [0,1]", self.fairshare_damping),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        secs(self.tick_interval_secs)
    }

    pub fn backfill_interval(&self) -> Duration {
        secs(self.backfill_interval_secs)
    }
}

/// Node-health and retention timing (spec §6's `MinJobAge`,
/// `MessageTimeout`, `SlurmdTimeout`).
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_min_job_age")]
    pub min_job_age_secs: u64,
    #[serde(default = "default_message_timeout")]
    pub message_timeout_secs: u64,
    #[serde(default = "default_slurmd_timeout")]
    pub slurmd_timeout_secs: u64,
}

fn default_min_job_age() -> u64 {
    300
}
fn default_message_timeout() -> u64 {
    10
}
fn default_slurmd_timeout() -> u64 {
    300
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_job_age_secs: default_min_job_age(),
            message_timeout_secs: default_message_timeout(),
            slurmd_timeout_secs: default_slurmd_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn min_job_age(&self) -> Duration {
        secs(self.min_job_age_secs)
    }
    pub fn message_timeout(&self) -> Duration {
        secs(self.message_timeout_secs)
    }
    pub fn slurmd_timeout(&self) -> Duration {
        secs(self.slurmd_timeout_secs)
    }
}

/// Top-level config tree, deserialized from TOML (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub controller: ControllerHosts,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub partitions: Vec<PartitionDef>,
    pub state_save_dir: String,
    #[serde(default)]
    pub default_qos: Option<String>,
    /// Opaque plugin selections (spec §6: "plugin selections, opaque to
    /// this spec") — passed through untouched to whatever capability
    /// interface loads them.
    #[serde(default)]
    pub plugins: HashMap<String, String>,
    #[serde(default)]
    pub rollup_archive_data: bool,
}

impl AppConfig {
    /// Parse and fully validate a config from TOML text. Never returns a
    /// config that failed any sub-validation — reload callers treat this
    /// as all-or-nothing.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        self.scheduler.validate()?;
        for n in &self.nodes {
            n.validate()?;
        }
        let mut seen_default = false;
        for p in &self.partitions {
            p.validate()?;
            if p.is_default {
                if seen_default {
                    return Err(ConfigError::Invalid {
                        field: "partitions.is_default",
                        reason: "more than one partition marked default".to_string(),
                    });
                }
                seen_default = true;
            }
        }
        if self.state_save_dir.is_empty() {
            return Err(ConfigError::Invalid { field: "state_save_dir", reason: "empty".to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            state_save_dir = "/var/spool/clusterd"

            [controller]
            primary = "ctl0"
            port = 6817

            [[partitions]]
            name = "batch"
            max_time_secs = 3600
            max_nodes = 16
            min_nodes = 1
            sharing = "no"
            is_default = true
        "#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg = AppConfig::from_toml(minimal_toml()).unwrap();
        assert_eq!(cfg.scheduler.fairshare_damping, 0.5);
        assert_eq!(cfg.timing.slurmd_timeout_secs, 300);
        assert_eq!(cfg.partitions.len(), 1);
    }

    #[test]
    fn bad_sharing_policy_is_rejected() {
        let text = minimal_toml().replace(r#"sharing = "no""#, r#"sharing = "bogus""#);
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn min_nodes_exceeding_max_nodes_is_rejected() {
        let text = minimal_toml().replace("min_nodes = 1", "min_nodes = 99");
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn damping_out_of_range_is_rejected() {
        let mut text = minimal_toml().to_string();
        text.push_str("\n[scheduler]\nfairshare_damping = 1.5\n");
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn two_default_partitions_is_a_conflict() {
        let mut text = minimal_toml().to_string();
        text.push_str(
            r#"
            [[partitions]]
            name = "debug"
            max_time_secs = 600
            max_nodes = 4
            min_nodes = 1
            sharing = "yes"
            is_default = true
            "#,
        );
        assert!(AppConfig::from_toml(&text).is_err());
    }
}
