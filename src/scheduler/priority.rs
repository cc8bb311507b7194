//! Priority composition (spec §4.F): `prio(J) = base_prio(J) +
//! qos.priority(J) + fair_share_factor(assoc(J)) + age_factor(now -
//! submit(J))`. Held jobs (`base_prio = 0`) are skipped entirely.

use crate::assoc::AssociationTree;
use crate::error::ClusterResult;
use crate::job::Job;
use crate::qos::QosSet;
use std::time::{Duration, SystemTime};

/// Scales seconds-since-submit into a priority contribution. Configured as
/// a simple linear ramp capped at `max_age_factor`, the common shape for
/// an age-based priority boost.
pub struct AgeFactorConfig {
    pub points_per_hour: f64,
    pub max_age_factor: f64,
}

impl Default for AgeFactorConfig {
    fn default() -> Self {
        Self { points_per_hour: 10.0, max_age_factor: 500.0 }
    }
}

fn age_factor(submit_time: SystemTime, now: SystemTime, cfg: &AgeFactorConfig) -> f64 {
    let waited_hours = now
        .duration_since(submit_time)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
        / 3600.0;
    (waited_hours * cfg.points_per_hour).min(cfg.max_age_factor)
}

/// Compute `prio(J)`. A held job (`base_prio == 0`) returns `None`: it is
/// skipped by every admission path, not merely ranked lowest.
pub fn effective_priority(
    job: &Job,
    assoc_tree: &AssociationTree,
    qos_set: &QosSet,
    now: SystemTime,
    age_cfg: &AgeFactorConfig,
) -> ClusterResult<Option<f64>> {
    if job.is_held() {
        return Ok(None);
    }

    let fair_share = assoc_tree.fair_share_factor(job.assoc_id)?;
    let qos_priority = match job.qos_id {
        Some(id) => qos_set.get(id)?.priority as f64,
        None => 0.0,
    };
    let age = age_factor(job.submit_time, now, age_cfg);

    Ok(Some(job.base_prio as f64 + qos_priority + fair_share + age))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_job_has_no_priority() {
        let cfg = AgeFactorConfig::default();
        let now = SystemTime::now();
        assert_eq!(age_factor(now, now, &cfg), 0.0);
    }

    #[test]
    fn age_factor_saturates_at_max() {
        let cfg = AgeFactorConfig { points_per_hour: 100.0, max_age_factor: 50.0 };
        let submit = SystemTime::now() - Duration::from_secs(3600 * 10);
        assert_eq!(age_factor(submit, SystemTime::now(), &cfg), 50.0);
    }
}
