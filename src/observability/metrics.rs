//! Cluster-wide counters: a small struct with one `record_*` method per
//! event, backed by plain atomics.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub schedule_passes: u64,
    pub backfill_starts: u64,
    pub rpc_requests: u64,
    pub rpc_errors: u64,
}

/// Shared via `Arc` across the scheduler, job store callers, and the RPC
/// dispatcher; every counter is independently relaxed since ordering
/// between them carries no correctness meaning, only a point-in-time read.
#[derive(Default)]
pub struct ClusterMetrics {
    jobs_submitted: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    schedule_passes: AtomicU64,
    backfill_starts: AtomicU64,
    rpc_requests: AtomicU64,
    rpc_errors: AtomicU64,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_jobs_started(&self, count: u64) {
        self.jobs_started.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_job_completed(&self, success: bool) {
        if success {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_job_cancelled(&self) {
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_pass(&self) {
        self.schedule_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill_starts(&self, count: u64) {
        self.backfill_starts.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rpc_request(&self, ok: bool) {
        self.rpc_requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.rpc_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            schedule_passes: self.schedule_passes.load(Ordering::Relaxed),
            backfill_starts: self.backfill_starts.load(Ordering::Relaxed),
            rpc_requests: self.rpc_requests.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let m = ClusterMetrics::new();
        m.record_job_submitted();
        m.record_job_submitted();
        m.record_job_completed(true);
        m.record_job_completed(false);
        m.record_rpc_request(true);
        m.record_rpc_request(false);

        let snap = m.snapshot();
        assert_eq!(snap.jobs_submitted, 2);
        assert_eq!(snap.jobs_completed, 1);
        assert_eq!(snap.jobs_failed, 1);
        assert_eq!(snap.rpc_requests, 2);
        assert_eq!(snap.rpc_errors, 1);
    }
}
