//! Distributed-tracing spans, one constructor per subsystem entry point.
//! A thin struct builds `tracing::Span`s with the fields each operation
//! cares about, left for the caller to `.enter()` around the work.

use tracing::{span, Level, Span};

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { service_name: "clusterd".to_string() }
    }
}

pub struct ClusterTracer {
    config: TracingConfig,
}

impl ClusterTracer {
    pub fn new(config: TracingConfig) -> Self {
        Self { config }
    }

    pub fn start_submit_span(&self, job_id: u64, partition: &str) -> Span {
        span!(
            Level::INFO,
            "job.submit",
            job.id = job_id,
            job.partition = partition,
            service = %self.config.service_name,
        )
    }

    pub fn start_schedule_pass_span(&self, partition: &str) -> Span {
        span!(Level::INFO, "scheduler.pass", partition, service = %self.config.service_name)
    }

    pub fn start_backfill_pass_span(&self, partition: &str) -> Span {
        span!(Level::INFO, "scheduler.backfill", partition, service = %self.config.service_name)
    }

    pub fn start_job_state_transition_span(&self, job_id: u64, from: &str, to: &str) -> Span {
        span!(
            Level::INFO,
            "job.state_transition",
            job.id = job_id,
            state.from = from,
            state.to = to,
            service = %self.config.service_name,
        )
    }

    pub fn start_rpc_span(&self, op: &str) -> Span {
        span!(Level::INFO, "rpc.dispatch", rpc.op = op, service = %self.config.service_name)
    }
}

impl Default for ClusterTracer {
    fn default() -> Self {
        Self::new(TracingConfig::default())
    }
}
