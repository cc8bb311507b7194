//! Span-per-operation tracing and lightweight counters: `tracing` wraps
//! `tracing::Span` construction per subsystem event, `metrics` is a
//! small `Arc`-shared atomic counter set.

pub mod metrics;
pub mod tracing;

pub use metrics::ClusterMetrics;
pub use tracing::ClusterTracer;
