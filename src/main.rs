//! Controller daemon entry point: loads config, recovers persisted state,
//! then runs the handful of long-lived roles the daemon needs — the RPC
//! dispatcher, a scheduler worker, a backfill worker, and an
//! accounting-I/O worker — each an explicit `tokio::task` loop rather than
//! a green-thread-per-role scheduler.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use clusterd::config::AppConfig;
use clusterd::context::ClusterContext;
use clusterd::rpc::service::{NullAgentLink, RpcService};
use clusterd::rpc::server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "clusterd")]
#[command(about = "Core cluster workload controller")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "/etc/clusterd/clusterd.toml")]
    config: PathBuf,

    /// Override the controller's listen address (host:port); defaults to
    /// `controller.primary`:`controller.port` from the config file.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

async fn scheduler_loop(ctx: Arc<ClusterContext>) {
    loop {
        let interval = ctx.config().scheduler.tick_interval();
        tokio::time::sleep(interval).await;
        for partition in ctx.partitions.list() {
            if let Err(e) = ctx.schedule_partition(&partition.name) {
                tracing::warn!(partition = %partition.name, error = %e, "scheduler pass failed");
            }
        }
    }
}

async fn backfill_loop(svc: Arc<RpcService>) {
    loop {
        let interval = svc.ctx().config().scheduler.backfill_interval();
        tokio::time::sleep(interval).await;
        for partition in svc.ctx().partitions.list() {
            if let Err(e) = svc.backfill_partition(&partition.name) {
                tracing::warn!(partition = %partition.name, error = %e, "backfill pass failed");
            }
        }
    }
}

/// Periodic atomic state-save so a restart reconciles from a recent
/// snapshot. Piggybacks on the scheduler tick rather than adding a
/// dedicated save-interval config knob.
async fn accounting_io_loop(ctx: Arc<ClusterContext>) {
    loop {
        let interval = ctx.config().scheduler.tick_interval();
        tokio::time::sleep(interval.max(Duration::from_secs(5))).await;
        if let Err(e) = ctx.save_snapshot().await {
            tracing::error!(error = %e, "periodic state save failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config).map_err(|e| format!("failed to load config {}: {e}", cli.config.display()))?;

    let bind_addr = match cli.bind {
        Some(addr) => addr,
        None => format!("{}:{}", config.controller.primary, config.controller.port)
            .parse()
            .map_err(|e| format!("invalid controller address in config: {e}"))?,
    };

    let ctx = Arc::new(ClusterContext::new(config).map_err(|e| format!("failed to build cluster context: {e}"))?);

    let recovered = ctx.recover().await.map_err(|e| format!("state recovery failed: {e}"))?;
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "reconciled stale running jobs on cold start");
    }

    let svc = Arc::new(RpcService::new(ctx.clone(), Arc::new(NullAgentLink)));

    let listener = server::bind(bind_addr).await.map_err(|e| format!("failed to bind RPC listener: {e}"))?;
    tracing::info!(addr = %bind_addr, "clusterd listening");

    let scheduler_task = tokio::spawn(scheduler_loop(ctx.clone()));
    let backfill_task = tokio::spawn(backfill_loop(svc.clone()));
    let accounting_task = tokio::spawn(accounting_io_loop(ctx.clone()));

    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let svc_for_signals = svc.clone();
    let config_path = cli.config.clone();
    let signal_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    match AppConfig::load(&config_path) {
                        Ok(cfg) => {
                            svc_for_signals.ctx().reconfigure(cfg);
                            tracing::info!("reloaded configuration on SIGHUP");
                        }
                        Err(e) => tracing::error!(error = %e, "SIGHUP reconfigure failed, keeping current config"),
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, starting graceful shutdown");
                    let _ = svc_for_signals.shutdown().await;
                    return;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("ctrl-c received, starting graceful shutdown");
                    let _ = svc_for_signals.shutdown().await;
                    return;
                }
            }
        }
    });

    server::serve(listener, svc.clone()).await.map_err(|e| format!("RPC server stopped with error: {e}"))?;

    scheduler_task.abort();
    backfill_task.abort();
    accounting_task.abort();
    signal_task.abort();

    if let Err(e) = ctx.save_snapshot().await {
        tracing::error!(error = %e, "final state save on shutdown failed");
    }

    Ok(())
}
