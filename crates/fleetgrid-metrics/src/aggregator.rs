//! Metrics aggregator — pool-wide resource snapshot over running instances.
//!
//! Telemetry is pulled concurrently, one sample per running instance, each
//! bounded by the sample timeout. A failed or late sample leaves the
//! instance's previous values in place.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use fleetgrid_lifecycle::LifecycleManager;
use fleetgrid_state::{HealthStatus, Instance};

use crate::telemetry::{TelemetrySample, TelemetrySource};

/// Aggregate metrics over the running instances of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub total_connections: u64,
    pub healthy_count: u32,
    pub running_count: u32,
}

/// Outcome of one telemetry refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub sampled: usize,
    pub failed: usize,
}

/// Compute pool metrics from an instance snapshot.
///
/// Only `running` instances count. No running instances gives all zeros.
pub fn aggregate(instances: &[Instance]) -> PoolMetrics {
    let running: Vec<&Instance> = instances.iter().filter(|i| i.is_running()).collect();
    if running.is_empty() {
        return PoolMetrics::default();
    }

    let n = running.len() as f64;
    PoolMetrics {
        avg_cpu: running.iter().map(|i| i.cpu).sum::<f64>() / n,
        avg_memory: running.iter().map(|i| i.memory).sum::<f64>() / n,
        total_connections: running.iter().map(|i| i.active_connections as u64).sum(),
        healthy_count: running
            .iter()
            .filter(|i| i.health == HealthStatus::Healthy)
            .count() as u32,
        running_count: running.len() as u32,
    }
}

pub struct MetricsAggregator {
    lifecycle: LifecycleManager,
    source: Arc<dyn TelemetrySource>,
    sample_timeout: Duration,
    interval: Duration,
}

impl MetricsAggregator {
    pub fn new(
        lifecycle: LifecycleManager,
        source: Arc<dyn TelemetrySource>,
        sample_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            source,
            sample_timeout,
            interval,
        }
    }

    /// Current pool metrics from the lifecycle manager's snapshot.
    pub fn snapshot(&self) -> PoolMetrics {
        aggregate(&self.lifecycle.snapshot())
    }

    /// Pull one sample per running instance and apply it to the pool.
    pub async fn refresh(&self) -> RefreshReport {
        let mut tasks = JoinSet::new();
        for inst in self.lifecycle.running() {
            let source = Arc::clone(&self.source);
            let timeout = self.sample_timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, source.sample(&inst)).await {
                    Ok(r) => r,
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                };
                (inst.id, result)
            });
        }

        let mut report = RefreshReport::default();
        while let Some(joined) = tasks.join_next().await {
            let Ok((id, result)) = joined else {
                report.failed += 1;
                continue;
            };
            match result {
                Ok(TelemetrySample {
                    cpu,
                    memory,
                    active_connections,
                }) => {
                    // The instance may have left the pool while we sampled.
                    if let Err(e) = self
                        .lifecycle
                        .apply_telemetry(&id, cpu, memory, active_connections)
                    {
                        debug!(instance = %id, error = %e, "dropping telemetry sample");
                    } else {
                        report.sampled += 1;
                    }
                }
                Err(reason) => {
                    warn!(instance = %id, %reason, "telemetry sample failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Run the refresh loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "metrics aggregator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let report = self.refresh().await;
                    let metrics = self.snapshot();
                    debug!(
                        sampled = report.sampled,
                        failed = report.failed,
                        avg_cpu = metrics.avg_cpu,
                        avg_memory = metrics.avg_memory,
                        connections = metrics.total_connections,
                        "metrics refreshed"
                    );
                }
                _ = shutdown.changed() => {
                    info!("metrics aggregator shutting down");
                    break;
                }
            }
        }
    }
}
