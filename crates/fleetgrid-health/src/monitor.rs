//! Health checker — periodic probing and replacement of unhealthy instances.
//!
//! One tick probes every running instance concurrently. Ticks never
//! overlap: the loop waits for the probes and any replacements of one tick
//! before sleeping until the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleet_core::LoadBalancerConfig;
use fleetgrid_lifecycle::LifecycleManager;
use fleetgrid_state::{HealthStatus, InstanceId};

use crate::checker::{HealthTracker, ProbeResult, Prober};

/// Outcome of one health tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub probed: usize,
    /// Instances classified unhealthy this tick.
    pub unhealthy: Vec<InstanceId>,
    /// (old, new) pairs for successful replacements.
    pub replaced: Vec<(InstanceId, InstanceId)>,
    pub replace_failures: usize,
}

pub struct HealthChecker {
    lifecycle: LifecycleManager,
    prober: Arc<dyn Prober>,
    interval: Duration,
    timeout: Duration,
    unhealthy_threshold: u32,
    /// Per-instance failure streaks: instance_id → tracker.
    trackers: Mutex<HashMap<InstanceId, HealthTracker>>,
}

impl HealthChecker {
    pub fn new(
        lifecycle: LifecycleManager,
        prober: Arc<dyn Prober>,
        config: &LoadBalancerConfig,
    ) -> Self {
        Self {
            lifecycle,
            prober,
            interval: config.health_check_interval,
            timeout: config.health_check_timeout,
            unhealthy_threshold: config.unhealthy_threshold,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Probe every running instance once and replace the unhealthy ones.
    pub async fn check_all(&self) -> HealthReport {
        let mut report = self.probe_all().await;
        self.replace_unhealthy(&mut report).await;
        report
    }

    /// Probe every running instance and record the health classification.
    async fn probe_all(&self) -> HealthReport {
        let running = self.lifecycle.running();
        let mut report = HealthReport {
            probed: running.len(),
            ..HealthReport::default()
        };

        let mut probes = JoinSet::new();
        for inst in running {
            let prober = Arc::clone(&self.prober);
            let timeout = self.timeout;
            probes.spawn(async move {
                let result = tokio::time::timeout(timeout, prober.probe(&inst, timeout))
                    .await
                    .unwrap_or(ProbeResult::Failed);
                (inst.id, result)
            });
        }

        let mut results = Vec::with_capacity(report.probed);
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => error!(error = %e, "health probe task failed"),
            }
        }

        {
            let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
            for (id, result) in results {
                let status = trackers
                    .entry(id.clone())
                    .or_insert_with(|| HealthTracker::new(self.unhealthy_threshold))
                    .record(result);

                match self.lifecycle.set_health(&id, status) {
                    Ok(previous) if previous != status => {
                        info!(instance = %id, from = ?previous, to = ?status, "instance health changed");
                    }
                    Ok(_) => {}
                    // Stopped or draining while the probe was in flight.
                    Err(e) => {
                        debug!(instance = %id, error = %e, "skipping health update");
                        continue;
                    }
                }

                if status == HealthStatus::Unhealthy {
                    report.unhealthy.push(id);
                }
            }

            // Forget instances that are no longer running.
            let live: Vec<InstanceId> = self.lifecycle.running().into_iter().map(|i| i.id).collect();
            trackers.retain(|id, _| live.contains(id));
        }

        report
    }

    /// Replace every instance in `report.unhealthy`, concurrently.
    async fn replace_unhealthy(&self, report: &mut HealthReport) {
        let mut replacements = JoinSet::new();
        for id in report.unhealthy.clone() {
            let lifecycle = self.lifecycle.clone();
            replacements.spawn(async move {
                let result = lifecycle.replace(&id).await;
                (id, result)
            });
        }
        while let Some(joined) = replacements.join_next().await {
            match joined {
                Ok((old, Ok(new))) => {
                    self.forget(&old);
                    report.replaced.push((old, new.id));
                }
                Ok((old, Err(e))) => {
                    warn!(instance = %old, error = %e, "replacement failed, retrying next tick");
                    report.replace_failures += 1;
                }
                Err(e) => {
                    error!(error = %e, "replacement task failed");
                    report.replace_failures += 1;
                }
            }
        }
    }

    fn forget(&self, id: &str) {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Run the health check loop until shutdown.
    ///
    /// In-flight probes are abandoned on shutdown. Replacements that already
    /// began run to completion so no instance is left half-provisioned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_ms = self.timeout.as_millis() as u64,
            threshold = self.unhealthy_threshold,
            "health checker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
            let mut report = tokio::select! {
                report = self.probe_all() => report,
                _ = shutdown.changed() => break,
            };
            self.replace_unhealthy(&mut report).await;
            if !report.unhealthy.is_empty() {
                info!(
                    probed = report.probed,
                    unhealthy = report.unhealthy.len(),
                    replaced = report.replaced.len(),
                    failures = report.replace_failures,
                    "health check completed"
                );
            } else {
                debug!(probed = report.probed, "health check completed");
            }
        }
        info!("health checker shutting down");
    }
}
