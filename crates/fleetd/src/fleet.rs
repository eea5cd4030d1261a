//! Fleet assembly — wires the components around one lifecycle manager.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use fleet_core::{DEFAULT_REGIONS, LoopIntervals, ResolvedConfig};
use fleetgrid_autoscale::{FleetStatus, ScalingEngine};
use fleetgrid_health::{HealthChecker, Prober};
use fleetgrid_lifecycle::{LifecycleManager, Provisioner};
use fleetgrid_metrics::{MetricsAggregator, TelemetrySource};
use fleetgrid_router::Router;
use fleetgrid_state::{DEFAULT_RECENT_EVENTS, EventLog, EventRecorder};

/// The external systems the fleet talks to.
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub prober: Arc<dyn Prober>,
    pub events: Arc<dyn EventLog>,
}

/// Every control component, sharing one instance pool.
pub struct Fleet {
    pub lifecycle: LifecycleManager,
    pub aggregator: Arc<MetricsAggregator>,
    pub health: Arc<HealthChecker>,
    pub router: Arc<Router>,
    pub engine: Arc<ScalingEngine>,
    regions: Vec<String>,
    min_instances: u32,
    intervals: LoopIntervals,
}

impl Fleet {
    pub fn assemble(config: &ResolvedConfig, collaborators: Collaborators) -> Self {
        let lifecycle = LifecycleManager::new(collaborators.provisioner, config.lifecycle.clone());
        let regions = if config.regions.is_empty() {
            DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect()
        } else {
            config.regions.clone()
        };

        // Telemetry shares the probe budget: both are quick reads from the
        // instance itself.
        let aggregator = Arc::new(MetricsAggregator::new(
            lifecycle.clone(),
            collaborators.telemetry,
            config.load_balancer.health_check_timeout,
            config.intervals.metrics,
        ));
        let health = Arc::new(HealthChecker::new(
            lifecycle.clone(),
            collaborators.prober,
            &config.load_balancer,
        ));
        let router = Arc::new(Router::new(lifecycle.clone(), &config.load_balancer));
        let engine = Arc::new(ScalingEngine::new(
            lifecycle.clone(),
            Arc::clone(&aggregator),
            EventRecorder::new(collaborators.events),
            config.scaling.clone(),
            regions.clone(),
            config.intervals.scaling,
        ));

        Self {
            lifecycle,
            aggregator,
            health,
            router,
            engine,
            regions,
            min_instances: config.scaling.min_instances,
            intervals: config.intervals.clone(),
        }
    }

    /// Start `min_instances` instances across the regions.
    ///
    /// Failures are logged; the scaling loop restores the floor later.
    /// Returns how many instances came up.
    pub async fn bootstrap(&self) -> usize {
        let mut starts = JoinSet::new();
        for i in 0..self.min_instances as usize {
            let lifecycle = self.lifecycle.clone();
            let region = self.regions[i % self.regions.len()].clone();
            starts.spawn(async move { lifecycle.start(&region).await });
        }

        let mut started = 0;
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok(Ok(_)) => started += 1,
                Ok(Err(e)) => warn!(error = %e, "bootstrap start failed"),
                Err(e) => warn!(error = %e, "bootstrap task failed"),
            }
        }
        info!(started, wanted = self.min_instances, "fleet bootstrapped");
        started
    }

    /// Spawn the scaling, health, metrics and cleanup loops.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let engine = Arc::clone(&self.engine);
        let health = Arc::clone(&self.health);
        let aggregator = Arc::clone(&self.aggregator);
        let lifecycle = self.lifecycle.clone();
        let cleanup_interval = self.intervals.cleanup;

        let scaling_shutdown = shutdown.clone();
        let health_shutdown = shutdown.clone();
        let metrics_shutdown = shutdown.clone();
        let cleanup_shutdown = shutdown;

        vec![
            tokio::spawn(async move { engine.run(scaling_shutdown).await }),
            tokio::spawn(async move { health.run(health_shutdown).await }),
            tokio::spawn(async move { aggregator.run(metrics_shutdown).await }),
            tokio::spawn(async move {
                lifecycle
                    .run_cleanup(cleanup_interval, cleanup_shutdown)
                    .await
            }),
        ]
    }

    /// Wait for the loops to exit, then for in-flight drains to finish.
    pub async fn join(&self, handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "control loop panicked");
            }
        }
        self.lifecycle.wait_for_drains().await;
    }

    pub fn status(&self) -> FleetStatus {
        self.engine.status(DEFAULT_RECENT_EVENTS)
    }
}
