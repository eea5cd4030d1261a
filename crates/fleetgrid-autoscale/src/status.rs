//! Fleet status — counts, aggregate metrics and recent scaling events.

use serde::Serialize;
use tracing::warn;

use fleetgrid_lifecycle::{LifecycleManager, PoolCounts};
use fleetgrid_metrics::aggregate;
use fleetgrid_state::{EventRecorder, ScalingEvent};

/// Point-in-time view of the fleet for operators and dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetStatus {
    pub total_instances: u32,
    pub starting_instances: u32,
    pub running_instances: u32,
    pub healthy_instances: u32,
    pub draining_instances: u32,
    pub total_connections: u64,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    /// Most recent scaling events, oldest first.
    pub recent_events: Vec<ScalingEvent>,
}

/// Build a [`FleetStatus`] from one pool snapshot and the event log.
///
/// If the event log cannot be read the status is still returned, with no
/// events.
pub fn fleet_status(
    lifecycle: &LifecycleManager,
    recorder: &EventRecorder,
    limit: usize,
) -> FleetStatus {
    let instances = lifecycle.snapshot();
    let counts = PoolCounts::tally(&instances);
    let metrics = aggregate(&instances);

    let recent_events = recorder.recent(limit).unwrap_or_else(|e| {
        warn!(error = %e, "failed to read recent scaling events");
        Vec::new()
    });

    FleetStatus {
        total_instances: counts.total,
        starting_instances: counts.starting,
        running_instances: counts.running,
        healthy_instances: counts.healthy,
        draining_instances: counts.draining,
        total_connections: metrics.total_connections,
        avg_cpu: metrics.avg_cpu,
        avg_memory: metrics.avg_memory,
        recent_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use fleet_core::LifecycleConfig;
    use fleetgrid_lifecycle::{DeprovisionFuture, ProvisionFuture, ProvisionedInstance, Provisioner};
    use fleetgrid_state::{EventStore, HealthStatus, ScalingKind, ScalingTrigger};

    struct InstantProvisioner(AtomicU64);

    impl Provisioner for InstantProvisioner {
        fn provision<'a>(&'a self, _region: &'a str) -> ProvisionFuture<'a> {
            let n = self.0.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move {
                Ok(ProvisionedInstance {
                    handle: format!("h{n}"),
                    address: None,
                })
            })
        }

        fn deprovision<'a>(&'a self, _handle: &'a str) -> DeprovisionFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn status_reports_counts_metrics_and_events() {
        let lifecycle = LifecycleManager::new(
            Arc::new(InstantProvisioner(AtomicU64::new(0))),
            LifecycleConfig::default(),
        );
        let a = lifecycle.start("us-east-1").await.unwrap();
        let b = lifecycle.start("us-west-2").await.unwrap();
        let c = lifecycle.start("eu-west-1").await.unwrap();
        lifecycle.apply_telemetry(&a.id, 40.0, 20.0, Some(4)).unwrap();
        lifecycle.apply_telemetry(&b.id, 60.0, 40.0, Some(6)).unwrap();
        lifecycle.set_health(&b.id, HealthStatus::Unhealthy).unwrap();
        lifecycle.begin_drain(&c.id).unwrap();

        let recorder = EventRecorder::new(Arc::new(EventStore::open_in_memory().unwrap()));
        for ts in 1..=12u64 {
            recorder
                .record(&ScalingEvent {
                    id: recorder.next_id(ts),
                    kind: ScalingKind::ScaleUp,
                    reason: "test".to_string(),
                    instances_before: 1,
                    instances_after: 2,
                    timestamp: ts,
                    duration_ms: 0,
                    failure: None,
                    trigger: ScalingTrigger::Manual,
                })
                .unwrap();
        }

        let status = fleet_status(&lifecycle, &recorder, 10);
        assert_eq!(status.total_instances, 3);
        assert_eq!(status.running_instances, 2);
        assert_eq!(status.healthy_instances, 1);
        assert_eq!(status.draining_instances, 1);
        assert_eq!(status.total_connections, 10);
        assert_eq!(status.avg_cpu, 50.0);
        assert_eq!(status.avg_memory, 30.0);
        assert_eq!(status.recent_events.len(), 10);
        assert_eq!(status.recent_events.last().unwrap().timestamp, 12);
    }

    #[tokio::test]
    async fn counts_and_metrics_describe_the_same_pool() {
        let lifecycle = LifecycleManager::new(
            Arc::new(InstantProvisioner(AtomicU64::new(0))),
            LifecycleConfig::default(),
        );
        let recorder = EventRecorder::new(Arc::new(EventStore::open_in_memory().unwrap()));
        let a = lifecycle.start("us-east-1").await.unwrap();
        lifecycle.start("us-east-1").await.unwrap();
        lifecycle.apply_telemetry(&a.id, 80.0, 60.0, Some(3)).unwrap();

        let instances = lifecycle.snapshot();
        let status = fleet_status(&lifecycle, &recorder, 10);
        assert_eq!(PoolCounts::tally(&instances), lifecycle.counts());
        assert_eq!(status.running_instances, aggregate(&instances).running_count);
        assert_eq!(status.total_connections, 3);
        assert_eq!(status.avg_cpu, 40.0);
    }
}
