//! Scaling engine — threshold checks, cooldown, and the start/stop fan-out.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleet_core::{CONNECTIONS_PER_INSTANCE_LIMIT, ConfigResult, DEFAULT_REGIONS, ScalingConfig};
use fleetgrid_lifecycle::LifecycleManager;
use fleetgrid_metrics::{MetricsAggregator, PoolMetrics};
use fleetgrid_state::{
    EventRecorder, ScalingEvent, ScalingKind, ScalingTrigger, StateResult, epoch_millis,
};

use crate::status::{FleetStatus, fleet_status};

/// What one evaluation decided to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDecision {
    ScaleUp { count: u32, reason: String },
    ScaleDown { count: u32, reason: String },
    NoChange,
}

/// Direction of a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

impl FromStr for ScaleDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(ScaleDirection::Up),
            "down" => Ok(ScaleDirection::Down),
            other => Err(format!("unknown scale direction: {other}")),
        }
    }
}

/// Decide on an action for `n` running instances.
///
/// Cooldown is not checked here; the engine does that before calling.
pub fn decide(metrics: &PoolMetrics, n: u32, config: &ScalingConfig) -> ScaleDecision {
    if n < config.min_instances {
        return ScaleDecision::ScaleUp {
            count: config.min_instances - n,
            reason: format!(
                "Below minimum: {n} running, minimum {}",
                config.min_instances
            ),
        };
    }
    if n > config.max_instances {
        return ScaleDecision::ScaleDown {
            count: n - config.max_instances,
            reason: format!(
                "Above maximum: {n} running, maximum {}",
                config.max_instances
            ),
        };
    }

    let per_instance = if n == 0 {
        0.0
    } else {
        metrics.total_connections as f64 / n as f64
    };

    if metrics.avg_cpu > config.scale_up_threshold
        || metrics.avg_memory > config.scale_up_threshold
        || per_instance > CONNECTIONS_PER_INSTANCE_LIMIT
    {
        let wanted = (n as f64 * 0.5).ceil() as u32;
        let count = wanted.min(config.max_instances - n);
        if count == 0 {
            debug!(running = n, max = config.max_instances, "scale-up wanted but pool is at maximum");
            return ScaleDecision::NoChange;
        }
        return ScaleDecision::ScaleUp {
            count,
            reason: format!(
                "High resource usage: CPU {:.1}%, Memory {:.1}%, {:.0} connections/instance",
                metrics.avg_cpu, metrics.avg_memory, per_instance
            ),
        };
    }

    if metrics.avg_cpu < config.scale_down_threshold
        && metrics.avg_memory < config.scale_down_threshold
        && n > config.min_instances
    {
        let wanted = (n as f64 * 0.25).floor() as u32;
        let count = wanted.min(n - config.min_instances);
        if count == 0 {
            debug!(running = n, "scale-down wanted but floor(n * 0.25) is zero");
            return ScaleDecision::NoChange;
        }
        return ScaleDecision::ScaleDown {
            count,
            reason: format!(
                "Low resource usage: CPU {:.1}%, Memory {:.1}%",
                metrics.avg_cpu, metrics.avg_memory
            ),
        };
    }

    ScaleDecision::NoChange
}

/// Cooldown state. Guarded by the engine's async mutex, which also
/// serializes every scaling action.
struct ScaleState {
    /// Epoch millis of the last action; `None` until the first one.
    last_scaling_action: Option<u64>,
}

/// The scaling engine evaluates pool metrics and grows or shrinks the pool.
pub struct ScalingEngine {
    lifecycle: LifecycleManager,
    aggregator: Arc<MetricsAggregator>,
    recorder: EventRecorder,
    config: RwLock<ScalingConfig>,
    regions: Vec<String>,
    /// Next region to start an instance in.
    region_cursor: AtomicUsize,
    state: Mutex<ScaleState>,
    interval: Duration,
}

impl ScalingEngine {
    pub fn new(
        lifecycle: LifecycleManager,
        aggregator: Arc<MetricsAggregator>,
        recorder: EventRecorder,
        config: ScalingConfig,
        regions: Vec<String>,
        interval: Duration,
    ) -> Self {
        let regions = if regions.is_empty() {
            DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect()
        } else {
            regions
        };
        Self {
            lifecycle,
            aggregator,
            recorder,
            config: RwLock::new(config),
            regions,
            region_cursor: AtomicUsize::new(0),
            state: Mutex::new(ScaleState {
                last_scaling_action: None,
            }),
            interval,
        }
    }

    pub fn config(&self) -> ScalingConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the scaling config. The new config is validated first and
    /// applies from the next evaluation.
    pub fn update_config(&self, config: ScalingConfig) -> ConfigResult<()> {
        config.validate()?;
        info!(
            min = config.min_instances,
            max = config.max_instances,
            up = config.scale_up_threshold,
            down = config.scale_down_threshold,
            cooldown_secs = config.cooldown.as_secs(),
            "scaling config updated"
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Epoch millis of the last scaling action, if any.
    pub async fn last_scaling_action(&self) -> Option<u64> {
        self.state.lock().await.last_scaling_action
    }

    /// Run one evaluation now.
    pub async fn tick(&self) -> Option<ScalingEvent> {
        self.tick_at(epoch_millis()).await
    }

    /// Run one evaluation as if the current time were `now` (epoch millis).
    ///
    /// Returns the recorded event when an action was taken.
    pub async fn tick_at(&self, now: u64) -> Option<ScalingEvent> {
        let mut state = self.state.lock().await;
        let config = self.config();

        if let Some(last) = state.last_scaling_action
            && now.saturating_sub(last) < config.cooldown.as_millis() as u64
        {
            debug!(
                since_last_ms = now.saturating_sub(last),
                cooldown_ms = config.cooldown.as_millis() as u64,
                "in cooldown, skipping evaluation"
            );
            return None;
        }

        let metrics = self.aggregator.snapshot();
        let event = match decide(&metrics, metrics.running_count, &config) {
            ScaleDecision::NoChange => return None,
            ScaleDecision::ScaleUp { count, reason } => {
                self.scale_up(count, reason, ScalingTrigger::Automatic).await
            }
            ScaleDecision::ScaleDown { count, reason } => {
                self.scale_down(count, reason, ScalingTrigger::Automatic)
            }
        };

        state.last_scaling_action = Some(now);
        Some(event)
    }

    /// Add or remove `count` instances, bypassing the thresholds.
    ///
    /// The count is clamped to the pool bounds. The cooldown timestamp is
    /// updated even when clamping leaves nothing to do.
    pub async fn manual_scale(&self, direction: ScaleDirection, count: u32) -> Option<ScalingEvent> {
        let mut state = self.state.lock().await;
        let config = self.config();
        let n = self.lifecycle.running_count();

        let event = match direction {
            ScaleDirection::Up => {
                let clamped = count.min(config.max_instances.saturating_sub(n));
                if clamped < count {
                    info!(requested = count, clamped, max = config.max_instances, "manual scale-up clamped");
                }
                if clamped == 0 {
                    None
                } else {
                    let reason = format!("Manual scale-up by {clamped}");
                    Some(self.scale_up(clamped, reason, ScalingTrigger::Manual).await)
                }
            }
            ScaleDirection::Down => {
                let clamped = count.min(n.saturating_sub(config.min_instances));
                if clamped < count {
                    info!(requested = count, clamped, min = config.min_instances, "manual scale-down clamped");
                }
                if clamped == 0 {
                    None
                } else {
                    let reason = format!("Manual scale-down by {clamped}");
                    Some(self.scale_down(clamped, reason, ScalingTrigger::Manual))
                }
            }
        };

        state.last_scaling_action = Some(epoch_millis());
        event
    }

    fn next_region(&self) -> String {
        let idx = self.region_cursor.fetch_add(1, Ordering::Relaxed);
        self.regions[idx % self.regions.len()].clone()
    }

    /// Start `count` instances concurrently, spread across the regions.
    async fn scale_up(&self, count: u32, reason: String, trigger: ScalingTrigger) -> ScalingEvent {
        let started = Instant::now();
        let before = self.lifecycle.running_count();
        info!(count, before, %reason, "scaling up");

        let mut starts = JoinSet::new();
        for _ in 0..count {
            let lifecycle = self.lifecycle.clone();
            let region = self.next_region();
            starts.spawn(async move { lifecycle.start(&region).await });
        }

        let mut failures = Vec::new();
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(e) => failures.push(format!("start task failed: {e}")),
            }
        }

        self.finish(ScalingKind::ScaleUp, reason, trigger, before, count, failures, started)
    }

    /// Stop the `count` running instances with the fewest connections,
    /// oldest first on ties. Drains complete in the background.
    fn scale_down(&self, count: u32, reason: String, trigger: ScalingTrigger) -> ScalingEvent {
        let started = Instant::now();
        let mut running = self.lifecycle.running();
        let before = running.len() as u32;
        info!(count, before, %reason, "scaling down");

        running.sort_by_key(|i| (i.active_connections, i.started_at, i.seq));

        let mut failures = Vec::new();
        for victim in running.iter().take(count as usize) {
            if let Err(e) = self.lifecycle.stop_in_background(&victim.id) {
                failures.push(e.to_string());
            }
        }

        self.finish(ScalingKind::ScaleDown, reason, trigger, before, count, failures, started)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        kind: ScalingKind,
        reason: String,
        trigger: ScalingTrigger,
        before: u32,
        count: u32,
        failures: Vec<String>,
        started: Instant,
    ) -> ScalingEvent {
        let failure = match failures.as_slice() {
            [] => None,
            [first, ..] => {
                warn!(%kind, failed = failures.len(), requested = count, error = %first, "scaling commands rejected");
                Some(format!("{} of {count} commands failed: {first}", failures.len()))
            }
        };

        let timestamp = epoch_millis();
        let event = ScalingEvent {
            id: self.recorder.next_id(timestamp),
            kind,
            reason,
            instances_before: before,
            instances_after: self.lifecycle.running_count(),
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            failure,
            trigger,
        };
        // A failed append is logged by the recorder; the action itself stands.
        let _ = self.recorder.record(&event);
        event
    }

    /// Current fleet status with the `limit` most recent events.
    pub fn status(&self, limit: usize) -> FleetStatus {
        fleet_status(&self.lifecycle, &self.recorder, limit)
    }

    /// Scaling events between `start` and `end` (epoch millis), newest first.
    pub fn history(&self, start: u64, end: u64) -> StateResult<Vec<ScalingEvent>> {
        self.recorder.history(start, end)
    }

    /// Run the scaling loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "scaling engine started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Some(event) = self.tick().await
                        && !event.succeeded()
                    {
                        error!(
                            event_id = %event.id,
                            failure = event.failure.as_deref().unwrap_or(""),
                            "scaling action completed with failures"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;

    use fleet_core::LifecycleConfig;
    use fleetgrid_lifecycle::{DeprovisionFuture, ProvisionFuture, ProvisionedInstance, Provisioner};
    use fleetgrid_metrics::{SampleFuture, TelemetrySource};
    use fleetgrid_state::{EventStore, Instance, InstanceStatus};

    #[derive(Default)]
    struct MockProvisioner {
        next: AtomicU64,
        fail: std::sync::Mutex<bool>,
    }

    impl Provisioner for MockProvisioner {
        fn provision<'a>(&'a self, region: &'a str) -> ProvisionFuture<'a> {
            Box::pin(async move {
                if *self.fail.lock().unwrap() {
                    return Err(format!("no capacity in {region}"));
                }
                let n = self.next.fetch_add(1, Ordering::Relaxed);
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

    struct NoTelemetry;

    impl TelemetrySource for NoTelemetry {
        fn sample<'a>(&'a self, _instance: &'a Instance) -> SampleFuture<'a> {
            Box::pin(async { Err("disabled".to_string()) })
        }
    }

    const MINUTE: u64 = 60_000;

    fn config(min: u32, max: u32) -> ScalingConfig {
        ScalingConfig {
            min_instances: min,
            max_instances: max,
            ..ScalingConfig::default()
        }
    }

    struct Fixture {
        lifecycle: LifecycleManager,
        provisioner: Arc<MockProvisioner>,
        store: EventStore,
        engine: ScalingEngine,
    }

    async fn fixture(running: usize, config: ScalingConfig) -> Fixture {
        let provisioner = Arc::new(MockProvisioner::default());
        let lifecycle = LifecycleManager::new(provisioner.clone(), LifecycleConfig::default());
        for _ in 0..running {
            lifecycle.start("us-east-1").await.unwrap();
        }
        let aggregator = Arc::new(MetricsAggregator::new(
            lifecycle.clone(),
            Arc::new(NoTelemetry),
            Duration::from_secs(1),
            Duration::from_secs(15),
        ));
        let store = EventStore::open_in_memory().unwrap();
        let recorder = EventRecorder::new(Arc::new(store.clone()));
        let engine = ScalingEngine::new(
            lifecycle.clone(),
            aggregator,
            recorder,
            config,
            DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            Duration::from_secs(30),
        );
        Fixture {
            lifecycle,
            provisioner,
            store,
            engine,
        }
    }

    fn load_all(lifecycle: &LifecycleManager, cpu: f64, memory: f64) {
        for inst in lifecycle.running() {
            lifecycle.apply_telemetry(&inst.id, cpu, memory, None).unwrap();
        }
    }

    fn metrics(cpu: f64, memory: f64, connections: u64) -> PoolMetrics {
        PoolMetrics {
            avg_cpu: cpu,
            avg_memory: memory,
            total_connections: connections,
            ..PoolMetrics::default()
        }
    }

    // ── decide ─────────────────────────────────────────────────────

    #[test]
    fn decide_scale_up_on_cpu() {
        let d = decide(&metrics(95.0, 10.0, 0), 2, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleUp { count: 1, .. }));
    }

    #[test]
    fn decide_scale_up_on_memory() {
        let d = decide(&metrics(10.0, 85.0, 0), 4, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleUp { count: 2, .. }));
    }

    #[test]
    fn decide_scale_up_on_connections() {
        let d = decide(&metrics(10.0, 10.0, 3003), 3, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleUp { count: 2, .. }));

        // Exactly 1000 per instance is not over the limit.
        let d = decide(&metrics(50.0, 50.0, 3000), 3, &config(2, 10));
        assert_eq!(d, ScaleDecision::NoChange);
    }

    #[test]
    fn decide_scale_up_capped_at_max() {
        let d = decide(&metrics(95.0, 95.0, 0), 9, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleUp { count: 1, .. }));

        let d = decide(&metrics(95.0, 95.0, 0), 10, &config(2, 10));
        assert_eq!(d, ScaleDecision::NoChange);
    }

    #[test]
    fn decide_scale_down_small_pool_is_noop() {
        // floor(3 * 0.25) = 0
        let d = decide(&metrics(10.0, 10.0, 0), 3, &config(2, 10));
        assert_eq!(d, ScaleDecision::NoChange);
    }

    #[test]
    fn decide_scale_down_respects_min() {
        let d = decide(&metrics(5.0, 5.0, 0), 8, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleDown { count: 2, .. }));

        let d = decide(&metrics(5.0, 5.0, 0), 8, &config(7, 10));
        assert!(matches!(d, ScaleDecision::ScaleDown { count: 1, .. }));
    }

    #[test]
    fn decide_scale_down_needs_both_low() {
        let d = decide(&metrics(5.0, 50.0, 0), 8, &config(2, 10));
        assert_eq!(d, ScaleDecision::NoChange);
    }

    #[test]
    fn decide_restores_floor_before_thresholds() {
        let d = decide(&metrics(5.0, 5.0, 0), 1, &config(3, 10));
        match d {
            ScaleDecision::ScaleUp { count, reason } => {
                assert_eq!(count, 2);
                assert!(reason.starts_with("Below minimum"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Empty pool: no division by zero, floor restored.
        let d = decide(&PoolMetrics::default(), 0, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleUp { count: 2, .. }));
    }

    #[test]
    fn decide_trims_above_max() {
        let d = decide(&metrics(95.0, 95.0, 0), 12, &config(2, 10));
        assert!(matches!(d, ScaleDecision::ScaleDown { count: 2, .. }));
    }

    #[test]
    fn scale_direction_parses() {
        assert_eq!("up".parse::<ScaleDirection>(), Ok(ScaleDirection::Up));
        assert_eq!("down".parse::<ScaleDirection>(), Ok(ScaleDirection::Down));
        assert!("sideways".parse::<ScaleDirection>().is_err());
    }

    // ── engine ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn hot_pool_of_two_gains_one() {
        let f = fixture(2, config(2, 10)).await;
        load_all(&f.lifecycle, 95.0, 40.0);

        let event = f.engine.tick_at(10 * MINUTE).await.unwrap();
        assert_eq!(event.kind, ScalingKind::ScaleUp);
        assert_eq!(event.instances_before, 2);
        assert_eq!(event.instances_after, 3);
        assert_eq!(event.trigger, ScalingTrigger::Automatic);
        assert!(event.succeeded());

        assert_eq!(f.lifecycle.running_count(), 3);
        assert_eq!(f.store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn quiet_small_pool_stops_nothing() {
        let f = fixture(3, config(2, 10)).await;
        load_all(&f.lifecycle, 10.0, 10.0);

        assert!(f.engine.tick_at(10 * MINUTE).await.is_none());
        assert_eq!(f.lifecycle.running_count(), 3);
        assert!(f.store.is_empty().unwrap());
        // No action, no cooldown.
        assert_eq!(f.engine.last_scaling_action().await, None);
    }

    #[tokio::test]
    async fn cooldown_blocks_second_action() {
        let f = fixture(2, config(2, 10)).await;
        load_all(&f.lifecycle, 95.0, 95.0);

        assert!(f.engine.tick_at(10 * MINUTE).await.is_some());
        load_all(&f.lifecycle, 95.0, 95.0);

        // Default cooldown is 5 minutes.
        assert!(f.engine.tick_at(14 * MINUTE).await.is_none());
        assert_eq!(f.lifecycle.running_count(), 3);

        let second = f.engine.tick_at(15 * MINUTE).await.unwrap();
        assert_eq!(second.instances_before, 3);
        assert_eq!(second.instances_after, 5);
    }

    #[tokio::test]
    async fn scale_down_picks_least_loaded() {
        let f = fixture(8, config(2, 10)).await;
        load_all(&f.lifecycle, 5.0, 5.0);
        let running = f.lifecycle.running();
        // Everyone busy except instances 5 and 2.
        for (idx, inst) in running.iter().enumerate() {
            let conns = if idx == 5 || idx == 2 { 0 } else { 10 };
            f.lifecycle
                .apply_telemetry(&inst.id, 5.0, 5.0, Some(conns))
                .unwrap();
        }

        let event = f.engine.tick_at(10 * MINUTE).await.unwrap();
        assert_eq!(event.kind, ScalingKind::ScaleDown);
        assert_eq!(event.instances_before, 8);
        assert_eq!(event.instances_after, 6);

        let leaving: HashSet<_> = f
            .lifecycle
            .snapshot()
            .into_iter()
            .filter(|i| i.status != InstanceStatus::Running)
            .map(|i| i.id)
            .collect();
        let expected: HashSet<_> = [running[2].id.clone(), running[5].id.clone()].into();
        assert_eq!(leaving, expected);

        f.lifecycle.wait_for_drains().await;
    }

    #[tokio::test]
    async fn failed_starts_still_record_event() {
        let f = fixture(2, config(2, 10)).await;
        load_all(&f.lifecycle, 95.0, 95.0);
        *f.provisioner.fail.lock().unwrap() = true;

        let event = f.engine.tick_at(10 * MINUTE).await.unwrap();
        assert!(!event.succeeded());
        assert!(event.failure.as_deref().unwrap().contains("1 of 1"));
        assert_eq!(event.instances_after, 2);
        assert_eq!(f.engine.last_scaling_action().await, Some(10 * MINUTE));
        assert_eq!(f.store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn starts_are_spread_across_regions() {
        let f = fixture(0, config(4, 10)).await;

        let event = f.engine.tick_at(0).await.unwrap();
        assert_eq!(event.instances_after, 4);

        let regions: HashSet<_> = f.lifecycle.running().into_iter().map(|i| i.region).collect();
        assert_eq!(regions.len(), 4);
    }

    #[tokio::test]
    async fn count_stays_within_bounds_across_ticks() {
        let cfg = ScalingConfig {
            cooldown: Duration::ZERO,
            ..config(2, 6)
        };
        let f = fixture(2, cfg).await;

        for tick in 0..10u64 {
            let (cpu, mem) = if tick < 5 { (99.0, 99.0) } else { (1.0, 1.0) };
            load_all(&f.lifecycle, cpu, mem);
            f.engine.tick_at(tick * MINUTE).await;
            let n = f.lifecycle.running_count();
            assert!((2..=6).contains(&n), "tick {tick}: {n} running");
        }
        f.lifecycle.wait_for_drains().await;
    }

    #[tokio::test]
    async fn manual_scale_down_respects_min() {
        let f = fixture(4, config(2, 10)).await;

        let event = f
            .engine
            .manual_scale(ScaleDirection::Down, 10)
            .await
            .unwrap();
        assert_eq!(event.trigger, ScalingTrigger::Manual);
        assert_eq!(event.instances_after, 2);
        assert_eq!(f.lifecycle.running_count(), 2);

        // Already at the floor: nothing to do, but cooldown is refreshed.
        assert!(f.engine.manual_scale(ScaleDirection::Down, 1).await.is_none());
        assert!(f.engine.last_scaling_action().await.is_some());
        f.lifecycle.wait_for_drains().await;
    }

    #[tokio::test]
    async fn manual_scale_up_respects_max() {
        let f = fixture(2, config(2, 5)).await;

        let event = f.engine.manual_scale(ScaleDirection::Up, 10).await.unwrap();
        assert_eq!(event.kind, ScalingKind::ScaleUp);
        assert_eq!(event.instances_after, 5);
    }

    #[tokio::test]
    async fn manual_scale_starts_cooldown() {
        let f = fixture(2, config(2, 10)).await;
        f.engine.manual_scale(ScaleDirection::Up, 1).await.unwrap();
        load_all(&f.lifecycle, 99.0, 99.0);

        // The manual action just happened, so an automatic tick "now" is blocked.
        assert!(f.engine.tick().await.is_none());
    }

    #[tokio::test]
    async fn update_config_validates() {
        let f = fixture(0, config(2, 10)).await;

        assert!(f.engine.update_config(config(5, 3)).is_err());
        assert_eq!(f.engine.config().min_instances, 2);

        f.engine.update_config(config(3, 8)).unwrap();
        assert_eq!(f.engine.config().max_instances, 8);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let cfg = ScalingConfig {
            cooldown: Duration::ZERO,
            ..config(2, 10)
        };
        let f = fixture(2, cfg).await;
        f.engine.manual_scale(ScaleDirection::Up, 1).await.unwrap();
        f.engine.manual_scale(ScaleDirection::Up, 1).await.unwrap();

        let history = f.engine.history(0, u64::MAX).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp >= history[1].timestamp);
        assert_eq!(history[0].instances_after, 4);
    }
}
