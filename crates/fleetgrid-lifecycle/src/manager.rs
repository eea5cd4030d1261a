//! Lifecycle manager — the serialized command interface over the pool.
//!
//! The `LifecycleManager` is the control surface that:
//! - Starts instances through the provisioner and promotes them to running
//! - Drains and stops instances, bounded by a drain timeout
//! - Replaces unhealthy instances without dropping running capacity
//! - Accounts routed connections and applies health/telemetry updates
//! - Purges stopped instances once their retention window has passed

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleet_core::LifecycleConfig;
use fleetgrid_state::{HealthStatus, Instance, InstanceId, InstanceStatus, epoch_millis};

use crate::error::{LifecycleError, LifecycleResult};
use crate::pool::InstancePool;
use crate::provisioner::Provisioner;

/// How a stop command finished its drain phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// All active connections finished before the drain timeout.
    Drained,
    /// The drain timeout elapsed with connections still open.
    DrainTimedOut { remaining: u32 },
}

/// Instance counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: u32,
    pub starting: u32,
    pub running: u32,
    /// Running and healthy.
    pub healthy: u32,
    pub draining: u32,
    pub stopping: u32,
    pub stopped: u32,
}

impl PoolCounts {
    /// Count `instances` by status.
    pub fn tally<'a>(instances: impl IntoIterator<Item = &'a Instance>) -> Self {
        let mut counts = Self::default();
        for inst in instances {
            counts.total += 1;
            match inst.status {
                InstanceStatus::Starting => counts.starting += 1,
                InstanceStatus::Running => {
                    counts.running += 1;
                    if inst.health == HealthStatus::Healthy {
                        counts.healthy += 1;
                    }
                }
                InstanceStatus::Draining => counts.draining += 1,
                InstanceStatus::Stopping => counts.stopping += 1,
                InstanceStatus::Stopped => counts.stopped += 1,
            }
        }
        counts
    }
}

/// A `Starting` instance owned by an in-flight [`LifecycleManager::start`].
///
/// Removed from the pool on drop unless committed, so a cancelled or
/// failed start never leaves a `Starting` record behind.
struct PendingStart {
    pool: Arc<RwLock<InstancePool>>,
    id: InstanceId,
    committed: bool,
}

impl PendingStart {
    fn insert(pool: &Arc<RwLock<InstancePool>>, region: &str) -> Self {
        let inst = pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_starting(region, epoch_millis());
        Self {
            pool: Arc::clone(pool),
            id: inst.id,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        if pool
            .get(&self.id)
            .is_some_and(|i| i.status == InstanceStatus::Starting)
        {
            pool.remove(&self.id);
            debug!(instance = %self.id, "pending start discarded");
        }
    }
}

/// Owner of the instance pool.
///
/// Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct LifecycleManager {
    pool: Arc<RwLock<InstancePool>>,
    provisioner: Arc<dyn Provisioner>,
    config: LifecycleConfig,
    /// Woken whenever a connection closes, so drains can re-check.
    connection_closed: Arc<Notify>,
    /// Background stop tasks still draining.
    drains: Arc<Mutex<JoinSet<()>>>,
}

impl LifecycleManager {
    pub fn new(provisioner: Arc<dyn Provisioner>, config: LifecycleConfig) -> Self {
        Self {
            pool: Arc::new(RwLock::new(InstancePool::new())),
            provisioner,
            config,
            connection_closed: Arc::new(Notify::new()),
            drains: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, InstancePool> {
        self.pool.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InstancePool> {
        self.pool.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Consistent copy of every instance, in insertion order.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.read().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Instance> {
        self.read().get(id).cloned()
    }

    /// Running instances, in insertion order.
    pub fn running(&self) -> Vec<Instance> {
        self.read().iter().filter(|i| i.is_running()).cloned().collect()
    }

    pub fn running_count(&self) -> u32 {
        self.read().iter().filter(|i| i.is_running()).count() as u32
    }

    /// Running and healthy instances, in insertion order.
    pub fn candidates(&self) -> Vec<Instance> {
        self.read().iter().filter(|i| i.is_candidate()).cloned().collect()
    }

    pub fn counts(&self) -> PoolCounts {
        PoolCounts::tally(self.read().iter())
    }

    // ── Start ──────────────────────────────────────────────────────

    /// Start a new instance in `region`.
    ///
    /// The instance is visible as `Starting` while the provisioner works.
    /// On failure or timeout it is discarded and never enters `Running`.
    /// Dropping the future mid-provision discards it the same way.
    pub async fn start(&self, region: &str) -> LifecycleResult<Instance> {
        let pending = PendingStart::insert(&self.pool, region);
        debug!(instance = %pending.id, %region, "provisioning instance");

        let result = tokio::time::timeout(
            self.config.provision_timeout,
            self.provisioner.provision(region),
        )
        .await;

        let reason = match result {
            Ok(Ok(provisioned)) => {
                let running = {
                    let mut pool = self.write();
                    let Some(inst) = pool.get_mut(&pending.id) else {
                        return Err(LifecycleError::NotFound(pending.id.clone()));
                    };
                    inst.handle = Some(provisioned.handle);
                    inst.address = provisioned.address;
                    pool.transition(&pending.id, InstanceStatus::Running, epoch_millis())?
                };
                pending.commit();
                info!(instance = %running.id, %region, "instance running");
                return Ok(running);
            }
            Ok(Err(reason)) => reason,
            Err(_) => format!(
                "timed out after {}ms",
                self.config.provision_timeout.as_millis()
            ),
        };

        warn!(instance = %pending.id, %region, %reason, "provisioning failed, instance discarded");
        drop(pending);
        Err(LifecycleError::Provisioning {
            region: region.to_string(),
            reason,
        })
    }

    // ── Stop ───────────────────────────────────────────────────────

    /// Move a running instance to `Draining`.
    ///
    /// From this point the router no longer selects it.
    pub fn begin_drain(&self, id: &str) -> LifecycleResult<Instance> {
        let inst = self
            .write()
            .transition(id, InstanceStatus::Draining, epoch_millis())?;
        debug!(instance = %id, connections = inst.active_connections, "draining instance");
        Ok(inst)
    }

    /// Drain, deprovision and stop an instance.
    pub async fn stop(&self, id: &str) -> LifecycleResult<StopOutcome> {
        self.begin_drain(id)?;
        self.finish_stop(id).await
    }

    /// Begin draining now and complete the stop on a tracked background task.
    pub fn stop_in_background(&self, id: &str) -> LifecycleResult<()> {
        self.begin_drain(id)?;
        let manager = self.clone();
        let id = id.to_string();
        let mut drains = self.drains.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished drains so the set does not grow without bound.
        while drains.try_join_next().is_some() {}
        drains.spawn(async move {
            if let Err(e) = manager.finish_stop(&id).await {
                error!(instance = %id, error = %e, "background stop failed");
            }
        });
        Ok(())
    }

    /// Wait for drain, then `Draining → Stopping → Stopped`.
    async fn finish_stop(&self, id: &str) -> LifecycleResult<StopOutcome> {
        let outcome = self.wait_for_drain(id).await;
        if let StopOutcome::DrainTimedOut { remaining } = outcome {
            warn!(
                instance = %id,
                remaining,
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "drain timeout exceeded, forcing stop"
            );
        }

        let stopping = self
            .write()
            .transition(id, InstanceStatus::Stopping, epoch_millis())?;

        if let Some(handle) = stopping.handle.as_deref() {
            match tokio::time::timeout(
                self.config.provision_timeout,
                self.provisioner.deprovision(handle),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(instance = %id, %handle, error = %e, "deprovision failed"),
                Err(_) => warn!(instance = %id, %handle, "deprovision timed out"),
            }
        }

        self.write()
            .transition(id, InstanceStatus::Stopped, epoch_millis())?;
        info!(instance = %id, ?outcome, "instance stopped");
        Ok(outcome)
    }

    async fn wait_for_drain(&self, id: &str) -> StopOutcome {
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            loop {
                let notified = self.connection_closed.notified();
                tokio::pin!(notified);
                // Register before checking so a close between the check and
                // the await is not missed.
                notified.as_mut().enable();
                if self.active_connections(id).unwrap_or(0) == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await;

        match drained {
            Ok(()) => StopOutcome::Drained,
            Err(_) => StopOutcome::DrainTimedOut {
                remaining: self.active_connections(id).unwrap_or(0),
            },
        }
    }

    /// Wait for every background stop to finish its drain and deprovision.
    pub async fn wait_for_drains(&self) {
        let mut drains = {
            let mut guard = self.drains.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let pending = drains.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight drains");
        }
        while drains.join_next().await.is_some() {}
    }

    // ── Replace ────────────────────────────────────────────────────

    /// Replace a running instance with a fresh one in the same region.
    ///
    /// The new instance is running before the old one starts draining, so
    /// the running count never drops below its value before the call.
    pub async fn replace(&self, id: &str) -> LifecycleResult<Instance> {
        let old = self
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if old.status != InstanceStatus::Running {
            return Err(LifecycleError::NotRunning {
                id: id.to_string(),
                status: old.status,
            });
        }

        let replacement = self.start(&old.region).await?;

        match self.stop_in_background(id) {
            Ok(()) => {}
            // Already being stopped by someone else while we provisioned.
            Err(LifecycleError::InvalidTransition { from, .. }) => {
                debug!(instance = %id, status = %from, "replaced instance already leaving the pool");
            }
            Err(e) => return Err(e),
        }

        info!(old = %id, new = %replacement.id, region = %old.region, "instance replaced");
        Ok(replacement)
    }

    // ── Connection accounting ──────────────────────────────────────

    fn active_connections(&self, id: &str) -> Option<u32> {
        self.read().get(id).map(|i| i.active_connections)
    }

    /// Count a routed connection against an instance.
    ///
    /// Only running instances accept new connections, so a router that
    /// raced with a stop gets `NotRunning` and can pick again.
    pub fn open_connection(&self, id: &str) -> LifecycleResult<u32> {
        let mut pool = self.write();
        let inst = pool
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if inst.status != InstanceStatus::Running {
            return Err(LifecycleError::NotRunning {
                id: id.to_string(),
                status: inst.status,
            });
        }
        inst.active_connections += 1;
        Ok(inst.active_connections)
    }

    /// Release a routed connection. Wakes any drain waiting on this instance.
    pub fn close_connection(&self, id: &str) -> LifecycleResult<u32> {
        let remaining = {
            let mut pool = self.write();
            let inst = pool
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
            inst.active_connections = inst.active_connections.saturating_sub(1);
            inst.active_connections
        };
        self.connection_closed.notify_waiters();
        Ok(remaining)
    }

    // ── Health and telemetry ───────────────────────────────────────

    /// Set the health of a running instance, returning the previous value.
    pub fn set_health(&self, id: &str, health: HealthStatus) -> LifecycleResult<HealthStatus> {
        let mut pool = self.write();
        let inst = pool
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if inst.status != InstanceStatus::Running {
            return Err(LifecycleError::NotRunning {
                id: id.to_string(),
                status: inst.status,
            });
        }
        let previous = inst.health;
        inst.health = health;
        Ok(previous)
    }

    /// Apply a telemetry sample. CPU and memory are clamped to 0–100.
    ///
    /// When `connections` is given it replaces the routed connection count.
    pub fn apply_telemetry(
        &self,
        id: &str,
        cpu: f64,
        memory: f64,
        connections: Option<u32>,
    ) -> LifecycleResult<()> {
        {
            let mut pool = self.write();
            let inst = pool
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
            inst.cpu = clamp_percent(cpu);
            inst.memory = clamp_percent(memory);
            if let Some(c) = connections {
                inst.active_connections = c;
            }
        }
        if connections.is_some() {
            self.connection_closed.notify_waiters();
        }
        Ok(())
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Purge stopped instances older than the retention window at `now`.
    pub fn cleanup(&self, now: u64) -> Vec<InstanceId> {
        let retention_ms = self.config.retention.as_millis() as u64;
        let purged = self.write().purge_stopped(now, retention_ms);
        for id in &purged {
            debug!(instance = %id, "purged stopped instance");
        }
        purged
    }

    /// Run the cleanup loop until shutdown.
    pub async fn run_cleanup(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "instance cleanup started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let purged = self.cleanup(epoch_millis());
                    if !purged.is_empty() {
                        info!(count = purged.len(), "cleaned up stopped instances");
                    }
                }
                _ = shutdown.changed() => {
                    info!("instance cleanup shutting down");
                    break;
                }
            }
        }
    }
}

fn clamp_percent(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) }
}
