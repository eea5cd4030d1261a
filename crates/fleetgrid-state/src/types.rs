//! Domain types for the FleetGrid control system.
//!
//! An [`Instance`] is one unit of worker capacity; a [`ScalingEvent`] is the
//! immutable audit record of one scale-up or scale-down action.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for an instance in the pool.
pub type InstanceId = String;

// ── Instance ──────────────────────────────────────────────────────

/// Runtime state of a single worker instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub region: String,
    pub status: InstanceStatus,
    pub health: HealthStatus,
    /// CPU utilisation, 0–100.
    pub cpu: f64,
    /// Memory utilisation, 0–100.
    pub memory: f64,
    pub active_connections: u32,
    /// Unix timestamp (milliseconds) when the instance was created.
    pub started_at: u64,
    /// Unix timestamp (milliseconds) when the instance reached `Stopped`.
    pub stopped_at: Option<u64>,
    /// Opaque handle returned by the compute provisioner.
    pub handle: Option<String>,
    /// Address used for health probes and telemetry (ip:port).
    pub address: Option<String>,
    /// Pool insertion order, used for deterministic tie-breaks.
    pub seq: u64,
}

impl Instance {
    /// A fresh instance in `Starting`, not yet provisioned.
    pub fn starting(id: InstanceId, region: &str, seq: u64, now: u64) -> Self {
        Self {
            id,
            region: region.to_string(),
            status: InstanceStatus::Starting,
            health: HealthStatus::Healthy,
            cpu: 0.0,
            memory: 0.0,
            active_connections: 0,
            started_at: now,
            stopped_at: None,
            handle: None,
            address: None,
            seq,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// Eligible for routing: running and healthy.
    pub fn is_candidate(&self) -> bool {
        self.status == InstanceStatus::Running && self.health == HealthStatus::Healthy
    }
}

/// Lifecycle status of an instance.
///
/// Transitions only move forward:
/// `Starting → Running → Draining → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Draining,
    Stopping,
    Stopped,
}

impl InstanceStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Starting, Running) | (Running, Draining) | (Draining, Stopping) | (Stopping, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Draining => "draining",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status as determined by health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

// ── Scaling events ────────────────────────────────────────────────

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingKind {
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for ScalingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingKind::ScaleUp => f.write_str("scale-up"),
            ScalingKind::ScaleDown => f.write_str("scale-down"),
        }
    }
}

/// What initiated a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    /// The decision engine's threshold logic.
    Automatic,
    /// The manual override API.
    Manual,
}

/// Immutable audit record of one scaling action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ScalingKind,
    pub reason: String,
    pub instances_before: u32,
    pub instances_after: u32,
    /// Unix timestamp (milliseconds) when the action completed.
    pub timestamp: u64,
    /// Wall time spent issuing the commands, in milliseconds.
    pub duration_ms: u64,
    /// Set when one or more start/stop commands were rejected.
    pub failure: Option<String>,
    pub trigger: ScalingTrigger,
}

impl ScalingEvent {
    /// Build the composite key for the scaling events table.
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.timestamp, self.id)
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
