//! Typed runtime configuration shared across FleetGrid crates.
//!
//! These are the validated forms of the sections in `fleet.toml`. The
//! control loops never see raw strings: durations are parsed and bounds
//! checked by [`crate::FleetConfig::validate`] before anything starts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Regions new instances are spread across, in round-robin order.
pub const DEFAULT_REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "ap-southeast-1"];

/// Per-instance connection count above which the pool is considered saturated.
pub const CONNECTIONS_PER_INSTANCE_LIMIT: f64 = 1000.0;

// ── Scaling ───────────────────────────────────────────────────────

/// Pool size bounds and the thresholds that drive scaling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Informational only; thresholds drive action.
    pub target_cpu: f64,
    /// Informational only; thresholds drive action.
    pub target_memory: f64,
    /// Average CPU or memory (percent) above which the pool grows.
    pub scale_up_threshold: f64,
    /// Average CPU and memory (percent) below which the pool shrinks.
    pub scale_down_threshold: f64,
    /// Minimum time between two scaling actions.
    pub cooldown: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 100,
            target_cpu: 70.0,
            target_memory: 75.0,
            scale_up_threshold: 80.0,
            scale_down_threshold: 30.0,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl ScalingConfig {
    /// Check the pool bounds and threshold ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_instances == 0 {
            return Err(ConfigError::ZeroMinInstances {
                min: self.min_instances,
            });
        }
        if self.min_instances > self.max_instances {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_instances,
                max: self.max_instances,
            });
        }
        for (field, value) in [
            ("target_cpu", self.target_cpu),
            ("target_memory", self.target_memory),
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::PercentOutOfRange { field, value });
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ConfigError::ThresholdOrder {
                down: self.scale_down_threshold,
                up: self.scale_up_threshold,
            });
        }
        Ok(())
    }
}

// ── Load balancing ────────────────────────────────────────────────

/// Request routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    Weighted,
    IpHash,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::LeastConnections => "least-connections",
            Algorithm::Weighted => "weighted",
            Algorithm::IpHash => "ip-hash",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round-robin" => Ok(Algorithm::RoundRobin),
            "least-connections" => Ok(Algorithm::LeastConnections),
            "weighted" => Ok(Algorithm::Weighted),
            "ip-hash" => Ok(Algorithm::IpHash),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Router strategy and health check cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub algorithm: Algorithm,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    /// Enables ip-hash stickiness.
    pub session_affinity: bool,
    /// Consecutive failed probes before an instance is marked unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::LeastConnections,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            session_affinity: true,
            unhealthy_threshold: 1,
        }
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────

/// Timeout budgets for instance state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on a single provisioning call.
    pub provision_timeout: Duration,
    /// Upper bound on waiting for active connections to finish.
    pub drain_timeout: Duration,
    /// How long stopped instances stay visible before being purged.
    pub retention: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
        }
    }
}

/// Cadence of the periodic control tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopIntervals {
    pub scaling: Duration,
    pub metrics: Duration,
    pub cleanup: Duration,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            scaling: Duration::from_secs(30),
            metrics: Duration::from_secs(15),
            cleanup: Duration::from_secs(300),
        }
    }
}
