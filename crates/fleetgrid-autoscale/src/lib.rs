//! fleetgrid-autoscale — metrics-driven pool sizing.
//!
//! Reads the pool-wide [`PoolMetrics`](fleetgrid_metrics::PoolMetrics),
//! compares them against the scaling thresholds and instructs the
//! lifecycle manager. Every action is recorded as a `ScalingEvent`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if now - last_action < cooldown:            skip
//! n = running instances
//!
//! if n < min:                                 start (min - n)
//! elif n > max:                               stop (n - max)
//! elif cpu > up or mem > up or conns/n > 1000:
//!     start min(ceil(n * 0.5), max - n)
//! elif cpu < down and mem < down and n > min:
//!     stop min(floor(n * 0.25), n - min)      fewest connections first
//! ```
//!
//! A computed count of zero is a no-op: no event, cooldown untouched.
//! Manual overrides bypass the thresholds but not the bounds, and share
//! the same lock and cooldown timestamp as the automatic loop.

pub mod scaler;
pub mod status;

pub use scaler::{ScaleDecision, ScaleDirection, ScalingEngine, decide};
pub use status::{FleetStatus, fleet_status};
