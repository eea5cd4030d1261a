//! fleetgrid-metrics — resource and connection metrics for the instance pool.
//!
//! Pulls per-instance samples from a [`TelemetrySource`], applies them to
//! the pool through the lifecycle manager, and computes the pool-wide
//! snapshot the scaling engine decides on.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── refresh() → TelemetrySource::sample() per running instance
//!   │              → LifecycleManager::apply_telemetry()
//!   ├── snapshot() → PoolMetrics (running instances only)
//!   └── run() → periodic refresh loop
//! ```

pub mod aggregator;
pub mod telemetry;

pub use aggregator::{MetricsAggregator, PoolMetrics, RefreshReport, aggregate};
pub use telemetry::{SampleFuture, TelemetrySample, TelemetrySource};
