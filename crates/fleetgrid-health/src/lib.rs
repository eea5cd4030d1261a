//! fleetgrid-health — health checking and self-healing for the instance pool.
//!
//! Every `health_check_interval` the checker probes each running instance
//! concurrently, each probe bounded by `health_check_timeout`. A timeout is
//! treated exactly like a failed probe.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── Prober (HttpProber → http_probe() → ProbeResult)
//!   ├── HealthTracker per instance (consecutive failures)
//!   └── LifecycleManager
//!         ├── set_health()
//!         └── replace() when a running instance is unhealthy
//! ```
//!
//! # Self-Healing
//!
//! When an instance reaches `unhealthy_threshold` consecutive failures it
//! is marked `Unhealthy`, which removes it from routing immediately, and a
//! replacement is started in the same region. The old instance only starts
//! draining once the replacement is running. A failed replacement is
//! retried on the next tick.

pub mod checker;
pub mod monitor;

pub use checker::{HealthTracker, HttpProber, ProbeFuture, ProbeResult, Prober, http_probe};
pub use monitor::{HealthChecker, HealthReport};
