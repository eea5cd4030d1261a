//! fleetgrid-lifecycle — instance state machine and pool ownership.
//!
//! The [`LifecycleManager`] is the only writer of the instance pool. Every
//! other component either reads a cloned snapshot or goes through one of its
//! commands (start, stop, replace, connection accounting, health and
//! telemetry updates).
//!
//! # Architecture
//!
//! ```text
//! LifecycleManager
//!   ├── InstancePool (arena keyed by insertion sequence, id index)
//!   ├── Provisioner (provision / deprovision, bounded by timeouts)
//!   ├── Drain tracker (background stops awaited at shutdown)
//!   └── run_cleanup() → purges stopped instances past retention
//! ```
//!
//! # State machine
//!
//! ```text
//! starting ──provisioned──▶ running ──stop──▶ draining ──drained/timeout──▶ stopping ──▶ stopped
//!     └──provision failed──▶ (discarded)
//! ```

pub mod error;
pub mod manager;
pub mod pool;
pub mod provisioner;

pub use error::{LifecycleError, LifecycleResult};
pub use manager::{LifecycleManager, PoolCounts, StopOutcome};
pub use provisioner::{DeprovisionFuture, ProvisionFuture, ProvisionedInstance, Provisioner};
