//! fleetgrid-router — selects a target instance for each unit of work.
//!
//! Candidates are the instances that are running and healthy. The router
//! reads them from a lifecycle snapshot on every call, independently of
//! the scaling loop, and counts the chosen connection through the
//! lifecycle manager.
//!
//! Supported algorithms: `least-connections` (default), `round-robin`,
//! `weighted` and `ip-hash` (sticky when session affinity is on).

pub mod balancer;
pub mod error;
pub mod router;

pub use balancer::{RoundRobinBalancer, instance_weight, ip_hash_index, least_connections_index, weighted_index};
pub use error::{RouteError, RouteResult};
pub use router::{AFFINITY_CAPACITY, Router};
