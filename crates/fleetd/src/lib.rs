//! fleetd — the FleetGrid daemon.
//!
//! The library half holds the HTTP collaborator clients and the
//! [`Fleet`] assembly so the binary and the integration tests build the
//! system the same way.

pub mod collaborators;
pub mod fleet;

pub use collaborators::{HttpProvisioner, HttpTelemetry};
pub use fleet::{Collaborators, Fleet};
