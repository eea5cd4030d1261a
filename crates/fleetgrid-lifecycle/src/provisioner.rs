//! Compute provisioner interface.
//!
//! The lifecycle manager never creates machines itself. It asks a
//! [`Provisioner`] for capacity in a region and hands the returned handle
//! back when the instance is stopped.

use std::future::Future;
use std::pin::Pin;

/// What the provisioner reports for a successfully started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedInstance {
    /// Opaque handle used to deprovision later.
    pub handle: String,
    /// Address (ip:port) for health probes and telemetry, if known.
    pub address: Option<String>,
}

/// Boxed future alias for provisioning results.
pub type ProvisionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProvisionedInstance, String>> + Send + 'a>>;

/// Boxed future alias for deprovisioning results.
pub type DeprovisionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// External collaborator that owns real compute capacity.
pub trait Provisioner: Send + Sync {
    /// Start capacity in `region`. Resolves once the instance can take work.
    fn provision<'a>(&'a self, region: &'a str) -> ProvisionFuture<'a>;

    /// Release the capacity behind `handle`.
    fn deprovision<'a>(&'a self, handle: &'a str) -> DeprovisionFuture<'a>;
}
