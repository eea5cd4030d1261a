//! Telemetry source interface.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use fleetgrid_state::Instance;

/// One resource sample for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// CPU usage, percent.
    pub cpu: f64,
    /// Memory usage, percent.
    pub memory: f64,
    /// Connections seen by the instance itself. When absent the router's
    /// own accounting is kept.
    #[serde(default)]
    pub active_connections: Option<u32>,
}

pub type SampleFuture<'a> = Pin<Box<dyn Future<Output = Result<TelemetrySample, String>> + Send + 'a>>;

/// External collaborator reporting live resource usage per instance.
pub trait TelemetrySource: Send + Sync {
    fn sample<'a>(&'a self, instance: &'a Instance) -> SampleFuture<'a>;
}
