//! Lifecycle error types.

use fleetgrid_state::InstanceStatus;
use thiserror::Error;

/// Errors returned by lifecycle commands.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("instance {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("instance {id} is {status}, expected running")]
    NotRunning { id: String, status: InstanceStatus },

    #[error("provisioning failed in {region}: {reason}")]
    Provisioning { region: String, reason: String },
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
