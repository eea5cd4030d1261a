//! Router error types.

use thiserror::Error;

use fleetgrid_lifecycle::LifecycleError;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no healthy running instance available")]
    NoCapacity,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type RouteResult<T> = Result<T, RouteError>;
