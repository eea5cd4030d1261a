//! fleetgrid-state — instance and scaling-event types plus the event log.
//!
//! Backed by [redb](https://docs.rs/redb), the event log persists every
//! [`ScalingEvent`] as JSON under a `{timestamp}:{id}` key. Keys are
//! zero-padded so a timestamp range query is a plain key range scan.
//!
//! The `EventStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. The [`EventRecorder`] wraps any
//! [`EventLog`] implementation and assigns event ids.

pub mod error;
pub mod recorder;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use recorder::{DEFAULT_RECENT_EVENTS, EventRecorder};
pub use store::{EventLog, EventStore};
pub use types::*;
