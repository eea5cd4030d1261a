//! Event recorder — assigns ids and appends scaling events to the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::error::StateResult;
use crate::store::EventLog;
use crate::types::ScalingEvent;

/// Number of events returned by the status API when no limit is given.
pub const DEFAULT_RECENT_EVENTS: usize = 10;

/// Front door to the persistent event log.
///
/// Recording failures are logged and returned; they never abort the
/// scaling action that produced the event.
#[derive(Clone)]
pub struct EventRecorder {
    log: Arc<dyn EventLog>,
    seq: Arc<AtomicU64>,
}

impl EventRecorder {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocate a unique event id for an action completed at `timestamp`.
    ///
    /// The sequence is zero-padded so events sharing a millisecond keep
    /// their recording order in the log's key order.
    pub fn next_id(&self, timestamp: u64) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("scale_{timestamp}_{n:020}")
    }

    /// Append an event to the log.
    pub fn record(&self, event: &ScalingEvent) -> StateResult<()> {
        match self.log.append(event) {
            Ok(()) => {
                info!(
                    event_id = %event.id,
                    kind = %event.kind,
                    before = event.instances_before,
                    after = event.instances_after,
                    failure = event.failure.as_deref().unwrap_or(""),
                    reason = %event.reason,
                    "scaling event recorded"
                );
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "failed to record scaling event");
                Err(e)
            }
        }
    }

    /// Events recorded between `start` and `end` (inclusive), newest first.
    pub fn history(&self, start: u64, end: u64) -> StateResult<Vec<ScalingEvent>> {
        let mut events = self.log.query(start, end)?;
        events.reverse();
        Ok(events)
    }

    /// The `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> StateResult<Vec<ScalingEvent>> {
        self.log.recent(limit)
    }
}
