//! EventStore — redb-backed append-only scaling event log.
//!
//! Events are JSON-serialized into redb's `&[u8]` value column under a
//! zero-padded `{timestamp}:{id}` key. There is no update or delete path:
//! appending an event whose key already exists is rejected.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::SCALING_EVENTS;
use crate::types::ScalingEvent;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Persistent, append-only log of scaling events.
pub trait EventLog: Send + Sync {
    /// Append an event. Events are never mutated after this call.
    fn append(&self, event: &ScalingEvent) -> StateResult<()>;

    /// Events with `start <= timestamp <= end`, oldest first.
    fn query(&self, start: u64, end: u64) -> StateResult<Vec<ScalingEvent>>;

    /// The `limit` most recent events, oldest first.
    fn recent(&self, limit: usize) -> StateResult<Vec<ScalingEvent>>;
}

/// Thread-safe event log backed by redb.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    /// Open (or create) a persistent event log at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "event store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory event log (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory event store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Total number of recorded events.
    pub fn len(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl EventLog for EventStore {
    fn append(&self, event: &ScalingEvent) -> StateResult<()> {
        let key = event.table_key();
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Duplicate(event.id.clone()));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "scaling event stored");
        Ok(())
    }

    fn query(&self, start: u64, end: u64) -> StateResult<Vec<ScalingEvent>> {
        if start > end {
            return Ok(Vec::new());
        }
        // ';' sorts right after ':' so the upper bound covers every id at `end`.
        let lower = format!("{start:020}:");
        let upper = format!("{end:020};");

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(lower.as_str()..upper.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScalingEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
        }
        Ok(results)
    }

    fn recent(&self, limit: usize) -> StateResult<Vec<ScalingEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(limit);
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScalingEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
        }
        results.reverse();
        Ok(results)
    }
}
