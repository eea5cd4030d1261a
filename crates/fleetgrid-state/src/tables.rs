//! redb table definitions for the FleetGrid event log.

use redb::TableDefinition;

/// Scaling events keyed by `{timestamp:020}:{event_id}`.
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_events");
