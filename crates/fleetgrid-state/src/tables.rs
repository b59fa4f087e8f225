//! redb table definitions for the fleetgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Resource records keyed by `{stack}/{resource_id}`.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Stack summaries (creation order, outputs) keyed by stack name.
pub const STACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("stacks");
