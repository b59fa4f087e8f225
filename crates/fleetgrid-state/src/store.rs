//! StateStore: redb-backed persistence for synthesized topologies.
//!
//! Provides typed operations over resource records and stack summaries.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing and dry runs).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.open_table(STACKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Records ────────────────────────────────────────────────────

    /// Insert or update a resource record.
    pub fn put_record(&self, record: &ResourceRecord) -> StateResult<()> {
        check_stack_name(&record.stack)?;
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, kind = ?record.kind, "record stored");
        Ok(())
    }

    /// Get a record by stack and resource id.
    pub fn get_record(&self, stack: &str, id: &str) -> StateResult<Option<ResourceRecord>> {
        let key = record_key(stack, id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ResourceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all records of a stack (key order).
    pub fn list_records(&self, stack: &str) -> StateResult<Vec<ResourceRecord>> {
        // Keys of one stack sort between `{stack}/` and `{stack}0` ('0' follows '/').
        let start = format!("{stack}/");
        let end = format!("{stack}0");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ResourceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Number of records stored for a stack.
    pub fn count_records(&self, stack: &str) -> StateResult<usize> {
        Ok(self.list_records(stack)?.len())
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete_record(&self, stack: &str, id: &str) -> StateResult<bool> {
        let key = record_key(stack, id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "record deleted");
        Ok(existed)
    }

    // ── Stacks ─────────────────────────────────────────────────────

    /// Insert or update a stack summary.
    pub fn put_stack(&self, summary: &StackSummary) -> StateResult<()> {
        check_stack_name(&summary.stack)?;
        let value = serde_json::to_vec(summary).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STACKS).map_err(map_err!(Table))?;
            table
                .insert(summary.stack.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(stack = %summary.stack, resources = summary.order.len(), "stack summary stored");
        Ok(())
    }

    /// Get a stack summary by name.
    pub fn get_stack(&self, stack: &str) -> StateResult<Option<StackSummary>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACKS).map_err(map_err!(Table))?;
        match table.get(stack).map_err(map_err!(Read))? {
            Some(guard) => {
                let summary: StackSummary =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(summary))
            }
            None => Ok(None),
        }
    }

    /// List all stack names.
    pub fn list_stacks(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    /// Delete a stack summary. Returns true if it existed.
    pub fn delete_stack(&self, stack: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STACKS).map_err(map_err!(Table))?;
            existed = table.remove(stack).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%stack, existed, "stack summary deleted");
        Ok(existed)
    }

    // ── Descriptors ────────────────────────────────────────────────

    /// Persist a whole descriptor (summary and every record) in one transaction.
    pub fn put_descriptor(&self, descriptor: &TopologyDescriptor) -> StateResult<()> {
        check_stack_name(&descriptor.stack)?;
        let summary =
            serde_json::to_vec(&descriptor.summary()).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            for record in descriptor.records.values() {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                records
                    .insert(record.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let mut stacks = txn.open_table(STACKS).map_err(map_err!(Table))?;
            stacks
                .insert(descriptor.stack.as_str(), summary.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(stack = %descriptor.stack, "descriptor stored");
        Ok(())
    }

    /// Reassemble a stored descriptor. Returns `None` if the stack has no summary.
    ///
    /// Records missing from the records table are left out of `records`
    /// but their ids stay in `order`.
    pub fn get_descriptor(&self, stack: &str) -> StateResult<Option<TopologyDescriptor>> {
        let Some(summary) = self.get_stack(stack)? else {
            return Ok(None);
        };
        let records: BTreeMap<ResourceId, ResourceRecord> = self
            .list_records(stack)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        Ok(Some(TopologyDescriptor {
            stack: summary.stack,
            target: summary.target,
            order: summary.order,
            records,
            outputs: summary.outputs,
        }))
    }
}

/// A `/` in a stack name would let its keys fall inside another stack's range.
fn check_stack_name(stack: &str) -> StateResult<()> {
    if stack.is_empty() || stack.contains('/') {
        return Err(StateError::InvalidStack(stack.to_string()));
    }
    Ok(())
}
