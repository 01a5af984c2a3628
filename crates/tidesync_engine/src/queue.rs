//! Durable FIFO queue of pending table operations.

use std::sync::Arc;

use parking_lot::Mutex;
use tidesync_query::{field, lit, system, OrderBy, QueryDescription};
use tidesync_store::{local_tables, LocalStore};

use crate::error::SyncResult;
use crate::operation::TableOperation;

#[derive(Debug, Default)]
struct QueueState {
    sequence: i64,
    pending: u64,
}

/// Persistent queue over the reserved operations table.
///
/// Entries replay in ascending sequence order. The in-memory sequence and
/// pending counters are rebuilt from the store by [`load`](Self::load).
pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    state: Mutex<QueueState>,
}

impl OperationQueue {
    /// Wraps an initialized store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Rebuilds queue counters from the persisted entries.
    pub fn load(&self) -> SyncResult<()> {
        let counted = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_top(0)
                .with_total_count(),
        )?;
        let newest = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_order_by(OrderBy::descending("sequence"))
                .with_top(1),
        )?;
        let sequence = match newest.rows.first() {
            Some(row) => TableOperation::from_record(row)?.sequence,
            None => 0,
        };

        let mut state = self.state.lock();
        state.pending = counted.total_count.unwrap_or(0);
        state.sequence = sequence;
        Ok(())
    }

    /// Number of pending operations across all tables.
    pub fn pending_operations(&self) -> u64 {
        self.state.lock().pending
    }

    /// Reserves the next queue position.
    pub fn next_sequence(&self) -> i64 {
        let mut state = self.state.lock();
        state.sequence += 1;
        state.sequence
    }

    /// The pending operation for an item, if one exists.
    pub fn get_operation(
        &self,
        table_name: &str,
        item_id: &str,
    ) -> SyncResult<Option<TableOperation>> {
        let found = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS).with_filter(
                field("tableName")
                    .eq(lit(table_name))
                    .and(field("itemId").eq(lit(item_id))),
            ),
        )?;
        match found.rows.first() {
            Some(row) => Ok(Some(TableOperation::from_record(row)?)),
            None => Ok(None),
        }
    }

    /// The oldest pending operation strictly after `sequence`.
    pub fn next_after(&self, sequence: i64) -> SyncResult<Option<TableOperation>> {
        let found = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_filter(field("sequence").gt(lit(sequence)))
                .with_order_by(OrderBy::ascending("sequence"))
                .with_top(1),
        )?;
        match found.rows.first() {
            Some(row) => Ok(Some(TableOperation::from_record(row)?)),
            None => Ok(None),
        }
    }

    /// Appends a new entry.
    pub fn enqueue(&self, operation: &TableOperation) -> SyncResult<()> {
        self.store.upsert(
            local_tables::OPERATIONS,
            &[operation.to_record()],
            false,
        )?;
        self.state.lock().pending += 1;
        Ok(())
    }

    /// Rewrites an existing entry in place.
    pub fn update(&self, operation: &TableOperation) -> SyncResult<()> {
        self.store
            .upsert(local_tables::OPERATIONS, &[operation.to_record()], false)?;
        Ok(())
    }

    /// Removes an entry, but only while its version still matches.
    ///
    /// A mismatch means a later local change collapsed into the entry
    /// while it was being pushed; the entry must stay queued so the newer
    /// content is pushed on the next cycle.
    pub fn delete(&self, id: &str, version: i64) -> SyncResult<bool> {
        let found = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS).with_filter(
                field(system::ID)
                    .eq(lit(id))
                    .and(field("version").eq(lit(version))),
            ),
        )?;
        if found.rows.is_empty() {
            return Ok(false);
        }
        self.store
            .delete_ids(local_tables::OPERATIONS, &[id.to_owned()])?;
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        Ok(true)
    }

    /// Removes an entry regardless of its version.
    pub fn remove(&self, id: &str) -> SyncResult<()> {
        self.store
            .delete_ids(local_tables::OPERATIONS, &[id.to_owned()])?;
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        Ok(())
    }

    /// Number of pending operations targeting one table.
    pub fn count_pending(&self, table_name: &str) -> SyncResult<u64> {
        let counted = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_filter(field("tableName").eq(lit(table_name)))
                .with_top(0)
                .with_total_count(),
        )?;
        Ok(counted.total_count.unwrap_or(0))
    }

    /// Pending operations targeting one table, oldest first.
    pub fn operations_for_table(&self, table_name: &str) -> SyncResult<Vec<TableOperation>> {
        let found = self.store.read(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_filter(field("tableName").eq(lit(table_name)))
                .with_order_by(OrderBy::ascending("sequence")),
        )?;
        found.rows.iter().map(TableOperation::from_record).collect()
    }

    /// Drops every pending operation for one table.
    pub fn discard_table(&self, table_name: &str) -> SyncResult<u64> {
        let discarded = self.count_pending(table_name)?;
        self.store.delete_by_query(
            &QueryDescription::new(local_tables::OPERATIONS)
                .with_filter(field("tableName").eq(lit(table_name))),
        )?;
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(discarded);
        Ok(discarded)
    }
}
