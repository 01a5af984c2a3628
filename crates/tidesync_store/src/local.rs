//! The capability surface the sync engine consumes from a local store.

use tidesync_query::{Item, QueryDescription, Value};

use crate::error::StoreResult;

/// The result of a [`LocalStore::read`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    /// Matching rows, deserialized to their semantic types where the table
    /// schema is known.
    pub rows: Vec<Item>,
    /// The total (unpaged) count, when the query asked for it.
    pub total_count: Option<u64>,
}

/// Minimal local-store capability surface.
///
/// The sync engine only ever talks to this trait; `SqliteStore` is the
/// shipped implementation. Keeping the seam here lets tests swap in
/// instrumented stores.
pub trait LocalStore: Send + Sync {
    /// Creates missing tables and columns and records per-table metadata.
    /// Must be called once before any other operation.
    fn initialize(&self) -> StoreResult<()>;

    /// Executes a compiled SELECT (and COUNT when requested).
    fn read(&self, query: &QueryDescription) -> StoreResult<QueryRows>;

    /// Reads one row by id.
    fn lookup(&self, table_name: &str, id: &str) -> StoreResult<Option<Item>>;

    /// Inserts or replaces rows. `from_server` relaxes column validation so
    /// the server can introduce new system columns transparently.
    fn upsert(&self, table_name: &str, items: &[Item], from_server: bool) -> StoreResult<()>;

    /// Deletes the rows a compiled query selects.
    fn delete_by_query(&self, query: &QueryDescription) -> StoreResult<()>;

    /// Deletes rows by id.
    fn delete_ids(&self, table_name: &str, ids: &[String]) -> StoreResult<()>;

    /// Reads one value from the reserved config table.
    fn read_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes one value to the reserved config table.
    fn write_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes one value from the reserved config table.
    fn delete_setting(&self, key: &str) -> StoreResult<()>;

    /// Escape hatch for generated statements; returns raw rows for queries
    /// and an empty list for non-queries.
    fn execute_sql(&self, sql: &str, parameters: &[(String, Value)]) -> StoreResult<Vec<Item>>;
}
