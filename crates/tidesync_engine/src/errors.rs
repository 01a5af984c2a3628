//! Durable records of operations that failed during a push.

use tidesync_query::{field, lit, system, Item, QueryDescription, Value};
use tidesync_store::{local_tables, LocalStore};

use crate::error::{SyncError, SyncResult};
use crate::operation::OperationKind;

/// A pushed operation the server rejected.
///
/// Written to the reserved errors table as part of the push cycle so the
/// failure survives restarts; surfaced to the application through
/// [`PushCompletionResult`](crate::push::PushCompletionResult), where it
/// can be resolved with the context's cancellation helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOperationError {
    /// Id of the failed operation.
    pub id: String,
    /// Version of the operation at the time it was pushed.
    pub operation_version: i64,
    /// Kind of the failed operation.
    pub operation_kind: OperationKind,
    /// Table the operation targeted.
    pub table_name: String,
    /// Record the operation targeted.
    pub item_id: String,
    /// Local item that was being pushed, when the operation carried one.
    pub item: Option<Item>,
    /// Remote status code, when the failure came with one.
    pub status: Option<i64>,
    /// Raw response body from the server.
    pub raw_result: Option<String>,
    /// Server's version of the record, when the response parsed as one.
    pub result: Option<Item>,
    /// Set by a sync handler to mark the error as dealt with; handled
    /// errors are dropped from the push result. Never persisted.
    pub handled: bool,
}

impl TableOperationError {
    fn to_record(&self) -> Item {
        let optional_json = |value: &Option<Item>| match value {
            Some(item) => Value::String(item.to_json_string()),
            None => Value::Null,
        };
        Item::new()
            .with(system::ID, self.id.clone())
            .with(
                "status",
                self.status.map(Value::Integer).unwrap_or(Value::Null),
            )
            .with("operationVersion", self.operation_version)
            .with("operationKind", self.operation_kind.code())
            .with("tableName", self.table_name.clone())
            .with("itemId", self.item_id.clone())
            .with("item", optional_json(&self.item))
            .with(
                "rawResult",
                self.raw_result
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            )
            .with("result", optional_json(&self.result))
    }

    fn from_record(record: &Item) -> SyncResult<Self> {
        let text = |name: &str| -> SyncResult<String> {
            record
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| malformed(name))
        };
        let optional_item = |name: &str| -> SyncResult<Option<Item>> {
            match record.get(name) {
                Some(Value::String(json)) if !json.is_empty() => {
                    Ok(Some(Item::from_json_str(json).ok_or_else(|| malformed(name))?))
                }
                _ => Ok(None),
            }
        };
        let kind_code = record
            .get("operationKind")
            .and_then(Value::as_integer)
            .ok_or_else(|| malformed("operationKind"))?;
        Ok(Self {
            id: text(system::ID)?,
            operation_version: record
                .get("operationVersion")
                .and_then(Value::as_integer)
                .ok_or_else(|| malformed("operationVersion"))?,
            operation_kind: OperationKind::from_code(kind_code)
                .ok_or_else(|| malformed("operationKind"))?,
            table_name: text("tableName")?,
            item_id: text("itemId")?,
            item: optional_item("item")?,
            status: record.get("status").and_then(Value::as_integer),
            raw_result: record
                .get("rawResult")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
            result: optional_item("result")?,
            handled: false,
        })
    }

    /// Persists the error record.
    pub fn persist(&self, store: &dyn LocalStore) -> SyncResult<()> {
        store.upsert(local_tables::ERRORS, &[self.to_record()], false)?;
        Ok(())
    }
}

/// Loads every persisted error, oldest insertion first.
pub fn load_errors(store: &dyn LocalStore) -> SyncResult<Vec<TableOperationError>> {
    let rows = store.read(&QueryDescription::new(local_tables::ERRORS))?;
    rows.rows.iter().map(TableOperationError::from_record).collect()
}

/// Removes one persisted error by operation id.
pub fn delete_error(store: &dyn LocalStore, id: &str) -> SyncResult<()> {
    store.delete_ids(local_tables::ERRORS, &[id.to_owned()])?;
    Ok(())
}

/// Removes every persisted error for one table.
pub fn delete_errors_for_table(store: &dyn LocalStore, table_name: &str) -> SyncResult<()> {
    store.delete_by_query(
        &QueryDescription::new(local_tables::ERRORS)
            .with_filter(field("tableName").eq(lit(table_name))),
    )?;
    Ok(())
}

fn malformed(field: &str) -> SyncError {
    SyncError::InvalidOperation(format!("stored push error has a malformed '{field}' field"))
}
