//! Queued table operations and the rules for combining them.
//!
//! At most one queued operation exists per (table, item) pair. When a new
//! local change targets an item that already has a pending operation the
//! pair is resolved by [`plan_transition`], a pure function over operation
//! kinds; the queue then applies the returned transition durably.

use chrono::{DateTime, Utc};
use tidesync_query::{system, Item, Value};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// The kind of change a queued operation will replay against the remote
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// The item was created locally.
    Insert,
    /// The item was modified locally.
    Update,
    /// The item was removed locally.
    Delete,
}

impl OperationKind {
    /// Stable numeric code used in the operations table.
    pub fn code(self) -> i64 {
        match self {
            OperationKind::Insert => 1,
            OperationKind::Update => 2,
            OperationKind::Delete => 3,
        }
    }

    /// Decodes a stored numeric code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(OperationKind::Insert),
            2 => Some(OperationKind::Update),
            3 => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

/// How the queue should change when a new operation arrives for an item
/// that may already have one pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTransition {
    /// No pending entry; append the incoming operation.
    Enqueue,
    /// Keep the pending entry's kind and position, refresh its content and
    /// bump its version.
    Collapse,
    /// Keep the pending entry's position but change its kind to the
    /// incoming one, bumping its version.
    Replace,
    /// Remove the pending entry; the incoming operation is not queued.
    Cancel,
}

/// Resolves an incoming operation against the pending one for the same
/// item, if any.
///
/// A pending delete blocks everything until it is pushed, and a pending
/// insert only tolerates a subsequent delete (which cancels both sides so
/// the item never reaches the network).
pub fn plan_transition(
    existing: Option<OperationKind>,
    incoming: OperationKind,
) -> SyncResult<QueueTransition> {
    use OperationKind::{Delete, Insert, Update};
    match (existing, incoming) {
        (None, _) => Ok(QueueTransition::Enqueue),
        (Some(Insert), Delete) => Ok(QueueTransition::Cancel),
        (Some(Update), Update) => Ok(QueueTransition::Collapse),
        (Some(Update), Delete) => Ok(QueueTransition::Replace),
        (Some(Insert), Insert) | (Some(Update), Insert) => Err(SyncError::InvalidOperation(
            "an insert or update operation on the item is already pending".to_owned(),
        )),
        (Some(Insert), Update) => Err(SyncError::InvalidOperation(
            "an insert operation on the item is already pending".to_owned(),
        )),
        (Some(Delete), _) => Err(SyncError::InvalidOperation(
            "a delete operation on the item is already pending".to_owned(),
        )),
    }
}

/// A durably queued change awaiting push to the remote table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOperation {
    /// Unique operation id.
    pub id: String,
    /// What kind of change will be replayed.
    pub kind: OperationKind,
    /// Target table.
    pub table_name: String,
    /// Target record id.
    pub item_id: String,
    /// Item snapshot; carried for deletes so the record can be restored if
    /// the delete is cancelled, `None` otherwise.
    pub item: Option<Item>,
    /// When the operation was first queued.
    pub created_at: DateTime<Utc>,
    /// Position in the queue; pushes replay in ascending order.
    pub sequence: i64,
    /// Bumped every time a later local change collapses into this entry.
    pub version: i64,
}

impl TableOperation {
    /// Creates a fresh operation at the given queue position.
    pub fn new(kind: OperationKind, table_name: &str, item_id: &str, sequence: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            table_name: table_name.to_owned(),
            item_id: item_id.to_owned(),
            item: None,
            created_at: Utc::now(),
            sequence,
            version: 1,
        }
    }

    /// Serializes the operation into its operations-table row shape.
    pub fn to_record(&self) -> Item {
        let item = match &self.item {
            Some(item) => Value::String(item.to_json_string()),
            None => Value::Null,
        };
        Item::new()
            .with(system::ID, self.id.clone())
            .with("kind", self.kind.code())
            .with("tableName", self.table_name.clone())
            .with("itemId", self.item_id.clone())
            .with("item", item)
            .with("createdAt", self.created_at)
            .with("sequence", self.sequence)
            .with("version", self.version)
    }

    /// Reconstructs an operation from its stored row.
    pub fn from_record(record: &Item) -> SyncResult<Self> {
        let text = |name: &str| -> SyncResult<String> {
            record
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| malformed(name))
        };
        let integer = |name: &str| -> SyncResult<i64> {
            record
                .get(name)
                .and_then(Value::as_integer)
                .ok_or_else(|| malformed(name))
        };

        let kind = OperationKind::from_code(integer("kind")?).ok_or_else(|| malformed("kind"))?;
        let item = match record.get("item") {
            Some(Value::String(json)) if !json.is_empty() => {
                Some(Item::from_json_str(json).ok_or_else(|| malformed("item"))?)
            }
            _ => None,
        };
        Ok(Self {
            id: text(system::ID)?,
            kind,
            table_name: text("tableName")?,
            item_id: text("itemId")?,
            item,
            created_at: record
                .get("createdAt")
                .and_then(Value::as_datetime)
                .ok_or_else(|| malformed("createdAt"))?,
            sequence: integer("sequence")?,
            version: integer("version")?,
        })
    }
}

fn malformed(field: &str) -> SyncError {
    SyncError::InvalidOperation(format!("queued operation record has a malformed '{field}' field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationKind::{Delete, Insert, Update};

    #[test]
    fn empty_slot_always_enqueues() {
        for incoming in [Insert, Update, Delete] {
            assert_eq!(plan_transition(None, incoming).unwrap(), QueueTransition::Enqueue);
        }
    }

    #[test]
    fn pending_insert_cancels_with_delete_and_rejects_the_rest() {
        assert_eq!(
            plan_transition(Some(Insert), Delete).unwrap(),
            QueueTransition::Cancel
        );
        assert!(plan_transition(Some(Insert), Insert).is_err());
        assert!(plan_transition(Some(Insert), Update).is_err());
    }

    #[test]
    fn pending_update_collapses_or_becomes_delete() {
        assert_eq!(
            plan_transition(Some(Update), Update).unwrap(),
            QueueTransition::Collapse
        );
        assert_eq!(
            plan_transition(Some(Update), Delete).unwrap(),
            QueueTransition::Replace
        );
        assert!(plan_transition(Some(Update), Insert).is_err());
    }

    #[test]
    fn pending_delete_blocks_everything() {
        for incoming in [Insert, Update, Delete] {
            assert!(plan_transition(Some(Delete), incoming).is_err());
        }
    }

    #[test]
    fn operation_survives_record_round_trip() {
        let mut op = TableOperation::new(Delete, "todo", "abc", 7);
        op.item = Some(Item::new().with(system::ID, "abc").with("text", "bye"));
        op.version = 3;

        let restored = TableOperation::from_record(&op.to_record()).unwrap();
        assert_eq!(restored.kind, Delete);
        assert_eq!(restored.table_name, "todo");
        assert_eq!(restored.item_id, "abc");
        assert_eq!(restored.sequence, 7);
        assert_eq!(restored.version, 3);
        let snapshot = restored.item.unwrap();
        assert_eq!(snapshot.get("text").and_then(Value::as_str), Some("bye"));
    }

    #[test]
    fn operation_without_snapshot_round_trips_as_none() {
        let op = TableOperation::new(Update, "todo", "abc", 1);
        let restored = TableOperation::from_record(&op.to_record()).unwrap();
        assert!(restored.item.is_none());
    }
}
