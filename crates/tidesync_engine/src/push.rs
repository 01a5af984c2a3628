//! The push cycle: replaying queued operations against the remote service.

use std::sync::Arc;

use parking_lot::Mutex;
use tidesync_query::{system, Item};
use tidesync_store::LocalStore;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use crate::errors::{delete_error, TableOperationError};
use crate::operation::{OperationKind, TableOperation};
use crate::queue::OperationQueue;
use crate::remote::{Features, RemoteError, RemoteTableProxy};

/// How a push cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Every queued operation was attempted.
    Complete,
    /// A network failure stopped the cycle; unattempted operations stay
    /// queued.
    CancelledByNetworkError,
    /// An authentication failure stopped the cycle; unattempted operations
    /// stay queued.
    CancelledByAuthenticationError,
}

/// Outcome of one push cycle.
#[derive(Debug)]
pub struct PushCompletionResult {
    /// How the cycle ended.
    pub status: PushStatus,
    /// Operations the server rejected during the cycle, minus any a
    /// handler marked handled.
    pub errors: Vec<TableOperationError>,
}

/// Application hook observing push completion.
///
/// The handler may inspect the per-operation errors and mark some of them
/// handled; handled errors are removed from durable storage and from the
/// surfaced result.
pub trait SyncHandler: Send + Sync {
    /// Called once per push cycle, before the result is surfaced.
    fn on_push_complete(&self, result: &mut PushCompletionResult);
}

/// Handler that leaves every error unhandled.
pub struct NoopSyncHandler;

impl SyncHandler for NoopSyncHandler {
    fn on_push_complete(&self, _result: &mut PushCompletionResult) {}
}

fn outbound_item(kind: OperationKind, item: &Item) -> Item {
    let mut outbound = item.clone();
    outbound.remove(system::CREATED_AT);
    outbound.remove(system::UPDATED_AT);
    outbound.remove(system::DELETED);
    // inserts must not claim a server version
    if kind == OperationKind::Insert {
        outbound.remove(system::VERSION);
    }
    outbound
}

fn error_record(
    operation: &TableOperation,
    pushed: Option<Item>,
    failure: &RemoteError,
) -> TableOperationError {
    let (status, raw_result, result) = match failure {
        RemoteError::Conflict { status, raw, item } => (Some(*status), raw.clone(), item.clone()),
        RemoteError::Server { status, raw } => (Some(*status), raw.clone(), None),
        RemoteError::NotFound => (Some(404), None, None),
        RemoteError::Network(_) | RemoteError::Authentication(_) => (None, None, None),
    };
    TableOperationError {
        id: operation.id.clone(),
        operation_version: operation.version,
        operation_kind: operation.kind,
        table_name: operation.table_name.clone(),
        item_id: operation.item_id.clone(),
        item: pushed,
        status,
        raw_result,
        result,
        handled: false,
    }
}

/// Replays every queued operation once, oldest first.
///
/// The caller serializes cycles; `store_lock` guards the store and queue
/// against concurrent local mutations while an individual operation is
/// loaded or its outcome applied. Entries that fail stay queued alongside
/// a durable error record, so the next cycle retries them.
pub(crate) fn push_cycle(
    store: &Arc<dyn LocalStore>,
    queue: &OperationQueue,
    proxy: &dyn RemoteTableProxy,
    handler: &dyn SyncHandler,
    store_lock: &Mutex<()>,
    cancel: &CancellationToken,
) -> SyncResult<()> {
    let features = Features::OFFLINE.union(Features::UNTYPED_TABLE);
    let mut status = PushStatus::Complete;
    let mut errors = Vec::new();
    let mut sequence = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let operation = {
            let _guard = store_lock.lock();
            match queue.next_after(sequence)? {
                Some(operation) => operation,
                None => break,
            }
        };
        sequence = operation.sequence;

        // deletes carry their snapshot; inserts and updates push the
        // current local row
        let item = match operation.kind {
            OperationKind::Delete => operation.item.clone(),
            _ => {
                let _guard = store_lock.lock();
                store.lookup(&operation.table_name, &operation.item_id)?
            }
        };
        let Some(item) = item else {
            let error = error_record(
                &operation,
                None,
                &RemoteError::Server {
                    status: 0,
                    raw: Some("the record to push no longer exists locally".to_owned()),
                },
            );
            let _guard = store_lock.lock();
            error.persist(store.as_ref())?;
            errors.push(error);
            continue;
        };
        let outbound = outbound_item(operation.kind, &item);

        let outcome = match operation.kind {
            OperationKind::Insert => proxy
                .insert(&operation.table_name, &outbound, features)
                .map(Some),
            OperationKind::Update => proxy
                .update(&operation.table_name, &outbound, features)
                .map(Some),
            OperationKind::Delete => {
                match proxy.delete(&operation.table_name, &outbound, features) {
                    // already gone remotely counts as done
                    Ok(()) | Err(RemoteError::NotFound) => Ok(None),
                    Err(failure) => Err(failure),
                }
            }
        };

        match outcome {
            Ok(server_item) => {
                let _guard = store_lock.lock();
                let removed = queue.delete(&operation.id, operation.version)?;
                // a retried operation that now succeeded clears its old
                // error record
                delete_error(store.as_ref(), &operation.id)?;
                // a collapsed entry means newer local content is pending;
                // the server result must not clobber it
                if removed && operation.kind != OperationKind::Delete {
                    if let Some(server_item) = server_item {
                        let mut merged = item.clone();
                        merged.merge(&server_item);
                        store.upsert(&operation.table_name, &[merged], true)?;
                    }
                }
            }
            Err(RemoteError::Network(message)) => {
                warn!(table = %operation.table_name, %message, "push aborted by network error");
                status = PushStatus::CancelledByNetworkError;
                break;
            }
            Err(RemoteError::Authentication(message)) => {
                warn!(table = %operation.table_name, %message, "push aborted by authentication error");
                status = PushStatus::CancelledByAuthenticationError;
                break;
            }
            Err(failure) => {
                debug!(table = %operation.table_name, item = %operation.item_id, %failure, "operation rejected");
                let error = error_record(&operation, Some(outbound), &failure);
                let _guard = store_lock.lock();
                error.persist(store.as_ref())?;
                errors.push(error);
            }
        }
    }

    let mut result = PushCompletionResult { status, errors };
    handler.on_push_complete(&mut result);

    // handled errors are resolved: forget their durable records
    let handled: Vec<String> = result
        .errors
        .iter()
        .filter(|e| e.handled)
        .map(|e| e.id.clone())
        .collect();
    if !handled.is_empty() {
        let _guard = store_lock.lock();
        for id in &handled {
            delete_error(store.as_ref(), id)?;
        }
    }
    result.errors.retain(|e| !e.handled);

    if result.status == PushStatus::Complete && result.errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::PushFailed(result))
    }
}
