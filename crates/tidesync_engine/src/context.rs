//! The synchronization context: the application-facing surface of the
//! engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tidesync_query::{system, Item, QueryDescription, Value};
use tidesync_store::{LocalStore, QueryRows};
use tracing::info;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use crate::errors::{delete_error, TableOperationError};
use crate::operation::{plan_transition, OperationKind, QueueTransition, TableOperation};
use crate::pull::{prepare_pull, pull_pages, purge_table, DEFAULT_PAGE_SIZE};
use crate::push::{push_cycle, NoopSyncHandler, SyncHandler};
use crate::queue::OperationQueue;
use crate::remote::RemoteTableProxy;
use crate::settings::SyncSettings;

/// Coordinates local table changes, the operation queue and the remote
/// service.
///
/// Local mutations and queue bookkeeping happen under one lock so a row
/// and its queued operation never diverge. Push cycles are serialized by a
/// second lock; a second pusher waits, then drains whatever operations
/// remain.
pub struct SyncContext {
    store: Arc<dyn LocalStore>,
    queue: OperationQueue,
    settings: SyncSettings,
    proxy: Arc<dyn RemoteTableProxy>,
    handler: Arc<dyn SyncHandler>,
    store_lock: Mutex<()>,
    push_lock: Mutex<()>,
    cancel: CancellationToken,
    page_size: u64,
    initialized: AtomicBool,
}

impl SyncContext {
    /// Creates a context over a store and a remote proxy.
    ///
    /// The store must have its tables defined but not yet be initialized;
    /// [`initialize`](Self::initialize) does that.
    pub fn new(store: Arc<dyn LocalStore>, proxy: Arc<dyn RemoteTableProxy>) -> Self {
        Self {
            queue: OperationQueue::new(store.clone()),
            settings: SyncSettings::new(store.clone()),
            store,
            proxy,
            handler: Arc::new(NoopSyncHandler),
            store_lock: Mutex::new(()),
            push_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            page_size: DEFAULT_PAGE_SIZE,
            initialized: AtomicBool::new(false),
        }
    }

    /// Installs a push-completion handler.
    pub fn with_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Overrides the pull page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Initializes the store and rebuilds the queue from it. Must be
    /// called exactly once, before any other operation.
    pub fn initialize(&self) -> SyncResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyInitialized);
        }
        self.store.initialize()?;
        self.queue.load()?;
        info!(pending = self.queue.pending_operations(), "sync context initialized");
        Ok(())
    }

    fn require_initialized(&self) -> SyncResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    /// Token observed by long-running push and pull work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of queued operations not yet pushed.
    pub fn pending_operations(&self) -> u64 {
        self.queue.pending_operations()
    }

    /// Reads rows from the local store.
    pub fn read(&self, query: &QueryDescription) -> SyncResult<QueryRows> {
        self.require_initialized()?;
        Ok(self.store.read(query)?)
    }

    /// Looks up one local row by id.
    pub fn lookup(&self, table_name: &str, id: &str) -> SyncResult<Option<Item>> {
        self.require_initialized()?;
        Ok(self.store.lookup(table_name, id)?)
    }

    /// Inserts a record locally and queues it for push.
    ///
    /// A missing id is generated; a present one must be a non-empty
    /// string. Returns the stored record.
    pub fn insert(&self, table_name: &str, item: Item) -> SyncResult<Item> {
        self.require_initialized()?;
        let mut item = item;
        let existing_id = match item.get(system::ID) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(_) => {
                return Err(SyncError::InvalidArgument(
                    "the id of a record must be a non-empty string".to_owned(),
                ))
            }
        };
        let id = existing_id.unwrap_or_else(|| {
            let id = Uuid::new_v4().to_string();
            item.set(system::ID, id.clone());
            id
        });

        let _guard = self.store_lock.lock();
        let existing = self.queue.get_operation(table_name, &id)?;
        // the transition table admits an insert only into an empty slot
        plan_transition(existing.map(|op| op.kind), OperationKind::Insert)?;
        self.store.upsert(table_name, &[item.clone()], false)?;
        self.queue.enqueue(&TableOperation::new(
            OperationKind::Insert,
            table_name,
            &id,
            self.queue.next_sequence(),
        ))?;
        Ok(item)
    }

    /// Updates a record locally and queues the change for push.
    ///
    /// A pending update for the same item collapses in place: the queue
    /// entry keeps its position and the push sends the newest content.
    pub fn update(&self, table_name: &str, item: Item) -> SyncResult<()> {
        self.require_initialized()?;
        let id = item
            .id()
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                SyncError::InvalidArgument(
                    "the record must carry a non-empty string id".to_owned(),
                )
            })?;

        let _guard = self.store_lock.lock();
        let existing = self.queue.get_operation(table_name, &id)?;
        let transition =
            plan_transition(existing.as_ref().map(|op| op.kind), OperationKind::Update)?;
        self.store.upsert(table_name, &[item], false)?;
        match (transition, existing) {
            (QueueTransition::Collapse, Some(mut pending)) => {
                pending.version += 1;
                self.queue.update(&pending)?;
                delete_error(self.store.as_ref(), &pending.id)?;
            }
            _ => {
                self.queue.enqueue(&TableOperation::new(
                    OperationKind::Update,
                    table_name,
                    &id,
                    self.queue.next_sequence(),
                ))?;
            }
        }
        Ok(())
    }

    /// Deletes a record locally and queues the delete for push.
    ///
    /// The deleted row travels with the queue entry so the push can
    /// address the server and a cancellation can restore it. Deleting an
    /// item whose insert is still pending cancels both sides without
    /// touching the network.
    pub fn delete(&self, table_name: &str, id: &str) -> SyncResult<()> {
        self.require_initialized()?;

        let _guard = self.store_lock.lock();
        let snapshot =
            self.store
                .lookup(table_name, id)?
                .ok_or_else(|| SyncError::ItemNotFound {
                    table: table_name.to_owned(),
                    id: id.to_owned(),
                })?;
        let existing = self.queue.get_operation(table_name, id)?;
        let transition =
            plan_transition(existing.as_ref().map(|op| op.kind), OperationKind::Delete)?;
        self.store.delete_ids(table_name, &[id.to_owned()])?;
        match (transition, existing) {
            (QueueTransition::Cancel, Some(pending)) => {
                // local insert never seen by the server; both sides vanish
                self.queue.remove(&pending.id)?;
                delete_error(self.store.as_ref(), &pending.id)?;
            }
            (QueueTransition::Replace, Some(mut pending)) => {
                pending.kind = OperationKind::Delete;
                pending.version += 1;
                pending.item = Some(snapshot);
                self.queue.update(&pending)?;
                delete_error(self.store.as_ref(), &pending.id)?;
            }
            _ => {
                let mut operation = TableOperation::new(
                    OperationKind::Delete,
                    table_name,
                    id,
                    self.queue.next_sequence(),
                );
                operation.item = Some(snapshot);
                self.queue.enqueue(&operation)?;
            }
        }
        Ok(())
    }

    /// Pushes every queued operation to the remote service.
    ///
    /// Cycles are serialized; a concurrent caller blocks until the running
    /// cycle finishes, then pushes whatever remains.
    pub fn push(&self) -> SyncResult<()> {
        self.require_initialized()?;
        let _cycle = self.push_lock.lock();
        push_cycle(
            &self.store,
            &self.queue,
            self.proxy.as_ref(),
            self.handler.as_ref(),
            &self.store_lock,
            &self.cancel,
        )
    }

    /// Pulls remote rows matching `query` into the local store.
    ///
    /// An invalid request fails here, before any network traffic. When the
    /// table has pending operations they are pushed first, once; a failed
    /// push aborts the pull. A `query_key` makes the pull incremental.
    pub fn pull(
        &self,
        query: &QueryDescription,
        query_key: Option<&str>,
    ) -> SyncResult<()> {
        self.require_initialized()?;
        let mask = prepare_pull(&self.settings, query, query_key)?;

        if self.queue.count_pending(&query.table_name)? > 0 {
            self.push()?;
        }

        pull_pages(
            &self.store,
            &self.settings,
            self.proxy.as_ref(),
            &self.store_lock,
            &self.cancel,
            query,
            query_key,
            mask,
            self.page_size,
        )
    }

    /// Removes local rows matching `query` without telling the server.
    pub fn purge(
        &self,
        query: &QueryDescription,
        query_key: Option<&str>,
        force: bool,
    ) -> SyncResult<()> {
        self.require_initialized()?;
        purge_table(
            &self.store,
            &self.queue,
            &self.settings,
            &self.store_lock,
            query,
            query_key,
            force,
        )
    }

    /// Resolves a push error by discarding the queued operation and
    /// overwriting the local row, typically with the server's version.
    ///
    /// Fails if the operation was collapsed since the error was recorded.
    pub fn cancel_and_update_item(
        &self,
        error: &TableOperationError,
        item: Item,
    ) -> SyncResult<()> {
        self.require_initialized()?;
        if item.id() != Some(error.item_id.as_str()) {
            return Err(SyncError::InvalidArgument(
                "the replacement record must keep the failed operation's id".to_owned(),
            ));
        }
        let _guard = self.store_lock.lock();
        self.cancel_operation(error)?;
        self.store.upsert(&error.table_name, &[item], true)?;
        Ok(())
    }

    /// Resolves a push error by discarding both the queued operation and
    /// the local row.
    pub fn cancel_and_discard_item(&self, error: &TableOperationError) -> SyncResult<()> {
        self.require_initialized()?;
        let _guard = self.store_lock.lock();
        self.cancel_operation(error)?;
        self.store
            .delete_ids(&error.table_name, &[error.item_id.clone()])?;
        Ok(())
    }

    fn cancel_operation(&self, error: &TableOperationError) -> SyncResult<()> {
        if !self.queue.delete(&error.id, error.operation_version)? {
            return Err(SyncError::InvalidOperation(
                "the operation changed since the error was recorded and cannot be cancelled"
                    .to_owned(),
            ));
        }
        delete_error(self.store.as_ref(), &error.id)
    }
}
