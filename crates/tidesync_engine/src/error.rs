//! Error types for the synchronization engine.

use thiserror::Error;
use tidesync_query::QueryError;
use tidesync_store::StoreError;

use crate::push::PushCompletionResult;

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The context has not been initialized with a store yet.
    #[error("the synchronization context is not initialized")]
    NotInitialized,

    /// The context was initialized twice.
    #[error("the synchronization context is already initialized")]
    AlreadyInitialized,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested local state transition is not allowed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// No record with the given id exists in the local table.
    #[error("no record with id '{id}' exists in table '{table}'")]
    ItemNotFound {
        /// Table that was searched.
        table: String,
        /// Missing record id.
        id: String,
    },

    /// A push cycle ran but did not complete cleanly.
    #[error("push completed with status {:?} and {} errored operation(s)", .0.status, .0.errors.len())]
    PushFailed(PushCompletionResult),

    /// The operation was cancelled before it finished.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The remote service rejected a request made outside of a push cycle.
    #[error(transparent)]
    Remote(#[from] crate::remote::RemoteError),

    /// The local store rejected a request.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A query could not be translated.
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Convenience alias for engine results.
pub type SyncResult<T> = Result<T, SyncError>;
