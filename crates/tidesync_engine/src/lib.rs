//! # tidesync engine
//!
//! Offline data synchronization over a local SQLite store.
//!
//! Applications mutate tables through a [`SyncContext`]; every local
//! change is recorded in a durable operation queue and replayed against
//! the remote service on [`push`](SyncContext::push). Remote state flows
//! back through [`pull`](SyncContext::pull), optionally incrementally via
//! a per-query delta token. Conflicts become durable
//! [`TableOperationError`] records that the application resolves with the
//! context's cancellation helpers.
//!
//! The remote side is abstracted behind [`RemoteTableProxy`];
//! [`MockRemoteTableProxy`] ships for tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod context;
mod error;
mod errors;
mod operation;
mod pull;
mod push;
mod queue;
mod remote;
mod settings;

pub use cancel::CancellationToken;
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use errors::{load_errors, TableOperationError};
pub use operation::{plan_transition, OperationKind, QueueTransition, TableOperation};
pub use pull::{DEFAULT_PAGE_SIZE, INCLUDE_DELETED_PARAMETER, SYSTEM_PROPERTIES_PARAMETER};
pub use push::{NoopSyncHandler, PushCompletionResult, PushStatus, SyncHandler};
pub use queue::OperationQueue;
pub use remote::{
    Features, MockRemoteTableProxy, QueryPage, RecordedCall, RemoteError, RemoteTableProxy,
};
pub use settings::SyncSettings;
