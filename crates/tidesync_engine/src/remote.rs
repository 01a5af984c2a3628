//! Contract between the sync engine and the remote table transport.

use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use tidesync_query::Item;

/// Failure taxonomy the push and pull loops route on.
///
/// Network and authentication failures abort the rest of a push cycle;
/// conflicts are recorded per operation and the cycle continues.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The request never produced a server response.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the caller's credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Precondition failed or duplicate insert; carries the server's copy
    /// of the record when the response parsed as one.
    #[error("conflict (status {status})")]
    Conflict {
        /// HTTP status, 409 or 412.
        status: i64,
        /// Raw response body.
        raw: Option<String>,
        /// Server's version of the record.
        item: Option<Item>,
    },

    /// The record does not exist on the server.
    #[error("the record was not found on the server")]
    NotFound,

    /// Any other server-side rejection.
    #[error("server error (status {status})")]
    Server {
        /// HTTP status.
        status: i64,
        /// Raw response body.
        raw: Option<String>,
    },
}

/// Telemetry flags a transport forwards with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(u8);

impl Features {
    /// No flags.
    pub const NONE: Features = Features(0);
    /// The request originates from the offline sync machinery.
    pub const OFFLINE: Features = Features(1);
    /// The request came through a typed table surface.
    pub const TYPED_TABLE: Features = Features(2);
    /// The request came through the untyped table surface.
    pub const UNTYPED_TABLE: Features = Features(4);
    /// The request carries caller-supplied query parameters.
    pub const ADDITIONAL_QUERY_PARAMETERS: Features = Features(8);

    /// Union of two flag sets.
    pub fn union(self, other: Features) -> Features {
        Features(self.0 | other.0)
    }

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    /// Comma-joined wire codes, in a stable order.
    pub fn wire_value(self) -> String {
        let mut codes = Vec::new();
        if self.contains(Features::OFFLINE) {
            codes.push("OL");
        }
        if self.contains(Features::TYPED_TABLE) {
            codes.push("TT");
        }
        if self.contains(Features::UNTYPED_TABLE) {
            codes.push("TU");
        }
        if self.contains(Features::ADDITIONAL_QUERY_PARAMETERS) {
            codes.push("QS");
        }
        codes.join(",")
    }
}

/// One page of a remote query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Records in this page.
    pub items: Vec<Item>,
    /// Total matching count, when the query asked for one.
    pub total_count: Option<u64>,
}

/// Transport-side view of one remote table service.
///
/// Calls are synchronous; the engine drives them from its own push and
/// pull loops and routes failures by [`RemoteError`] variant.
pub trait RemoteTableProxy: Send + Sync {
    /// Creates a record, returning the server's copy.
    fn insert(&self, table_name: &str, item: &Item, features: Features)
        -> Result<Item, RemoteError>;

    /// Updates a record, returning the server's copy.
    fn update(&self, table_name: &str, item: &Item, features: Features)
        -> Result<Item, RemoteError>;

    /// Deletes a record.
    fn delete(&self, table_name: &str, item: &Item, features: Features)
        -> Result<(), RemoteError>;

    /// Runs an OData query string against the table.
    fn read(&self, table_name: &str, query: &str, features: Features)
        -> Result<QueryPage, RemoteError>;
}

/// A recorded proxy call, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    /// An insert with the pushed item.
    Insert(String, Item),
    /// An update with the pushed item.
    Update(String, Item),
    /// A delete with the pushed snapshot.
    Delete(String, Item),
    /// A read with the rendered query string.
    Read(String, String),
}

type InsertResponse = Result<Item, RemoteError>;
type DeleteResponse = Result<(), RemoteError>;
type ReadResponse = Result<QueryPage, RemoteError>;

#[derive(Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    features: Vec<Features>,
    write_responses: VecDeque<InsertResponse>,
    delete_responses: VecDeque<DeleteResponse>,
    read_responses: VecDeque<ReadResponse>,
}

/// Scripted in-memory proxy for tests.
///
/// Responses are consumed in FIFO order per call family; when a script
/// runs dry, writes echo the pushed item back, deletes succeed and reads
/// return an empty page. Every call and its feature flags are recorded.
#[derive(Default)]
pub struct MockRemoteTableProxy {
    state: Mutex<MockState>,
}

impl MockRemoteTableProxy {
    /// An unscripted mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the response for the next insert or update.
    pub fn push_write_response(&self, response: InsertResponse) {
        self.state.lock().write_responses.push_back(response);
    }

    /// Queues the response for the next delete.
    pub fn push_delete_response(&self, response: DeleteResponse) {
        self.state.lock().delete_responses.push_back(response);
    }

    /// Queues the response for the next read.
    pub fn push_read_response(&self, response: ReadResponse) {
        self.state.lock().read_responses.push_back(response);
    }

    /// Queues a read response holding one page of items.
    pub fn push_read_page(&self, items: Vec<Item>) {
        self.push_read_response(Ok(QueryPage {
            items,
            total_count: None,
        }));
    }

    /// Everything the mock was asked to do, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Feature flags seen per call, in order.
    pub fn features_seen(&self) -> Vec<Features> {
        self.state.lock().features.clone()
    }

    /// Query strings from recorded reads, in order.
    pub fn read_queries(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Read(_, query) => Some(query.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RemoteTableProxy for MockRemoteTableProxy {
    fn insert(
        &self,
        table_name: &str,
        item: &Item,
        features: Features,
    ) -> Result<Item, RemoteError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(RecordedCall::Insert(table_name.to_owned(), item.clone()));
        state.features.push(features);
        state
            .write_responses
            .pop_front()
            .unwrap_or_else(|| Ok(item.clone()))
    }

    fn update(
        &self,
        table_name: &str,
        item: &Item,
        features: Features,
    ) -> Result<Item, RemoteError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(RecordedCall::Update(table_name.to_owned(), item.clone()));
        state.features.push(features);
        state
            .write_responses
            .pop_front()
            .unwrap_or_else(|| Ok(item.clone()))
    }

    fn delete(
        &self,
        table_name: &str,
        item: &Item,
        features: Features,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(RecordedCall::Delete(table_name.to_owned(), item.clone()));
        state.features.push(features);
        state.delete_responses.pop_front().unwrap_or(Ok(()))
    }

    fn read(
        &self,
        table_name: &str,
        query: &str,
        features: Features,
    ) -> Result<QueryPage, RemoteError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(RecordedCall::Read(table_name.to_owned(), query.to_owned()));
        state.features.push(features);
        state
            .read_responses
            .pop_front()
            .unwrap_or_else(|| Ok(QueryPage::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_codes_join_in_stable_order() {
        let flags = Features::UNTYPED_TABLE
            .union(Features::OFFLINE)
            .union(Features::ADDITIONAL_QUERY_PARAMETERS);
        assert_eq!(flags.wire_value(), "OL,TU,QS");
        assert_eq!(Features::NONE.wire_value(), "");
    }

    #[test]
    fn mock_scripts_responses_in_order_then_echoes() {
        let mock = MockRemoteTableProxy::new();
        mock.push_write_response(Err(RemoteError::Network("offline".into())));

        let item = Item::new().with("id", "a");
        assert!(matches!(
            mock.insert("todo", &item, Features::OFFLINE),
            Err(RemoteError::Network(_))
        ));
        // script exhausted, echo behavior
        assert_eq!(mock.insert("todo", &item, Features::OFFLINE).unwrap(), item);
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(mock.features_seen(), vec![Features::OFFLINE; 2]);
    }
}
