//! Error types for the local store.

use thiserror::Error;
use tidesync_query::QueryError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `define_table` was called after `initialize`.
    #[error("cannot define table '{0}': the store is already initialized")]
    AlreadyInitialized(String),

    /// An operation that needs schema information ran before `initialize`.
    #[error("the store is not initialized")]
    NotInitialized,

    /// A table was defined twice.
    #[error("table '{0}' is already defined")]
    TableAlreadyDefined(String),

    /// An operation referenced a table with no definition.
    #[error("table '{0}' is not defined")]
    TableNotDefined(String),

    /// An item carried a column the table definition does not have.
    #[error("column '{column}' is not defined on table '{table}'")]
    ColumnNotDefined {
        /// The target table.
        table: String,
        /// The undefined column.
        column: String,
    },

    /// A prototype field has a type the storage mapping cannot place.
    #[error("field '{column}' of table '{table}' has no storable type")]
    UnsupportedColumnType {
        /// The table being defined.
        table: String,
        /// The offending field.
        column: String,
    },

    /// A stored value could not be converted back to its semantic type.
    #[error("stored value for column '{column}' is not a valid {expected}: {message}")]
    BadStoredValue {
        /// The column being read.
        column: String,
        /// The expected semantic type.
        expected: &'static str,
        /// Details.
        message: String,
    },

    /// Query building or rendering failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The underlying SQLite engine failed. Treated as fatal for the
    /// current operation; no storage-level recovery is attempted.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
