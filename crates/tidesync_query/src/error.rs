//! Error types for query building and rendering.

use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while building or rendering a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A table or column name failed identifier validation.
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// An expression cannot be rendered by the target dialect. The message
    /// names the offending sub-expression.
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// A function was called with the wrong number of arguments.
    #[error("function '{function}' expects {expected} argument(s), got {actual}")]
    BadArity {
        /// OData name of the function.
        function: &'static str,
        /// Required argument count, as text (e.g. "2" or "2 or 3").
        expected: &'static str,
        /// Supplied argument count.
        actual: usize,
    },
}
