//! Names of the system columns shared between the remote service and the
//! local store.

/// The item id column. Every table has it.
pub const ID: &str = "id";

/// Row version used for optimistic concurrency (`If-Match` on the wire).
pub const VERSION: &str = "__version";

/// Server-side creation timestamp.
pub const CREATED_AT: &str = "__createdAt";

/// Server-side last-update timestamp; drives incremental pull.
pub const UPDATED_AT: &str = "__updatedAt";

/// Soft-delete marker returned by the server when deleted records are
/// included in a read.
pub const DELETED: &str = "__deleted";
