//! Local persistence for offline-capable tables.
//!
//! The [`LocalStore`] trait is the seam between the synchronization engine
//! and durable storage; [`SqliteStore`] is the shipped implementation. A
//! store is configured by defining each table from a prototype record and
//! then initialized once, after which records can be read, upserted and
//! deleted both by application code and by the sync machinery.
//!
//! Values are mapped onto three SQLite affinities: booleans and integers
//! become INTEGER, floats and timestamps become REAL (epoch seconds) and
//! everything else is stored as TEXT, with byte arrays base64-encoded and
//! composite values serialized as JSON.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod local;
mod schema;
mod serialize;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use local::{LocalStore, QueryRows};
pub use schema::{
    local_tables, ColumnDefinition, SqlColumnType, SystemProperties, TableDefinition, ValueKind,
};
pub use serialize::{deserialize_value, serialize_parameter, serialize_value};
pub use sqlite::SqliteStore;
