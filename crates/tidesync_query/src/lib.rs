//! # tidesync query
//!
//! Portable query model for the tidesync offline synchronization engine.
//!
//! This crate provides:
//! - A dynamic [`Value`]/[`Item`] record model
//! - A closed filter expression tree ([`QueryNode`])
//! - [`QueryDescription`], the renderer-agnostic compiled query
//! - An OData query-string renderer (for the remote table proxy)
//! - A parameterized SQLite renderer (for the local store)
//!
//! The same description feeds both renderers, so a query means the same
//! thing against the remote service and the local store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod description;
mod error;
pub mod ident;
mod node;
pub mod odata;
mod sql;
pub mod system;
mod value;

pub use description::{OrderBy, OrderDirection, QueryDescription};
pub use error::{QueryError, QueryResult};
pub use node::{field, lit, BinaryOp, CastTarget, QueryFunction, QueryNode, UnaryOp};
pub use sql::{SqlFormatter, SqlStatement};
pub use value::{format_datetime, parse_datetime, round_to_millis, Item, Value};
