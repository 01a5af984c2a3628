//! The portable, renderer-agnostic form of a compiled query.

use crate::node::QueryNode;

/// Sort direction of one ordering entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending (the default).
    Ascending,
    /// Descending.
    Descending,
}

/// One `orderby` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The ordered field.
    pub member: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderBy {
    /// An ascending entry.
    pub fn ascending(member: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            direction: OrderDirection::Ascending,
        }
    }

    /// A descending entry.
    pub fn descending(member: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            direction: OrderDirection::Descending,
        }
    }
}

/// A compiled query: filter, ordering, projection and paging for one table.
///
/// Immutable in spirit once built; renderers take it by reference. Cloning is
/// cheap enough that derived queries (e.g. the select-id clone used by
/// delete-by-query) just copy and adjust.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescription {
    /// The queried table.
    pub table_name: String,
    /// Optional filter expression.
    pub filter: Option<QueryNode>,
    /// Ordering entries, in declaration order.
    pub ordering: Vec<OrderBy>,
    /// Projected column names; empty means all columns.
    pub selection: Vec<String>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Maximum rows to take.
    pub top: Option<u64>,
    /// Whether the total (unpaged) count should be computed.
    pub include_total_count: bool,
    /// Extra user-defined query-string parameters for the remote service.
    pub parameters: Vec<(String, String)>,
}

impl QueryDescription {
    /// Creates an unfiltered query over `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            filter: None,
            ordering: Vec::new(),
            selection: Vec::new(),
            skip: None,
            top: None,
            include_total_count: false,
            parameters: Vec::new(),
        }
    }

    /// Sets the filter expression.
    pub fn with_filter(mut self, filter: QueryNode) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends an ordering entry.
    pub fn with_order_by(mut self, order: OrderBy) -> Self {
        self.ordering.push(order);
        self
    }

    /// Sets the projected columns.
    pub fn with_selection(mut self, columns: Vec<String>) -> Self {
        self.selection = columns;
        self
    }

    /// Sets the skip count.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the take count.
    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Requests the total count alongside the results.
    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    /// Adds a user-defined query-string parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// ANDs `extra` onto the existing filter, or installs it when there is
    /// none. Incremental pull uses this to combine its watermark bound with
    /// the caller's filter.
    pub fn and_filter(&mut self, extra: QueryNode) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(extra),
            None => extra,
        });
    }
}
