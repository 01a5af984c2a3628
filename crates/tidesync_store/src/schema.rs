//! Table schema model: storage classes, column maps and system metadata.

use tidesync_query::{system, Value};

/// SQLite storage classes used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlColumnType {
    /// INTEGER storage (bools and integers).
    Integer,
    /// REAL storage (floats and epoch-second dates).
    Real,
    /// TEXT storage (strings, uuids, base64 bytes, JSON composites).
    Text,
}

impl SqlColumnType {
    /// The SQL type name.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlColumnType::Integer => "INTEGER",
            SqlColumnType::Real => "REAL",
            SqlColumnType::Text => "TEXT",
        }
    }
}

/// The semantic type of a column, captured from the prototype record at
/// `define_table` time and used to coerce values on the way back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Integer,
    /// Double-precision float.
    Float,
    /// Text string.
    String,
    /// UTC timestamp.
    DateTime,
    /// GUID.
    Uuid,
    /// Byte string.
    Bytes,
    /// JSON array.
    Array,
    /// Nested JSON object.
    Object,
}

impl ValueKind {
    /// The semantic kind of a value, or `None` for null.
    pub fn of(value: &Value) -> Option<ValueKind> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Float(_) => Some(ValueKind::Float),
            Value::String(_) => Some(ValueKind::String),
            Value::DateTime(_) => Some(ValueKind::DateTime),
            Value::Uuid(_) => Some(ValueKind::Uuid),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Array(_) => Some(ValueKind::Array),
            Value::Object(_) => Some(ValueKind::Object),
        }
    }

    /// The fixed semantic-type-to-storage-class mapping.
    pub fn storage_type(&self) -> SqlColumnType {
        match self {
            ValueKind::Bool | ValueKind::Integer => SqlColumnType::Integer,
            ValueKind::Float | ValueKind::DateTime => SqlColumnType::Real,
            ValueKind::String
            | ValueKind::Uuid
            | ValueKind::Bytes
            | ValueKind::Array
            | ValueKind::Object => SqlColumnType::Text,
        }
    }
}

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub kind: ValueKind,
    /// Storage class.
    pub store_type: SqlColumnType,
}

impl ColumnDefinition {
    /// Creates a column definition for `kind`.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            store_type: kind.storage_type(),
        }
    }
}

/// The ordered column map of one table plus the system columns it tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Columns in definition order.
    pub columns: Vec<ColumnDefinition>,
    /// Which system columns this table tracks.
    pub system_properties: SystemProperties,
}

impl TableDefinition {
    /// Builds a definition, deriving the system-properties mask from the
    /// column names.
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        let system_properties =
            SystemProperties::from_columns(columns.iter().map(|c| c.name.as_str()));
        Self {
            columns,
            system_properties,
        }
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns true if the table defines `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Bitmask of the optional system columns a table tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemProperties(u8);

impl SystemProperties {
    /// No system columns.
    pub const NONE: SystemProperties = SystemProperties(0);
    /// `__version`.
    pub const VERSION: SystemProperties = SystemProperties(1);
    /// `__createdAt`.
    pub const CREATED_AT: SystemProperties = SystemProperties(2);
    /// `__updatedAt`.
    pub const UPDATED_AT: SystemProperties = SystemProperties(4);
    /// `__deleted`.
    pub const DELETED: SystemProperties = SystemProperties(8);

    /// Derives the mask from column names.
    pub fn from_columns<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut mask = SystemProperties::NONE;
        for name in names {
            match name {
                system::VERSION => mask = mask.union(SystemProperties::VERSION),
                system::CREATED_AT => mask = mask.union(SystemProperties::CREATED_AT),
                system::UPDATED_AT => mask = mask.union(SystemProperties::UPDATED_AT),
                system::DELETED => mask = mask.union(SystemProperties::DELETED),
                _ => {}
            }
        }
        mask
    }

    /// The raw bits, as persisted in the config table.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Reconstructs a mask from persisted bits.
    pub fn from_bits(bits: u8) -> Self {
        SystemProperties(bits & 0x0F)
    }

    /// Union of two masks.
    pub fn union(self, other: SystemProperties) -> SystemProperties {
        SystemProperties(self.0 | other.0)
    }

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: SystemProperties) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Names of the store-reserved local system tables.
pub mod local_tables {
    /// The durable operation queue.
    pub const OPERATIONS: &str = "__operations";
    /// Persisted sync error records.
    pub const ERRORS: &str = "__errors";
    /// Key-value configuration (delta tokens, system-property masks).
    pub const CONFIG: &str = "__config";

    /// All reserved table names.
    pub const ALL: [&str; 3] = [OPERATIONS, ERRORS, CONFIG];

    /// Returns true if `name` is one of the reserved system tables.
    pub fn is_system_table(name: &str) -> bool {
        ALL.iter().any(|t| t.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mapping_is_fixed() {
        assert_eq!(ValueKind::Bool.storage_type(), SqlColumnType::Integer);
        assert_eq!(ValueKind::Integer.storage_type(), SqlColumnType::Integer);
        assert_eq!(ValueKind::Float.storage_type(), SqlColumnType::Real);
        assert_eq!(ValueKind::DateTime.storage_type(), SqlColumnType::Real);
        assert_eq!(ValueKind::String.storage_type(), SqlColumnType::Text);
        assert_eq!(ValueKind::Uuid.storage_type(), SqlColumnType::Text);
        assert_eq!(ValueKind::Bytes.storage_type(), SqlColumnType::Text);
        assert_eq!(ValueKind::Array.storage_type(), SqlColumnType::Text);
        assert_eq!(ValueKind::Object.storage_type(), SqlColumnType::Text);
    }

    #[test]
    fn system_properties_mask_round_trips() {
        let mask = SystemProperties::from_columns(
            ["id", "__version", "__updatedAt", "text"].into_iter(),
        );
        assert!(mask.contains(SystemProperties::VERSION));
        assert!(mask.contains(SystemProperties::UPDATED_AT));
        assert!(!mask.contains(SystemProperties::DELETED));
        assert_eq!(SystemProperties::from_bits(mask.bits()), mask);
    }

    #[test]
    fn column_lookup_ignores_case() {
        let def = TableDefinition::new(vec![
            ColumnDefinition::new("id", ValueKind::String),
            ColumnDefinition::new("Price", ValueKind::Float),
        ]);
        assert!(def.has_column("price"));
        assert!(!def.has_column("missing"));
    }

    #[test]
    fn reserved_table_names() {
        assert!(local_tables::is_system_table("__operations"));
        assert!(local_tables::is_system_table("__CONFIG"));
        assert!(!local_tables::is_system_table("todo"));
    }
}
