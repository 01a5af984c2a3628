//! Dynamic item value type.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// A dynamic value carried by an item field or a query constant.
///
/// This is the closed set of semantic types the sync engine understands.
/// Mapping to storage classes and wire literals is done by the renderers and
/// the local store, keyed off the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// Text string (UTF-8).
    String(String),
    /// Point in time, UTC. Stored at millisecond precision.
    DateTime(DateTime<Utc>),
    /// Globally unique identifier.
    Uuid(Uuid),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested record.
    Object(Item),
}

impl Value {
    /// Returns true if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a date-time.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    /// Converts to the JSON representation used for TEXT storage and queue
    /// snapshots.
    ///
    /// Dates become RFC 3339 strings, uuids their hyphenated form and byte
    /// strings base64 text. The reverse mapping is schema-driven: the local
    /// store re-coerces strings back into dates/uuids/bytes using the
    /// table's column map.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(d) => serde_json::Value::String(format_datetime(*d)),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Object(item) => item.to_json(),
        }
    }

    /// Builds a value from untyped JSON.
    ///
    /// Strings stay strings; callers that know the semantic type of a field
    /// apply the coercion themselves.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(values) => {
                Value::Array(values.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Object(Item::from_json(json)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

/// Formats a timestamp as RFC 3339 with millisecond precision.
pub fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp, normalizing to UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Rounds a timestamp to whole milliseconds.
///
/// The local store persists dates as epoch seconds in a REAL column, which
/// cannot hold sub-millisecond precision faithfully, so all dates entering
/// the engine are clamped to milliseconds up front.
pub fn round_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(value.timestamp_millis())
        .single()
        .unwrap_or(value)
}

/// A schemaless record: an insertion-ordered map of field name to value.
///
/// Field order is preserved so that generated SQL and serialized snapshots
/// are stable across runs. Lookup is linear; items are small.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    fields: Vec<(String, Value)>,
}

impl Item {
    /// Creates an empty item.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the item has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Gets a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Sets a field, replacing in place if it already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Builder-style `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Removes a field, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Iterates fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// The `id` field as a string, if present and non-null.
    pub fn id(&self) -> Option<&str> {
        self.get(crate::system::ID).and_then(Value::as_str)
    }

    /// Merges `other`'s fields over this item, in `other`'s order.
    ///
    /// Used to patch server responses back into a local row: fields the
    /// server returned win, fields it did not mention survive.
    pub fn merge(&mut self, other: &Item) {
        for (name, value) in other.fields() {
            self.set(name, value.clone());
        }
    }

    /// Converts to a JSON object, preserving field order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.fields() {
            map.insert(name.to_owned(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Serializes to compact JSON text.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Builds an item from a JSON object. Non-object input yields an empty
    /// item.
    pub fn from_json(json: &serde_json::Value) -> Item {
        let mut item = Item::new();
        if let serde_json::Value::Object(map) = json {
            for (name, value) in map {
                item.set(name.clone(), Value::from_json(value));
            }
        }
        item
    }

    /// Parses an item from JSON text.
    pub fn from_json_str(text: &str) -> Option<Item> {
        let json: serde_json::Value = serde_json::from_str(text).ok()?;
        json.is_object().then(|| Item::from_json(&json))
    }
}

impl FromIterator<(String, Value)> for Item {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut item = Item::new();
        for (name, value) in iter {
            item.set(name, value);
        }
        item
    }
}
