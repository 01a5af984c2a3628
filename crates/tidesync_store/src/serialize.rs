//! Value coercion between the semantic model and SQLite storage classes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use tidesync_query::{round_to_millis, Value};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::schema::{SqlColumnType, ValueKind};

/// Serializes a value into the given storage class.
pub fn serialize_value(value: &Value, store_type: SqlColumnType) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    match store_type {
        SqlColumnType::Text => SqlValue::Text(to_text(value)),
        SqlColumnType::Real => SqlValue::Real(to_real(value)),
        SqlColumnType::Integer => SqlValue::Integer(to_integer(value)),
    }
}

/// Serializes a query parameter, inferring the storage class from the value
/// itself (parameters have no column definition).
pub fn serialize_parameter(value: &Value) -> SqlValue {
    match ValueKind::of(value) {
        None => SqlValue::Null,
        Some(kind) => serialize_value(value, kind.storage_type()),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Uuid(u) => u.to_string(),
        Value::Bytes(b) => BASE64.encode(b),
        Value::Array(_) | Value::Object(_) => value.to_json().to_string(),
        other => other.to_json().to_string().trim_matches('"').to_owned(),
    }
}

fn to_real(value: &Value) -> f64 {
    match value {
        // epoch seconds, clamped to millisecond precision
        Value::DateTime(d) => round_to_millis(*d).timestamp_millis() as f64 / 1000.0,
        Value::Float(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn to_integer(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => *i,
        Value::Bool(b) => i64::from(*b),
        Value::Float(f) => *f as i64,
        _ => 0,
    }
}

/// Converts a raw stored value back into its semantic type using the
/// column's recorded kind.
pub fn deserialize_value(column: &str, raw: SqlValue, kind: ValueKind) -> StoreResult<Value> {
    if matches!(raw, SqlValue::Null) {
        return Ok(Value::Null);
    }
    match kind {
        ValueKind::Bool => Ok(Value::Bool(raw_integer(&raw) == 1)),
        ValueKind::Integer => Ok(Value::Integer(raw_integer(&raw))),
        ValueKind::Float => Ok(Value::Float(raw_real(&raw))),
        ValueKind::DateTime => {
            let millis = (raw_real(&raw) * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(Value::DateTime)
                .ok_or_else(|| StoreError::BadStoredValue {
                    column: column.to_owned(),
                    expected: "timestamp",
                    message: format!("{millis} is out of range"),
                })
        }
        ValueKind::String => Ok(Value::String(raw_text(&raw))),
        ValueKind::Uuid => {
            let text = raw_text(&raw);
            Uuid::parse_str(&text)
                .map(Value::Uuid)
                .map_err(|e| StoreError::BadStoredValue {
                    column: column.to_owned(),
                    expected: "uuid",
                    message: e.to_string(),
                })
        }
        ValueKind::Bytes => {
            let text = raw_text(&raw);
            BASE64
                .decode(text.as_bytes())
                .map(Value::Bytes)
                .map_err(|e| StoreError::BadStoredValue {
                    column: column.to_owned(),
                    expected: "base64 bytes",
                    message: e.to_string(),
                })
        }
        ValueKind::Array | ValueKind::Object => {
            let text = raw_text(&raw);
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| StoreError::BadStoredValue {
                    column: column.to_owned(),
                    expected: "json",
                    message: e.to_string(),
                })?;
            Ok(Value::from_json(&json))
        }
    }
}

/// Converts a raw stored value with no column definition; used for reads of
/// internal/unknown tables, which pass values through as-is.
pub fn raw_to_value(raw: SqlValue) -> Value {
    match raw {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::Bytes(b),
    }
}

fn raw_integer(raw: &SqlValue) -> i64 {
    match raw {
        SqlValue::Integer(i) => *i,
        SqlValue::Real(f) => *f as i64,
        _ => 0,
    }
}

fn raw_real(raw: &SqlValue) -> f64 {
    match raw {
        SqlValue::Real(f) => *f,
        SqlValue::Integer(i) => *i as f64,
        _ => 0.0,
    }
}

fn raw_text(raw: &SqlValue) -> String {
    match raw {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn round_trip(value: Value, kind: ValueKind) -> Value {
        let raw = serialize_value(&value, kind.storage_type());
        deserialize_value("c", raw, kind).unwrap()
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(round_trip(Value::Bool(true), ValueKind::Bool), Value::Bool(true));
        assert_eq!(
            round_trip(Value::Integer(-42), ValueKind::Integer),
            Value::Integer(-42)
        );
        assert_eq!(
            round_trip(Value::Float(2.25), ValueKind::Float),
            Value::Float(2.25)
        );
        assert_eq!(
            round_trip(Value::String("x".into()), ValueKind::String),
            Value::String("x".into())
        );
    }

    #[test]
    fn date_round_trips_at_millisecond_precision() {
        let when: DateTime<Utc> = "2014-03-01T08:30:15.123Z".parse().unwrap();
        assert_eq!(
            round_trip(Value::DateTime(when), ValueKind::DateTime),
            Value::DateTime(when)
        );
    }

    #[test]
    fn date_serializes_as_epoch_seconds() {
        let epoch_plus_90 = Utc.timestamp_millis_opt(90_500).single().unwrap();
        assert_eq!(
            serialize_value(&Value::DateTime(epoch_plus_90), SqlColumnType::Real),
            SqlValue::Real(90.5)
        );
    }

    #[test]
    fn bytes_round_trip_via_base64() {
        let bytes = Value::Bytes(vec![0, 1, 254, 255]);
        assert_eq!(
            serialize_value(&bytes, SqlColumnType::Text),
            SqlValue::Text("AAH+/w==".into())
        );
        assert_eq!(round_trip(bytes.clone(), ValueKind::Bytes), bytes);
    }

    #[test]
    fn uuid_round_trips_as_text() {
        let value = Value::Uuid(Uuid::new_v4());
        assert_eq!(round_trip(value.clone(), ValueKind::Uuid), value);
    }

    #[test]
    fn composites_round_trip_as_json_text() {
        let value = Value::Array(vec![Value::Integer(1), Value::String("a".into())]);
        assert_eq!(round_trip(value.clone(), ValueKind::Array), value);
    }

    #[test]
    fn bool_and_integer_share_storage_class() {
        assert_eq!(
            serialize_value(&Value::Bool(true), SqlColumnType::Integer),
            SqlValue::Integer(1)
        );
        // an integer 1 read through a Bool column comes back as true
        assert_eq!(
            deserialize_value("c", SqlValue::Integer(1), ValueKind::Bool).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn null_passes_through_both_ways() {
        assert_eq!(
            serialize_value(&Value::Null, SqlColumnType::Text),
            SqlValue::Null
        );
        assert_eq!(
            deserialize_value("c", SqlValue::Null, ValueKind::DateTime).unwrap(),
            Value::Null
        );
    }
}
