//! Result representation: raw driver values, materialized values, descriptors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::types::{is_array_type, is_nested_type};

/// A value as produced by a connector, before type-directed materialization.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    UInt128(u128),
    Int128(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Array(Vec<RawValue>),
    Tuple(Vec<RawValue>),
    Map(Vec<(RawValue, RawValue)>),
}

impl RawValue {
    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }

    /// Text view of string-like values; `None` for anything else.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Self::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

fn timestamp_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Generic formatter used when an array element is not a byte buffer.
impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<nil>"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt128(v) => write!(f, "{v}"),
            Self::Int128(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Text(text) => f.write_str(text),
            Self::Date(date) => write!(f, "{date}"),
            Self::DateTime(ts) => f.write_str(&timestamp_text(ts)),
            Self::Array(items) | Self::Tuple(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("map[")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::UInt(v) => serializer.serialize_u64(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            // JSON numbers cannot carry 128-bit integers losslessly.
            Self::UInt128(v) => serializer.collect_str(v),
            Self::Int128(v) => serializer.collect_str(v),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_none(),
            Self::Bytes(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Date(date) => serializer.collect_str(date),
            Self::DateTime(ts) => serializer.serialize_str(&timestamp_text(ts)),
            Self::Array(items) | Self::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&key.to_string(), value)?;
                }
                map.end()
            }
        }
    }
}

/// A materialized cell. The variant is chosen from the column's declared type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Timestamp(String),
    Strings(Vec<String>),
    Raw(RawValue),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(v) | Self::Timestamp(v) => serializer.serialize_str(v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::UInt(v) => serializer.serialize_u64(*v),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_none(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Strings(items) => items.serialize(serializer),
            Self::Raw(raw) => raw.serialize(serializer),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    pub position: usize,
    #[serde(skip_serializing_if = "is_false")]
    pub is_array: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_nested: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ColumnDescriptor {
    /// Classifies `declared_type`; `position` is 1-based.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, position: usize) -> Self {
        let declared_type = declared_type.into();
        let is_array = is_array_type(&declared_type);
        let is_nested = is_nested_type(&declared_type);
        Self {
            name: name.into(),
            declared_type,
            position,
            is_array,
            is_nested,
        }
    }
}

/// One result row keyed by column name. Duplicate names keep the last value.
pub type Record = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Record>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the statement produced no column output at all.
    pub fn is_untabular(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_classifies_on_construction() {
        let tags = ColumnDescriptor::new("tags", "Array(String)", 2);
        assert!(tags.is_array);
        assert!(!tags.is_nested);
        let nested = ColumnDescriptor::new("n", "Nested(a UInt8)", 1);
        assert!(nested.is_nested);
        assert!(!nested.is_array);
    }

    #[test]
    fn descriptor_json_omits_false_flags() {
        let plain = ColumnDescriptor::new("id", "UInt32", 1);
        assert_eq!(
            serde_json::to_value(&plain).expect("json"),
            json!({"name": "id", "type": "UInt32", "position": 1})
        );
        let tags = ColumnDescriptor::new("tags", "Array(String)", 2);
        assert_eq!(
            serde_json::to_value(&tags).expect("json"),
            json!({"name": "tags", "type": "Array(String)", "position": 2, "is_array": true})
        );
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let mut row = Record::new();
        row.insert("s".into(), Value::String("x".into()));
        row.insert("u".into(), Value::UInt(7));
        row.insert("i".into(), Value::Int(-3));
        row.insert("f".into(), Value::Float(f64::NAN));
        row.insert("b".into(), Value::Bool(true));
        row.insert("t".into(), Value::Timestamp("2024-01-02T03:04:05Z".into()));
        row.insert("a".into(), Value::Strings(vec!["p".into(), "q".into()]));
        row.insert(
            "r".into(),
            Value::Raw(RawValue::Array(vec![RawValue::UInt(1), RawValue::Null])),
        );
        assert_eq!(
            serde_json::to_value(&row).expect("json"),
            json!({
                "a": ["p", "q"],
                "b": true,
                "f": null,
                "i": -3,
                "r": [1, null],
                "s": "x",
                "t": "2024-01-02T03:04:05Z",
                "u": 7
            })
        );
    }

    #[test]
    fn raw_map_and_wide_ints_serialize() {
        let raw = RawValue::Map(vec![
            (RawValue::Bytes(b"k".to_vec()), RawValue::UInt128(u128::MAX)),
            (RawValue::Int(2), RawValue::Bytes(b"v".to_vec())),
        ]);
        assert_eq!(
            serde_json::to_value(&raw).expect("json"),
            json!({"k": u128::MAX.to_string(), "2": "v"})
        );
    }

    #[test]
    fn display_is_generic() {
        let raw = RawValue::Array(vec![
            RawValue::Int(1),
            RawValue::Null,
            RawValue::Bytes(b"x".to_vec()),
        ]);
        assert_eq!(raw.to_string(), "[1 <nil> x]");
        let map = RawValue::Map(vec![(RawValue::Text("a".into()), RawValue::Float(1.5))]);
        assert_eq!(map.to_string(), "map[a:1.5]");
    }
}
