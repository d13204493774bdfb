//! Type-directed conversion of cursor rows into [`Record`]s.

use chrono::{NaiveTime, SecondsFormat};

use crate::backend::{RawColumn, RowCursor};
use crate::error::BackendError;
use crate::types::{ScalarKind, is_array_type};
use crate::value::{ColumnDescriptor, RawValue, Record, Value};

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("row has {actual} values for {expected} columns")]
    ColumnCount { expected: usize, actual: usize },
    #[error("column {column:?} declared {declared_type} cannot hold {found}")]
    TypeMismatch {
        column: String,
        declared_type: String,
        found: &'static str,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One descriptor per column, positions starting at 1.
pub fn describe_columns(columns: &[RawColumn]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| ColumnDescriptor::new(&column.name, &column.type_name, idx + 1))
        .collect()
}

#[derive(Clone, Debug)]
enum Binding {
    Scalar(ScalarKind),
    Passthrough { is_array: bool },
}

/// Per-column destinations, resolved once per result.
pub struct RowMaterializer {
    names: Vec<String>,
    declared: Vec<String>,
    bindings: Vec<Binding>,
}

impl RowMaterializer {
    pub fn new(columns: &[RawColumn]) -> Self {
        let bindings = columns
            .iter()
            .map(|column| match ScalarKind::from_declared(&column.type_name) {
                Some(kind) => Binding::Scalar(kind),
                None => Binding::Passthrough {
                    is_array: is_array_type(&column.type_name),
                },
            })
            .collect();
        Self {
            names: columns.iter().map(|c| c.name.clone()).collect(),
            declared: columns.iter().map(|c| c.type_name.clone()).collect(),
            bindings,
        }
    }

    pub fn materialize(&self, row: Vec<RawValue>) -> Result<Record, MaterializeError> {
        if row.len() != self.bindings.len() {
            return Err(MaterializeError::ColumnCount {
                expected: self.bindings.len(),
                actual: row.len(),
            });
        }
        let mut record = Record::new();
        for (idx, raw) in row.into_iter().enumerate() {
            let value = match &self.bindings[idx] {
                Binding::Scalar(kind) => bind_scalar(*kind, raw).map_err(|found| {
                    MaterializeError::TypeMismatch {
                        column: self.names[idx].clone(),
                        declared_type: self.declared[idx].clone(),
                        found,
                    }
                })?,
                Binding::Passthrough { is_array } => post_process(raw, *is_array),
            };
            // Later duplicates win.
            record.insert(self.names[idx].clone(), value);
        }
        Ok(record)
    }
}

/// Drains `cursor`, stopping at the first row error.
pub fn materialize_rows(
    cursor: &mut dyn RowCursor,
) -> Result<(Vec<ColumnDescriptor>, Vec<Record>), MaterializeError> {
    let descriptors = describe_columns(cursor.columns());
    if descriptors.is_empty() {
        return Ok((descriptors, Vec::new()));
    }
    let materializer = RowMaterializer::new(cursor.columns());
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row() {
        rows.push(materializer.materialize(row?)?);
    }
    Ok((descriptors, rows))
}

fn bind_scalar(kind: ScalarKind, raw: RawValue) -> Result<Value, &'static str> {
    let value = match (kind, raw) {
        (ScalarKind::String, RawValue::Bytes(bytes)) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        (ScalarKind::String, RawValue::Text(text)) => Value::String(text),
        (k, RawValue::UInt(v)) if k.is_unsigned() => Value::UInt(v),
        (k, RawValue::Int(v)) if k.is_signed() => Value::Int(v),
        (k, RawValue::Float(v)) if k.is_float() => Value::Float(v),
        (ScalarKind::Bool, RawValue::Bool(v)) => Value::Bool(v),
        (ScalarKind::Bool, RawValue::UInt(v)) => Value::Bool(v != 0),
        (k, RawValue::Date(date)) if k.is_temporal() => {
            let midnight = date.and_time(NaiveTime::MIN).and_utc();
            Value::Timestamp(midnight.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        (k, RawValue::DateTime(ts)) if k.is_temporal() => {
            Value::Timestamp(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        (_, other) => return Err(raw_kind(&other)),
    };
    Ok(value)
}

fn post_process(raw: RawValue, is_array: bool) -> Value {
    match raw {
        RawValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        RawValue::Array(items) if is_array && items.first().is_some_and(RawValue::is_bytes) => {
            Value::Strings(items.iter().map(RawValue::to_string).collect())
        }
        other => Value::Raw(other),
    }
}

fn raw_kind(raw: &RawValue) -> &'static str {
    match raw {
        RawValue::Null => "null",
        RawValue::Bool(_) => "bool",
        RawValue::UInt(_) => "unsigned integer",
        RawValue::Int(_) => "signed integer",
        RawValue::UInt128(_) | RawValue::Int128(_) => "128-bit integer",
        RawValue::Float(_) => "float",
        RawValue::Bytes(_) => "byte buffer",
        RawValue::Text(_) => "text",
        RawValue::Date(_) => "date",
        RawValue::DateTime(_) => "timestamp",
        RawValue::Array(_) => "array",
        RawValue::Tuple(_) => "tuple",
        RawValue::Map(_) => "map",
    }
}
