//! Declared-type classification.
//!
//! These are prefix tests over the type name reported by the server. They do not
//! parse the ClickHouse type grammar.

const ARRAY_PREFIX: &str = "Array(";
const NESTED_PREFIX: &str = "Nested";

pub fn is_array_type(type_name: &str) -> bool {
    type_name.starts_with(ARRAY_PREFIX)
}

/// Strips one `Array(...)` layer: `Array(Array(Int32))` yields `Array(Int32)`.
///
/// The final character is dropped unconditionally, so a degenerate `Array(` yields "".
pub fn base_type(type_name: &str) -> &str {
    if !is_array_type(type_name) {
        return type_name;
    }
    type_name
        .get(ARRAY_PREFIX.len()..type_name.len() - 1)
        .unwrap_or("")
}

pub fn is_nested_type(type_name: &str) -> bool {
    type_name.len() >= 7 && type_name.starts_with(NESTED_PREFIX)
}

/// Declared types that bind straight into a typed destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Date,
    DateTime,
}

impl ScalarKind {
    /// Exact match only: `Nullable(String)` or `DateTime('UTC')` are not scalars here.
    pub fn from_declared(type_name: &str) -> Option<Self> {
        let kind = match type_name {
            "String" => Self::String,
            "UInt8" => Self::UInt8,
            "UInt16" => Self::UInt16,
            "UInt32" => Self::UInt32,
            "UInt64" => Self::UInt64,
            "Int8" => Self::Int8,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Float32" => Self::Float32,
            "Float64" => Self::Float64,
            "Bool" => Self::Bool,
            "Date" => Self::Date,
            "DateTime" => Self::DateTime,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}
