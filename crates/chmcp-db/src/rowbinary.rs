//! `RowBinaryWithNamesAndTypes` decoding.
//!
//! The header carries a LEB128 column count, the column names and the declared
//! type names; rows follow back to back until the end of the body. `String`
//! values stay raw byte buffers so the materializer decides how to present them.
//! Types without a binary decoder here (`Dynamic`, `Object`, `Time`, aggregate
//! states) surface as `UnsupportedType`; callers cast those columns to `String`
//! server-side and re-read.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, Utc};

use crate::backend::{RawColumn, RowCursor};
use crate::error::BackendResult;
use crate::value::RawValue;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Upper bound on elements of a collection whose items occupy no bytes.
const MAX_ZERO_WIDTH_ELEMENTS: usize = 1 << 20;

/// `Variant` discriminator of a NULL value.
const VARIANT_NULL: u8 = 255;

const INTERVAL_KINDS: [&str; 11] = [
    "IntervalNanosecond",
    "IntervalMicrosecond",
    "IntervalMillisecond",
    "IntervalSecond",
    "IntervalMinute",
    "IntervalHour",
    "IntervalDay",
    "IntervalWeek",
    "IntervalMonth",
    "IntervalQuarter",
    "IntervalYear",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of data at byte {offset}: needed {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("varint at byte {0} does not fit in 64 bits")]
    VarintOverflow(usize),
    #[error("unsupported column type {0}")]
    UnsupportedType(String),
    #[error("malformed column type {0}")]
    MalformedType(String),
    #[error("value out of range for {0}")]
    OutOfRange(&'static str),
}

/// Binary layout of a declared type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    BFloat16,
    Float32,
    Float64,
    Bool,
    String,
    FixedString(usize),
    Date,
    Date32,
    DateTime,
    DateTime64(u32),
    Uuid,
    Ipv4,
    Ipv6,
    Enum8(Vec<(String, i64)>),
    Enum16(Vec<(String, i64)>),
    Decimal { precision: u32, scale: u32 },
    Nothing,
    Nullable(Box<WireType>),
    Array(Box<WireType>),
    Tuple(Vec<WireType>),
    Map(Box<WireType>, Box<WireType>),
    /// Alternatives in discriminator order.
    Variant(Vec<WireType>),
}

impl WireType {
    pub fn parse(type_name: &str) -> Result<Self, DecodeError> {
        let text = type_name.trim();
        let malformed = || DecodeError::MalformedType(type_name.to_string());
        let (head, args) = match text.find('(') {
            Some(open) => {
                let inner = text[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
                (text[..open].trim(), Some(inner))
            }
            None => (text, None),
        };
        let single = |args: Option<&str>| -> Result<WireType, DecodeError> {
            WireType::parse(args.ok_or_else(malformed)?)
        };
        let parsed = match (head, args) {
            ("UInt8", None) => Self::UInt8,
            ("UInt16", None) => Self::UInt16,
            ("UInt32", None) => Self::UInt32,
            ("UInt64", None) => Self::UInt64,
            ("UInt128", None) => Self::UInt128,
            ("UInt256", None) => Self::UInt256,
            ("Int8", None) => Self::Int8,
            ("Int16", None) => Self::Int16,
            ("Int32", None) => Self::Int32,
            ("Int64", None) => Self::Int64,
            ("Int128", None) => Self::Int128,
            ("Int256", None) => Self::Int256,
            ("BFloat16", None) => Self::BFloat16,
            ("Float32", None) => Self::Float32,
            ("Float64", None) => Self::Float64,
            ("Bool", None) => Self::Bool,
            ("String", None) => Self::String,
            // Sent as text under `output_format_binary_write_json_as_string`.
            ("JSON", _) => Self::String,
            ("FixedString", Some(n)) => {
                Self::FixedString(n.trim().parse().map_err(|_| malformed())?)
            }
            ("Date", None) => Self::Date,
            ("Date32", None) => Self::Date32,
            ("DateTime", _) => Self::DateTime,
            ("DateTime64", Some(args)) => {
                let precision = split_args(args)
                    .first()
                    .and_then(|p| p.trim().parse::<u32>().ok())
                    .filter(|p| *p <= 9)
                    .ok_or_else(malformed)?;
                Self::DateTime64(precision)
            }
            ("UUID", None) => Self::Uuid,
            ("IPv4", None) => Self::Ipv4,
            ("IPv6", None) => Self::Ipv6,
            ("Enum8", Some(args)) => Self::Enum8(parse_enum_members(args).ok_or_else(malformed)?),
            ("Enum16", Some(args)) => {
                Self::Enum16(parse_enum_members(args).ok_or_else(malformed)?)
            }
            ("Decimal", Some(args)) => {
                let parts = split_args(args);
                let number = |idx: usize| parts.get(idx).and_then(|p| p.trim().parse::<u32>().ok());
                let precision = number(0).ok_or_else(malformed)?;
                let scale = number(1).unwrap_or(0);
                Self::decimal(precision, scale, type_name)?
            }
            ("Decimal32", Some(s)) => {
                Self::decimal(9, s.trim().parse().map_err(|_| malformed())?, type_name)?
            }
            ("Decimal64", Some(s)) => {
                Self::decimal(18, s.trim().parse().map_err(|_| malformed())?, type_name)?
            }
            ("Decimal128", Some(s)) => {
                Self::decimal(38, s.trim().parse().map_err(|_| malformed())?, type_name)?
            }
            ("Decimal256", Some(s)) => {
                Self::decimal(76, s.trim().parse().map_err(|_| malformed())?, type_name)?
            }
            (interval, None) if INTERVAL_KINDS.contains(&interval) => Self::Int64,
            ("Point", None) => Self::point(),
            ("Ring" | "LineString", None) => Self::Array(Box::new(Self::point())),
            ("Polygon" | "MultiLineString", None) => Self::nested_points(2),
            ("MultiPolygon", None) => Self::nested_points(3),
            ("Nothing", None) => Self::Nothing,
            ("Nullable", inner) => Self::Nullable(Box::new(single(inner)?)),
            ("LowCardinality", inner) => single(inner)?,
            ("Array", inner) => Self::Array(Box::new(single(inner)?)),
            ("Tuple", Some(args)) => Self::Tuple(parse_elements(args)?),
            // Unflattened Nested columns travel as arrays of tuples.
            ("Nested", Some(args)) => Self::Array(Box::new(Self::Tuple(parse_elements(args)?))),
            ("Map", Some(args)) => {
                let parts = split_args(args);
                if parts.len() != 2 {
                    return Err(malformed());
                }
                Self::Map(
                    Box::new(WireType::parse(parts[0])?),
                    Box::new(WireType::parse(parts[1])?),
                )
            }
            ("Variant", Some(args)) => {
                let mut alternatives = split_args(args);
                alternatives.sort_unstable();
                Self::Variant(
                    alternatives
                        .into_iter()
                        .map(WireType::parse)
                        .collect::<Result<_, _>>()?,
                )
            }
            ("SimpleAggregateFunction", Some(args)) => {
                let parts = split_args(args);
                match parts.get(1..) {
                    Some(rest) if !rest.is_empty() => WireType::parse(&rest.join(","))?,
                    _ => return Err(malformed()),
                }
            }
            _ => return Err(DecodeError::UnsupportedType(type_name.to_string())),
        };
        Ok(parsed)
    }

    fn point() -> Self {
        Self::Tuple(vec![Self::Float64, Self::Float64])
    }

    /// `depth` levels of `Array` around `Point`.
    fn nested_points(depth: usize) -> Self {
        (0..depth).fold(Self::point(), |inner, _| Self::Array(Box::new(inner)))
    }

    fn decimal(precision: u32, scale: u32, type_name: &str) -> Result<Self, DecodeError> {
        if precision == 0 || precision > 76 {
            return Err(DecodeError::UnsupportedType(type_name.to_string()));
        }
        if scale > precision {
            return Err(DecodeError::MalformedType(type_name.to_string()));
        }
        Ok(Self::Decimal { precision, scale })
    }

    /// Fewest bytes one value can occupy on the wire.
    fn min_width(&self) -> usize {
        match self {
            Self::Nothing => 0,
            Self::UInt8 | Self::Int8 | Self::Bool | Self::Enum8(_) => 1,
            Self::String | Self::Nullable(_) | Self::Array(_) | Self::Map(..) => 1,
            Self::Variant(_) => 1,
            Self::UInt16 | Self::Int16 | Self::BFloat16 | Self::Date | Self::Enum16(_) => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 | Self::Date32 | Self::DateTime => 4,
            Self::Ipv4 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 | Self::DateTime64(_) => 8,
            Self::UInt128 | Self::Int128 | Self::Uuid | Self::Ipv6 => 16,
            Self::UInt256 | Self::Int256 => 32,
            Self::FixedString(len) => *len,
            Self::Decimal { precision, .. } => decimal_width(*precision),
            Self::Tuple(elements) => elements.iter().map(Self::min_width).sum(),
        }
    }
}

fn decimal_width(precision: u32) -> usize {
    match precision {
        0..=9 => 4,
        10..=18 => 8,
        19..=38 => 16,
        _ => 32,
    }
}

/// Splits top-level comma-separated arguments, respecting parentheses and quotes.
fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    for (idx, ch) in args.char_indices() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(args[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = args[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Tuple and Nested elements, optionally named (`name Type`).
fn parse_elements(args: &str) -> Result<Vec<WireType>, DecodeError> {
    split_args(args)
        .into_iter()
        .map(|element| WireType::parse(strip_element_name(element)))
        .collect()
}

fn strip_element_name(element: &str) -> &str {
    let mut depth = 0usize;
    for (idx, ch) in element.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '\'' => return element,
            c if c.is_whitespace() && depth == 0 => return element[idx..].trim(),
            _ => {}
        }
    }
    element
}

fn parse_enum_members(args: &str) -> Option<Vec<(String, i64)>> {
    split_args(args)
        .into_iter()
        .map(|member| {
            let (name, value) = member.rsplit_once('=')?;
            let name = name.trim().strip_prefix('\'')?.strip_suffix('\'')?;
            let name = name.replace("\\'", "'").replace("\\\\", "\\");
            Some((name, value.trim().parse().ok()?))
        })
        .collect()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintOverflow(start))
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let len = self.varint()?;
        usize::try_from(len).map_err(|_| DecodeError::OutOfRange("length"))
    }

    fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.length()?;
        self.take(len)
    }

    fn text(&mut self) -> Result<String, DecodeError> {
        Ok(String::from_utf8_lossy(self.bytes()?).into_owned())
    }

    /// Element count of an `Array` or `Map`, checked against what the rest of the
    /// body can hold before anything is decoded.
    fn count(&mut self, element_width: usize) -> Result<usize, DecodeError> {
        let len = self.length()?;
        if element_width == 0 {
            if len > MAX_ZERO_WIDTH_ELEMENTS {
                return Err(DecodeError::OutOfRange("element count"));
            }
            return Ok(len);
        }
        let needed = len.saturating_mul(element_width);
        if needed > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: needed - self.remaining(),
            });
        }
        Ok(len)
    }

    fn value(&mut self, wire: &WireType) -> Result<RawValue, DecodeError> {
        let value = match wire {
            WireType::UInt8 => RawValue::UInt(u64::from(self.u8()?)),
            WireType::UInt16 => RawValue::UInt(u64::from(u16::from_le_bytes(self.array()?))),
            WireType::UInt32 => RawValue::UInt(u64::from(u32::from_le_bytes(self.array()?))),
            WireType::UInt64 => RawValue::UInt(u64::from_le_bytes(self.array()?)),
            WireType::UInt128 => RawValue::UInt128(u128::from_le_bytes(self.array()?)),
            WireType::UInt256 => RawValue::Text(u256_digits(self.array()?)),
            WireType::Int8 => RawValue::Int(i64::from(i8::from_le_bytes(self.array()?))),
            WireType::Int16 => RawValue::Int(i64::from(i16::from_le_bytes(self.array()?))),
            WireType::Int32 => RawValue::Int(i64::from(i32::from_le_bytes(self.array()?))),
            WireType::Int64 => RawValue::Int(i64::from_le_bytes(self.array()?)),
            WireType::Int128 => RawValue::Int128(i128::from_le_bytes(self.array()?)),
            WireType::Int256 => {
                let (negative, digits) = i256_digits(self.array()?);
                RawValue::Text(if negative { format!("-{digits}") } else { digits })
            }
            WireType::BFloat16 => {
                let bits = u32::from(u16::from_le_bytes(self.array()?)) << 16;
                RawValue::Float(f64::from(f32::from_bits(bits)))
            }
            WireType::Float32 => RawValue::Float(f64::from(f32::from_le_bytes(self.array()?))),
            WireType::Float64 => RawValue::Float(f64::from_le_bytes(self.array()?)),
            WireType::Bool => RawValue::Bool(self.u8()? != 0),
            WireType::String => RawValue::Bytes(self.bytes()?.to_vec()),
            WireType::FixedString(len) => RawValue::Bytes(self.take(*len)?.to_vec()),
            WireType::Date => {
                let days = u16::from_le_bytes(self.array()?);
                RawValue::Date(date_from_epoch_days(i32::from(days))?)
            }
            WireType::Date32 => {
                let days = i32::from_le_bytes(self.array()?);
                RawValue::Date(date_from_epoch_days(days)?)
            }
            WireType::DateTime => {
                let secs = u32::from_le_bytes(self.array()?);
                RawValue::DateTime(timestamp(i64::from(secs), 0)?)
            }
            WireType::DateTime64(precision) => {
                let ticks = i64::from_le_bytes(self.array()?);
                let scale = 10i64.pow(*precision);
                let nanos = ticks.rem_euclid(scale) * 10i64.pow(9 - precision);
                RawValue::DateTime(timestamp(ticks.div_euclid(scale), nanos as u32)?)
            }
            WireType::Uuid => {
                let high = u64::from_le_bytes(self.array()?);
                let low = u64::from_le_bytes(self.array()?);
                RawValue::Text(format_uuid(high, low))
            }
            WireType::Ipv4 => {
                let addr = Ipv4Addr::from(u32::from_le_bytes(self.array()?));
                RawValue::Text(addr.to_string())
            }
            WireType::Ipv6 => RawValue::Text(Ipv6Addr::from(self.array::<16>()?).to_string()),
            WireType::Enum8(members) => {
                let code = i64::from(i8::from_le_bytes(self.array()?));
                enum_value(members, code)
            }
            WireType::Enum16(members) => {
                let code = i64::from(i16::from_le_bytes(self.array()?));
                enum_value(members, code)
            }
            WireType::Decimal { precision, scale } => {
                let raw = match precision {
                    0..=9 => i128::from(i32::from_le_bytes(self.array()?)),
                    10..=18 => i128::from(i64::from_le_bytes(self.array()?)),
                    19..=38 => i128::from_le_bytes(self.array()?),
                    _ => {
                        let (negative, digits) = i256_digits(self.array()?);
                        return Ok(RawValue::Text(format_scaled(negative, digits, *scale)));
                    }
                };
                RawValue::Text(format_decimal(raw, *scale))
            }
            WireType::Nothing => RawValue::Null,
            WireType::Nullable(inner) => {
                if self.u8()? != 0 {
                    RawValue::Null
                } else {
                    self.value(inner)?
                }
            }
            WireType::Array(inner) => {
                let len = self.count(inner.min_width())?;
                let mut items = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    items.push(self.value(inner)?);
                }
                RawValue::Array(items)
            }
            WireType::Tuple(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.value(element)?);
                }
                RawValue::Tuple(items)
            }
            WireType::Map(key, val) => {
                let len = self.count(key.min_width() + val.min_width())?;
                let mut entries = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    let k = self.value(key)?;
                    let v = self.value(val)?;
                    entries.push((k, v));
                }
                RawValue::Map(entries)
            }
            WireType::Variant(alternatives) => match self.u8()? {
                VARIANT_NULL => RawValue::Null,
                discriminator => {
                    let wire = alternatives
                        .get(usize::from(discriminator))
                        .ok_or(DecodeError::OutOfRange("Variant discriminator"))?;
                    self.value(wire)?
                }
            },
        };
        Ok(value)
    }
}

fn date_from_epoch_days(days: i32) -> Result<NaiveDate, DecodeError> {
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or(DecodeError::OutOfRange("Date"))
}

fn timestamp(secs: i64, nanos: u32) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(secs, nanos).ok_or(DecodeError::OutOfRange("DateTime"))
}

fn enum_value(members: &[(String, i64)], code: i64) -> RawValue {
    members
        .iter()
        .find(|(_, value)| *value == code)
        .map(|(name, _)| RawValue::Text(name.clone()))
        .unwrap_or(RawValue::Int(code))
}

fn format_uuid(high: u64, low: u64) -> String {
    let hex = format!("{high:016x}{low:016x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn format_decimal(raw: i128, scale: u32) -> String {
    format_scaled(raw < 0, raw.unsigned_abs().to_string(), scale)
}

/// Places the decimal point `scale` digits from the right of a magnitude.
fn format_scaled(negative: bool, digits: String, scale: u32) -> String {
    let sign = if negative { "-" } else { "" };
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    format!("{sign}{int_part}.{frac_part}")
}

/// Decimal digits of a little-endian unsigned 256-bit integer.
fn u256_digits(bytes: [u8; 32]) -> String {
    const GROUP: u128 = 10_000_000_000_000_000_000;
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *limb = u64::from_le_bytes(word);
    }
    // Base 10^19 groups, least significant first.
    let mut groups = Vec::new();
    while limbs.iter().any(|limb| *limb != 0) {
        let mut rem = 0u128;
        for limb in limbs.iter_mut().rev() {
            let current = (rem << 64) | u128::from(*limb);
            *limb = (current / GROUP) as u64;
            rem = current % GROUP;
        }
        groups.push(rem as u64);
    }
    let Some((most, rest)) = groups.split_last() else {
        return "0".to_string();
    };
    let mut out = most.to_string();
    for group in rest.iter().rev() {
        let _ = write!(out, "{group:019}");
    }
    out
}

/// Sign and magnitude digits of a little-endian two's complement 256-bit integer.
fn i256_digits(mut bytes: [u8; 32]) -> (bool, String) {
    let negative = bytes[31] & 0x80 != 0;
    if negative {
        let mut carry = true;
        for byte in bytes.iter_mut() {
            let (sum, overflow) = (!*byte).overflowing_add(u8::from(carry));
            *byte = sum;
            carry = overflow;
        }
    }
    (negative, u256_digits(bytes))
}

/// Reads the column names and declared types without interpreting the types.
/// Returns the columns and the offset of the first row.
fn header(body: &[u8]) -> Result<(Vec<RawColumn>, usize), DecodeError> {
    if body.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let mut reader = Reader::new(body);
    let count = reader.length()?;
    let mut names = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        names.push(reader.text()?);
    }
    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let type_name = reader.text()?;
        columns.push(RawColumn { name, type_name });
    }
    Ok((columns, reader.pos))
}

/// Header columns of `body`.
pub fn read_header(body: &[u8]) -> Result<Vec<RawColumn>, DecodeError> {
    header(body).map(|(columns, _)| columns)
}

/// True when values of `type_name` have no binary decoder and must be cast
/// server-side before they can be read.
pub fn needs_cast(type_name: &str) -> bool {
    matches!(WireType::parse(type_name), Err(DecodeError::UnsupportedType(_)))
}

/// Cursor over a fully received `RowBinaryWithNamesAndTypes` body.
pub struct RowBinaryCursor {
    body: Vec<u8>,
    pos: usize,
    columns: Vec<RawColumn>,
    wire_types: Vec<WireType>,
    failed: bool,
}

impl RowBinaryCursor {
    /// Decodes the header. An empty body is a statement without column output.
    pub fn new(body: Vec<u8>) -> Result<Self, DecodeError> {
        if body.is_empty() {
            return Ok(Self {
                body,
                pos: 0,
                columns: Vec::new(),
                wire_types: Vec::new(),
                failed: false,
            });
        }
        let (columns, pos) = header(&body)?;
        let wire_types = columns
            .iter()
            .map(|column| WireType::parse(&column.type_name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            body,
            pos,
            columns,
            wire_types,
            failed: false,
        })
    }

    /// Reports `declared` column types in place of the ones on the wire, for
    /// results re-read after a server-side cast.
    pub fn restore_declared_types(&mut self, declared: &[RawColumn]) {
        for (column, original) in self.columns.iter_mut().zip(declared) {
            if column.name == original.name {
                column.type_name.clone_from(&original.type_name);
            }
        }
    }

    fn decode_row(&mut self) -> Result<Vec<RawValue>, DecodeError> {
        let mut reader = Reader {
            buf: &self.body,
            pos: self.pos,
        };
        let mut row = Vec::with_capacity(self.wire_types.len());
        for wire in &self.wire_types {
            row.push(reader.value(wire)?);
        }
        self.pos = reader.pos;
        Ok(row)
    }
}

impl RowCursor for RowBinaryCursor {
    fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<BackendResult<Vec<RawValue>>> {
        if self.failed || self.pos >= self.body.len() || self.columns.is_empty() {
            return None;
        }
        match self.decode_row() {
            Ok(row) => Some(Ok(row)),
            Err(err) => {
                self.failed = true;
                Some(Err(err.into()))
            }
        }
    }
}
