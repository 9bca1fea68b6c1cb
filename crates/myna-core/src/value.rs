//! Dynamic SQL values.
//!
//! `Value` has one case per MySQL wire type. Each case owns its own
//! null-state (the `Null` variant) and host representation; the driver's
//! codec module owns the text/binary (de)serialization for each case.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConversionError, Error};

/// A calendar date as carried by the DATE wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// MySQL's zero date (`0000-00-00`), distinct from NULL.
    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A date plus time-of-day, with optional microseconds, as carried by the
/// DATETIME and TIMESTAMP wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
}

impl DateTime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    ) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            micros,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.year == 0
            && self.month == 0
            && self.day == 0
            && self.hour == 0
            && self.minute == 0
            && self.second == 0
            && self.micros == 0
    }

    /// The date component.
    pub fn date(&self) -> Date {
        Date {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// A signed duration as carried by the TIME wire type.
///
/// MySQL TIME values range over ±838:59:59; hours beyond 24 are stored as
/// whole days plus an hour-of-day remainder on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSpan {
    pub negative: bool,
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl TimeSpan {
    pub fn new(negative: bool, days: u32, hours: u8, minutes: u8, seconds: u8, micros: u32) -> Self {
        Self {
            negative,
            days,
            hours,
            minutes,
            seconds,
            micros,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
            && self.micros == 0
    }

    /// Total hours including whole days, as displayed by MySQL.
    pub fn total_hours(&self) -> u32 {
        self.days * 24 + u32::from(self.hours)
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.total_hours(),
            self.minutes,
            self.seconds
        )?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// A dynamically-typed SQL value.
///
/// One case per wire type; signedness is part of the case so that unsigned
/// 64-bit values above `i64::MAX` survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// TINYINT
    Int8(i8),
    /// TINYINT UNSIGNED
    UInt8(u8),
    /// SMALLINT
    Int16(i16),
    /// SMALLINT UNSIGNED
    UInt16(u16),
    /// MEDIUMINT (24-bit, widened to i32 on the host)
    Int24(i32),
    /// MEDIUMINT UNSIGNED
    UInt24(u32),
    /// INT
    Int32(i32),
    /// INT UNSIGNED
    UInt32(u32),
    /// BIGINT
    Int64(i64),
    /// BIGINT UNSIGNED
    UInt64(u64),
    /// YEAR (always unsigned 16-bit on the wire)
    Year(u16),

    /// FLOAT (4-byte IEEE754)
    Float(f32),
    /// DOUBLE (8-byte IEEE754)
    Double(f64),
    /// DECIMAL/NEWDECIMAL, kept as text to preserve precision
    Decimal(String),

    /// BIT, packed big-endian into a u64 (up to 64 bits)
    Bit(u64),

    /// DATE
    Date(Date),
    /// TIME
    Time(TimeSpan),
    /// DATETIME / TIMESTAMP
    DateTime(DateTime),

    /// CHAR/VARCHAR/TEXT and text-classified blobs
    Text(String),
    /// Binary-classified blobs and VARBINARY
    Bytes(Vec<u8>),
    /// ENUM, carried as its string label
    Enum(String),
    /// SET, carried as its comma-joined string form
    Set(String),
    /// JSON, carried as text
    Json(String),
    /// GEOMETRY, raw SRID-prefixed WKB bytes
    Geometry(Vec<u8>),
    /// CHAR(36)/BINARY(16) columns mapped to GUIDs
    Uuid([u8; 16]),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the SQL type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int8(_) => "TINYINT",
            Value::UInt8(_) => "TINYINT UNSIGNED",
            Value::Int16(_) => "SMALLINT",
            Value::UInt16(_) => "SMALLINT UNSIGNED",
            Value::Int24(_) => "MEDIUMINT",
            Value::UInt24(_) => "MEDIUMINT UNSIGNED",
            Value::Int32(_) => "INT",
            Value::UInt32(_) => "INT UNSIGNED",
            Value::Int64(_) => "BIGINT",
            Value::UInt64(_) => "BIGINT UNSIGNED",
            Value::Year(_) => "YEAR",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Bit(_) => "BIT",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::DateTime(_) => "DATETIME",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Enum(_) => "ENUM",
            Value::Set(_) => "SET",
            Value::Json(_) => "JSON",
            Value::Geometry(_) => "GEOMETRY",
            Value::Uuid(_) => "UUID",
        }
    }

    /// Try to read this value as a bool (integers coerce, 0 = false).
    pub fn as_bool(&self) -> Option<bool> {
        self.as_i64().map(|v| v != 0)
    }

    /// Try to read this value as an i64, widening smaller integers.
    ///
    /// Returns `None` for unsigned 64-bit values above `i64::MAX`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int24(v) | Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt24(v) | Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Year(v) => Some(i64::from(*v)),
            Value::Bit(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to read this value as a u64.
    ///
    /// Returns `None` for negative values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt8(v) => Some(u64::from(*v)),
            Value::UInt16(v) => Some(u64::from(*v)),
            Value::UInt24(v) | Value::UInt32(v) => Some(u64::from(*v)),
            Value::UInt64(v) => Some(*v),
            Value::Year(v) => Some(u64::from(*v)),
            Value::Bit(v) => Some(*v),
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int24(_)
            | Value::Int32(_)
            | Value::Int64(_) => self.as_i64().and_then(|v| u64::try_from(v).ok()),
            _ => None,
        }
    }

    /// Try to read this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            Value::UInt64(v) => Some(*v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Try to read this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) | Value::Enum(s) | Value::Set(s)
            | Value::Json(s) => Some(s),
            _ => None,
        }
    }

    /// Try to read this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::Geometry(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            Value::Uuid(u) => Some(u),
            _ => None,
        }
    }

    /// Try to read this value as a date, accepting DATETIME by truncation.
    pub fn as_date(&self) -> Option<Date> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    /// Parse a JSON or text value into a `serde_json::Value`.
    ///
    /// JSON columns ride as text on the wire; this is the structured view.
    pub fn as_json(&self) -> Result<serde_json::Value, Error> {
        match self {
            Value::Json(s) | Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Conversion(ConversionError {
                    expected: "valid JSON",
                    actual: format!("unparseable text ({e})"),
                    column: None,
                })
            }),
            other => Err(conversion("a JSON value", other).into()),
        }
    }
}

fn conversion(expected: &'static str, value: &Value) -> ConversionError {
    ConversionError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    }
}

impl TryFrom<&Value> for i64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        value
            .as_i64()
            .ok_or_else(|| conversion("a signed integer", value).into())
    }
}

impl TryFrom<&Value> for u64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        value
            .as_u64()
            .ok_or_else(|| conversion("an unsigned integer", value).into())
    }
}

impl TryFrom<&Value> for i32 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        let wide = i64::try_from(value)?;
        i32::try_from(wide).map_err(|_| conversion("a 32-bit integer", value).into())
    }
}

impl TryFrom<&Value> for f64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        value
            .as_f64()
            .ok_or_else(|| conversion("a floating-point number", value).into())
    }
}

impl TryFrom<&Value> for String {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Text(s) | Value::Decimal(s) | Value::Enum(s) | Value::Set(s)
            | Value::Json(s) => Ok(s.clone()),
            Value::Date(d) => Ok(d.to_string()),
            Value::Time(t) => Ok(t.to_string()),
            Value::DateTime(dt) => Ok(dt.to_string()),
            other => Err(conversion("a string", other).into()),
        }
    }
}

impl TryFrom<&Value> for bool {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        value
            .as_bool()
            .ok_or_else(|| conversion("a boolean", value).into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_type_names() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int32(0).is_null());
        assert_eq!(Value::UInt64(1).type_name(), "BIGINT UNSIGNED");
        assert_eq!(Value::Json("{}".to_string()).type_name(), "JSON");
    }

    #[test]
    fn integer_widening() {
        assert_eq!(Value::Int8(-5).as_i64(), Some(-5));
        assert_eq!(Value::UInt24(70000).as_i64(), Some(70000));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::UInt64(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(Value::Int64(-1).as_u64(), None);
    }

    #[test]
    fn conversions_produce_errors() {
        let err = i64::try_from(&Value::Text("x".to_string())).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));

        let err = i32::try_from(&Value::Int64(i64::MAX)).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));

        assert_eq!(i32::try_from(&Value::Int64(42)).unwrap(), 42);
    }

    #[test]
    fn temporal_display() {
        let d = Date::new(2024, 2, 29);
        assert_eq!(d.to_string(), "2024-02-29");

        let dt = DateTime::new(2024, 2, 29, 13, 5, 9, 123_456);
        assert_eq!(dt.to_string(), "2024-02-29 13:05:09.123456");

        let t = TimeSpan::new(true, 1, 2, 3, 4, 0);
        assert_eq!(t.to_string(), "-26:03:04");
    }

    #[test]
    fn zero_temporals() {
        assert!(Date::default().is_zero());
        assert!(DateTime::default().is_zero());
        assert!(!Date::new(1970, 1, 1).is_zero());
    }

    #[test]
    fn from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::Int64(7));
    }

    #[test]
    fn json_structured_view() {
        let v = Value::Json("{\"a\": [1, 2]}".to_string());
        let parsed = v.as_json().unwrap();
        assert_eq!(parsed["a"][1], serde_json::json!(2));

        assert!(Value::Text("not json".to_string()).as_json().is_err());
        assert!(Value::Int32(1).as_json().is_err());
    }
}
