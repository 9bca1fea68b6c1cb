//! Value codec: text and binary protocol (de)serialization.
//!
//! Text protocol carries every value as a length-encoded string; writing a
//! parameter produces an escaped, quoted SQL literal. Binary protocol uses
//! the exact per-type byte layout the server expects: fixed-width integers,
//! IEEE754 floats, length-encoded strings and blobs, and 0/4/7/11-byte
//! temporal encodings with an optional microsecond tail.

#![allow(clippy::cast_possible_truncation)]

use myna_core::{Date, DateTime, Error, Result, TimeSpan, Value};

use crate::protocol::{PacketReader, PacketWriter};
use crate::types::{Field, TypeCode};

// ---------------------------------------------------------------------------
// Text protocol: encoding
// ---------------------------------------------------------------------------

/// Escape a string into a quoted MySQL literal.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Render bytes as a hex literal (`X'...'`).
fn hex_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + 3);
    out.push_str("X'");
    for byte in data {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\'');
    out
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() {
            "1e308".to_string()
        } else {
            "-1e308".to_string()
        }
    } else {
        f.to_string()
    }
}

/// Serialize a value as an escaped, quoted text-protocol literal.
pub fn text_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int8(v) => v.to_string(),
        Value::UInt8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::UInt16(v) => v.to_string(),
        Value::Int24(v) | Value::Int32(v) => v.to_string(),
        Value::UInt24(v) | Value::UInt32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::Year(v) => v.to_string(),
        Value::Float(v) => float_literal(f64::from(*v)),
        Value::Double(v) => float_literal(*v),
        Value::Decimal(s) => s.clone(),
        Value::Bit(v) => v.to_string(),
        Value::Date(d) => format!("'{d}'"),
        Value::Time(t) => format!("'{t}'"),
        Value::DateTime(dt) => format!("'{dt}'"),
        Value::Text(s) | Value::Enum(s) | Value::Set(s) | Value::Json(s) => escape_string(s),
        Value::Bytes(b) | Value::Geometry(b) => hex_literal(b),
        Value::Uuid(u) => hex_literal(u),
    }
}

// ---------------------------------------------------------------------------
// Text protocol: decoding
// ---------------------------------------------------------------------------

fn parse_fraction(frac: &str) -> u32 {
    // ".12" means 120000 microseconds; pad to six digits.
    let mut digits = [b'0'; 6];
    for (slot, ch) in digits.iter_mut().zip(frac.bytes()) {
        *slot = ch;
    }
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn parse_text_date(text: &str) -> Option<Date> {
    let mut parts = text.splitn(3, '-');
    Some(Date {
        year: parts.next()?.parse().ok()?,
        month: parts.next()?.parse().ok()?,
        day: parts.next()?.parse().ok()?,
    })
}

fn parse_text_datetime(text: &str) -> Option<DateTime> {
    let (date_part, time_part) = match text.split_once(' ') {
        Some((d, t)) => (d, Some(t)),
        None => (text, None),
    };
    let date = parse_text_date(date_part)?;
    let mut dt = DateTime {
        year: date.year,
        month: date.month,
        day: date.day,
        ..DateTime::default()
    };
    if let Some(time_part) = time_part {
        let (hms, frac) = match time_part.split_once('.') {
            Some((h, f)) => (h, Some(f)),
            None => (time_part, None),
        };
        let mut parts = hms.splitn(3, ':');
        dt.hour = parts.next()?.parse().ok()?;
        dt.minute = parts.next()?.parse().ok()?;
        dt.second = parts.next()?.parse().ok()?;
        if let Some(frac) = frac {
            dt.micros = parse_fraction(frac);
        }
    }
    Some(dt)
}

fn parse_text_time(text: &str) -> Option<TimeSpan> {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (hms, frac) = match text.split_once('.') {
        Some((h, f)) => (h, Some(f)),
        None => (text, None),
    };
    let mut parts = hms.splitn(3, ':');
    let total_hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u8 = parts.next()?.parse().ok()?;
    let seconds: u8 = parts.next()?.parse().ok()?;
    Some(TimeSpan {
        negative,
        days: total_hours / 24,
        hours: (total_hours % 24) as u8,
        minutes,
        seconds,
        micros: frac.map_or(0, parse_fraction),
    })
}

/// Big-endian packed bit field, at most 64 bits.
fn decode_bit(data: &[u8]) -> Result<u64> {
    if data.len() > 8 {
        return Err(Error::protocol(format!(
            "BIT value of {} bytes exceeds 64 bits",
            data.len()
        )));
    }
    let mut out: u64 = 0;
    for byte in data {
        out = (out << 8) | u64::from(*byte);
    }
    Ok(out)
}

/// Decode a text-protocol value for the given column.
///
/// The unsigned widening table is applied here: an UNSIGNED column maps its
/// signed wire type to the unsigned host type of the same width
/// (INT → INT UNSIGNED, and so on for every integer width).
pub fn decode_text(field: &mut Field, data: &[u8]) -> Result<Value> {
    let text = || String::from_utf8_lossy(data);
    let unsigned = field.is_unsigned();

    macro_rules! parse_int {
        ($signed:ty, $unsigned:ty, $sv:ident, $uv:ident) => {
            if unsigned {
                match text().parse::<$unsigned>() {
                    Ok(v) => Value::$uv(v),
                    Err(_) => fallback_text(field, data),
                }
            } else {
                match text().parse::<$signed>() {
                    Ok(v) => Value::$sv(v),
                    Err(_) => fallback_text(field, data),
                }
            }
        };
    }

    let value = match field.type_code {
        TypeCode::Null => Value::Null,
        TypeCode::Tiny => parse_int!(i8, u8, Int8, UInt8),
        TypeCode::Short => parse_int!(i16, u16, Int16, UInt16),
        TypeCode::Int24 => parse_int!(i32, u32, Int24, UInt24),
        TypeCode::Long => parse_int!(i32, u32, Int32, UInt32),
        TypeCode::LongLong => parse_int!(i64, u64, Int64, UInt64),
        TypeCode::Year => match text().parse::<u16>() {
            Ok(v) => Value::Year(v),
            Err(_) => fallback_text(field, data),
        },
        TypeCode::Float => match text().parse::<f32>() {
            Ok(v) => Value::Float(v),
            Err(_) => fallback_text(field, data),
        },
        TypeCode::Double => match text().parse::<f64>() {
            Ok(v) => Value::Double(v),
            Err(_) => fallback_text(field, data),
        },
        TypeCode::Decimal | TypeCode::NewDecimal => Value::Decimal(text().into_owned()),
        TypeCode::Bit => Value::Bit(decode_bit(data)?),
        TypeCode::Date | TypeCode::NewDate => match parse_text_date(&text()) {
            Some(d) => Value::Date(d),
            None => fallback_text(field, data),
        },
        TypeCode::Time => match parse_text_time(&text()) {
            Some(t) => Value::Time(t),
            None => fallback_text(field, data),
        },
        TypeCode::DateTime | TypeCode::Timestamp => match parse_text_datetime(&text()) {
            Some(dt) => Value::DateTime(dt),
            None => fallback_text(field, data),
        },
        TypeCode::Enum => Value::Enum(text().into_owned()),
        TypeCode::Set => Value::Set(text().into_owned()),
        TypeCode::Json => decode_json(field, data),
        TypeCode::Geometry => Value::Geometry(data.to_vec()),
        TypeCode::TinyBlob | TypeCode::MediumBlob | TypeCode::LongBlob | TypeCode::Blob => {
            decode_blob(field, data)
        }
        TypeCode::VarChar | TypeCode::VarString | TypeCode::String => {
            if field.is_binary() {
                Value::Bytes(data.to_vec())
            } else {
                Value::Text(text().into_owned())
            }
        }
    };
    Ok(value)
}

fn fallback_text(field: &mut Field, data: &[u8]) -> Value {
    field.note_conversion("TEXT");
    Value::Text(String::from_utf8_lossy(data).into_owned())
}

fn decode_blob(field: &Field, data: &[u8]) -> Value {
    if field.is_binary() {
        Value::Bytes(data.to_vec())
    } else {
        Value::Text(String::from_utf8_lossy(data).into_owned())
    }
}

fn decode_json(field: &mut Field, data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data).into_owned();
    // JSON rides as text; malformed payloads degrade to plain TEXT.
    match serde_json::from_str::<serde::de::IgnoredAny>(&text) {
        Ok(_) => Value::Json(text),
        Err(_) => {
            field.note_conversion("TEXT");
            Value::Text(text)
        }
    }
}

// ---------------------------------------------------------------------------
// Binary protocol: decoding
// ---------------------------------------------------------------------------

/// Decode a binary-protocol value for the given column.
///
/// `length` follows the wire contract: `None` means the value carries its
/// own length encoding; `Some(n)` reads a fixed width of `n` bytes
/// (only meaningful for the string-shaped types).
pub fn decode_binary(
    reader: &mut PacketReader<'_>,
    field: &mut Field,
    length: Option<usize>,
) -> Result<Value> {
    let unsigned = field.is_unsigned();
    let value = match field.type_code {
        TypeCode::Null => Value::Null,
        TypeCode::Tiny => {
            let raw = reader.read_u8()?;
            if unsigned {
                Value::UInt8(raw)
            } else {
                Value::Int8(raw as i8)
            }
        }
        TypeCode::Short => {
            let raw = reader.read_u16_le()?;
            if unsigned {
                Value::UInt16(raw)
            } else {
                Value::Int16(raw as i16)
            }
        }
        TypeCode::Int24 => {
            // 24-bit values travel in 4 bytes on the binary wire.
            let raw = reader.read_u32_le()?;
            if unsigned {
                Value::UInt24(raw)
            } else {
                Value::Int24(raw as i32)
            }
        }
        TypeCode::Long => {
            let raw = reader.read_u32_le()?;
            if unsigned {
                Value::UInt32(raw)
            } else {
                Value::Int32(raw as i32)
            }
        }
        TypeCode::LongLong => {
            let raw = reader.read_u64_le()?;
            if unsigned {
                Value::UInt64(raw)
            } else {
                Value::Int64(raw as i64)
            }
        }
        TypeCode::Year => Value::Year(reader.read_u16_le()?),
        TypeCode::Float => {
            let bytes = reader.read_bytes(4)?;
            Value::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        TypeCode::Double => {
            let bytes = reader.read_bytes(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Value::Double(f64::from_le_bytes(buf))
        }
        TypeCode::Date | TypeCode::NewDate => Value::Date(read_binary_date(reader)?),
        TypeCode::Time => Value::Time(read_binary_time(reader)?),
        TypeCode::DateTime | TypeCode::Timestamp => {
            Value::DateTime(read_binary_datetime(reader)?)
        }
        TypeCode::Bit => {
            let data = read_string_shaped(reader, length)?;
            Value::Bit(decode_bit(&data)?)
        }
        TypeCode::Decimal | TypeCode::NewDecimal => {
            let data = read_string_shaped(reader, length)?;
            Value::Decimal(String::from_utf8_lossy(&data).into_owned())
        }
        TypeCode::Enum => {
            let data = read_string_shaped(reader, length)?;
            Value::Enum(String::from_utf8_lossy(&data).into_owned())
        }
        TypeCode::Set => {
            let data = read_string_shaped(reader, length)?;
            Value::Set(String::from_utf8_lossy(&data).into_owned())
        }
        TypeCode::Json => {
            let data = read_string_shaped(reader, length)?;
            decode_json(field, &data)
        }
        TypeCode::Geometry => {
            let data = read_string_shaped(reader, length)?;
            Value::Geometry(data)
        }
        TypeCode::TinyBlob | TypeCode::MediumBlob | TypeCode::LongBlob | TypeCode::Blob => {
            let data = read_string_shaped(reader, length)?;
            decode_blob(field, &data)
        }
        TypeCode::VarChar | TypeCode::VarString | TypeCode::String => {
            let data = read_string_shaped(reader, length)?;
            if field.is_binary() {
                Value::Bytes(data)
            } else {
                Value::Text(String::from_utf8_lossy(&data).into_owned())
            }
        }
    };
    Ok(value)
}

fn read_string_shaped(reader: &mut PacketReader<'_>, length: Option<usize>) -> Result<Vec<u8>> {
    match length {
        Some(n) => Ok(reader.read_bytes(n)?.to_vec()),
        None => Ok(reader
            .read_lenenc_bytes()?
            .ok_or_else(|| Error::protocol("NULL marker inside binary row value"))?
            .to_vec()),
    }
}

fn read_binary_date(reader: &mut PacketReader<'_>) -> Result<Date> {
    let len = reader.read_u8()?;
    match len {
        0 => Ok(Date::default()),
        4 | 7 | 11 => {
            let year = reader.read_u16_le()?;
            let month = reader.read_u8()?;
            let day = reader.read_u8()?;
            // A DATE column never carries a time tail, but tolerate one.
            reader.skip(len as usize - 4)?;
            Ok(Date { year, month, day })
        }
        other => Err(Error::protocol(format!("invalid DATE length {other}"))),
    }
}

fn read_binary_datetime(reader: &mut PacketReader<'_>) -> Result<DateTime> {
    let len = reader.read_u8()?;
    let mut dt = DateTime::default();
    match len {
        0 => {}
        4 | 7 | 11 => {
            dt.year = reader.read_u16_le()?;
            dt.month = reader.read_u8()?;
            dt.day = reader.read_u8()?;
            if len >= 7 {
                dt.hour = reader.read_u8()?;
                dt.minute = reader.read_u8()?;
                dt.second = reader.read_u8()?;
            }
            if len == 11 {
                dt.micros = reader.read_u32_le()?;
            }
        }
        other => return Err(Error::protocol(format!("invalid DATETIME length {other}"))),
    }
    Ok(dt)
}

fn read_binary_time(reader: &mut PacketReader<'_>) -> Result<TimeSpan> {
    let len = reader.read_u8()?;
    let mut t = TimeSpan::default();
    match len {
        0 => {}
        8 | 12 => {
            t.negative = reader.read_u8()? != 0;
            t.days = reader.read_u32_le()?;
            t.hours = reader.read_u8()?;
            t.minutes = reader.read_u8()?;
            t.seconds = reader.read_u8()?;
            if len == 12 {
                t.micros = reader.read_u32_le()?;
            }
        }
        other => return Err(Error::protocol(format!("invalid TIME length {other}"))),
    }
    Ok(t)
}

/// Skip a binary-protocol value without materializing it.
///
/// Sequential cursors use this for the columns an out-of-order read jumps
/// over. A malformed length here aborts the row: once the boundary of one
/// column is wrong, every later column would be misread.
pub fn skip_binary(reader: &mut PacketReader<'_>, field: &Field) -> Result<()> {
    match field.type_code {
        TypeCode::Null => Ok(()),
        TypeCode::Tiny => reader.skip(1),
        TypeCode::Short | TypeCode::Year => reader.skip(2),
        TypeCode::Int24 | TypeCode::Long | TypeCode::Float => reader.skip(4),
        TypeCode::LongLong | TypeCode::Double => reader.skip(8),
        TypeCode::Date
        | TypeCode::NewDate
        | TypeCode::Time
        | TypeCode::DateTime
        | TypeCode::Timestamp => {
            let len = reader.read_u8()?;
            reader.skip(len as usize)
        }
        _ => {
            let len = reader
                .read_lenenc_int()?
                .ok_or_else(|| Error::protocol("NULL marker inside binary row value"))?;
            reader.skip(len as usize)
        }
    }
}

/// Skip a text-protocol value (always a length-encoded string or the NULL
/// marker) without materializing it.
pub fn skip_text(reader: &mut PacketReader<'_>) -> Result<()> {
    match reader.read_lenenc_int()? {
        None => Ok(()),
        Some(len) => reader.skip(len as usize),
    }
}

// ---------------------------------------------------------------------------
// Binary protocol: encoding
// ---------------------------------------------------------------------------

/// The wire type and unsigned flag a bound parameter declares.
pub fn binding_type(value: &Value) -> (TypeCode, bool) {
    match value {
        Value::Null => (TypeCode::Null, false),
        Value::Int8(_) => (TypeCode::Tiny, false),
        Value::UInt8(_) => (TypeCode::Tiny, true),
        Value::Int16(_) => (TypeCode::Short, false),
        Value::UInt16(_) => (TypeCode::Short, true),
        Value::Int24(_) => (TypeCode::Int24, false),
        Value::UInt24(_) => (TypeCode::Int24, true),
        Value::Int32(_) => (TypeCode::Long, false),
        Value::UInt32(_) => (TypeCode::Long, true),
        Value::Int64(_) => (TypeCode::LongLong, false),
        Value::UInt64(_) => (TypeCode::LongLong, true),
        Value::Year(_) => (TypeCode::Short, true),
        Value::Float(_) => (TypeCode::Float, false),
        Value::Double(_) => (TypeCode::Double, false),
        Value::Decimal(_) => (TypeCode::NewDecimal, false),
        Value::Bit(_) => (TypeCode::LongLong, true),
        Value::Date(_) => (TypeCode::Date, false),
        Value::Time(_) => (TypeCode::Time, false),
        Value::DateTime(_) => (TypeCode::DateTime, false),
        Value::Text(_) | Value::Enum(_) | Value::Set(_) => (TypeCode::VarString, false),
        Value::Json(_) => (TypeCode::Json, false),
        Value::Bytes(_) | Value::Uuid(_) => (TypeCode::Blob, false),
        Value::Geometry(_) => (TypeCode::Geometry, false),
    }
}

/// Encode a non-NULL parameter value in binary-protocol layout.
pub fn encode_binary(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Int8(v) => writer.write_u8(*v as u8),
        Value::UInt8(v) => writer.write_u8(*v),
        Value::Int16(v) => writer.write_u16_le(*v as u16),
        Value::UInt16(v) | Value::Year(v) => writer.write_u16_le(*v),
        Value::Int24(v) | Value::Int32(v) => writer.write_u32_le(*v as u32),
        Value::UInt24(v) | Value::UInt32(v) => writer.write_u32_le(*v),
        Value::Int64(v) => writer.write_u64_le(*v as u64),
        Value::UInt64(v) | Value::Bit(v) => writer.write_u64_le(*v),
        Value::Float(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Double(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Decimal(s) | Value::Text(s) | Value::Enum(s) | Value::Set(s) | Value::Json(s) => {
            writer.write_lenenc_string(s);
        }
        Value::Bytes(b) | Value::Geometry(b) => writer.write_lenenc_bytes(b),
        Value::Uuid(u) => writer.write_lenenc_bytes(u),
        Value::Date(d) => write_binary_date(writer, d),
        Value::Time(t) => write_binary_time(writer, t),
        Value::DateTime(dt) => write_binary_datetime(writer, dt),
    }
}

fn write_binary_date(writer: &mut PacketWriter, d: &Date) {
    if d.is_zero() {
        writer.write_u8(0);
    } else {
        writer.write_u8(4);
        writer.write_u16_le(d.year);
        writer.write_u8(d.month);
        writer.write_u8(d.day);
    }
}

fn write_binary_datetime(writer: &mut PacketWriter, dt: &DateTime) {
    if dt.is_zero() {
        writer.write_u8(0);
    } else if dt.micros != 0 {
        writer.write_u8(11);
        writer.write_u16_le(dt.year);
        writer.write_u8(dt.month);
        writer.write_u8(dt.day);
        writer.write_u8(dt.hour);
        writer.write_u8(dt.minute);
        writer.write_u8(dt.second);
        writer.write_u32_le(dt.micros);
    } else if dt.hour != 0 || dt.minute != 0 || dt.second != 0 {
        writer.write_u8(7);
        writer.write_u16_le(dt.year);
        writer.write_u8(dt.month);
        writer.write_u8(dt.day);
        writer.write_u8(dt.hour);
        writer.write_u8(dt.minute);
        writer.write_u8(dt.second);
    } else {
        writer.write_u8(4);
        writer.write_u16_le(dt.year);
        writer.write_u8(dt.month);
        writer.write_u8(dt.day);
    }
}

fn write_binary_time(writer: &mut PacketWriter, t: &TimeSpan) {
    if t.is_zero() {
        writer.write_u8(0);
    } else if t.micros != 0 {
        writer.write_u8(12);
        writer.write_u8(u8::from(t.negative));
        writer.write_u32_le(t.days);
        writer.write_u8(t.hours);
        writer.write_u8(t.minutes);
        writer.write_u8(t.seconds);
        writer.write_u32_le(t.micros);
    } else {
        writer.write_u8(8);
        writer.write_u8(u8::from(t.negative));
        writer.write_u32_le(t.days);
        writer.write_u8(t.hours);
        writer.write_u8(t.minutes);
        writer.write_u8(t.seconds);
    }
}

/// Extract the point coordinates from an SRID-prefixed WKB geometry blob.
pub fn wkb_point(data: &[u8]) -> Option<(f64, f64)> {
    // 4 bytes SRID, 1 byte byte-order, 4 bytes type (1 = point), 2 doubles.
    if data.len() < 25 {
        return None;
    }
    let wkb = &data[4..];
    let little_endian = wkb[0] == 1;
    let read_u32 = |b: &[u8]| {
        let arr = [b[0], b[1], b[2], b[3]];
        if little_endian {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        }
    };
    let read_f64 = |b: &[u8]| {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&b[..8]);
        if little_endian {
            f64::from_le_bytes(arr)
        } else {
            f64::from_be_bytes(arr)
        }
    };
    if read_u32(&wkb[1..5]) != 1 {
        return None;
    }
    Some((read_f64(&wkb[5..13]), read_f64(&wkb[13..21])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;
    use crate::types::column_flags;

    fn field(type_code: TypeCode, flags: u16, cs: u16) -> Field {
        let mut w = PacketWriter::new();
        for s in ["def", "db", "t", "t", "c", "c"] {
            w.write_lenenc_string(s);
        }
        w.write_lenenc_int(0x0C);
        w.write_u16_le(cs);
        w.write_u32_le(0);
        w.write_u8(type_code as u8);
        w.write_u16_le(flags);
        w.write_u8(0);
        w.write_u16_le(0);
        Field::parse(&w.into_bytes()).unwrap()
    }

    fn text_field(type_code: TypeCode) -> Field {
        field(type_code, 0, charset::UTF8MB4_0900_AI_CI)
    }

    fn unsigned_field(type_code: TypeCode) -> Field {
        field(type_code, column_flags::UNSIGNED, charset::UTF8MB4_0900_AI_CI)
    }

    fn binary_roundtrip(value: &Value, mut field: Field) -> Value {
        let mut w = PacketWriter::new();
        encode_binary(&mut w, value);
        let bytes = w.into_bytes();
        let mut reader = PacketReader::new(&bytes);
        let decoded = decode_binary(&mut reader, &mut field, None).unwrap();
        assert!(reader.is_empty(), "trailing bytes after {value:?}");
        decoded
    }

    #[test]
    fn text_literals_escape() {
        assert_eq!(text_literal(&Value::Null), "NULL");
        assert_eq!(text_literal(&Value::Int32(-7)), "-7");
        assert_eq!(text_literal(&Value::UInt64(u64::MAX)), u64::MAX.to_string());
        assert_eq!(text_literal(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(text_literal(&Value::Text("a\\b".into())), "'a\\\\b'");
        assert_eq!(text_literal(&Value::Bytes(vec![0xDE, 0xAD])), "X'DEAD'");
        assert_eq!(
            text_literal(&Value::DateTime(DateTime::new(2024, 1, 2, 3, 4, 5, 0))),
            "'2024-01-02 03:04:05'"
        );
        assert_eq!(text_literal(&Value::Double(f64::NAN)), "NULL");
    }

    #[test]
    fn integer_binary_roundtrip_extremes() {
        let cases = [
            (Value::Int8(i8::MIN), TypeCode::Tiny, false),
            (Value::Int8(i8::MAX), TypeCode::Tiny, false),
            (Value::UInt8(u8::MAX), TypeCode::Tiny, true),
            (Value::Int16(i16::MIN), TypeCode::Short, false),
            (Value::UInt16(u16::MAX), TypeCode::Short, true),
            (Value::Int32(i32::MIN), TypeCode::Long, false),
            (Value::UInt32(u32::MAX), TypeCode::Long, true),
            (Value::Int64(i64::MIN), TypeCode::LongLong, false),
            (Value::Int64(i64::MAX), TypeCode::LongLong, false),
            // Above the signed 64-bit max; must survive unchanged.
            (Value::UInt64(u64::MAX), TypeCode::LongLong, true),
            (Value::UInt64(i64::MAX as u64 + 1), TypeCode::LongLong, true),
        ];
        for (value, code, unsigned) in cases {
            let f = if unsigned {
                unsigned_field(code)
            } else {
                text_field(code)
            };
            assert_eq!(binary_roundtrip(&value, f), value);
        }
    }

    #[test]
    fn float_binary_roundtrip() {
        assert_eq!(
            binary_roundtrip(&Value::Float(f32::MAX), text_field(TypeCode::Float)),
            Value::Float(f32::MAX)
        );
        assert_eq!(
            binary_roundtrip(&Value::Double(f64::MIN), text_field(TypeCode::Double)),
            Value::Double(f64::MIN)
        );
    }

    #[test]
    fn temporal_binary_roundtrip() {
        let cases = [
            Value::Date(Date::default()),
            Value::Date(Date::new(9999, 12, 31)),
            Value::DateTime(DateTime::default()),
            Value::DateTime(DateTime::new(2024, 2, 29, 0, 0, 0, 0)),
            Value::DateTime(DateTime::new(2024, 2, 29, 23, 59, 59, 0)),
            Value::DateTime(DateTime::new(2024, 2, 29, 23, 59, 59, 999_999)),
            Value::Time(TimeSpan::default()),
            Value::Time(TimeSpan::new(false, 34, 22, 59, 59, 0)),
            Value::Time(TimeSpan::new(true, 0, 1, 2, 3, 1)),
        ];
        for value in cases {
            let code = match value {
                Value::Date(_) => TypeCode::Date,
                Value::Time(_) => TypeCode::Time,
                _ => TypeCode::DateTime,
            };
            assert_eq!(binary_roundtrip(&value, text_field(code)), value);
        }
    }

    #[test]
    fn string_shaped_binary_roundtrip() {
        assert_eq!(
            binary_roundtrip(
                &Value::Decimal("123456789.000000001".into()),
                text_field(TypeCode::NewDecimal)
            ),
            Value::Decimal("123456789.000000001".into())
        );
        assert_eq!(
            binary_roundtrip(&Value::Text("héllo".into()), text_field(TypeCode::VarString)),
            Value::Text("héllo".into())
        );
        assert_eq!(
            binary_roundtrip(
                &Value::Bytes(vec![0, 1, 2, 255]),
                field(TypeCode::Blob, column_flags::BLOB, charset::BINARY)
            ),
            Value::Bytes(vec![0, 1, 2, 255])
        );
        assert_eq!(
            binary_roundtrip(&Value::Json("{\"a\":1}".into()), text_field(TypeCode::Json)),
            Value::Json("{\"a\":1}".into())
        );
    }

    #[test]
    fn text_decoding_by_type() {
        let mut f = text_field(TypeCode::Long);
        assert_eq!(decode_text(&mut f, b"42").unwrap(), Value::Int32(42));

        let mut f = unsigned_field(TypeCode::LongLong);
        assert_eq!(
            decode_text(&mut f, b"18446744073709551615").unwrap(),
            Value::UInt64(u64::MAX)
        );

        let mut f = text_field(TypeCode::DateTime);
        assert_eq!(
            decode_text(&mut f, b"2024-02-29 13:05:09.123456").unwrap(),
            Value::DateTime(DateTime::new(2024, 2, 29, 13, 5, 9, 123_456))
        );

        let mut f = text_field(TypeCode::Time);
        assert_eq!(
            decode_text(&mut f, b"-34:00:01").unwrap(),
            Value::Time(TimeSpan::new(true, 1, 10, 0, 1, 0))
        );

        let mut f = text_field(TypeCode::NewDecimal);
        assert_eq!(
            decode_text(&mut f, b"3.1400").unwrap(),
            Value::Decimal("3.1400".into())
        );
    }

    #[test]
    fn text_decode_fallback_notes_conversion() {
        let mut f = text_field(TypeCode::Long);
        assert_eq!(
            decode_text(&mut f, b"not-a-number").unwrap(),
            Value::Text("not-a-number".into())
        );
        assert_eq!(f.conversions_observed(), &["TEXT"]);
    }

    #[test]
    fn blob_charset_changes_host_type() {
        let mut bin = field(TypeCode::Blob, column_flags::BLOB, charset::BINARY);
        assert_eq!(
            decode_text(&mut bin, b"ab").unwrap(),
            Value::Bytes(b"ab".to_vec())
        );

        let mut txt = field(TypeCode::Blob, column_flags::BLOB, charset::UTF8_GENERAL_CI);
        assert_eq!(
            decode_text(&mut txt, b"ab").unwrap(),
            Value::Text("ab".into())
        );
    }

    #[test]
    fn bit_values_pack_big_endian() {
        let mut f = text_field(TypeCode::Bit);
        assert_eq!(
            decode_text(&mut f, &[0x01, 0x02]).unwrap(),
            Value::Bit(0x0102)
        );
        assert!(decode_text(&mut f, &[0; 9]).is_err());
    }

    #[test]
    fn fixed_width_read_honors_length_hint() {
        let mut f = text_field(TypeCode::String);
        let bytes = b"abcdef";
        let mut reader = PacketReader::new(bytes);
        let value = decode_binary(&mut reader, &mut f, Some(4)).unwrap();
        assert_eq!(value, Value::Text("abcd".into()));
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn skip_binary_advances_correctly() {
        let mut w = PacketWriter::new();
        encode_binary(&mut w, &Value::Int32(7));
        encode_binary(&mut w, &Value::Text("skip me".into()));
        encode_binary(&mut w, &Value::DateTime(DateTime::new(2024, 1, 1, 1, 1, 1, 1)));
        encode_binary(&mut w, &Value::Int64(99));
        let bytes = w.into_bytes();

        let mut reader = PacketReader::new(&bytes);
        skip_binary(&mut reader, &text_field(TypeCode::Long)).unwrap();
        skip_binary(&mut reader, &text_field(TypeCode::VarString)).unwrap();
        skip_binary(&mut reader, &text_field(TypeCode::DateTime)).unwrap();
        let mut f = text_field(TypeCode::LongLong);
        assert_eq!(
            decode_binary(&mut reader, &mut f, None).unwrap(),
            Value::Int64(99)
        );
    }

    #[test]
    fn skip_binary_malformed_is_protocol_error() {
        // lenenc promises 200 bytes but only 2 are present
        let bytes = [0xC8u8, 1, 2];
        let mut reader = PacketReader::new(&bytes);
        let err = skip_binary(&mut reader, &text_field(TypeCode::VarString)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn wkb_point_extraction() {
        let mut data = vec![0, 0, 0, 0]; // SRID 0
        data.push(1); // little-endian
        data.extend_from_slice(&1u32.to_le_bytes()); // point
        data.extend_from_slice(&1.5f64.to_le_bytes());
        data.extend_from_slice(&(-2.5f64).to_le_bytes());
        assert_eq!(wkb_point(&data), Some((1.5, -2.5)));
        assert_eq!(wkb_point(&[0; 10]), None);
    }

    #[test]
    fn binding_types() {
        assert_eq!(binding_type(&Value::Null), (TypeCode::Null, false));
        assert_eq!(binding_type(&Value::UInt32(1)), (TypeCode::Long, true));
        assert_eq!(binding_type(&Value::Text(String::new())), (TypeCode::VarString, false));
        assert_eq!(binding_type(&Value::Bytes(vec![])), (TypeCode::Blob, false));
        assert_eq!(binding_type(&Value::Json("{}".into())), (TypeCode::Json, false));
    }
}
