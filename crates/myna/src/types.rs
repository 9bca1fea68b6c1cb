//! MySQL column types and result-set field descriptors.

use myna_core::{Error, Result};

use crate::protocol::{PacketReader, charset};

/// MySQL wire type codes (the `MYSQL_TYPE_*` constants).
///
/// Signedness is not part of the code; it rides in the column flags, and
/// the codec widens to the unsigned host type from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl TypeCode {
    /// Parse a type code from its wire byte. Unknown codes map to `String`,
    /// matching how the server treats unrecognized catalog types.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => TypeCode::Decimal,
            0x01 => TypeCode::Tiny,
            0x02 => TypeCode::Short,
            0x03 => TypeCode::Long,
            0x04 => TypeCode::Float,
            0x05 => TypeCode::Double,
            0x06 => TypeCode::Null,
            0x07 => TypeCode::Timestamp,
            0x08 => TypeCode::LongLong,
            0x09 => TypeCode::Int24,
            0x0A => TypeCode::Date,
            0x0B => TypeCode::Time,
            0x0C => TypeCode::DateTime,
            0x0D => TypeCode::Year,
            0x0E => TypeCode::NewDate,
            0x0F => TypeCode::VarChar,
            0x10 => TypeCode::Bit,
            0xF5 => TypeCode::Json,
            0xF6 => TypeCode::NewDecimal,
            0xF7 => TypeCode::Enum,
            0xF8 => TypeCode::Set,
            0xF9 => TypeCode::TinyBlob,
            0xFA => TypeCode::MediumBlob,
            0xFB => TypeCode::LongBlob,
            0xFC => TypeCode::Blob,
            0xFD => TypeCode::VarString,
            0xFE => TypeCode::String,
            0xFF => TypeCode::Geometry,
            _ => TypeCode::String,
        }
    }

    /// Translate a SQL catalog type name (e.g. `information_schema`
    /// `DATA_TYPE`) into the wire type enumeration.
    pub fn from_catalog_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "tinyint" | "bool" | "boolean" => TypeCode::Tiny,
            "smallint" => TypeCode::Short,
            "mediumint" => TypeCode::Int24,
            "int" | "integer" => TypeCode::Long,
            "bigint" => TypeCode::LongLong,
            "float" => TypeCode::Float,
            "double" | "real" => TypeCode::Double,
            "decimal" | "numeric" => TypeCode::NewDecimal,
            "bit" => TypeCode::Bit,
            "year" => TypeCode::Year,
            "date" => TypeCode::Date,
            "time" => TypeCode::Time,
            "datetime" => TypeCode::DateTime,
            "timestamp" => TypeCode::Timestamp,
            "char" => TypeCode::String,
            "varchar" => TypeCode::VarString,
            "tinytext" | "tinyblob" => TypeCode::TinyBlob,
            "mediumtext" | "mediumblob" => TypeCode::MediumBlob,
            "longtext" | "longblob" => TypeCode::LongBlob,
            "text" | "blob" | "binary" | "varbinary" => TypeCode::Blob,
            "enum" => TypeCode::Enum,
            "set" => TypeCode::Set,
            "json" => TypeCode::Json,
            "geometry" | "point" | "linestring" | "polygon" => TypeCode::Geometry,
            _ => TypeCode::VarString,
        }
    }

    /// Check if this is an integer type.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            TypeCode::Tiny
                | TypeCode::Short
                | TypeCode::Long
                | TypeCode::LongLong
                | TypeCode::Int24
                | TypeCode::Year
        )
    }

    /// Check if this is a date/time type.
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            TypeCode::Date
                | TypeCode::NewDate
                | TypeCode::Time
                | TypeCode::DateTime
                | TypeCode::Timestamp
        )
    }

    /// Check if this is a blob code. Whether the host sees bytes or text is
    /// decided by the column charset, not the code.
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            TypeCode::TinyBlob
                | TypeCode::MediumBlob
                | TypeCode::LongBlob
                | TypeCode::Blob
                | TypeCode::Geometry
        )
    }

    /// SQL name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            TypeCode::Decimal | TypeCode::NewDecimal => "DECIMAL",
            TypeCode::Tiny => "TINYINT",
            TypeCode::Short => "SMALLINT",
            TypeCode::Long => "INT",
            TypeCode::Float => "FLOAT",
            TypeCode::Double => "DOUBLE",
            TypeCode::Null => "NULL",
            TypeCode::Timestamp => "TIMESTAMP",
            TypeCode::LongLong => "BIGINT",
            TypeCode::Int24 => "MEDIUMINT",
            TypeCode::Date | TypeCode::NewDate => "DATE",
            TypeCode::Time => "TIME",
            TypeCode::DateTime => "DATETIME",
            TypeCode::Year => "YEAR",
            TypeCode::VarChar | TypeCode::VarString => "VARCHAR",
            TypeCode::Bit => "BIT",
            TypeCode::Json => "JSON",
            TypeCode::Enum => "ENUM",
            TypeCode::Set => "SET",
            TypeCode::TinyBlob => "TINYBLOB",
            TypeCode::MediumBlob => "MEDIUMBLOB",
            TypeCode::LongBlob => "LONGBLOB",
            TypeCode::Blob => "BLOB",
            TypeCode::String => "CHAR",
            TypeCode::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result-set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NUM: u16 = 32768;
}

/// A result-set column descriptor, immutable once the result set opens.
///
/// The `conversions_seen` list records host-type coercions observed while
/// reading this column. It exists for diagnostics only and feeds no
/// correctness decision.
#[derive(Debug, Clone)]
pub struct Field {
    /// Schema (database) name
    pub database: String,
    /// Table name or alias
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name or alias
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Collation index
    pub charset: u16,
    /// Display length
    pub display_length: u32,
    /// Wire type code
    pub type_code: TypeCode,
    /// Column flags
    pub flags: u16,
    /// Decimal scale
    pub decimals: u8,
    conversions_seen: Vec<&'static str>,
}

impl Field {
    /// Parse a column-definition packet payload (protocol 4.1 layout).
    pub fn parse(payload: &[u8]) -> Result<Field> {
        let mut reader = PacketReader::new(payload);
        let required = |v: Option<String>, what: &str| {
            v.ok_or_else(|| Error::protocol(format!("NULL {what} in column definition")))
        };

        let _catalog = required(reader.read_lenenc_string()?, "catalog")?;
        let database = required(reader.read_lenenc_string()?, "schema")?;
        let table = required(reader.read_lenenc_string()?, "table")?;
        let org_table = required(reader.read_lenenc_string()?, "org_table")?;
        let name = required(reader.read_lenenc_string()?, "name")?;
        let org_name = required(reader.read_lenenc_string()?, "org_name")?;

        // Fixed-length fields block, always 0x0C.
        let _fixed_len = reader.read_lenenc_int()?;
        let charset = reader.read_u16_le()?;
        let display_length = reader.read_u32_le()?;
        let type_code = TypeCode::from_u8(reader.read_u8()?);
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;

        Ok(Field {
            database,
            table,
            org_table,
            name,
            org_name,
            charset,
            display_length,
            type_code,
            flags,
            decimals,
            conversions_seen: Vec::new(),
        })
    }

    /// Check if the column is nullable.
    pub const fn is_nullable(&self) -> bool {
        self.flags & column_flags::NOT_NULL == 0
    }

    /// Check if the column is part of the primary key.
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Check if the column is unsigned.
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is auto-increment.
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Check if the column carries the BLOB flag.
    pub const fn is_blob_flagged(&self) -> bool {
        self.flags & column_flags::BLOB != 0
    }

    /// A BLOB-flagged column is binary or text depending on its collation
    /// index; the classification changes the host type, not just the
    /// presentation.
    pub fn is_binary(&self) -> bool {
        charset::is_binary(self.charset)
    }

    /// Record a host-type coercion seen on this column. Diagnostics only.
    pub fn note_conversion(&mut self, host_type: &'static str) {
        if !self.conversions_seen.contains(&host_type) {
            self.conversions_seen.push(host_type);
        }
    }

    /// The host-type coercions observed so far, in first-seen order.
    pub fn conversions_observed(&self) -> &[&'static str] {
        &self.conversions_seen
    }
}
