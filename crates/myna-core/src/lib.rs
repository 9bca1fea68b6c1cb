//! Core types for the myna MySQL client.
//!
//! This crate provides the pieces shared between the wire-protocol driver
//! and the connection pool:
//!
//! - `Error` and its category structs for every failure class
//! - `Value`, the dynamically-typed SQL value covering the MySQL wire types
//! - `Row` with shared column metadata

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, ConversionError, Error, PoolError,
    PoolErrorKind, ProtocolError, Result, ServerError, TimeoutError, TimeoutKind, UsageError,
};
pub use row::{ColumnInfo, Row};
pub use value::{Date, DateTime, TimeSpan, Value};
