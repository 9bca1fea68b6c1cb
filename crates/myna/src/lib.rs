//! A native MySQL wire-protocol client for Rust.
//!
//! This crate implements the client side of the MySQL protocol over
//! synchronous, blocking I/O:
//!
//! - Packet framing with sequence numbers and continuation splitting
//! - Text and prepared/binary statement protocols
//! - Streaming result cursors with sequential, buffered and cached access
//! - A typed value codec over the full set of wire types
//! - Stored-procedure metadata caching
//!
//! Authentication and capability negotiation are not part of this crate:
//! a handshake module produces a ready transport and the negotiated
//! session parameters, which feed into `Driver::from_transport` (or
//! `Driver::from_stream` for any blocking byte stream). Pooling lives in
//! `myna-pool`; `Driver` implements its `ManagedConnection` trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use myna::{Driver, DriverConfig, Params, SessionHandshake};
//!
//! let mut driver = Driver::from_transport(transport, handshake, DriverConfig::new())?;
//! let mut rows = driver.query("SELECT id, name FROM users WHERE id = ?",
//!                             &Params::positional([42i64]))?;
//! while rows.advance()? {
//!     let row = rows.current_row().unwrap();
//!     println!("{:?}", row.get_by_name("name"));
//! }
//! rows.close()?;
//! ```

pub mod codec;
pub mod config;
pub mod driver;
pub mod procedures;
pub mod protocol;
pub mod resultset;
pub mod statement;
pub mod types;

pub use config::{DriverConfig, SessionHandshake, TransportTarget};
pub use driver::{CancelConnector, CancelHandle, Driver, DriverState};
pub use procedures::{ParamDirection, ProcParam, ProcedureCache, StoredProcedure};
pub use protocol::{PacketStream, Transport};
pub use resultset::{AccessMode, CursorState, ResultSet, RowFormat};
pub use statement::{Params, PreparedStatement};
pub use types::{Field, TypeCode};

// Re-export the shared core and pool types so callers need one crate.
pub use myna_core::{
    Date, DateTime, Error, Result, Row, ServerError, TimeSpan, Value,
};
pub use myna_pool::{
    ConnectionFactory, ManagedConnection, Pool, PoolConfig, PoolRegistry, PooledConnection,
};
