//! Driver configuration and the handshake seam.
//!
//! Authentication and capability negotiation live outside this crate: the
//! handshake collaborator connects, negotiates, and hands the driver a
//! ready transport plus the agreed session parameters as a
//! `SessionHandshake`.

use std::time::Duration;

use crate::protocol::{MAX_BLOCK_SIZE, capabilities, charset};

/// Where the physical byte stream connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// TCP host and port
    Tcp { host: String, port: u16 },
    /// Unix domain socket path
    #[cfg(unix)]
    Unix { path: String },
}

impl TransportTarget {
    /// TCP target with the default MySQL port.
    pub fn tcp(host: impl Into<String>) -> Self {
        TransportTarget::Tcp {
            host: host.into(),
            port: 3306,
        }
    }
}

/// Session parameters produced by the handshake collaborator.
#[derive(Debug, Clone)]
pub struct SessionHandshake {
    /// Negotiated capability flags (client ∩ server)
    pub capabilities: u32,
    /// Negotiated character set index
    pub charset: u16,
    /// Server-assigned connection id, used for out-of-band kill
    pub connection_id: u32,
    /// Server version string
    pub server_version: String,
    /// Negotiated max block size for packet framing
    pub max_block_size: usize,
}

impl Default for SessionHandshake {
    fn default() -> Self {
        Self {
            capabilities: capabilities::CLIENT_PROTOCOL_41
                | capabilities::CLIENT_TRANSACTIONS
                | capabilities::CLIENT_MULTI_STATEMENTS
                | capabilities::CLIENT_MULTI_RESULTS
                | capabilities::CLIENT_DEPRECATE_EOF,
            charset: charset::UTF8MB4_0900_AI_CI,
            connection_id: 0,
            server_version: String::new(),
            max_block_size: MAX_BLOCK_SIZE,
        }
    }
}

impl SessionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the negotiated capability flags.
    pub fn capabilities(mut self, capabilities: u32) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the negotiated charset index.
    pub fn charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    /// Set the server-assigned connection id.
    pub fn connection_id(mut self, id: u32) -> Self {
        self.connection_id = id;
        self
    }

    /// Set the server version string.
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Set the negotiated max block size.
    pub fn max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = size;
        self
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Upper bound on one outgoing statement packet; batches coalesce
    /// under this limit (server's `max_allowed_packet`)
    pub max_packet_size: usize,
    /// Socket read deadline for protocol frames
    pub read_timeout: Option<Duration>,
    /// Socket write deadline
    pub write_timeout: Option<Duration>,
    /// Whole-command deadline; on expiry a best-effort server-side kill is
    /// issued before the timeout surfaces
    pub command_timeout: Option<Duration>,
    /// Prepared statements kept in the driver's statement cache
    pub statement_cache_size: usize,
    /// Entries kept in the stored-procedure metadata cache
    pub procedure_cache_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 64 * 1024 * 1024,
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            command_timeout: None,
            statement_cache_size: 16,
            procedure_cache_size: 25,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outgoing packet size bound.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the socket read deadline.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the socket write deadline.
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the whole-command deadline.
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the prepared-statement cache capacity.
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the procedure metadata cache capacity.
    pub fn procedure_cache_size(mut self, size: usize) -> Self {
        self.procedure_cache_size = size;
        self
    }
}
