//! MySQL wire protocol: framing, commands, packet models.
//!
//! Every protocol packet rides in a frame with a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number (wraps at 256)
//!
//! A payload of `MAX_BLOCK_SIZE` (2^24 - 1) or more is split across
//! consecutive frames; a frame whose length equals `MAX_BLOCK_SIZE` is a
//! continuation, and the message ends at the first shorter frame.

pub mod prepared;
pub mod reader;
pub mod transport;
pub mod writer;

pub use prepared::{ExecuteTemplate, PrepareOk};
pub use reader::PacketReader;
pub use transport::{PacketStream, Transport};
pub use writer::PacketWriter;

/// Maximum payload size of a single frame (2^24 - 1 bytes); the max block
/// size above which a logical message must be split.
pub const MAX_BLOCK_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
}

/// MySQL command codes (COM_xxx) issued by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Close the connection
    Quit = 0x01,
    /// Switch the default database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Kill a connection or query by id
    ProcessKill = 0x0c,
    /// Liveness check
    Ping = 0x0e,
    /// Prepare a statement
    StmtPrepare = 0x16,
    /// Execute a prepared statement
    StmtExecute = 0x17,
    /// Close a prepared statement
    StmtClose = 0x19,
    /// Reset a prepared statement's accumulated data
    StmtReset = 0x1a,
    /// Reset session state without re-authenticating
    ResetConnection = 0x1f,
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// Character set registry.
///
/// MySQL identifies collations by index; the index decides whether a
/// BLOB-flagged column is binary or text, which changes the host type it
/// maps to. The registry is a process-wide table, initialized once.
pub mod charset {
    use std::sync::OnceLock;

    pub const LATIN1_SWEDISH_CI: u16 = 8;
    pub const UTF8_GENERAL_CI: u16 = 33;
    pub const BINARY: u16 = 63;
    pub const UTF8MB4_GENERAL_CI: u16 = 45;
    pub const UTF8MB4_UNICODE_CI: u16 = 224;
    pub const UTF8MB4_0900_AI_CI: u16 = 255;

    /// One collation the server may tag a column with.
    #[derive(Debug, Clone, Copy)]
    pub struct CharsetInfo {
        pub index: u16,
        pub name: &'static str,
        pub is_binary: bool,
        /// Maximum bytes per character, used for display-length math.
        pub max_bytes: u8,
    }

    fn table() -> &'static [CharsetInfo] {
        static TABLE: OnceLock<Vec<CharsetInfo>> = OnceLock::new();
        TABLE.get_or_init(|| {
            let entry = |index, name, is_binary, max_bytes| CharsetInfo {
                index,
                name,
                is_binary,
                max_bytes,
            };
            vec![
                entry(8, "latin1", false, 1),
                entry(11, "ascii", false, 1),
                entry(33, "utf8", false, 3),
                entry(35, "ucs2", false, 2),
                entry(45, "utf8mb4", false, 4),
                entry(46, "utf8mb4", false, 4),
                entry(54, "utf16", false, 4),
                entry(60, "utf32", false, 4),
                entry(63, "binary", true, 1),
                entry(224, "utf8mb4", false, 4),
                entry(246, "utf8mb4", false, 4),
                entry(255, "utf8mb4", false, 4),
            ]
        })
    }

    /// Look up a collation by index.
    pub fn lookup(index: u16) -> Option<CharsetInfo> {
        table().iter().find(|c| c.index == index).copied()
    }

    /// Whether the collation index denotes binary data. Unknown indexes are
    /// treated as text, matching the server's catalog default.
    pub fn is_binary(index: u16) -> bool {
        lookup(index).is_some_and(|c| c.is_binary)
    }
}

/// A frame header.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max `MAX_BLOCK_SIZE`)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a frame header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Server response packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE with payload < 9 bytes)
    Eof,
    /// LOCAL INFILE request (0xFB)
    LocalInfile,
    /// Anything else (result-set header, column definition, row)
    Data,
}

impl PacketType {
    /// Detect packet type from the first byte of a payload.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    /// Whether another result set follows this one on the wire.
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Parsed EOF packet (pre-DEPRECATE_EOF servers).
#[derive(Debug, Clone, Copy, Default)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}
