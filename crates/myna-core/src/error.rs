//! Error types for myna operations.

use std::fmt;

/// The primary error type for all myna operations.
#[derive(Debug)]
pub enum Error {
    /// Structured error packet received from the server
    Server(ServerError),
    /// Malformed or unexpected bytes on the wire
    Protocol(ProtocolError),
    /// Connection-level failures (connect, mid-protocol I/O, closed)
    Connection(ConnectionError),
    /// A socket or command deadline elapsed
    Timeout(TimeoutError),
    /// Pool errors (exhausted, draining)
    Pool(PoolError),
    /// A wire value is incompatible with the requested host type
    Conversion(ConversionError),
    /// API misuse (out-of-order sequential reads, mixed parameter styles)
    Usage(UsageError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors outside the framed protocol path
    Io(std::io::Error),
}

/// An error packet sent by the server: code, optional SQL state, message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server error code (e.g. 1045 = access denied)
    pub code: u16,
    /// Five-character SQLSTATE, empty when the server sent none
    pub sql_state: String,
    /// Human-readable message
    pub message: String,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the physical connection
    Connect,
    /// I/O failed mid-protocol; the stream cannot be trusted and the
    /// connection must be discarded, never pooled
    Fatal,
    /// Operation attempted on a closed connection
    Closed,
}

/// A deadline elapsed. Distinguishable from fatal I/O failures because the
/// caller may retry or cancel; the stream itself is still framed.
#[derive(Debug)]
pub struct TimeoutError {
    pub kind: TimeoutKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Socket read deadline
    Read,
    /// Socket write deadline
    Write,
    /// Whole-command deadline; a best-effort server-side kill was issued
    Command,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// No connection became available within the caller's timeout
    Exhausted,
    /// The pool is draining or already discarded
    Closed,
    /// Invalid pool configuration
    Config,
}

/// A wire value could not be converted to the requested host type.
#[derive(Debug)]
pub struct ConversionError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct UsageError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a protocol error from a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a usage error from a message.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            message: message.into(),
        })
    }

    /// Build a fatal connection error wrapping an I/O failure.
    pub fn fatal(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Fatal,
            message: message.into(),
            source: Some(Box::new(source)),
        })
    }

    /// Build a conversion error.
    pub fn conversion(expected: &'static str, actual: impl Into<String>) -> Self {
        Error::Conversion(ConversionError {
            expected,
            actual: actual.into(),
            column: None,
        })
    }

    /// Is this a fatal error after which the connection must be discarded?
    ///
    /// Fatal errors force-close the owning connection outside the pool's
    /// idle/in-use bookkeeping.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Fatal | ConnectionErrorKind::Connect
            ),
            Error::Protocol(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Is this a retryable condition (timeouts, pool exhaustion)?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_))
            || matches!(
                self,
                Error::Pool(p) if p.kind == PoolErrorKind::Exhausted
            )
    }

    /// Server error code, if this is a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// SQLSTATE if available.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(e) if !e.sql_state.is_empty() => Some(&e.sql_state),
            _ => None,
        }
    }
}

impl ServerError {
    /// Check if this is a duplicate-key violation (ER_DUP_ENTRY).
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }

    /// Check if this is the interrupted-query error raised after a
    /// server-side `KILL QUERY` (ER_QUERY_INTERRUPTED).
    pub fn is_query_interrupted(&self) -> bool {
        self.code == 1317
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Server(e) => write!(f, "Server error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Timeout(e) => write!(f, "Timeout: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Conversion(e) => write!(f, "Conversion error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sql_state.is_empty() {
            write!(f, "{} (code {})", self.message, self.code)
        } else {
            write!(
                f,
                "{} (code {}, SQLSTATE {})",
                self.message, self.code, self.sql_state
            )
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TimeoutError> for Error {
    fn from(err: TimeoutError) -> Self {
        Error::Timeout(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConversionError> for Error {
    fn from(err: ConversionError) -> Self {
        Error::Conversion(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for myna operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display_and_helpers() {
        let err = ServerError {
            code: 1045,
            sql_state: "28000".to_string(),
            message: "Access denied".to_string(),
        };
        assert_eq!(err.to_string(), "Access denied (code 1045, SQLSTATE 28000)");

        let err = Error::Server(err);
        assert_eq!(err.server_code(), Some(1045));
        assert_eq!(err.sql_state(), Some("28000"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn fatal_and_retryable_flags() {
        let fatal = Error::fatal(
            "read failed mid-frame",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let timeout = Error::Timeout(TimeoutError {
            kind: TimeoutKind::Read,
            message: "read deadline elapsed".to_string(),
        });
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let exhausted = Error::Pool(PoolError {
            kind: PoolErrorKind::Exhausted,
            message: "no connection within timeout".to_string(),
        });
        assert!(exhausted.is_retryable());
    }

    #[test]
    fn interrupted_query_code() {
        let err = ServerError {
            code: 1317,
            sql_state: "70100".to_string(),
            message: "Query execution was interrupted".to_string(),
        };
        assert!(err.is_query_interrupted());
        assert!(!err.is_duplicate_key());
    }
}
