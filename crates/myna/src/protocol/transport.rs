//! Framed packet transport over a blocking byte stream.
//!
//! `PacketStream` owns the sequence counter and the split/reassemble logic:
//! outgoing payloads are chunked at the max block size with one frame header
//! per chunk and a flush after every frame; incoming frames are concatenated
//! until a chunk shorter than the max block size terminates the message.
//!
//! Failure semantics: a timeout is a distinguishable, potentially retryable
//! condition. Any other I/O failure is fatal — the stream cannot be trusted
//! mid-frame — and poisons the transport so later calls are refused.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use myna_core::{Error, Result, TimeoutError, TimeoutKind};

use crate::config::TransportTarget;
use crate::protocol::{MAX_BLOCK_SIZE, PacketHeader, PacketReader};

/// The physical byte stream under a connection: TCP or a Unix domain
/// socket, selected by configuration at connect time.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Open the physical stream for a target, trying each resolved address
    /// until one connects within the timeout.
    pub fn connect(target: &TransportTarget, timeout: Duration) -> std::io::Result<Self> {
        match target {
            TransportTarget::Tcp { host, port } => {
                let mut last_err = None;
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            stream.set_nodelay(true).ok();
                            return Ok(Transport::Tcp(stream));
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    std::io::Error::new(
                        ErrorKind::InvalidInput,
                        "hostname resolved to no addresses",
                    )
                }))
            }
            #[cfg(unix)]
            TransportTarget::Unix { path } => Ok(Transport::Unix(UnixStream::connect(path)?)),
        }
    }
    /// Set the read deadline on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Transport::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    /// Set the write deadline on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Transport::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    /// Clone the socket handle. The clone shares the open socket, so a
    /// timeout set through it unblocks a read in progress on the original —
    /// the lever the out-of-band cancel path uses.
    pub fn try_clone(&self) -> std::io::Result<Transport> {
        Ok(match self {
            Transport::Tcp(s) => Transport::Tcp(s.try_clone()?),
            #[cfg(unix)]
            Transport::Unix(s) => Transport::Unix(s.try_clone()?),
        })
    }

    /// Shut down both directions of the socket.
    pub fn shutdown(&self) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.shutdown(std::net::Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(s) => s.shutdown(std::net::Shutdown::Both),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Transport::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Transport::Unix(s) => s.flush(),
        }
    }
}

/// Framing layer over a blocking stream.
#[derive(Debug)]
pub struct PacketStream<S> {
    stream: S,
    /// Next sequence number, incremented mod 256 per frame sent or received.
    sequence: u8,
    /// Negotiated max block size; payloads at or above it are split.
    max_block_size: usize,
    /// Set once a non-timeout I/O failure occurs; the stream is then dead.
    poisoned: bool,
    /// The previous read ended in a timeout; allows the bounded
    /// would-block retry on the next read.
    timed_out: bool,
}

impl<S: Read + Write> PacketStream<S> {
    /// Wrap a stream with the protocol-default max block size.
    pub fn new(stream: S) -> Self {
        Self::with_max_block_size(stream, MAX_BLOCK_SIZE)
    }

    /// Wrap a stream with an explicit max block size (tests shrink it to
    /// exercise continuation framing without 16MB payloads).
    pub fn with_max_block_size(stream: S, max_block_size: usize) -> Self {
        Self {
            stream,
            sequence: 0,
            max_block_size,
            poisoned: false,
            timed_out: false,
        }
    }

    /// The negotiated max block size.
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Current sequence counter.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Reset the sequence counter; each new command starts at zero.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Whether a fatal I/O failure has poisoned this stream.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Access the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consume the framing layer, returning the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::protocol(
                "transport poisoned by an earlier I/O failure",
            ));
        }
        Ok(())
    }

    /// Send one logical message, splitting it into frames of at most the
    /// max block size. A payload that is an exact multiple of the block
    /// size is terminated with an empty frame so the receiver can tell the
    /// message ended.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.check_usable()?;
        let mut offset = 0;
        loop {
            let len = (payload.len() - offset).min(self.max_block_size);
            self.send_frame(&payload[offset..offset + len])?;
            offset += len;
            if len < self.max_block_size {
                return Ok(());
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn send_frame(&mut self, chunk: &[u8]) -> Result<()> {
        let header = PacketHeader {
            payload_length: chunk.len() as u32,
            sequence_id: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.write_all(&header.to_bytes())?;
        self.write_all(chunk)?;
        self.stream.flush().map_err(|e| self.classify_write(e))?;
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self.stream.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify_write(e)),
        }
    }

    /// Receive one logical message, reassembling continuation frames.
    ///
    /// If the first payload byte is 0xFF the message is a server error
    /// packet and is raised as `Error::Server` instead of returned.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let payload = self.receive_data()?;
        if payload.first() == Some(&0xFF) {
            let err = PacketReader::new(&payload).parse_err_packet()?;
            return Err(Error::Server(err));
        }
        Ok(payload)
    }

    /// Receive one logical message without raising server error packets.
    /// The drain-on-close path uses this to walk packets it will discard.
    pub fn receive_data(&mut self) -> Result<Vec<u8>> {
        self.check_usable()?;
        let mut payload = Vec::new();
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.read_full(&mut header_buf)?;
            let header = PacketHeader::from_bytes(&header_buf);
            if header.sequence_id != self.sequence {
                self.poisoned = true;
                return Err(Error::protocol(format!(
                    "packet out of order: expected sequence {}, got {}",
                    self.sequence, header.sequence_id
                )));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            self.read_full(&mut payload[start..])?;

            if len < self.max_block_size {
                return Ok(payload);
            }
        }
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        // At most one extra attempt when a spurious would-block follows a
        // timeout; a known platform quirk, kept as a bounded policy.
        let mut retried = false;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.poisoned = true;
                    return Err(Error::fatal(
                        "connection closed by peer mid-frame",
                        std::io::Error::from(ErrorKind::UnexpectedEof),
                    ));
                }
                Ok(n) => {
                    self.timed_out = false;
                    filled += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock && self.timed_out && !retried => {
                    retried = true;
                }
                Err(e) if is_timeout(e.kind()) => {
                    self.timed_out = true;
                    return Err(Error::Timeout(TimeoutError {
                        kind: TimeoutKind::Read,
                        message: format!("read timed out after {filled} of {} bytes", buf.len()),
                    }));
                }
                Err(e) => {
                    self.poisoned = true;
                    return Err(Error::fatal("read failed mid-frame", e));
                }
            }
        }
        Ok(())
    }

    fn classify_write(&mut self, e: std::io::Error) -> Error {
        if is_timeout(e.kind()) {
            Error::Timeout(TimeoutError {
                kind: TimeoutKind::Write,
                message: "write timed out".to_string(),
            })
        } else {
            self.poisoned = true;
            Error::fatal("write failed mid-frame", e)
        }
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// A scripted stream: reads come from `input`, optionally interleaved
    /// with injected errors; writes land in `output`.
    #[derive(Default)]
    struct ScriptedStream {
        input: VecDeque<u8>,
        errors: VecDeque<ErrorKind>,
        output: Vec<u8>,
    }

    impl ScriptedStream {
        fn with_input(input: Vec<u8>) -> Self {
            Self {
                input: input.into(),
                ..Self::default()
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(kind) = self.errors.pop_front() {
                return Err(io::Error::from(kind));
            }
            let n = buf.len().min(self.input.len());
            if n == 0 {
                return Ok(0);
            }
            for slot in buf.iter_mut().take(n) {
                *slot = self.input.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id: seq,
        }
        .to_bytes()
        .to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn send_single_frame() {
        let mut stream = PacketStream::new(ScriptedStream::default());
        stream.send(b"hello").unwrap();
        assert_eq!(stream.get_ref().output, frame(0, b"hello"));
        assert_eq!(stream.sequence(), 1);
    }

    #[test]
    fn send_empty_payload() {
        let mut stream = PacketStream::new(ScriptedStream::default());
        stream.send(b"").unwrap();
        assert_eq!(stream.get_ref().output, frame(0, b""));
    }

    #[test]
    fn send_splits_at_block_size() {
        let mut stream = PacketStream::with_max_block_size(ScriptedStream::default(), 8);
        stream.send(&[0xAA; 20]).unwrap();
        let mut expected = frame(0, &[0xAA; 8]);
        expected.extend_from_slice(&frame(1, &[0xAA; 8]));
        expected.extend_from_slice(&frame(2, &[0xAA; 4]));
        assert_eq!(stream.get_ref().output, expected);
    }

    #[test]
    fn send_exact_multiple_emits_empty_terminator() {
        let mut stream = PacketStream::with_max_block_size(ScriptedStream::default(), 8);
        stream.send(&[0xBB; 16]).unwrap();
        let mut expected = frame(0, &[0xBB; 8]);
        expected.extend_from_slice(&frame(1, &[0xBB; 8]));
        expected.extend_from_slice(&frame(2, b""));
        assert_eq!(stream.get_ref().output, expected);
    }

    #[test]
    fn receive_reassembles_continuations() {
        let mut input = frame(0, &[1; 8]);
        input.extend_from_slice(&frame(1, &[2; 8]));
        input.extend_from_slice(&frame(2, &[3; 3]));
        let mut stream =
            PacketStream::with_max_block_size(ScriptedStream::with_input(input), 8);
        let payload = stream.receive().unwrap();
        let mut expected = vec![1; 8];
        expected.extend_from_slice(&[2; 8]);
        expected.extend_from_slice(&[3; 3]);
        assert_eq!(payload, expected);
        assert_eq!(stream.sequence(), 3);
    }

    #[test]
    fn roundtrip_across_block_boundaries() {
        for len in [0usize, 1, 7, 8, 9, 16, 17, 24] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut sender = PacketStream::with_max_block_size(ScriptedStream::default(), 8);
            sender.send(&payload).unwrap();
            let wire = sender.into_inner().output;

            let mut receiver =
                PacketStream::with_max_block_size(ScriptedStream::with_input(wire), 8);
            assert_eq!(receiver.receive().unwrap(), payload, "len {len}");
        }
    }

    #[test]
    fn error_packet_is_raised() {
        let mut payload = vec![0xFF, 0x15, 0x04, b'#'];
        payload.extend_from_slice(b"28000");
        payload.extend_from_slice(b"Access denied");
        let mut stream = PacketStream::new(ScriptedStream::with_input(frame(0, &payload)));
        match stream.receive().unwrap_err() {
            Error::Server(e) => {
                assert_eq!(e.code, 1045);
                assert_eq!(e.sql_state, "28000");
                assert_eq!(e.message, "Access denied");
            }
            other => panic!("expected server error, got {other}"),
        }
    }

    #[test]
    fn out_of_order_sequence_poisons() {
        let mut stream = PacketStream::new(ScriptedStream::with_input(frame(5, b"x")));
        assert!(matches!(
            stream.receive().unwrap_err(),
            Error::Protocol(_)
        ));
        assert!(stream.is_poisoned());
    }

    #[test]
    fn timeout_is_retryable_not_fatal() {
        let mut inner = ScriptedStream::default();
        inner.errors.push_back(ErrorKind::TimedOut);
        let mut stream = PacketStream::new(inner);
        let err = stream.receive().unwrap_err();
        assert!(err.is_retryable());
        assert!(!stream.is_poisoned());
    }

    #[test]
    fn would_block_after_timeout_retries_once() {
        // First receive times out; the socket then reports a spurious
        // would-block before delivering the frame. The bounded retry eats
        // exactly one of them.
        let mut inner = ScriptedStream::with_input(frame(0, b"ok"));
        inner.errors.push_back(ErrorKind::TimedOut);
        let mut stream = PacketStream::new(inner);
        assert!(stream.receive().unwrap_err().is_retryable());

        stream.stream.errors.push_back(ErrorKind::WouldBlock);
        assert_eq!(stream.receive().unwrap(), b"ok");
    }

    #[test]
    fn second_would_block_is_a_timeout() {
        let mut inner = ScriptedStream::with_input(frame(0, b"ok"));
        inner.errors.push_back(ErrorKind::TimedOut);
        let mut stream = PacketStream::new(inner);
        assert!(stream.receive().unwrap_err().is_retryable());

        stream.stream.errors.push_back(ErrorKind::WouldBlock);
        stream.stream.errors.push_back(ErrorKind::WouldBlock);
        let err = stream.receive().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn io_failure_poisons_stream() {
        let mut inner = ScriptedStream::default();
        inner.errors.push_back(ErrorKind::ConnectionReset);
        let mut stream = PacketStream::new(inner);
        let err = stream.receive().unwrap_err();
        assert!(err.is_fatal());
        assert!(stream.is_poisoned());
        assert!(stream.receive().is_err());
        assert!(stream.send(b"x").is_err());
    }

    #[test]
    fn eof_mid_frame_is_fatal() {
        // Header promises 4 bytes, stream ends after 1.
        let mut input = frame(0, b"a");
        input[0] = 4;
        let mut stream = PacketStream::new(ScriptedStream::with_input(input));
        assert!(stream.receive().unwrap_err().is_fatal());
    }

    #[test]
    fn sequence_continues_across_messages() {
        let mut input = frame(0, b"a");
        input.extend_from_slice(&frame(1, b"b"));
        let mut stream = PacketStream::new(ScriptedStream::with_input(input));
        assert_eq!(stream.receive().unwrap(), b"a");
        assert_eq!(stream.receive().unwrap(), b"b");
        assert_eq!(stream.sequence(), 2);
    }
}
