//! Result-set cursors.
//!
//! A cursor opens by reading the column count of the response. Zero columns
//! means the statement was DML and only the affected-row count and last
//! insert id are available. Otherwise the cursor loads the field
//! descriptors and eagerly fetches the first row so `has_rows()` can answer
//! without exposing it.
//!
//! State machine:
//! `Unopened → {HasRows | Empty | AffectedRowsOnly} → RowLoaded* →
//! Exhausted → Closed`.
//!
//! Inside a row stream only a 0xFE-headed packet can terminate it: a row
//! whose first value is empty starts with 0x00, so the OK header byte is
//! not a usable terminator marker there.

use std::io::{Read, Write};
use std::sync::Arc;

use myna_core::{ColumnInfo, Error, Result, Row, Value};

use crate::codec;
use crate::driver::Driver;
use crate::protocol::{MAX_BLOCK_SIZE, PacketReader, PacketType, server_status};
use crate::types::Field;

/// Cursor position in the result-set state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Response not read yet
    Unopened,
    /// Columns read, first row fetched and held back
    HasRows,
    /// Columns read, zero rows
    Empty,
    /// DML response: affected rows + last insert id only
    AffectedRowsOnly,
    /// A row is loaded and readable
    RowLoaded,
    /// Terminator packet consumed
    Exhausted,
    /// Cursor closed; the wire is resynchronized
    Closed,
}

/// How rows are materialized and accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Materialize a full row per advance; columns readable in any order
    #[default]
    Buffered,
    /// Decode columns on demand, strictly left to right; reading column
    /// `i` skips unread columns before it without materializing them
    Sequential,
    /// Buffered, plus every row is cached so the cursor can be restarted
    /// without a server round trip
    Cached,
}

/// Row encoding on the wire: text protocol or prepared/binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    Text,
    Binary,
}

/// A raw row held for sequential decoding.
#[derive(Debug)]
struct RawRow {
    data: Vec<u8>,
    /// Offset of the next undecoded column's bytes
    offset: usize,
    /// Index of the next column the offset points at
    cursor: usize,
    /// Per-column read flags
    read: Vec<bool>,
    /// Binary rows: the row's null bitmap (columns offset by 2 bits)
    null_bits: Vec<u8>,
}

/// A streaming cursor over one statement's response, bound to the driver
/// that produced it.
pub struct ResultSet<'a, S: Read + Write> {
    driver: &'a mut Driver<S>,
    format: RowFormat,
    mode: AccessMode,
    state: CursorState,
    fields: Vec<Field>,
    column_info: Option<Arc<ColumnInfo>>,
    /// First row fetched at open, not yet surfaced
    pending: Option<Vec<u8>>,
    /// Current row, materialized (buffered/cached modes)
    current: Option<Row>,
    /// Current row, raw (sequential mode)
    raw: Option<RawRow>,
    /// Rows cached for restart (cached mode)
    cache: Vec<Row>,
    /// When replaying from cache: index of the next cached row
    replay: Option<usize>,
    affected_rows: u64,
    last_insert_id: u64,
    more_results: bool,
    rows_read: u64,
    values_skipped: u64,
}

impl<'a, S: Read + Write> ResultSet<'a, S> {
    pub(crate) fn open(
        driver: &'a mut Driver<S>,
        format: RowFormat,
        mode: AccessMode,
    ) -> Result<Self> {
        let mut rs = Self {
            driver,
            format,
            mode,
            state: CursorState::Unopened,
            fields: Vec::new(),
            column_info: None,
            pending: None,
            current: None,
            raw: None,
            cache: Vec::new(),
            replay: None,
            affected_rows: 0,
            last_insert_id: 0,
            more_results: false,
            rows_read: 0,
            values_skipped: 0,
        };
        let header = rs.read_header();
        rs.driver.end_command();
        header.map(|()| rs)
    }

    fn read_header(&mut self) -> Result<()> {
        let payload = self.driver.recv()?;
        let first = *payload
            .first()
            .ok_or_else(|| Error::protocol("empty response packet"))?;
        match PacketType::from_first_byte(first, payload.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload).parse_ok_packet()?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.more_results = ok.more_results();
                self.driver.note_ok(&ok);
                self.state = CursorState::AffectedRowsOnly;
                Ok(())
            }
            PacketType::LocalInfile => Err(Error::protocol("LOCAL INFILE is not supported")),
            _ => {
                let count = PacketReader::new(&payload)
                    .read_lenenc_int()?
                    .ok_or_else(|| Error::protocol("NULL column count"))?;
                #[allow(clippy::cast_possible_truncation)]
                self.read_columns(count as usize)?;
                self.fetch_first_row()
            }
        }
    }

    fn read_columns(&mut self, count: usize) -> Result<()> {
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.driver.recv()?;
            fields.push(Field::parse(&payload)?);
        }
        if !self.driver.deprecate_eof() {
            let payload = self.driver.recv()?;
            if payload.first() == Some(&0xFE) {
                let eof = PacketReader::new(&payload).parse_eof_packet()?;
                self.driver.note_eof(&eof);
            }
        }
        let names = fields.iter().map(|f| f.name.clone()).collect();
        self.column_info = Some(Arc::new(ColumnInfo::new(names)));
        self.fields = fields;
        Ok(())
    }

    /// Fetch the first row eagerly so `has_rows` is answerable; the row is
    /// held back until the first `advance`.
    fn fetch_first_row(&mut self) -> Result<()> {
        let payload = self.driver.recv()?;
        if self.consume_terminator(&payload)? {
            self.state = CursorState::Empty;
        } else {
            self.pending = Some(payload);
            self.state = CursorState::HasRows;
        }
        Ok(())
    }

    /// Check whether a packet terminates the row stream and record its
    /// status flags if so.
    fn consume_terminator(&mut self, payload: &[u8]) -> Result<bool> {
        if payload.first() != Some(&0xFE) || payload.len() >= MAX_BLOCK_SIZE {
            return Ok(false);
        }
        if self.driver.deprecate_eof() && payload.len() >= 7 {
            let ok = PacketReader::new(payload).parse_ok_packet()?;
            self.more_results = ok.more_results();
            self.driver.note_ok(&ok);
        } else {
            let eof = PacketReader::new(payload).parse_eof_packet()?;
            self.more_results =
                eof.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0;
            self.driver.note_eof(&eof);
        }
        Ok(true)
    }

    /// Column descriptors. Empty for DML responses.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Current cursor state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether the statement produced at least one row.
    pub fn has_rows(&self) -> bool {
        matches!(self.state, CursorState::HasRows | CursorState::RowLoaded)
            || !self.cache.is_empty()
    }

    /// Affected-row count (DML responses).
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Last insert id (DML responses).
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Whether another result set follows this one.
    pub fn more_results(&self) -> bool {
        self.more_results
    }

    /// Rows surfaced so far, including replayed cached rows.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Values skipped without materialization (sequential mode).
    pub fn values_skipped(&self) -> u64 {
        self.values_skipped
    }

    /// Advance to the next row. Returns `false` once the rows are
    /// exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed => Err(Error::usage("advance on a closed result set")),
            CursorState::Empty | CursorState::AffectedRowsOnly => Ok(false),
            CursorState::HasRows => {
                let payload = self.pending.take().expect("pending row in HasRows");
                self.load_row(payload)?;
                Ok(true)
            }
            CursorState::RowLoaded => {
                if self.replay.is_some() {
                    return self.advance_replay();
                }
                // A sequential row must be walked to its end before the
                // next packet boundary is known.
                if self.mode == AccessMode::Sequential {
                    self.finish_raw_row()?;
                }
                let payload = self.driver.recv()?;
                if self.consume_terminator(&payload)? {
                    self.state = CursorState::Exhausted;
                    self.current = None;
                    self.raw = None;
                    Ok(false)
                } else {
                    self.load_row(payload)?;
                    Ok(true)
                }
            }
            CursorState::Exhausted => {
                if self.replay.is_some() {
                    return self.advance_replay();
                }
                Ok(false)
            }
            CursorState::Unopened => Err(Error::protocol("cursor advanced before open")),
        }
    }

    /// Surface the next cached row while replaying after a `rewind`.
    fn advance_replay(&mut self) -> Result<bool> {
        let index = self.replay.expect("replay index present");
        if index < self.cache.len() {
            self.current = Some(self.cache[index].clone());
            self.replay = Some(index + 1);
            self.rows_read += 1;
            self.state = CursorState::RowLoaded;
            Ok(true)
        } else {
            self.replay = None;
            self.current = None;
            self.state = CursorState::Exhausted;
            Ok(false)
        }
    }

    fn load_row(&mut self, payload: Vec<u8>) -> Result<()> {
        self.rows_read += 1;
        if self.mode == AccessMode::Sequential {
            self.raw = Some(self.begin_raw_row(payload)?);
        } else {
            let row = self.materialize_row(&payload)?;
            if self.mode == AccessMode::Cached {
                self.cache.push(row.clone());
            }
            self.current = Some(row);
        }
        self.state = CursorState::RowLoaded;
        Ok(())
    }

    fn materialize_row(&mut self, payload: &[u8]) -> Result<Row> {
        let columns = self
            .column_info
            .as_ref()
            .expect("columns read before rows")
            .clone();
        let mut values = Vec::with_capacity(self.fields.len());
        let mut reader = PacketReader::new(payload);
        match self.format {
            RowFormat::Text => {
                for field in &mut self.fields {
                    match reader.read_lenenc_bytes()? {
                        None => values.push(Value::Null),
                        Some(data) => {
                            let data = data.to_vec();
                            values.push(codec::decode_text(field, &data)?);
                        }
                    }
                }
            }
            RowFormat::Binary => {
                reader.skip(1)?; // 0x00 row header
                let bitmap_len = (self.fields.len() + 7 + 2) / 8;
                let null_bits = reader.read_bytes(bitmap_len)?.to_vec();
                for (i, field) in self.fields.iter_mut().enumerate() {
                    if null_bit(&null_bits, i) {
                        values.push(Value::Null);
                    } else {
                        values.push(codec::decode_binary(&mut reader, field, None)?);
                    }
                }
            }
        }
        Ok(Row::with_columns(columns, values))
    }

    fn begin_raw_row(&mut self, payload: Vec<u8>) -> Result<RawRow> {
        let (offset, null_bits) = match self.format {
            RowFormat::Text => (0, Vec::new()),
            RowFormat::Binary => {
                let bitmap_len = (self.fields.len() + 7 + 2) / 8;
                if payload.len() < 1 + bitmap_len {
                    return Err(Error::protocol("binary row shorter than its null bitmap"));
                }
                (1 + bitmap_len, payload[1..1 + bitmap_len].to_vec())
            }
        };
        Ok(RawRow {
            data: payload,
            offset,
            cursor: 0,
            read: vec![false; self.fields.len()],
            null_bits,
        })
    }

    /// The materialized current row (buffered and cached modes).
    pub fn current_row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Read column `index` of the current row.
    ///
    /// In sequential mode columns must be read left to right: reading
    /// column `i` implicitly skips unread columns before it, and reading a
    /// column at or before the cursor again is a usage error. Buffered and
    /// cached modes allow any order and repeats.
    pub fn get_value(&mut self, index: usize) -> Result<Value> {
        if self.state != CursorState::RowLoaded {
            return Err(Error::usage("no row is loaded"));
        }
        if index >= self.fields.len() {
            return Err(Error::usage(format!(
                "column index {} out of range ({} columns)",
                index,
                self.fields.len()
            )));
        }
        match self.mode {
            AccessMode::Sequential => {
                let mut raw = self.raw.take().expect("raw row in sequential mode");
                let result = self.read_sequential(&mut raw, index);
                self.raw = Some(raw);
                result
            }
            AccessMode::Buffered | AccessMode::Cached => Ok(self
                .current
                .as_ref()
                .and_then(|row| row.get(index))
                .cloned()
                .unwrap_or(Value::Null)),
        }
    }

    fn read_sequential(&mut self, raw: &mut RawRow, index: usize) -> Result<Value> {
        if index < raw.cursor || raw.read[index] {
            return Err(Error::usage(format!(
                "sequential access must move forward; column {index} was already passed"
            )));
        }

        let mut reader = PacketReader::new(&raw.data);
        reader.skip(raw.offset)?;

        // Skip unread columns before the requested one without
        // materializing them. A malformed value here aborts the row: the
        // column boundaries can no longer be trusted.
        for i in raw.cursor..index {
            match self.format {
                RowFormat::Text => codec::skip_text(&mut reader)?,
                RowFormat::Binary => {
                    if !null_bit(&raw.null_bits, i) {
                        codec::skip_binary(&mut reader, &self.fields[i])?;
                    }
                }
            }
            self.values_skipped += 1;
        }

        let field = &mut self.fields[index];
        let value = match self.format {
            RowFormat::Text => match reader.read_lenenc_bytes()? {
                None => Value::Null,
                Some(data) => {
                    let data = data.to_vec();
                    codec::decode_text(field, &data)?
                }
            },
            RowFormat::Binary => {
                if null_bit(&raw.null_bits, index) {
                    Value::Null
                } else {
                    codec::decode_binary(&mut reader, field, None)?
                }
            }
        };

        raw.offset = raw.data.len() - reader.remaining();
        raw.cursor = index + 1;
        raw.read[index] = true;
        Ok(value)
    }

    /// Walk the rest of the current raw row so the stream sits at the next
    /// packet boundary.
    fn finish_raw_row(&mut self) -> Result<()> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        let mut reader = PacketReader::new(&raw.data);
        reader.skip(raw.offset)?;
        for i in raw.cursor..self.fields.len() {
            match self.format {
                RowFormat::Text => codec::skip_text(&mut reader)?,
                RowFormat::Binary => {
                    if !null_bit(&raw.null_bits, i) {
                        codec::skip_binary(&mut reader, &self.fields[i])?;
                    }
                }
            }
            self.values_skipped += 1;
        }
        Ok(())
    }

    /// Restart a cached cursor from its first row. Counters keep
    /// accumulating across restarts.
    pub fn rewind(&mut self) -> Result<()> {
        if self.mode != AccessMode::Cached {
            return Err(Error::usage("rewind requires the cached access mode"));
        }
        if self.state != CursorState::Exhausted {
            return Err(Error::usage("rewind before the row stream is exhausted"));
        }
        self.replay = Some(0);
        self.current = None;
        Ok(())
    }

    /// Move to the next result set of a multi-statement response.
    ///
    /// Returns `false` when no further result set exists.
    pub fn next_result(&mut self) -> Result<bool> {
        if !matches!(
            self.state,
            CursorState::Exhausted | CursorState::Empty | CursorState::AffectedRowsOnly
        ) {
            return Err(Error::usage(
                "next_result before the current rows are exhausted",
            ));
        }
        if !self.more_results {
            return Ok(false);
        }
        self.fields.clear();
        self.column_info = None;
        self.pending = None;
        self.current = None;
        self.raw = None;
        self.cache.clear();
        self.replay = None;
        self.more_results = false;
        self.state = CursorState::Unopened;
        self.read_header()?;
        Ok(true)
    }

    /// Close the cursor, draining any unread packets so the framing stays
    /// synchronized for the next command. I/O errors during the drain are
    /// swallowed — the goal is resynchronization, not correctness of this
    /// call.
    pub fn close(mut self) -> Result<()> {
        self.drain();
        Ok(())
    }

    fn drain(&mut self) {
        // Replayed rows come from the cache; the wire is already past the
        // terminator, so only live streaming states need draining.
        let streaming = self.replay.is_none()
            && matches!(self.state, CursorState::HasRows | CursorState::RowLoaded);
        if streaming || self.more_results {
            self.driver.drain_results(self.more_results && !streaming);
        }
        self.state = CursorState::Closed;
    }
}

impl<S: Read + Write> std::fmt::Debug for ResultSet<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("format", &self.format)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("affected_rows", &self.affected_rows)
            .field("last_insert_id", &self.last_insert_id)
            .field("more_results", &self.more_results)
            .field("rows_read", &self.rows_read)
            .field("values_skipped", &self.values_skipped)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> Drop for ResultSet<'_, S> {
    fn drop(&mut self) {
        if self.state != CursorState::Closed {
            self.drain();
        }
    }
}

fn null_bit(bitmap: &[u8], column: usize) -> bool {
    let bit = column + 2;
    bitmap
        .get(bit / 8)
        .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}
