//! The driver: one physical connection and its session state.
//!
//! A `Driver` owns the framed transport, the negotiated session parameters
//! from the handshake collaborator, and the caches that belong to a single
//! connection. It is single-owner: exactly one caller holds it at a time,
//! and only one result stream can be active until that stream is closed
//! (the borrow on the returned `ResultSet` enforces this).

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use myna_core::{Error, Result, TimeoutError, TimeoutKind, Value};

use crate::config::{DriverConfig, SessionHandshake};
use crate::procedures::{ParamDirection, ProcParam, ProcedureCache, StoredProcedure, signature};
use crate::protocol::{
    Command, PacketReader, PacketStream, Transport, capabilities, prepared, server_status,
    writer::command_payload,
};
use crate::resultset::{AccessMode, ResultSet, RowFormat};
use crate::statement::{Params, PreparedStatement, coalesce_batch, render_text};
use crate::types::{Field, TypeCode};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Ready for the next command
    Ready,
    /// A fatal error or mid-response timeout desynchronized the stream;
    /// the connection must be discarded, never pooled
    Failed,
    /// Closed by the caller
    Closed,
}

/// Opens a short-lived side connection to kill a query on the server.
///
/// Cancellation is out-of-band: the in-flight read is not interrupted
/// directly. The handshake collaborator supplies the implementation since
/// opening the side connection requires authentication.
pub trait CancelConnector: Send + Sync {
    /// Issue `KILL QUERY <connection_id>` over a side connection.
    fn kill_query(&self, connection_id: u32) -> Result<()>;
}

impl<F> CancelConnector for F
where
    F: Fn(u32) -> Result<()> + Send + Sync,
{
    fn kill_query(&self, connection_id: u32) -> Result<()> {
        self(connection_id)
    }
}

/// Cancels the query running on another thread's driver.
pub struct CancelHandle {
    connection_id: u32,
    connector: Option<Arc<dyn CancelConnector>>,
    socket: Transport,
}

impl CancelHandle {
    /// Kill the query server-side, then shorten the stalled connection's
    /// read deadline so its blocked read unblocks with an
    /// interrupted-query error.
    pub fn cancel(&self) -> Result<()> {
        if let Some(connector) = &self.connector {
            if let Err(err) = connector.kill_query(self.connection_id) {
                tracing::warn!(
                    conn_id = self.connection_id,
                    error = %err,
                    "server-side kill failed during cancel"
                );
            }
        }
        self.socket
            .set_read_timeout(Some(Duration::from_millis(50)))?;
        Ok(())
    }
}

type DeadlineFn = Box<dyn Fn(Option<Duration>) -> std::io::Result<()> + Send>;

/// One physical MySQL connection.
pub struct Driver<S: Read + Write = Transport> {
    stream: PacketStream<S>,
    state: DriverState,
    handshake: SessionHandshake,
    config: DriverConfig,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    cancel: Option<Arc<dyn CancelConnector>>,
    /// Adjusts the socket read deadline, when the stream supports one.
    deadline: Option<DeadlineFn>,
    stmt_cache: VecDeque<(String, PreparedStatement)>,
    proc_cache: Arc<ProcedureCache>,
}

impl<S: Read + Write> std::fmt::Debug for Driver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("state", &self.state)
            .field("connection_id", &self.handshake.connection_id)
            .field("server_version", &self.handshake.server_version)
            .finish_non_exhaustive()
    }
}

impl Driver<Transport> {
    /// Build a driver over a ready TCP or Unix-socket transport, applying
    /// the configured socket deadlines.
    pub fn from_transport(
        transport: Transport,
        handshake: SessionHandshake,
        config: DriverConfig,
    ) -> Result<Self> {
        transport.set_read_timeout(config.read_timeout)?;
        transport.set_write_timeout(config.write_timeout)?;
        let control = transport.try_clone()?;
        let mut driver = Self::from_stream(transport, handshake, config);
        driver.deadline = Some(Box::new(move |t| control.set_read_timeout(t)));
        Ok(driver)
    }

    /// A handle another thread can use to cancel this driver's running
    /// query out-of-band.
    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        Ok(CancelHandle {
            connection_id: self.handshake.connection_id,
            connector: self.cancel.clone(),
            socket: self.stream.get_ref().try_clone()?,
        })
    }
}

impl<S: Read + Write> Driver<S> {
    /// Build a driver over any blocking stream. Timeout features require a
    /// transport with socket deadlines; see `from_transport`.
    pub fn from_stream(stream: S, handshake: SessionHandshake, config: DriverConfig) -> Self {
        let proc_cache = Arc::new(ProcedureCache::new(config.procedure_cache_size));
        Self {
            stream: PacketStream::with_max_block_size(stream, handshake.max_block_size),
            state: DriverState::Ready,
            handshake,
            config,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            cancel: None,
            deadline: None,
            stmt_cache: VecDeque::new(),
            proc_cache,
        }
    }

    /// Install the side-connection opener used for kill-query.
    pub fn set_cancel_connector(&mut self, connector: Arc<dyn CancelConnector>) {
        self.cancel = Some(connector);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Whether this connection must be discarded rather than pooled.
    pub fn is_broken(&self) -> bool {
        self.state != DriverState::Ready || self.stream.is_poisoned()
    }

    /// Server-assigned connection id.
    pub fn connection_id(&self) -> u32 {
        self.handshake.connection_id
    }

    /// Server version string from the handshake.
    pub fn server_version(&self) -> &str {
        &self.handshake.server_version
    }

    /// Affected-row count of the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Last insert id of the last statement.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Warning count of the last statement.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Whether the session is inside an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    pub(crate) fn deprecate_eof(&self) -> bool {
        self.handshake.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    fn multi_statements(&self) -> bool {
        self.handshake.capabilities & capabilities::CLIENT_MULTI_STATEMENTS != 0
    }

    pub(crate) fn note_ok(&mut self, ok: &crate::protocol::OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
    }

    pub(crate) fn note_eof(&mut self, eof: &crate::protocol::EofPacket) {
        self.status_flags = eof.status_flags;
        self.warnings = eof.warnings;
    }

    fn check_ready(&self) -> Result<()> {
        match self.state {
            DriverState::Ready => Ok(()),
            DriverState::Failed => Err(Error::protocol(
                "connection failed earlier and must be discarded",
            )),
            DriverState::Closed => Err(myna_core::ConnectionError {
                kind: myna_core::ConnectionErrorKind::Closed,
                message: "connection is closed".to_string(),
                source: None,
            }
            .into()),
        }
    }

    fn begin_command(&mut self, payload: &[u8]) -> Result<()> {
        self.check_ready()?;
        if let (Some(deadline), Some(set)) = (self.config.command_timeout, &self.deadline) {
            set(Some(deadline)).map_err(Error::Io)?;
        }
        self.stream.reset_sequence();
        self.send(payload)
    }

    pub(crate) fn end_command(&mut self) {
        if let (Some(_), Some(set)) = (self.config.command_timeout, &self.deadline) {
            if let Err(err) = set(self.config.read_timeout) {
                tracing::warn!(error = %err, "failed to restore read deadline");
            }
        }
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self.stream.send(payload) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.classify(err)),
        }
    }

    pub(crate) fn recv(&mut self) -> Result<Vec<u8>> {
        match self.stream.receive() {
            Ok(payload) => Ok(payload),
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Classify a transport error against the session: timeouts trigger the
    /// best-effort server-side kill and mark the stream desynchronized;
    /// fatal errors mark the connection for discard. Server error packets
    /// leave the connection usable.
    fn classify(&mut self, err: Error) -> Error {
        match err {
            Error::Timeout(t) => {
                if let Some(cancel) = &self.cancel {
                    if let Err(kill_err) = cancel.kill_query(self.handshake.connection_id) {
                        tracing::warn!(
                            conn_id = self.handshake.connection_id,
                            error = %kill_err,
                            "best-effort kill-query failed after timeout"
                        );
                    }
                }
                // The response is stranded mid-stream; framing can no
                // longer be trusted.
                self.state = DriverState::Failed;
                if self.config.command_timeout.is_some() {
                    Error::Timeout(TimeoutError {
                        kind: TimeoutKind::Command,
                        message: t.message,
                    })
                } else {
                    Error::Timeout(t)
                }
            }
            err if err.is_fatal() => {
                self.state = DriverState::Failed;
                err
            }
            err => err,
        }
    }

    // -----------------------------------------------------------------
    // Text protocol
    // -----------------------------------------------------------------

    /// Run a statement through the text protocol and open a cursor over
    /// its response.
    pub fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet<'_, S>> {
        self.query_with(sql, params, AccessMode::default())
    }

    /// `query` with an explicit row access mode.
    pub fn query_with(
        &mut self,
        sql: &str,
        params: &Params,
        mode: AccessMode,
    ) -> Result<ResultSet<'_, S>> {
        let rendered = render_text(sql, params)?;
        tracing::trace!(sql = %rendered, "text query");
        self.begin_command(&command_payload(Command::Query, rendered.as_bytes()))?;
        ResultSet::open(self, RowFormat::Text, mode)
    }

    /// Run a statement and return its affected-row count. Any rows the
    /// statement produces are read and discarded.
    pub fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        let mut rs = self.query(sql, params)?;
        let mut affected = rs.affected_rows();
        loop {
            while rs.advance()? {}
            if !rs.next_result()? {
                break;
            }
            affected += rs.affected_rows();
        }
        rs.close()?;
        Ok(affected)
    }

    /// Run one statement per parameter set, coalescing into as few packets
    /// as fit under the server's max packet size. Simple INSERTs fold into
    /// multi-row VALUES lists. Returns the total affected-row count.
    pub fn execute_batch(&mut self, sql: &str, param_sets: &[Params]) -> Result<u64> {
        let mut rendered = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            rendered.push(render_text(sql, params)?);
        }
        let packets = if self.multi_statements() {
            coalesce_batch(&rendered, self.config.max_packet_size)
        } else {
            rendered
        };

        let mut total = 0;
        for packet in packets {
            total += self.execute(&packet, &Params::None)?;
        }
        Ok(total)
    }

    // -----------------------------------------------------------------
    // Prepared / binary protocol
    // -----------------------------------------------------------------

    /// Prepare a statement server-side.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.begin_command(&prepared::prepare_payload(sql))?;
        let result = self.read_prepare_response(sql);
        self.end_command();
        result
    }

    fn read_prepare_response(&mut self, sql: &str) -> Result<PreparedStatement> {
        let payload = self.recv()?;
        let ok = prepared::parse_prepare_ok(&payload)?;
        let params = self.read_field_block(ok.num_params as usize)?;
        let columns = self.read_field_block(ok.num_columns as usize)?;
        tracing::debug!(
            statement_id = ok.statement_id,
            params = ok.num_params,
            columns = ok.num_columns,
            "prepared statement"
        );
        Ok(PreparedStatement::new(
            sql.to_string(),
            ok.statement_id,
            params,
            columns,
        ))
    }

    fn read_field_block(&mut self, count: usize) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(count);
        if count == 0 {
            return Ok(fields);
        }
        for _ in 0..count {
            let payload = self.recv()?;
            fields.push(Field::parse(&payload)?);
        }
        if !self.deprecate_eof() {
            let _eof = self.recv()?;
        }
        Ok(fields)
    }

    /// Execute a prepared statement, rewriting only the null bitmap and
    /// value bytes of its cached execute template.
    pub fn execute_prepared(
        &mut self,
        stmt: &mut PreparedStatement,
        params: &[Value],
    ) -> Result<ResultSet<'_, S>> {
        self.execute_prepared_with(stmt, params, AccessMode::default())
    }

    /// `execute_prepared` with an explicit row access mode.
    pub fn execute_prepared_with(
        &mut self,
        stmt: &mut PreparedStatement,
        params: &[Value],
        mode: AccessMode,
    ) -> Result<ResultSet<'_, S>> {
        if !stmt.is_open() {
            return Err(Error::usage("statement is not prepared"));
        }
        let payload = stmt.template_mut().render(params)?;
        self.begin_command(&payload)?;
        ResultSet::open(self, RowFormat::Binary, mode)
    }

    /// Deallocate the server-side statement handle and reset the
    /// statement id to 0. The server sends no reply.
    pub fn close_statement(&mut self, stmt: &mut PreparedStatement) -> Result<()> {
        if !stmt.is_open() {
            return Ok(());
        }
        self.check_ready()?;
        self.stream.reset_sequence();
        self.send(&prepared::close_payload(stmt.statement_id()))?;
        stmt.mark_closed();
        Ok(())
    }

    /// Reset the statement's accumulated server-side state.
    pub fn reset_statement(&mut self, stmt: &mut PreparedStatement) -> Result<()> {
        if !stmt.is_open() {
            return Err(Error::usage("statement is not prepared"));
        }
        self.begin_command(&prepared::reset_payload(stmt.statement_id()))?;
        let payload = self.recv()?;
        let ok = PacketReader::new(&payload).parse_ok_packet()?;
        self.note_ok(&ok);
        stmt.template_mut().invalidate_types();
        self.end_command();
        Ok(())
    }

    /// Execute via the driver's bounded prepared-statement cache, keyed by
    /// SQL text. Returns the affected-row count.
    pub fn execute_cached(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut stmt = match self.take_cached(sql) {
            Some(stmt) => stmt,
            None => self.prepare(sql)?,
        };
        let outcome: Result<u64> = (|| {
            let mut rs = self.execute_prepared(&mut stmt, params)?;
            let mut affected = rs.affected_rows();
            loop {
                while rs.advance()? {}
                if !rs.next_result()? {
                    break;
                }
                affected += rs.affected_rows();
            }
            rs.close()?;
            Ok(affected)
        })();
        if outcome.is_ok() || !self.is_broken() {
            self.store_cached(sql, stmt);
        }
        outcome
    }

    fn take_cached(&mut self, sql: &str) -> Option<PreparedStatement> {
        let index = self.stmt_cache.iter().position(|(s, _)| s == sql)?;
        self.stmt_cache.remove(index).map(|(_, stmt)| stmt)
    }

    fn store_cached(&mut self, sql: &str, stmt: PreparedStatement) {
        if !stmt.is_open() {
            return;
        }
        self.stmt_cache.push_back((sql.to_string(), stmt));
        while self.stmt_cache.len() > self.config.statement_cache_size {
            if let Some((_, mut old)) = self.stmt_cache.pop_front() {
                let _ = self.close_statement(&mut old);
            }
        }
    }

    // -----------------------------------------------------------------
    // Session control
    // -----------------------------------------------------------------

    /// Liveness check (COM_PING).
    pub fn ping(&mut self) -> Result<()> {
        self.begin_command(&command_payload(Command::Ping, &[]))?;
        let payload = self.recv()?;
        let ok = PacketReader::new(&payload).parse_ok_packet()?;
        self.note_ok(&ok);
        self.end_command();
        Ok(())
    }

    /// Reset session state without re-authenticating
    /// (COM_RESET_CONNECTION). Drops temp tables, user variables and
    /// prepared statements server-side, so the local statement cache is
    /// emptied too.
    pub fn reset_session(&mut self) -> Result<()> {
        self.begin_command(&command_payload(Command::ResetConnection, &[]))?;
        let payload = self.recv()?;
        let ok = PacketReader::new(&payload).parse_ok_packet()?;
        self.note_ok(&ok);
        self.stmt_cache.clear();
        self.end_command();
        Ok(())
    }

    /// Switch the default database (COM_INIT_DB).
    pub fn select_database(&mut self, database: &str) -> Result<()> {
        self.begin_command(&command_payload(Command::InitDb, database.as_bytes()))?;
        let payload = self.recv()?;
        let ok = PacketReader::new(&payload).parse_ok_packet()?;
        self.note_ok(&ok);
        self.end_command();
        Ok(())
    }

    /// Open a transaction.
    pub fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN", &Params::None).map(|_| ())
    }

    /// Commit the open transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT", &Params::None).map(|_| ())
    }

    /// Roll back the open transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK", &Params::None).map(|_| ())
    }

    /// Kill the query running on another connection. Used by cancel
    /// connectors over their short-lived side connection.
    pub fn kill_query(&mut self, connection_id: u32) -> Result<()> {
        self.execute(&format!("KILL QUERY {connection_id}"), &Params::None)
            .map(|_| ())
    }

    /// Close the connection. Sends a best-effort COM_QUIT.
    pub fn close(&mut self) {
        if self.state == DriverState::Closed {
            return;
        }
        if self.state == DriverState::Ready {
            self.stream.reset_sequence();
            let _ = self.stream.send(&command_payload(Command::Quit, &[]));
        }
        self.state = DriverState::Closed;
        tracing::debug!(conn_id = self.handshake.connection_id, "connection closed");
    }

    // -----------------------------------------------------------------
    // Procedure metadata
    // -----------------------------------------------------------------

    /// Look up procedure metadata: a cache hit reuses the descriptor, a
    /// miss queries the server catalog and populates the cache.
    pub fn procedure_metadata(
        &mut self,
        schema: &str,
        name: &str,
        param_count: usize,
        returns_value: bool,
    ) -> Result<Arc<StoredProcedure>> {
        let sig = signature(schema, name, param_count, returns_value);
        let cache = Arc::clone(&self.proc_cache);
        if let Some(hit) = cache.get(sig) {
            tracing::trace!(procedure = name, "procedure cache hit");
            return Ok(hit);
        }
        tracing::debug!(procedure = name, "procedure cache miss, querying catalog");
        let loaded = self.load_procedure_metadata(schema, name, returns_value)?;
        Ok(cache.insert(sig, loaded))
    }

    /// Shared per-connection procedure cache (tests inspect its bounds).
    pub fn procedure_cache(&self) -> Arc<ProcedureCache> {
        Arc::clone(&self.proc_cache)
    }

    fn load_procedure_metadata(
        &mut self,
        schema: &str,
        name: &str,
        returns_value: bool,
    ) -> Result<StoredProcedure> {
        let sql = "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, DTD_IDENTIFIER \
                   FROM information_schema.parameters \
                   WHERE SPECIFIC_SCHEMA = ? AND SPECIFIC_NAME = ? \
                   ORDER BY ORDINAL_POSITION";
        let params = Params::positional([Value::Text(schema.to_string()), Value::Text(name.to_string())]);
        let mut parameters = Vec::new();
        let mut rs = self.query(sql, &params)?;
        while rs.advance()? {
            let row = rs.current_row().expect("buffered row");
            let param_name = row
                .get(0)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mode = row.get(1).and_then(Value::as_str).map(str::to_string);
            let data_type = row.get(2).and_then(Value::as_str).unwrap_or_default();
            let dtd = row.get(3).and_then(Value::as_str).unwrap_or_default();
            parameters.push(ProcParam {
                name: param_name,
                direction: ParamDirection::from_catalog(mode.as_deref()),
                type_code: TypeCode::from_catalog_name(data_type),
                unsigned: dtd.to_ascii_lowercase().contains("unsigned"),
            });
        }
        rs.close()?;
        Ok(StoredProcedure {
            schema: schema.to_string(),
            name: name.to_string(),
            returns_value,
            parameters,
        })
    }

    // -----------------------------------------------------------------
    // Drain support
    // -----------------------------------------------------------------

    /// Read and discard packets until the response ends, so the framing is
    /// synchronized for the next command. All errors are swallowed: the
    /// goal is resynchronization, and a fatal transport error already
    /// marks the connection for discard.
    pub(crate) fn drain_results(&mut self, mut at_boundary: bool) {
        loop {
            let Ok(payload) = self.stream.receive_data() else {
                return;
            };
            let Some(&first) = payload.first() else {
                return;
            };
            if at_boundary {
                match first {
                    0xFF => return,
                    0x00 => {
                        let Ok(ok) = PacketReader::new(&payload).parse_ok_packet() else {
                            return;
                        };
                        self.note_ok(&ok);
                        if !ok.more_results() {
                            return;
                        }
                    }
                    _ => {
                        let Ok(Some(count)) = PacketReader::new(&payload).read_lenenc_int()
                        else {
                            return;
                        };
                        for _ in 0..count {
                            if self.stream.receive_data().is_err() {
                                return;
                            }
                        }
                        if !self.deprecate_eof() && self.stream.receive_data().is_err() {
                            return;
                        }
                        at_boundary = false;
                    }
                }
            } else if first == 0xFE && payload.len() < self.stream.max_block_size() {
                let more = if self.deprecate_eof() && payload.len() >= 7 {
                    match PacketReader::new(&payload).parse_ok_packet() {
                        Ok(ok) => {
                            self.note_ok(&ok);
                            ok.more_results()
                        }
                        Err(_) => return,
                    }
                } else {
                    match PacketReader::new(&payload).parse_eof_packet() {
                        Ok(eof) => {
                            self.note_eof(&eof);
                            eof.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
                        }
                        Err(_) => return,
                    }
                };
                if !more {
                    return;
                }
                at_boundary = true;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pool integration
// ---------------------------------------------------------------------------

impl<S: Read + Write + Send + 'static> myna_pool::ManagedConnection for Driver<S> {
    fn ping(&mut self) -> Result<()> {
        Driver::ping(self)
    }

    fn reset(&mut self) -> Result<()> {
        Driver::reset_session(self)
    }

    fn close(&mut self) {
        Driver::close(self);
    }

    fn is_broken(&self) -> bool {
        Driver::is_broken(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_connector_fn_impl() {
        let killed = std::sync::Mutex::new(Vec::new());
        let connector = |id: u32| -> Result<()> {
            killed.lock().unwrap().push(id);
            Ok(())
        };
        connector.kill_query(7).unwrap();
        assert_eq!(*killed.lock().unwrap(), vec![7]);
    }
}
