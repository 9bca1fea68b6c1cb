//! Prepared-statement (binary protocol) packet building.
//!
//! `COM_STMT_PREPARE` sends the SQL once; the server answers with a
//! statement id and parameter/column descriptors. Execution then only ships
//! the statement id plus freshly bound parameters. `ExecuteTemplate` keeps
//! the parts of the execute payload that never change between runs —
//! command byte, statement id, flags, iteration count, and the last
//! type-code section — and rewrites only the null bitmap and the non-null
//! value bytes on each execute.

#![allow(clippy::cast_possible_truncation)]

use myna_core::{Error, Result, Value};

use crate::codec::{binding_type, encode_binary};
use crate::protocol::{Command, PacketReader, PacketWriter};
use crate::types::TypeCode;

/// Response to `COM_STMT_PREPARE`.
#[derive(Debug, Clone, Copy)]
pub struct PrepareOk {
    /// Server-assigned statement id (0 is never assigned)
    pub statement_id: u32,
    /// Number of result columns (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders in the SQL
    pub num_params: u16,
    /// Warnings generated during prepare
    pub warnings: u16,
}

/// Parse a `COM_STMT_PREPARE` OK response.
pub fn parse_prepare_ok(payload: &[u8]) -> Result<PrepareOk> {
    let mut reader = PacketReader::new(payload);
    let status = reader.read_u8()?;
    if status != 0x00 {
        return Err(Error::protocol(format!(
            "unexpected prepare status byte 0x{status:02X}"
        )));
    }
    let statement_id = reader.read_u32_le()?;
    let num_columns = reader.read_u16_le()?;
    let num_params = reader.read_u16_le()?;
    reader.skip(1)?; // reserved
    let warnings = if reader.remaining() >= 2 {
        reader.read_u16_le()?
    } else {
        0
    };
    Ok(PrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Build a `COM_STMT_PREPARE` payload.
pub fn prepare_payload(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql.as_bytes());
    writer.into_bytes()
}

/// Build a `COM_STMT_CLOSE` payload. The server sends no reply.
pub fn close_payload(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Build a `COM_STMT_RESET` payload.
pub fn reset_payload(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtReset as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Reusable `COM_STMT_EXECUTE` payload builder for one prepared statement.
#[derive(Debug, Clone)]
pub struct ExecuteTemplate {
    statement_id: u32,
    param_count: usize,
    /// Command byte, statement id, flags, iteration count. Fixed at prepare.
    prefix: Vec<u8>,
    /// Per-parameter (type code, unsigned) pairs from the previous execute.
    /// Re-sent with the new-params-bound flag only when they change.
    bound_types: Vec<(TypeCode, bool)>,
}

impl ExecuteTemplate {
    /// Build the template for a statement with `param_count` placeholders.
    pub fn new(statement_id: u32, param_count: usize) -> Self {
        let mut prefix = PacketWriter::with_capacity(10);
        prefix.write_u8(Command::StmtExecute as u8);
        prefix.write_u32_le(statement_id);
        prefix.write_u8(0x00); // CURSOR_TYPE_NO_CURSOR
        prefix.write_u32_le(1); // iteration count
        Self {
            statement_id,
            param_count,
            prefix: prefix.into_bytes(),
            bound_types: Vec::new(),
        }
    }

    /// The server-assigned statement id this template executes.
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    /// Number of parameters the statement expects.
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Render an execute payload for one set of bound parameters.
    ///
    /// Only the null bitmap and the non-null value bytes differ between
    /// calls with identical parameter types; the prefix and type section
    /// come from the template.
    pub fn render(&mut self, params: &[Value]) -> Result<Vec<u8>> {
        if params.len() != self.param_count {
            return Err(Error::usage(format!(
                "statement expects {} parameters, {} bound",
                self.param_count,
                params.len()
            )));
        }

        let mut writer = PacketWriter::with_capacity(self.prefix.len() + 16 * params.len());
        writer.write_bytes(&self.prefix);

        if !params.is_empty() {
            // Null bitmap: one bit per parameter, LSB-first.
            let mut bitmap = vec![0u8; params.len().div_ceil(8)];
            for (i, param) in params.iter().enumerate() {
                if param.is_null() {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            writer.write_bytes(&bitmap);

            let types: Vec<(TypeCode, bool)> = params.iter().map(binding_type).collect();
            if types == self.bound_types {
                writer.write_u8(0); // types unchanged, server reuses them
            } else {
                writer.write_u8(1);
                for (code, unsigned) in &types {
                    writer.write_u8(*code as u8);
                    writer.write_u8(if *unsigned { 0x80 } else { 0x00 });
                }
                self.bound_types = types;
            }

            for param in params {
                if !param.is_null() {
                    encode_binary(&mut writer, param);
                }
            }
        }

        Ok(writer.into_bytes())
    }

    /// Forget the cached type section, forcing the next render to re-send
    /// parameter types (used after a statement reset).
    pub fn invalidate_types(&mut self) {
        self.bound_types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prepare_ok_layout() {
        let data = [
            0x00, // status
            0x01, 0x00, 0x00, 0x00, // statement_id = 1
            0x03, 0x00, // num_columns = 3
            0x02, 0x00, // num_params = 2
            0x00, // reserved
            0x00, 0x00, // warnings
        ];
        let ok = parse_prepare_ok(&data).unwrap();
        assert_eq!(ok.statement_id, 1);
        assert_eq!(ok.num_columns, 3);
        assert_eq!(ok.num_params, 2);
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn parse_prepare_ok_rejects_bad_status() {
        assert!(parse_prepare_ok(&[0xFF, 0, 0, 0, 0]).is_err());
        assert!(parse_prepare_ok(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn close_and_reset_payloads() {
        let close = close_payload(42);
        assert_eq!(close.len(), 5);
        assert_eq!(close[0], Command::StmtClose as u8);
        assert_eq!(u32::from_le_bytes([close[1], close[2], close[3], close[4]]), 42);

        let reset = reset_payload(7);
        assert_eq!(reset[0], Command::StmtReset as u8);
    }

    #[test]
    fn render_no_params() {
        let mut template = ExecuteTemplate::new(5, 0);
        let payload = template.render(&[]).unwrap();
        assert_eq!(payload[0], Command::StmtExecute as u8);
        assert_eq!(u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]), 5);
        assert_eq!(payload[5], 0x00);
        assert_eq!(u32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]), 1);
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn render_null_bitmap_and_values() {
        // Execute 1: (42, NULL) — bitmap bit 1 set, only parameter 0 present.
        let mut template = ExecuteTemplate::new(1, 2);
        let payload = template.render(&[Value::Int32(42), Value::Null]).unwrap();
        assert_eq!(payload[10], 0b0000_0010); // null bitmap
        assert_eq!(payload[11], 1); // new params bound
        assert_eq!(payload[12], TypeCode::Long as u8);
        assert_eq!(payload[13], 0x00);
        assert_eq!(payload[14], TypeCode::Null as u8);
        // Value bytes: only the i32
        assert_eq!(&payload[16..], &42i32.to_le_bytes());

        // Execute 2: (7, "x") — bitmap cleared, both values, types re-sent
        // because parameter 1 changed from NULL to a string.
        let payload = template
            .render(&[Value::Int32(7), Value::Text("x".into())])
            .unwrap();
        assert_eq!(payload[10], 0b0000_0000);
        assert_eq!(payload[11], 1);
        assert_eq!(&payload[16..20], &7i32.to_le_bytes());
        assert_eq!(&payload[20..], &[1, b'x']);

        // Execute 3: same shapes as execute 2 — type section omitted.
        let payload = template
            .render(&[Value::Int32(9), Value::Text("yz".into())])
            .unwrap();
        assert_eq!(payload[11], 0); // types reused from the template
        assert_eq!(&payload[12..16], &9i32.to_le_bytes());
        assert_eq!(&payload[16..], &[2, b'y', b'z']);
    }

    #[test]
    fn render_unsigned_flag() {
        let mut template = ExecuteTemplate::new(1, 1);
        let payload = template.render(&[Value::UInt64(u64::MAX)]).unwrap();
        assert_eq!(payload[12], TypeCode::LongLong as u8);
        assert_eq!(payload[13], 0x80);
    }

    #[test]
    fn render_wrong_arity_is_usage_error() {
        let mut template = ExecuteTemplate::new(1, 2);
        let err = template.render(&[Value::Int32(1)]).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }
}
