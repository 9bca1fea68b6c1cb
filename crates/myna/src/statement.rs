//! Text-protocol statement building.
//!
//! The text protocol has no parameter transport: each marker in the SQL is
//! replaced client-side with an escaped literal. The scanner respects
//! string literals, quoted identifiers and comments, so a `?` inside a
//! string is never treated as a marker. One naming convention per
//! statement: positional `?` and named `@name` markers cannot be mixed.

use myna_core::{Error, Result, Value};

use crate::codec::text_literal;
use crate::protocol::prepared::ExecuteTemplate;
use crate::types::Field;

/// Parameters bound to a statement.
#[derive(Debug, Clone, Default)]
pub enum Params {
    /// No parameters
    #[default]
    None,
    /// Bound by position, matched to `?` markers in order
    Positional(Vec<Value>),
    /// Bound by name, matched to `@name` markers
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Positional parameters from anything value-convertible.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Named parameters.
    pub fn named<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }

    fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(v) => v.is_empty(),
            Params::Named(v) => v.is_empty(),
        }
    }
}

/// One parameter marker found in a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Byte range of the marker in the SQL text
    pub start: usize,
    pub end: usize,
    /// `None` for `?`, the name for `@name`
    pub name: Option<String>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Scan a statement for parameter markers.
///
/// Rejects statements mixing `?` and `@name` markers.
pub fn scan_markers(sql: &str) -> Result<Vec<Marker>> {
    let bytes = sql.as_bytes();
    let mut markers = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && quote != b'`' {
                        i += 2;
                    } else if bytes[i] == quote {
                        // doubled quote is an escape, not a terminator
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b'?' => {
                markers.push(Marker {
                    start: i,
                    end: i + 1,
                    name: None,
                });
                i += 1;
            }
            b'@' => {
                // @@system_variable is not a marker
                if bytes.get(i + 1) == Some(&b'@') {
                    i += 2;
                    while i < bytes.len() && is_ident_char(bytes[i] as char) {
                        i += 1;
                    }
                    continue;
                }
                let start = i;
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                if i > name_start {
                    markers.push(Marker {
                        start,
                        end: i,
                        name: Some(sql[name_start..i].to_string()),
                    });
                }
            }
            _ => i += 1,
        }
    }

    let named = markers.iter().filter(|m| m.name.is_some()).count();
    if named != 0 && named != markers.len() {
        return Err(Error::usage(
            "cannot mix positional (?) and named (@name) parameter markers in one statement",
        ));
    }

    Ok(markers)
}

/// Substitute each marker with its serialized literal.
pub fn render_text(sql: &str, params: &Params) -> Result<String> {
    let markers = scan_markers(sql)?;
    if markers.is_empty() {
        if !params.is_empty() {
            return Err(Error::usage("parameters bound but no markers in statement"));
        }
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len() + markers.len() * 16);
    let mut pos = 0;
    for (index, marker) in markers.iter().enumerate() {
        out.push_str(&sql[pos..marker.start]);
        let value = resolve(params, index, marker)?;
        out.push_str(&text_literal(value));
        pos = marker.end;
    }
    out.push_str(&sql[pos..]);
    Ok(out)
}

fn resolve<'p>(params: &'p Params, index: usize, marker: &Marker) -> Result<&'p Value> {
    match (&marker.name, params) {
        (None, Params::Positional(values)) => values.get(index).ok_or_else(|| {
            Error::usage(format!(
                "statement has {} markers but only {} parameters bound",
                index + 1,
                values.len()
            ))
        }),
        (Some(name), Params::Named(pairs)) => pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::usage(format!("no parameter bound for marker @{name}"))),
        (None, Params::Named(_)) => Err(Error::usage(
            "positional marker with named parameters bound",
        )),
        (Some(name), Params::Positional(_)) => Err(Error::usage(format!(
            "named marker @{name} with positional parameters bound"
        ))),
        (_, Params::None) => Err(Error::usage("statement has markers but no parameters bound")),
    }
}

// ---------------------------------------------------------------------------
// Batch coalescing
// ---------------------------------------------------------------------------

/// Locate the top-level `VALUES` tuple of a simple single-table INSERT.
///
/// Returns the statement prefix ending right after `VALUES` and the
/// parenthesized tuple, or `None` when the statement is not foldable
/// (multiple tuples, trailing clauses like `ON DUPLICATE KEY`, subqueries).
fn split_simple_insert(stmt: &str) -> Option<(&str, &str)> {
    let head = stmt.trim_start().as_bytes();
    if head.len() < 7 || !head[..7].eq_ignore_ascii_case(b"insert ") {
        return None;
    }

    let bytes = stmt.as_bytes();
    let mut i = 0;
    let mut values_end = None;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && quote != b'`' {
                        i += 2;
                    } else if bytes[i] == quote {
                        i += 1;
                        break;
                    } else {
                        i += 1;
                    }
                }
            }
            b'V' | b'v' if bytes.len() - i >= 6 && bytes[i..i + 6].eq_ignore_ascii_case(b"values") =>
            {
                values_end = Some(i + 6);
                i += 6;
            }
            _ => i += 1,
        }
    }

    let values_end = values_end?;
    let tuple = stmt[values_end..].trim();
    if !tuple.starts_with('(') || !tuple.ends_with(')') {
        return None;
    }
    // The tuple must be one balanced group with nothing after it.
    let mut depth = 0i32;
    let mut in_quote = None::<u8>;
    for (offset, b) in tuple.bytes().enumerate() {
        match in_quote {
            Some(q) => {
                if b == q {
                    in_quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => in_quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 && offset != tuple.len() - 1 {
                        return None;
                    }
                }
                b',' if depth == 0 => return None,
                _ => {}
            },
        }
    }
    if depth != 0 {
        return None;
    }
    Some((&stmt[..values_end], tuple))
}

/// Coalesce rendered statements into as few packets as fit under
/// `max_packet_size` bytes each.
///
/// Consecutive statements sharing a foldable INSERT prefix collapse into a
/// single multi-row `VALUES` list; everything else is joined with `;`.
/// A statement that would push the current packet over the limit starts a
/// new packet.
pub fn coalesce_batch(statements: &[String], max_packet_size: usize) -> Vec<String> {
    let mut packets: Vec<String> = Vec::new();
    let mut current = String::new();
    // Prefix of the INSERT currently being folded into `current`, if any.
    let mut folding: Option<String> = None;

    for stmt in statements {
        let insert = split_simple_insert(stmt);
        let folded = match (&folding, &insert) {
            (Some(prefix), Some((next_prefix, tuple)))
                if prefix.eq_ignore_ascii_case(next_prefix)
                    && current.len() + tuple.len() + 1 <= max_packet_size =>
            {
                current.push(',');
                current.push_str(tuple);
                true
            }
            _ => false,
        };
        if folded {
            continue;
        }

        if current.is_empty() {
            current = stmt.clone();
        } else if current.len() + stmt.len() + 1 <= max_packet_size {
            current.push(';');
            current.push_str(stmt);
        } else {
            packets.push(std::mem::take(&mut current));
            current = stmt.clone();
        }
        folding = insert.map(|(prefix, _)| prefix.to_string());
    }

    if !current.is_empty() {
        packets.push(current);
    }
    packets
}

// ---------------------------------------------------------------------------
// Prepared statement handle
// ---------------------------------------------------------------------------

/// A statement prepared on the server.
///
/// Holds the server-assigned id (0 once closed), the parameter and column
/// descriptors the server sent at prepare time, and the reusable execute
/// template.
#[derive(Debug)]
pub struct PreparedStatement {
    sql: String,
    statement_id: u32,
    params: Vec<Field>,
    columns: Vec<Field>,
    template: ExecuteTemplate,
}

impl PreparedStatement {
    pub(crate) fn new(
        sql: String,
        statement_id: u32,
        params: Vec<Field>,
        columns: Vec<Field>,
    ) -> Self {
        let template = ExecuteTemplate::new(statement_id, params.len());
        Self {
            sql,
            statement_id,
            params,
            columns,
            template,
        }
    }

    /// The SQL this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Server-assigned statement id; 0 means the statement is unprepared
    /// (closed or never prepared).
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    /// Parameter descriptors, in declaration order.
    pub fn param_fields(&self) -> &[Field] {
        &self.params
    }

    /// Result column descriptors.
    pub fn column_fields(&self) -> &[Field] {
        &self.columns
    }

    /// Number of parameters the statement expects.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn template_mut(&mut self) -> &mut ExecuteTemplate {
        &mut self.template
    }

    pub(crate) fn mark_closed(&mut self) {
        self.statement_id = 0;
    }

    /// Whether the server-side handle is still allocated.
    pub fn is_open(&self) -> bool {
        self.statement_id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_positional_markers() {
        let markers = scan_markers("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();
        assert_eq!(markers.len(), 2);
        assert!(markers.iter().all(|m| m.name.is_none()));
    }

    #[test]
    fn scan_named_markers() {
        let markers = scan_markers("UPDATE t SET a = @a WHERE id = @id").unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].name.as_deref(), Some("a"));
        assert_eq!(markers[1].name.as_deref(), Some("id"));
    }

    #[test]
    fn mixing_conventions_is_rejected() {
        let err = scan_markers("SELECT ? FROM t WHERE id = @id").unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn markers_in_strings_and_comments_ignored() {
        let sql = "SELECT '?' AS q, `a?b`, \"@x\" FROM t -- trailing ?\n WHERE a = ? # and @b\n /* @c ? */ AND b = ?";
        let markers = scan_markers(sql).unwrap();
        assert_eq!(markers.len(), 2);
    }

    #[test]
    fn system_variables_are_not_markers() {
        let markers = scan_markers("SELECT @@version, @name").unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].name.as_deref(), Some("name"));
    }

    #[test]
    fn render_positional() {
        let sql = "SELECT * FROM users WHERE id = ? AND name = ?";
        let params = Params::positional([Value::Int32(1), Value::Text("Alice".into())]);
        assert_eq!(
            render_text(sql, &params).unwrap(),
            "SELECT * FROM users WHERE id = 1 AND name = 'Alice'"
        );
    }

    #[test]
    fn render_named() {
        let sql = "UPDATE t SET n = @n WHERE id = @id AND m = @n";
        let params = Params::named([("n", Value::Int32(5)), ("id", Value::Int32(9))]);
        assert_eq!(
            render_text(sql, &params).unwrap(),
            "UPDATE t SET n = 5 WHERE id = 9 AND m = 5"
        );
    }

    #[test]
    fn render_errors() {
        assert!(matches!(
            render_text("SELECT ?", &Params::None).unwrap_err(),
            Error::Usage(_)
        ));
        assert!(matches!(
            render_text("SELECT ?, ?", &Params::positional([Value::Int32(1)])).unwrap_err(),
            Error::Usage(_)
        ));
        assert!(matches!(
            render_text("SELECT @a", &Params::named([("b", Value::Int32(1))])).unwrap_err(),
            Error::Usage(_)
        ));
        assert!(matches!(
            render_text("SELECT 1", &Params::positional([Value::Int32(1)])).unwrap_err(),
            Error::Usage(_)
        ));
    }

    #[test]
    fn simple_insert_detection() {
        let (prefix, tuple) =
            split_simple_insert("INSERT INTO t (a, b) VALUES (1, 'x')").unwrap();
        assert_eq!(prefix, "INSERT INTO t (a, b) VALUES");
        assert_eq!(tuple, "(1, 'x')");

        assert!(split_simple_insert("SELECT 1").is_none());
        assert!(split_simple_insert("INSERT INTO t VALUES (1), (2)").is_none());
        assert!(
            split_simple_insert("INSERT INTO t VALUES (1) ON DUPLICATE KEY UPDATE a = 1")
                .is_none()
        );
    }

    #[test]
    fn batch_folds_inserts() {
        let statements = vec![
            "INSERT INTO t (a) VALUES (1)".to_string(),
            "INSERT INTO t (a) VALUES (2)".to_string(),
            "INSERT INTO t (a) VALUES (3)".to_string(),
        ];
        let packets = coalesce_batch(&statements, 1 << 20);
        assert_eq!(packets, vec!["INSERT INTO t (a) VALUES (1),(2),(3)".to_string()]);
    }

    #[test]
    fn batch_joins_mixed_statements() {
        let statements = vec![
            "UPDATE t SET a = 1".to_string(),
            "DELETE FROM t WHERE a = 2".to_string(),
        ];
        let packets = coalesce_batch(&statements, 1 << 20);
        assert_eq!(
            packets,
            vec!["UPDATE t SET a = 1;DELETE FROM t WHERE a = 2".to_string()]
        );
    }

    #[test]
    fn batch_respects_packet_limit() {
        let statements = vec![
            "INSERT INTO t (a) VALUES (11111111)".to_string(),
            "INSERT INTO t (a) VALUES (22222222)".to_string(),
            "INSERT INTO t (a) VALUES (33333333)".to_string(),
        ];
        // Big enough for one statement plus one folded tuple, not two.
        let limit = statements[0].len() + 12;
        let packets = coalesce_batch(&statements, limit);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], "INSERT INTO t (a) VALUES (11111111),(22222222)");
        assert_eq!(packets[1], "INSERT INTO t (a) VALUES (33333333)");
    }

    #[test]
    fn prepared_statement_lifecycle() {
        let mut stmt = PreparedStatement::new("SELECT ?".to_string(), 3, Vec::new(), Vec::new());
        assert!(stmt.is_open());
        assert_eq!(stmt.statement_id(), 3);
        stmt.mark_closed();
        assert!(!stmt.is_open());
        assert_eq!(stmt.statement_id(), 0);
    }
}
