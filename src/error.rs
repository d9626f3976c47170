//! Error taxonomy: one top-level enum, with nested `#[from]`-convertible
//! sub-errors for the parts of the protocol that carry their own rich
//! context (the server's `ErrorResponse`/`NoticeResponse` fields).

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// I/O failure on the underlying socket. Always marks the connection bad.
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  /// TLS handshake or negotiation failure.
  #[error("tls error: {0}")]
  Tls(String),

  /// A message from the server did not parse, or arrived out of the order
  /// the state machine expected.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// Authentication failed before the connection became usable.
  #[error("authentication error: {0}")]
  Auth(String),

  /// A structured `ErrorResponse` from the server.
  #[error(transparent)]
  Db(#[from] DbError),

  /// The connection is permanently unusable; `Connection::is_bad` was
  /// already `true` before this operation began.
  #[error("connection is closed")]
  Closed,

  /// Bad input from the caller: malformed DSN, too many bind parameters,
  /// COPY attempted outside a transaction, etc. Raised before any bytes
  /// are placed on the wire.
  #[error("{0}")]
  Config(String),

  /// The operation was canceled by the caller's token before the server
  /// responded, or the server reported `query_canceled`.
  #[error("canceled: {0}")]
  Canceled(String),
}

impl Error {
  pub fn protocol(msg: impl Into<String>) -> Self {
    Error::Protocol(msg.into())
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Error::Config(msg.into())
  }

  pub fn auth(msg: impl Into<String>) -> Self {
    Error::Auth(msg.into())
  }

  /// Fatal I/O errors, TLS failures and FATAL/PANIC severity server errors
  /// all collapse to this sentinel for the purposes of the outer pool: the
  /// connection must be discarded rather than reused.
  pub fn is_bad_connection(&self) -> bool {
    match self {
      Error::Io(_) | Error::Tls(_) | Error::Protocol(_) | Error::Closed => true,
      Error::Db(db) => matches!(db.severity, Severity::Fatal | Severity::Panic),
      Error::Auth(_) | Error::Config(_) | Error::Canceled(_) => false,
    }
  }

  /// Operations that never put a byte on the wire (e.g. the initial dial)
  /// are safe for the host to retry; everything else is opaque.
  pub fn is_retriable(&self) -> bool {
    matches!(self, Error::Io(_) | Error::Tls(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Debug,
  Info,
  Log,
  Notice,
  Warning,
  Error,
  Fatal,
  Panic,
}

impl Severity {
  pub fn parse(s: &str) -> Self {
    match s {
      "DEBUG" => Severity::Debug,
      "INFO" => Severity::Info,
      "LOG" => Severity::Log,
      "NOTICE" => Severity::Notice,
      "WARNING" => Severity::Warning,
      "FATAL" => Severity::Fatal,
      "PANIC" => Severity::Panic,
      _ => Severity::Error,
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Severity::Debug => "DEBUG",
      Severity::Info => "INFO",
      Severity::Log => "LOG",
      Severity::Notice => "NOTICE",
      Severity::Warning => "WARNING",
      Severity::Error => "ERROR",
      Severity::Fatal => "FATAL",
      Severity::Panic => "PANIC",
    })
  }
}

/// Fields parsed from a server `ErrorResponse` or `NoticeResponse`.
///
/// https://www.postgresql.org/docs/current/protocol-error-fields.html
#[derive(Debug, Clone, Default)]
pub struct DbError {
  pub severity: Severity,
  pub code: String,
  pub message: String,
  pub detail: Option<String>,
  pub hint: Option<String>,
  pub position: Option<u32>,
  pub internal_position: Option<u32>,
  pub internal_query: Option<String>,
  pub where_: Option<String>,
  pub schema: Option<String>,
  pub table: Option<String>,
  pub column: Option<String>,
  pub data_type: Option<String>,
  pub constraint: Option<String>,
  pub file: Option<String>,
  pub line: Option<String>,
  pub routine: Option<String>,
  /// Attached on propagation so the formatted error can render a caret
  /// over the offending character of the query that caused it.
  pub query: Option<String>,
}

impl Default for Severity {
  fn default() -> Self {
    Severity::Error
  }
}

impl DbError {
  /// Parses the `Byte1`-tagged field list that makes up the body of both
  /// `ErrorResponse` ('E') and `NoticeResponse` ('N').
  pub fn from_fields(fields: &std::collections::BTreeMap<u8, String>) -> Self {
    let get = |k: u8| fields.get(&k).cloned();
    DbError {
      severity: get(b'V').or_else(|| get(b'S')).map(|s| Severity::parse(&s)).unwrap_or_default(),
      code: get(b'C').unwrap_or_default(),
      message: get(b'M').unwrap_or_default(),
      detail: get(b'D'),
      hint: get(b'H'),
      position: get(b'P').and_then(|s| s.parse().ok()),
      internal_position: get(b'p').and_then(|s| s.parse().ok()),
      internal_query: get(b'q'),
      where_: get(b'W'),
      schema: get(b's'),
      table: get(b't'),
      column: get(b'c'),
      data_type: get(b'd'),
      constraint: get(b'n'),
      file: get(b'F'),
      line: get(b'L'),
      routine: get(b'R'),
      query: None,
    }
  }

  pub fn with_query(mut self, query: impl Into<String>) -> Self {
    self.query = Some(query.into());
    self
  }

  /// Multi-line rendering with detail/hint and a three-line context window
  /// around the offending position, caret-annotated, tabs expanded to 8.
  pub fn verbose(&self) -> String {
    let mut out = self.to_string();
    if let Some(detail) = &self.detail {
      out.push_str("\nDETAIL: ");
      out.push_str(detail);
    }
    if let Some(hint) = &self.hint {
      out.push_str("\nHINT: ");
      out.push_str(hint);
    }
    if let (Some(query), Some(pos)) = (&self.query, self.position) {
      out.push('\n');
      out.push_str(&render_caret(query, pos));
    }
    out
  }
}

impl fmt::Display for DbError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "pq: {}", self.message)?;
    if let (Some(query), Some(pos)) = (&self.query, self.position) {
      let (line, col) = line_col(query, pos);
      write!(f, " at position {}:{}", line, col)?;
    } else if let Some(pos) = self.position {
      write!(f, " at column {}", pos)?;
    }
    if !self.code.is_empty() {
      write!(f, " ({})", self.code)?;
    }
    Ok(())
  }
}

/// 1-indexed character position -> (1-indexed line, 1-indexed column),
/// expanding tabs to width 8 as we walk.
fn line_col(query: &str, pos: u32) -> (u32, u32) {
  let mut line = 1u32;
  let mut col = 1u32;
  let mut remaining = pos.saturating_sub(1);
  for ch in query.chars() {
    if remaining == 0 {
      break;
    }
    if ch == '\n' {
      line += 1;
      col = 1;
    } else if ch == '\t' {
      col += 8 - ((col - 1) % 8);
    } else {
      col += 1;
    }
    remaining -= 1;
  }
  (line, col)
}

fn render_caret(query: &str, pos: u32) -> String {
  let lines: Vec<&str> = query.split('\n').collect();
  let (line_no, col) = line_col(query, pos);
  let idx = (line_no - 1) as usize;
  let mut out = String::new();
  let start = idx.saturating_sub(1);
  let end = (idx + 2).min(lines.len());
  for (i, line) in lines[start..end].iter().enumerate() {
    let n = start + i;
    out.push_str(line);
    out.push('\n');
    if n == idx {
      let expanded_col = expand_tabs(line, col);
      out.push_str(&" ".repeat(expanded_col.saturating_sub(1)));
      out.push('^');
      out.push('\n');
    }
  }
  out.pop();
  out
}

fn expand_tabs(line: &str, col: u32) -> usize {
  let mut visual = 0usize;
  for ch in line.chars().take((col - 1) as usize) {
    if ch == '\t' {
      visual += 8 - (visual % 8);
    } else {
      visual += 1;
    }
  }
  visual + 1
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn renders_default_format() {
    let mut fields = BTreeMap::new();
    fields.insert(b'C', "22012".to_string());
    fields.insert(b'M', "division by zero".to_string());
    let err = DbError::from_fields(&fields);
    assert_eq!(err.to_string(), "pq: division by zero (22012)");
  }

  #[test]
  fn renders_position_with_query() {
    let mut fields = BTreeMap::new();
    fields.insert(b'C', "42601".to_string());
    fields.insert(b'M', "syntax error".to_string());
    fields.insert(b'P', "8".to_string());
    let err = DbError::from_fields(&fields).with_query("SELECT * FORM t");
    assert_eq!(err.to_string(), "pq: syntax error at position 1:8 (42601)");
  }

  #[test]
  fn bad_connection_classification() {
    assert!(Error::protocol("bad frame").is_bad_connection());
    assert!(!Error::config("bad dsn").is_bad_connection());
    assert!(!Error::Canceled("timeout".into()).is_bad_connection());
  }
}
