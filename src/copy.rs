//! `COPY ... FROM STDIN` streaming.
//!
//! This driver has one reader and one writer sharing the same `Stream` (it
//! is not split into independent halves), so instead of a concurrent drain
//! of server acknowledgements, errors are surfaced the next time the caller
//! awaits a `push`/`finish`/`fail` call — the server does not emit anything
//! on a text-mode COPY-IN stream until it either errors or the client sends
//! `CopyDone`/`CopyFail`, so this has no observable difference for
//! well-behaved servers.

use bytes::Bytes;

use crate::buf_ext::BufExt;
use crate::conn::{parse_command_complete, Connection, TransactionStatus};
use crate::error::{Error, Result};

const FLUSH_THRESHOLD: usize = 64 * 1024;

pub struct CopyIn<'a> {
  conn: &'a mut Connection,
  buffer: Vec<u8>,
  closed: bool,
}

impl<'a> CopyIn<'a> {
  /// Appends one row (tab-separated, `\N` for nulls) to the send buffer,
  /// flushing to the wire once it crosses the ~64 KiB threshold.
  pub async fn push(&mut self, values: &[Option<Vec<u8>>]) -> Result<()> {
    if self.closed {
      return Err(Error::Closed);
    }
    for (i, value) in values.iter().enumerate() {
      if i > 0 {
        self.buffer.push(b'\t');
      }
      match value {
        None => self.buffer.extend_from_slice(b"\\N"),
        Some(bytes) => escape_copy_field(&mut self.buffer, bytes),
      }
    }
    self.buffer.push(b'\n');
    if self.buffer.len() >= FLUSH_THRESHOLD {
      self.flush().await?;
    }
    Ok(())
  }

  async fn flush(&mut self) -> Result<()> {
    if self.buffer.is_empty() {
      return Ok(());
    }
    self.conn.send_copy_data(&self.buffer).await?;
    self.conn.flush_pipeline().await?;
    self.buffer.clear();
    Ok(())
  }

  /// Flushes any remaining buffered rows, sends `CopyDone`, and returns the
  /// server's reported row count once `ReadyForQuery` arrives.
  pub async fn finish(mut self) -> Result<u64> {
    self.flush().await?;
    self.conn.send_copy_done().await?;
    self.conn.flush_pipeline().await?;
    self.closed = true;
    self.drain_completion().await
  }

  /// Aborts the COPY by sending `CopyFail(message)`. The server always
  /// responds with an `ErrorResponse` (SQLSTATE `57014`, query_canceled)
  /// for a client-initiated abort; that response is treated as success.
  pub async fn fail(mut self, message: impl Into<String>) -> Result<()> {
    self.conn.send_copy_fail(&message.into()).await?;
    self.conn.flush_pipeline().await?;
    self.closed = true;
    match self.drain_completion().await {
      Ok(_) => Ok(()),
      Err(Error::Db(db)) if db.code == "57014" => Ok(()),
      Err(e) => Err(e),
    }
  }

  async fn drain_completion(&mut self) -> Result<u64> {
    let mut rows = 0u64;
    loop {
      let (kind, body) = self.conn.recv_frame().await?;
      match kind {
        b'C' => rows = parse_command_complete(body)?.unwrap_or(0),
        b'Z' => {
          self.conn.note_ready_for_query(body[0])?;
          return Ok(rows);
        }
        b'E' => {
          let err = self.conn.decode_error(body)?;
          self.conn.drain_to_ready().await?;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while finishing COPY"))),
      }
    }
  }
}

impl Connection {
  /// Starts a `COPY ... FROM STDIN` stream. `sql` must be a complete COPY
  /// statement, e.g. `COPY "my table"(a, b) FROM STDIN` — use
  /// [`quote_ident`] for the target and column names. Rejected outside an
  /// active transaction and for any format other than text.
  pub async fn copy_in(&mut self, sql: &str) -> Result<CopyIn<'_>> {
    self.ensure_usable()?;
    if self.transaction_status() != TransactionStatus::InTransaction {
      return Err(Error::config("COPY FROM STDIN must be issued inside a transaction"));
    }

    let name = self.next_statement_name();
    self.send_parse(&name, sql, &[]).await?;
    self.send_bind("", &name, &[], &[], &[]).await?;
    self.send_execute("", 0).await?;
    self.send_sync().await?;
    self.flush_pipeline().await?;

    loop {
      let (kind, body) = self.recv_frame().await?;
      match kind {
        b'1' | b'2' => {}
        b'G' => {
          if parse_copy_in_format(body)? != 0 {
            self.drain_to_ready().await?;
            return Err(Error::config("only text-format COPY is supported"));
          }
          break;
        }
        b'E' => {
          let err = self.decode_error(body)?.with_query(sql);
          self.drain_to_ready().await?;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while starting COPY"))),
      }
    }

    Ok(CopyIn {
      conn: self,
      buffer: Vec::new(),
      closed: false,
    })
  }
}

fn parse_copy_in_format(mut body: Bytes) -> Result<i16> {
  Ok(body.pg_get_u8()? as i16)
}

fn escape_copy_field(out: &mut Vec<u8>, bytes: &[u8]) {
  for &b in bytes {
    match b {
      b'\\' => out.extend_from_slice(b"\\\\"),
      b'\t' => out.extend_from_slice(b"\\t"),
      b'\n' => out.extend_from_slice(b"\\n"),
      b'\r' => out.extend_from_slice(b"\\r"),
      _ => out.push(b),
    }
  }
}

/// Quotes an identifier for use in a COPY target (or anywhere else a caller
/// needs a double-quoted identifier), doubling embedded `"`.
pub fn quote_ident(name: &str) -> String {
  let mut out = String::with_capacity(name.len() + 2);
  out.push('"');
  for ch in name.chars() {
    if ch == '"' {
      out.push('"');
    }
    out.push(ch);
  }
  out.push('"');
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escapes_special_bytes() {
    let mut out = Vec::new();
    escape_copy_field(&mut out, b"a\tb\\c\nd");
    assert_eq!(out, b"a\\tb\\\\c\\nd");
  }

  #[test]
  fn quotes_identifier_doubling_quotes() {
    assert_eq!(quote_ident("my table"), "\"my table\"");
    assert_eq!(quote_ident(r#"weird"name"#), "\"weird\"\"name\"");
  }
}
