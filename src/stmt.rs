//! Prepared statements and result-row streaming over the extended-query
//! protocol: Parse+Describe to create, Bind+Execute+Sync to run,
//! Close+Sync to destroy.

use std::sync::Arc;

use crate::buf_ext::BufExt;
use crate::conn::{parse_command_complete, parse_data_row, parse_row_description, Column, Connection, Row};
use crate::error::{Error, Result, Severity};

/// A server-side prepared statement. Dropping this value without calling
/// `Connection::close_statement` leaks the name on the server until the
/// connection closes — fine for the common case of reusing one statement
/// for the connection's lifetime, but callers that `prepare` in a loop
/// should close explicitly.
pub struct Statement {
  name: String,
  param_types: Vec<i32>,
  columns: Arc<Vec<Column>>,
}

impl Statement {
  pub fn param_types(&self) -> &[i32] {
    &self.param_types
  }

  pub fn columns(&self) -> &[Column] {
    &self.columns
  }
}

/// A streaming result set bound to the portal that produced it. Rows are
/// decoded one `DataRow` at a time as the caller pulls them; `next()`
/// returns `Ok(None)` once the server's `ReadyForQuery` for this pipeline
/// has been consumed.
pub struct Rows<'a> {
  conn: &'a mut Connection,
  columns: Arc<Vec<Column>>,
  rows_affected: Option<u64>,
  done: bool,
}

impl<'a> Rows<'a> {
  pub async fn next(&mut self) -> Result<Option<Row>> {
    if self.done {
      return Ok(None);
    }
    loop {
      let (kind, body) = self.conn.recv_frame().await?;
      match kind {
        b'D' => return Ok(Some(parse_data_row(&self.columns, body)?)),
        b'C' => {
          self.rows_affected = parse_command_complete(body)?;
        }
        b'I' => {}
        b'Z' => {
          self.conn.note_ready_for_query(body[0])?;
          self.done = true;
          return Ok(None);
        }
        b'E' => {
          let err = self.conn.decode_error(body)?;
          if matches!(err.severity, Severity::Fatal | Severity::Panic) {
            self.conn.mark_bad();
          }
          self.conn.drain_to_ready().await?;
          self.done = true;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while streaming rows"))),
      }
    }
  }

  /// Drains any remaining rows and returns the final `CommandComplete`
  /// count, if any. Convenient for statements the caller only runs for
  /// their side effects (`INSERT`/`UPDATE`/`DELETE`).
  pub async fn exhaust(&mut self) -> Result<Option<u64>> {
    while self.next().await?.is_some() {}
    Ok(self.rows_affected)
  }

  pub fn rows_affected(&self) -> Option<u64> {
    self.rows_affected
  }
}

impl Connection {
  /// Parse + Describe, synchronized, returning a reusable `Statement`.
  pub async fn prepare(&mut self, sql: &str, param_types: &[i32]) -> Result<Statement> {
    self.ensure_usable()?;
    let name = self.next_statement_name();
    self.send_parse(&name, sql, param_types).await?;
    self.send_describe_statement(&name).await?;
    self.send_sync().await?;
    self.flush_pipeline().await?;

    let mut declared_param_types = param_types.to_vec();
    let mut columns = Arc::new(Vec::new());
    loop {
      let (kind, body) = self.recv_frame().await?;
      match kind {
        b'1' => {}
        b't' => declared_param_types = parse_parameter_description(body)?,
        b'T' => columns = Arc::new(parse_row_description(body)?),
        b'n' => columns = Arc::new(Vec::new()),
        b'Z' => {
          self.note_ready_for_query(body[0])?;
          break;
        }
        b'E' => {
          let err = self.decode_error(body)?.with_query(sql);
          self.drain_to_ready().await?;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while preparing statement"))),
      }
    }

    Ok(Statement {
      name,
      param_types: declared_param_types,
      columns,
    })
  }

  /// Bind + Execute + Sync against an unnamed portal, returning a row
  /// stream. `max_rows` of `0` asks the server for the complete result.
  pub async fn query<'a>(
    &'a mut self,
    stmt: &Statement,
    param_formats: &[i16],
    params: &[Option<Vec<u8>>],
    result_formats: &[i16],
  ) -> Result<Rows<'a>> {
    self.ensure_usable()?;
    self.send_bind("", &stmt.name, param_formats, params, result_formats).await?;
    self.send_execute("", 0).await?;
    self.send_sync().await?;
    self.flush_pipeline().await?;

    loop {
      let (kind, body) = self.recv_frame().await?;
      match kind {
        b'2' => break,
        b'E' => {
          let err = self.decode_error(body)?;
          self.drain_to_ready().await?;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while binding portal"))),
      }
    }

    Ok(Rows {
      conn: self,
      columns: stmt.columns.clone(),
      rows_affected: None,
      done: false,
    })
  }

  /// Close(statement) + Sync.
  pub async fn close_statement(&mut self, stmt: Statement) -> Result<()> {
    self.ensure_usable()?;
    self.send_close_statement(&stmt.name).await?;
    self.send_sync().await?;
    self.flush_pipeline().await?;

    loop {
      let (kind, body) = self.recv_frame().await?;
      match kind {
        b'3' => {}
        b'Z' => {
          self.note_ready_for_query(body[0])?;
          return Ok(());
        }
        b'E' => {
          let err = self.decode_error(body)?;
          self.drain_to_ready().await?;
          return Err(Error::Db(err));
        }
        other => return Err(Error::protocol(format!("unexpected message {other:?} while closing statement"))),
      }
    }
  }
}

fn parse_parameter_description(mut body: bytes::Bytes) -> Result<Vec<i32>> {
  let count = body.pg_get_i16()?.max(0) as usize;
  let mut oids = Vec::with_capacity(count);
  for _ in 0..count {
    oids.push(body.pg_get_i32()?);
  }
  Ok(oids)
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::BufMut;

  #[test]
  fn parses_parameter_description() {
    let mut body = bytes::BytesMut::new();
    body.put_i16(2);
    body.put_i32(23);
    body.put_i32(25);
    let oids = parse_parameter_description(body.freeze()).unwrap();
    assert_eq!(oids, vec![23, 25]);
  }
}
