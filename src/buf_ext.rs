//! Extensions for reading the typed fields PostgreSQL messages are made of
//! out of a `bytes::Bytes` payload. A missing terminator or truncated
//! payload produces an `Error::Protocol` instead of panicking.

use std::collections::BTreeMap;

use bytes::Buf;

use crate::error::{DbError, Error, Result};

pub trait BufExt: Buf {
  /// A string that runs to the next NUL byte. Some messages instead allow
  /// the string to run to end-of-payload with no trailing NUL; callers
  /// that need that behavior use `pg_get_rest_string`.
  fn pg_get_null_terminated_string(&mut self) -> Result<String> {
    match self.chunk().iter().position(|b| *b == 0x00) {
      Some(len) => {
        let mut buf = vec![0u8; len];
        self.copy_to_slice(&mut buf);
        self.advance(1);
        String::from_utf8(buf).map_err(|e| Error::protocol(format!("invalid utf-8 string: {e}")))
      }
      None => Err(Error::protocol("missing null terminator")),
    }
  }

  /// The remainder of the payload as a string, with an optional trailing
  /// NUL stripped if present (some server messages omit it).
  fn pg_get_rest_string(&mut self) -> Result<String> {
    let mut buf = vec![0u8; self.remaining()];
    self.copy_to_slice(&mut buf);
    if buf.last() == Some(&0) {
      buf.pop();
    }
    String::from_utf8(buf).map_err(|e| Error::protocol(format!("invalid utf-8 string: {e}")))
  }

  fn pg_get_fixed_length_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
    if self.remaining() < len {
      return Err(Error::protocol("truncated message"));
    }
    let mut buf = vec![0u8; len];
    self.copy_to_slice(&mut buf);
    Ok(buf)
  }

  fn pg_get_i16(&mut self) -> Result<i16> {
    if self.remaining() < 2 {
      return Err(Error::protocol("truncated int16"));
    }
    Ok(self.get_i16())
  }

  fn pg_get_i32(&mut self) -> Result<i32> {
    if self.remaining() < 4 {
      return Err(Error::protocol("truncated int32"));
    }
    Ok(self.get_i32())
  }

  fn pg_get_u8(&mut self) -> Result<u8> {
    if self.remaining() < 1 {
      return Err(Error::protocol("truncated byte"));
    }
    Ok(self.get_u8())
  }

  /// Byte1-tagged field list terminated by a zero byte, as used by
  /// `ErrorResponse` and `NoticeResponse`.
  /// https://www.postgresql.org/docs/current/protocol-error-fields.html
  fn pg_get_fields(&mut self) -> Result<BTreeMap<u8, String>> {
    let mut fields = BTreeMap::new();
    loop {
      match self.pg_get_u8()? {
        0 => break,
        tag => {
          let value = self.pg_get_null_terminated_string()?;
          fields.insert(tag, value);
        }
      }
    }
    Ok(fields)
  }

  fn pg_get_backend_error(&mut self) -> Result<DbError> {
    let fields = self.pg_get_fields()?;
    if fields.is_empty() {
      return Err(Error::protocol("missing error fields from server"));
    }
    Ok(DbError::from_fields(&fields))
  }
}

impl<T: Buf> BufExt for T {}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;

  #[test]
  fn reads_null_terminated_string() {
    let mut b = Bytes::from_static(b"hello\0world");
    assert_eq!(b.pg_get_null_terminated_string().unwrap(), "hello");
    assert_eq!(b.pg_get_rest_string().unwrap(), "world");
  }

  #[test]
  fn missing_terminator_is_protocol_error() {
    let mut b = Bytes::from_static(b"nope");
    assert!(b.pg_get_null_terminated_string().is_err());
  }

  #[test]
  fn parses_error_fields() {
    let mut payload = Vec::new();
    payload.push(b'C');
    payload.extend_from_slice(b"22012\0");
    payload.push(b'M');
    payload.extend_from_slice(b"division by zero\0");
    payload.push(0);
    let mut b = Bytes::from(payload);
    let err = b.pg_get_backend_error().unwrap();
    assert_eq!(err.code, "22012");
    assert_eq!(err.message, "division by zero");
  }
}
