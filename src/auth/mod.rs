//! Authentication engine: MD5, cleartext, and SCRAM-SHA-256 exchanges
//! driven by the server's `Authentication` message sub-codes.
//!
//! The per-method responses are computed here; `Connection::authenticate`
//! (in `conn.rs`) owns reading the server's challenges and writing the
//! resulting `PasswordMessage`s as one dispatch loop.

pub mod scram;

use md5::{Digest, Md5};

/// `md5` || hex(md5(md5(password || user) || salt))`.
pub fn md5_password(user: &str, password: &str, salt: &[u8]) -> String {
  let mut md5 = Md5::new();
  md5.update(password.as_bytes());
  md5.update(user.as_bytes());
  let inner = md5.finalize_reset();
  md5.update(format!("{inner:x}"));
  md5.update(salt);
  format!("md5{:x}", md5.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn md5_password_matches_reference_shape() {
    // Not a fixed-vector test (the server's salt is random per-connection)
    // — just asserts the fixed "md5" prefix and hex length libpq expects.
    let hashed = md5_password("postgres", "hunter2", &[1, 2, 3, 4]);
    assert!(hashed.starts_with("md5"));
    assert_eq!(hashed.len(), 3 + 32);
  }
}
