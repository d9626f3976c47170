//! `.pgpass` password-file lookup, matching libpq's documented format and
//! world-unreadable permission check.

use std::fs;

use tracing::warn;

use crate::error::{Error, Result};

/// Returns the first matching password, or `None` if the file doesn't
/// exist or no line matches. Each field may be `*` to match anything;
/// `:` and `\` inside a field are escaped as `\:`/`\\`.
pub fn lookup_in_file(path: &str, host: &str, port: u16, dbname: &str, user: &str) -> Result<Option<String>> {
  let contents = match fs::read_to_string(path) {
    Ok(c) => c,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(Error::Io(e)),
  };

  check_permissions(path);

  let port = port.to_string();
  for line in contents.lines() {
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let fields = match split_fields(line) {
      Some(f) => f,
      None => continue,
    };
    let [f_host, f_port, f_dbname, f_user, f_password] = fields;
    if field_matches(&f_host, host) && field_matches(&f_port, &port) && field_matches(&f_dbname, dbname) && field_matches(&f_user, user) {
      return Ok(Some(f_password));
    }
  }
  Ok(None)
}

fn field_matches(field: &str, value: &str) -> bool {
  field == "*" || field == value
}

/// Splits a `.pgpass` line into its five colon-separated fields, honoring
/// `\:`/`\\` escapes. Returns `None` for a malformed line (wrong field
/// count) rather than erroring, matching libpq's tolerance of stray lines.
fn split_fields(line: &str) -> Option<[String; 5]> {
  let mut fields: Vec<String> = vec![String::new()];
  let mut chars = line.chars();
  while let Some(c) = chars.next() {
    match c {
      '\\' => match chars.next() {
        Some(next @ (':' | '\\')) => fields.last_mut().unwrap().push(next),
        Some(next) => {
          fields.last_mut().unwrap().push('\\');
          fields.last_mut().unwrap().push(next);
        }
        None => fields.last_mut().unwrap().push('\\'),
      },
      ':' => fields.push(String::new()),
      other => fields.last_mut().unwrap().push(other),
    }
  }
  fields.try_into().ok()
}

#[cfg(unix)]
fn check_permissions(path: &str) {
  use std::os::unix::fs::PermissionsExt;
  if let Ok(meta) = fs::metadata(path) {
    let mode = meta.permissions().mode();
    if mode & 0o077 != 0 {
      warn!(path, "'.pgpass' file is readable by group or world; permissions should be 0600");
    }
  }
}

#[cfg(not(unix))]
fn check_permissions(_path: &str) {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_plain_line() {
    let fields = split_fields("host:5432:mydb:postgres:secret").unwrap();
    assert_eq!(fields, ["host", "5432", "mydb", "postgres", "secret"].map(String::from));
  }

  #[test]
  fn splits_escaped_colon_and_backslash() {
    let fields = split_fields(r"host:5432:mydb:postgres:sec\:ret\\end").unwrap();
    assert_eq!(fields[4], r"sec:ret\end");
  }

  #[test]
  fn wildcard_field_matches_anything() {
    assert!(field_matches("*", "whatever"));
    assert!(field_matches("host", "host"));
    assert!(!field_matches("host", "other"));
  }

  #[test]
  fn malformed_line_returns_none() {
    assert!(split_fields("host:5432:mydb").is_none());
  }

  #[test]
  fn missing_file_returns_none() {
    let result = lookup_in_file("/nonexistent/path/.pgpass", "h", 5432, "d", "u").unwrap();
    assert!(result.is_none());
  }
}
