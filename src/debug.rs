//! `PQGO_DEBUG=1` raw wire-frame dump, independent of the `tracing`
//! subscriber the host installs — a zero-setup stderr dump gated by an
//! env var rather than a log level.

use std::io::Write;
use std::sync::OnceLock;

fn enabled() -> bool {
  static ENABLED: OnceLock<bool> = OnceLock::new();
  *ENABLED.get_or_init(|| std::env::var("PQGO_DEBUG").map(|v| v == "1").unwrap_or(false))
}

/// Dumps one wire frame if `PQGO_DEBUG=1`. `direction` is `"->"` for a
/// frame the client sends, `"<-"` for one it received. `kind` is `None` for
/// the untyped startup/SSLRequest/CancelRequest frames.
pub fn dump_frame(direction: &str, kind: Option<u8>, payload: &[u8]) {
  if !enabled() {
    return;
  }
  let kind_label = match kind {
    Some(b) => format!("{}", b as char),
    None => "-".to_string(),
  };
  let mut hex = String::with_capacity(payload.len() * 2);
  for byte in payload {
    hex.push_str(&format!("{byte:02x}"));
  }
  let _ = writeln!(std::io::stderr(), "[pq] {direction} type={kind_label} len={} payload={hex}", payload.len() + 4);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dump_frame_does_not_panic_when_disabled() {
    dump_frame("->", Some(b'Q'), b"SELECT 1");
  }
}
