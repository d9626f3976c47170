//! Text-format encoding of host values into parameter bytes, and decoding
//! of row bytes into host values, dispatching on the builtin type OID
//! table.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Error, Result};

/// Stable, version-independent builtin type OIDs (a small subset of
/// `pg_type.oid`, enough to drive the decode dispatch table).
pub mod oid {
  pub const BOOL: i32 = 16;
  pub const BYTEA: i32 = 17;
  pub const CHAR: i32 = 18;
  pub const NAME: i32 = 19;
  pub const INT8: i32 = 20;
  pub const INT2: i32 = 21;
  pub const INT4: i32 = 23;
  pub const TEXT: i32 = 25;
  pub const OID: i32 = 26;
  pub const FLOAT4: i32 = 700;
  pub const FLOAT8: i32 = 701;
  pub const VARCHAR: i32 = 1043;
  pub const DATE: i32 = 1082;
  pub const TIME: i32 = 1083;
  pub const TIMESTAMP: i32 = 1114;
  pub const TIMESTAMPTZ: i32 = 1184;
  pub const INTERVAL: i32 = 1186;
  pub const TIMETZ: i32 = 1266;
  pub const NUMERIC: i32 = 1700;
  pub const VARBIT: i32 = 1562;
  pub const BIT: i32 = 1560;

  pub const ARRAY_INT2: i32 = 1005;
  pub const ARRAY_INT4: i32 = 1007;
  pub const ARRAY_INT8: i32 = 1016;
  pub const ARRAY_TEXT: i32 = 1009;
  pub const ARRAY_VARCHAR: i32 = 1015;
  pub const ARRAY_FLOAT4: i32 = 1021;
  pub const ARRAY_FLOAT8: i32 = 1022;
  pub const ARRAY_BOOL: i32 = 1000;

  /// Element OID for a handful of array OIDs, enough to recursively
  /// decode the array syntax. Unknown array OIDs fall back to `TEXT`
  /// elements, which is always safe for the text wire format.
  pub fn array_element(array_oid: i32) -> Option<i32> {
    match array_oid {
      ARRAY_INT2 => Some(INT2),
      ARRAY_INT4 => Some(INT4),
      ARRAY_INT8 => Some(INT8),
      ARRAY_TEXT => Some(TEXT),
      ARRAY_VARCHAR => Some(VARCHAR),
      ARRAY_FLOAT4 => Some(FLOAT4),
      ARRAY_FLOAT8 => Some(FLOAT8),
      ARRAY_BOOL => Some(BOOL),
      _ => None,
    }
  }

  pub fn is_array(array_oid: i32) -> bool {
    array_element(array_oid).is_some()
  }
}

/// A decoded or to-be-encoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  Bytes(Vec<u8>),
  Time(PgTimestamp),
  Array(Vec<Value>),
}

/// An instant as PostgreSQL's text format represents it: a naive calendar
/// timestamp, an optional fixed UTC offset (present for `timestamptz`/
/// `timetz`), and the BC/AD era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgTimestamp {
  pub naive: NaiveDateTime,
  pub offset_seconds: Option<i32>,
  pub is_bc: bool,
}

impl PgTimestamp {
  /// The instant as seconds since the Unix epoch, ignoring `offset_seconds`
  /// (i.e. as if the naive timestamp were UTC) — used by callers that want
  /// a single absolute ordering regardless of the original zone.
  pub fn to_utc_naive(&self) -> NaiveDateTime {
    self.naive
  }
}

// ---------------------------------------------------------------------------
// Encoding (host -> wire, text format)
// ---------------------------------------------------------------------------

/// Encodes a parameter value to its wire text-format bytes. `None` encodes
/// to the wire's NULL sentinel (length = -1, handled by the caller; this
/// function is only invoked for non-null values).
pub fn encode(value: &Value) -> Result<Vec<u8>> {
  Ok(match value {
    Value::Null => return Err(Error::protocol("encode() called on Value::Null; use length -1 instead")),
    Value::Bool(b) => vec![if *b { b't' } else { b'f' }],
    Value::Int(i) => i.to_string().into_bytes(),
    Value::Float(f) => encode_float(*f).into_bytes(),
    Value::Text(s) => s.clone().into_bytes(),
    Value::Bytes(b) => encode_bytea(b).into_bytes(),
    Value::Time(ts) => encode_timestamp(ts).into_bytes(),
    Value::Array(items) => encode_array(items, ',')?.into_bytes(),
  })
}

fn encode_float(f: f64) -> String {
  if f.is_nan() {
    return "NaN".to_string();
  }
  if f.is_infinite() {
    return if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
  }
  // Rust's default `Display` for f64 already produces the shortest
  // round-trip decimal representation, matching the server's parser.
  format!("{f}")
}

pub fn encode_bytea(bytes: &[u8]) -> String {
  let mut s = String::with_capacity(2 + bytes.len() * 2);
  s.push_str("\\x");
  for b in bytes {
    s.push_str(&format!("{b:02x}"));
  }
  s
}

pub fn encode_timestamp(ts: &PgTimestamp) -> String {
  let d = ts.naive.date();
  let t = ts.naive.time();
  let mut s = format!(
    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
    d.year(),
    d.month(),
    d.day(),
    t.hour(),
    t.minute(),
    t.second()
  );
  let nanos = t.nanosecond();
  if nanos > 0 {
    s.push_str(&format!(".{:09}", nanos));
    while s.ends_with('0') {
      s.pop();
    }
  }
  if let Some(offset) = ts.offset_seconds {
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.unsigned_abs();
    let hours = offset / 3600;
    let minutes = (offset % 3600) / 60;
    let seconds = offset % 60;
    if seconds != 0 {
      s.push_str(&format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"));
    } else {
      s.push_str(&format!("{sign}{hours:02}:{minutes:02}"));
    }
  }
  if ts.is_bc {
    s.push_str(" BC");
  }
  s
}

/// Encodes an element list as PostgreSQL array-text syntax: `{e1,e2,...}`,
/// with `NULL` for nils and double-quoting/backslash-escaping for strings
/// and byte strings. Nested `Value::Array` elements recurse,
/// producing multi-dimensional brace nesting.
pub fn encode_array(items: &[Value], delim: char) -> Result<String> {
  let mut s = String::from("{");
  for (i, item) in items.iter().enumerate() {
    if i > 0 {
      s.push(delim);
    }
    match item {
      Value::Null => s.push_str("NULL"),
      Value::Array(nested) => s.push_str(&encode_array(nested, delim)?),
      Value::Text(t) => s.push_str(&quote_array_element(t)),
      Value::Bytes(b) => s.push_str(&quote_array_element(&encode_bytea(b))),
      other => s.push_str(&String::from_utf8(encode(other)?).map_err(|e| Error::protocol(e.to_string()))?),
    }
  }
  s.push('}');
  Ok(s)
}

fn quote_array_element(raw: &str) -> String {
  let mut s = String::with_capacity(raw.len() + 2);
  s.push('"');
  for ch in raw.chars() {
    if ch == '"' || ch == '\\' {
      s.push('\\');
    }
    s.push(ch);
  }
  s.push('"');
  s
}

// ---------------------------------------------------------------------------
// Decoding (wire -> host, text format)
// ---------------------------------------------------------------------------

/// Decodes one column's raw text-format bytes according to its type OID.
pub fn decode(type_oid: i32, raw: &[u8]) -> Result<Value> {
  if oid::is_array(type_oid) {
    let elem_oid = oid::array_element(type_oid).unwrap();
    let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(e.to_string()))?;
    let parsed = parse_array_text(text)?;
    return decode_array(&parsed, elem_oid);
  }

  match type_oid {
    oid::BOOL => Ok(Value::Bool(raw.first() == Some(&b't'))),
    oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => {
      let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(e.to_string()))?;
      text
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|e| Error::protocol(format!("invalid integer {text:?}: {e}")))
    }
    oid::FLOAT4 | oid::FLOAT8 | oid::NUMERIC => {
      let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(e.to_string()))?;
      text
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|e| Error::protocol(format!("invalid float {text:?}: {e}")))
    }
    oid::BYTEA => decode_bytea(raw).map(Value::Bytes),
    oid::TIMESTAMP | oid::TIMESTAMPTZ | oid::DATE | oid::TIME | oid::TIMETZ => {
      let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(e.to_string()))?;
      parse_timestamp_like(type_oid, text).map(Value::Time)
    }
    oid::TEXT | oid::VARCHAR | oid::NAME | oid::CHAR => {
      String::from_utf8(raw.to_vec()).map(Value::Text).map_err(|e| Error::protocol(e.to_string()))
    }
    oid::BIT | oid::VARBIT => Ok(Value::Bytes(raw.to_vec())),
    _ => Ok(Value::Bytes(raw.to_vec())),
  }
}

fn decode_bytea(raw: &[u8]) -> Result<Vec<u8>> {
  let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(e.to_string()))?;
  let hex = text
    .strip_prefix("\\x")
    .ok_or_else(|| Error::protocol("bytea value missing \\x prefix"))?;
  if hex.len() % 2 != 0 {
    return Err(Error::protocol("bytea hex payload has odd length"));
  }
  let mut out = Vec::with_capacity(hex.len() / 2);
  let bytes = hex.as_bytes();
  for chunk in bytes.chunks(2) {
    let hi = hex_digit(chunk[0])?;
    let lo = hex_digit(chunk[1])?;
    out.push((hi << 4) | lo);
  }
  Ok(out)
}

fn hex_digit(b: u8) -> Result<u8> {
  match b {
    b'0'..=b'9' => Ok(b - b'0'),
    b'a'..=b'f' => Ok(b - b'a' + 10),
    b'A'..=b'F' => Ok(b - b'A' + 10),
    _ => Err(Error::protocol("invalid hex digit in bytea")),
  }
}

fn decode_array(parsed: &ArrayText, elem_oid: i32) -> Result<Value> {
  let mut iter = parsed.elements.iter();
  nest_array(&parsed.dims, &mut iter, elem_oid)
}

fn nest_array<'a>(dims: &[usize], iter: &mut impl Iterator<Item = &'a Option<String>>, elem_oid: i32) -> Result<Value> {
  match dims.split_first() {
    None => Ok(Value::Null),
    Some((&len, rest)) if rest.is_empty() => {
      let mut out = Vec::with_capacity(len);
      for _ in 0..len {
        let elem = iter.next().ok_or_else(|| Error::protocol("array element count mismatch"))?;
        out.push(match elem {
          None => Value::Null,
          Some(text) => decode(elem_oid, text.as_bytes())?,
        });
      }
      Ok(Value::Array(out))
    }
    Some((&len, rest)) => {
      let mut out = Vec::with_capacity(len);
      for _ in 0..len {
        out.push(nest_array(rest, iter, elem_oid)?);
      }
      Ok(Value::Array(out))
    }
  }
}

// ---------------------------------------------------------------------------
// Array text grammar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayText {
  pub dims: Vec<usize>,
  pub elements: Vec<Option<String>>,
}

/// Parses PostgreSQL array-text syntax starting at `{`, recursively
/// tracking brace depth, returning the observed dimension sizes and the
/// flat (row-major) element list.
pub fn parse_array_text(s: &str) -> Result<ArrayText> {
  let mut chars = s.trim().chars().peekable();
  if chars.peek() != Some(&'{') {
    return Err(Error::protocol("array text must start with '{'"));
  }
  let mut dims = Vec::new();
  let mut elements = Vec::new();
  parse_array_level(&mut chars, &mut dims, &mut elements, 0)?;
  if chars.next().is_some() {
    return Err(Error::protocol("trailing data after array literal"));
  }
  Ok(ArrayText { dims, elements })
}

fn parse_array_level(
  chars: &mut std::iter::Peekable<std::str::Chars>,
  dims: &mut Vec<usize>,
  elements: &mut Vec<Option<String>>,
  depth: usize,
) -> Result<()> {
  // consume '{'
  chars.next();
  let mut count = 0usize;
  loop {
    match chars.peek() {
      None => return Err(Error::protocol("unterminated array literal")),
      Some('}') => {
        chars.next();
        break;
      }
      Some(',') => {
        chars.next();
      }
      Some('{') => {
        parse_array_level(chars, dims, elements, depth + 1)?;
        count += 1;
      }
      Some('"') => {
        elements.push(Some(parse_quoted_element(chars)?));
        count += 1;
      }
      Some(_) => {
        let token = parse_bare_element(chars);
        if token == "NULL" {
          elements.push(None);
        } else {
          elements.push(Some(token));
        }
        count += 1;
      }
    }
  }

  if dims.len() <= depth {
    dims.push(count);
  } else if dims[depth] != count {
    return Err(Error::protocol("array leaf count does not match declared dimensions"));
  }
  Ok(())
}

fn parse_quoted_element(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String> {
  chars.next(); // opening quote
  let mut out = String::new();
  loop {
    match chars.next() {
      None => return Err(Error::protocol("unterminated quoted array element")),
      Some('"') => break,
      Some('\\') => match chars.next() {
        Some(c) => out.push(c),
        None => return Err(Error::protocol("dangling escape in quoted array element")),
      },
      Some(c) => out.push(c),
    }
  }
  Ok(out)
}

fn parse_bare_element(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
  let mut out = String::new();
  while let Some(&c) = chars.peek() {
    if c == ',' || c == '}' {
      break;
    }
    out.push(c);
    chars.next();
  }
  out
}

// ---------------------------------------------------------------------------
// Timestamp / date / time text grammar
// ---------------------------------------------------------------------------

fn parse_timestamp_like(type_oid: i32, text: &str) -> Result<PgTimestamp> {
  match type_oid {
    oid::DATE => {
      let (date, rest) = parse_date(text)?;
      let (rest, is_bc) = strip_bc(rest);
      if !rest.is_empty() {
        return Err(Error::protocol("unexpected trailing bytes after date"));
      }
      Ok(PgTimestamp {
        naive: NaiveDateTime::new(date, NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
        offset_seconds: None,
        is_bc,
      })
    }
    oid::TIME => {
      let (time, rest) = parse_time(text)?;
      let (rest, is_bc) = strip_bc(rest);
      if !rest.is_empty() {
        return Err(Error::protocol("unexpected trailing bytes after time"));
      }
      Ok(PgTimestamp {
        naive: NaiveDateTime::new(epoch_date(), time),
        offset_seconds: None,
        is_bc,
      })
    }
    oid::TIMETZ => {
      let (time, rest) = parse_time(text)?;
      let (offset, rest) = parse_offset(rest)?;
      let (rest, is_bc) = strip_bc(rest);
      if !rest.is_empty() {
        return Err(Error::protocol("unexpected trailing bytes after timetz"));
      }
      Ok(PgTimestamp {
        naive: NaiveDateTime::new(epoch_date(), time),
        offset_seconds: Some(offset.unwrap_or(0)),
        is_bc,
      })
    }
    _ => parse_full_timestamp(text, type_oid == oid::TIMESTAMPTZ),
  }
}

fn epoch_date() -> NaiveDate {
  NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn parse_full_timestamp(text: &str, expect_tz: bool) -> Result<PgTimestamp> {
  let (date, rest) = parse_date(text)?;
  let rest = rest.strip_prefix(' ').unwrap_or(rest);
  let (time, rest) = if rest.is_empty() {
    (NaiveTime::from_hms_opt(0, 0, 0).unwrap(), rest)
  } else {
    parse_time(rest)?
  };
  let (offset, rest) = parse_offset(rest)?;
  let (rest, is_bc) = strip_bc(rest);
  if !rest.is_empty() {
    return Err(Error::protocol(format!("unexpected trailing bytes in timestamp: {rest:?}")));
  }
  if expect_tz && offset.is_none() {
    return Err(Error::protocol("timestamptz value is missing a UTC offset"));
  }
  Ok(PgTimestamp {
    naive: NaiveDateTime::new(date, time),
    offset_seconds: offset,
    is_bc,
  })
}

/// `YYYY-MM-DD`, returning the parsed date and the unconsumed remainder.
fn parse_date(s: &str) -> Result<(NaiveDate, &str)> {
  let bytes = s.as_bytes();
  let dash1 = s.find('-').ok_or_else(|| Error::protocol("invalid date: missing '-'"))?;
  let year: i32 = s[..dash1].parse().map_err(|_| Error::protocol("invalid date year"))?;
  let rest = &s[dash1 + 1..];
  if rest.len() < 5 || bytes.len() < dash1 + 6 {
    return Err(Error::protocol("invalid date: truncated"));
  }
  let month: u32 = rest[..2].parse().map_err(|_| Error::protocol("invalid date month"))?;
  if rest.as_bytes().get(2) != Some(&b'-') {
    return Err(Error::protocol("invalid date: missing '-' before day"));
  }
  let day: u32 = rest[3..5].parse().map_err(|_| Error::protocol("invalid date day"))?;
  let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| Error::protocol("invalid calendar date"))?;
  Ok((date, &rest[5..]))
}

/// `HH:MM:SS` with an optional `.` + fractional seconds of any length,
/// scaled to nanoseconds. A lone trailing `.` with no digits is accepted
/// and normalized to `.0`.
fn parse_time(s: &str) -> Result<(NaiveTime, &str)> {
  if s.len() < 8 {
    return Err(Error::protocol("invalid time: truncated"));
  }
  let hour: u32 = s[0..2].parse().map_err(|_| Error::protocol("invalid time hour"))?;
  if s.as_bytes().get(2) != Some(&b':') {
    return Err(Error::protocol("invalid time: missing ':' after hour"));
  }
  let minute: u32 = s[3..5].parse().map_err(|_| Error::protocol("invalid time minute"))?;
  if s.as_bytes().get(5) != Some(&b':') {
    return Err(Error::protocol("invalid time: missing ':' after minute"));
  }
  let second: u32 = s[6..8].parse().map_err(|_| Error::protocol("invalid time second"))?;
  let mut rest = &s[8..];
  let mut nanos = 0u32;
  if let Some(frac) = rest.strip_prefix('.') {
    let digits_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
    let digits = &frac[..digits_len];
    let digits = if digits.is_empty() { "0" } else { digits };
    nanos = scale_to_nanos(digits)?;
    rest = &frac[digits_len..];
  }
  let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(|| Error::protocol("invalid time of day"))?;
  Ok((time, rest))
}

fn scale_to_nanos(digits: &str) -> Result<u32> {
  let value: u64 = digits.parse().map_err(|_| Error::protocol("invalid fractional seconds"))?;
  let scale = digits.len();
  let nanos = if scale <= 9 {
    value * 10u64.pow((9 - scale) as u32)
  } else {
    value / 10u64.pow((scale - 9) as u32)
  };
  Ok(nanos as u32)
}

/// `+HH`, `-HH`, `+HH:MM`, or `+HH:MM:SS`, returning the offset in seconds.
fn parse_offset(s: &str) -> Result<(Option<i32>, &str)> {
  let Some(sign_char) = s.chars().next() else {
    return Ok((None, s));
  };
  let sign = match sign_char {
    '+' => 1,
    '-' => -1,
    _ => return Ok((None, s)),
  };
  let rest = &s[1..];
  if rest.len() < 2 || !rest.as_bytes()[..2].iter().all(u8::is_ascii_digit) {
    return Ok((None, s));
  }
  let hours: i32 = rest[..2].parse().unwrap();
  let mut consumed = 1 + 2;
  let mut minutes = 0i32;
  let mut seconds = 0i32;
  let after_hours = &rest[2..];
  if let Some(mm) = after_hours.strip_prefix(':') {
    if mm.len() >= 2 && mm.as_bytes()[..2].iter().all(u8::is_ascii_digit) {
      minutes = mm[..2].parse().unwrap();
      consumed += 3;
      let after_minutes = &mm[2..];
      if let Some(ss) = after_minutes.strip_prefix(':') {
        if ss.len() >= 2 && ss.as_bytes()[..2].iter().all(u8::is_ascii_digit) {
          seconds = ss[..2].parse().unwrap();
          consumed += 3;
        }
      }
    }
  }
  let total = sign * (hours * 3600 + minutes * 60 + seconds);
  Ok((Some(total), &s[consumed..]))
}

fn strip_bc(s: &str) -> (&str, bool) {
  match s.strip_prefix(" BC") {
    Some(rest) => (rest, true),
    None => (s, false),
  }
}

/// Converts a `PgTimestamp` to the BC-adjusted proleptic year for display
/// or comparison purposes (year 1 BC is astronomical year 0).
pub fn astronomical_year(ts: &PgTimestamp) -> i32 {
  if ts.is_bc {
    1 - ts.naive.year()
  } else {
    ts.naive.year()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_scalars() {
    assert_eq!(decode(oid::INT4, b"123").unwrap(), Value::Int(123));
    assert_eq!(decode(oid::BOOL, b"f").unwrap(), Value::Bool(false));
    assert_eq!(decode(oid::FLOAT8, b"3.14").unwrap(), Value::Float(3.14));
    assert_eq!(
      decode(oid::TEXT, b"foobar").unwrap(),
      Value::Text("foobar".to_string())
    );
  }

  #[test]
  fn decodes_bytea() {
    assert_eq!(
      decode(oid::BYTEA, b"\\x000102").unwrap(),
      Value::Bytes(vec![0x00, 0x01, 0x02])
    );
  }

  #[test]
  fn encodes_bytea() {
    assert_eq!(encode_bytea(&[0x00, 0x01, 0x02]), "\\x000102");
  }

  #[test]
  fn parses_timestamptz_with_fraction_and_offset() {
    let ts = parse_timestamp_like(oid::TIMESTAMPTZ, "2000-01-01 01:02:03.04-07").unwrap();
    assert_eq!(ts.naive.date(), NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
    assert_eq!(ts.naive.time().hour(), 1);
    assert_eq!(ts.naive.time().nanosecond(), 40_000_000);
    assert_eq!(ts.offset_seconds, Some(-7 * 3600));
    assert!(!ts.is_bc);
  }

  #[test]
  fn parses_bc_era() {
    let ts = parse_timestamp_like(oid::TIMESTAMP, "2000-01-01 00:00:00 BC").unwrap();
    assert!(ts.is_bc);
    assert_eq!(astronomical_year(&ts), -1999);
  }

  #[test]
  fn trailing_dot_with_no_digits_is_normalized() {
    let (time, rest) = parse_time("01:02:03.").unwrap();
    assert_eq!(time.nanosecond(), 0);
    assert_eq!(rest, "");
  }

  #[test]
  fn round_trips_date_only() {
    let ts = parse_timestamp_like(oid::DATE, "2024-02-29").unwrap();
    assert_eq!(ts.naive.time(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
  }

  #[test]
  fn parses_2d_array() {
    let parsed = parse_array_text("{{1,2},{3,4}}").unwrap();
    assert_eq!(parsed.dims, vec![2, 2]);
    assert_eq!(
      parsed.elements,
      vec![Some("1".into()), Some("2".into()), Some("3".into()), Some("4".into())]
    );
  }

  #[test]
  fn parses_quoted_string_array() {
    let parsed = parse_array_text(r#"{"a","\\b","c\"","d,e"}"#).unwrap();
    assert_eq!(
      parsed.elements,
      vec![
        Some("a".into()),
        Some("\\b".into()),
        Some("c\"".into()),
        Some("d,e".into())
      ]
    );
  }

  #[test]
  fn rejects_mismatched_dimensions() {
    let err = parse_array_text("{{1,2},{3}}").unwrap_err();
    assert!(err.to_string().contains("dimensions"));
  }

  #[test]
  fn decodes_int_array_value() {
    let value = decode(oid::ARRAY_INT4, b"{{1,2},{3,4}}").unwrap();
    assert_eq!(
      value,
      Value::Array(vec![
        Value::Array(vec![Value::Int(1), Value::Int(2)]),
        Value::Array(vec![Value::Int(3), Value::Int(4)]),
      ])
    );
  }

  #[test]
  fn encode_decode_array_round_trip() {
    let original = Value::Array(vec![Value::Text("a".into()), Value::Null, Value::Text("b,c".into())]);
    let encoded = encode(&original).unwrap();
    let text = String::from_utf8(encoded).unwrap();
    let parsed = parse_array_text(&text).unwrap();
    assert_eq!(
      parsed.elements,
      vec![Some("a".into()), None, Some("b,c".into())]
    );
  }
}
