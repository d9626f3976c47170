//! The connection state machine: startup, authentication, TLS negotiation,
//! simple-query dispatch, and the low-level extended-query frame senders
//! that `stmt.rs` and `copy.rs` drive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

#[cfg(feature = "ssl")]
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};

use crate::auth;
use crate::auth::scram::ScramClient;
use crate::buf_ext::BufExt;
use crate::codec::{self, Value};
use crate::error::{DbError, Error, Result, Severity};
pub use crate::stream::SslNegotiation;
use crate::stream::{KeepaliveConfig, Stream};

const PROTOCOL_VERSION: i32 = 196_608; // 3.0

/// TLS negotiation policy. Only `VerifyCa` and `VerifyFull` validate the
/// server's certificate; `Allow`/`Prefer`/`Require` ask only for encryption,
/// matching libpq. `VerifyCa` checks the certificate chain but not the
/// hostname; `VerifyFull` checks both, except when the host is a literal IP
/// address, where there is no DNS name to match against and the check is
/// skipped the same way `VerifyCa` skips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
  Disable,
  Allow,
  Prefer,
  Require,
  VerifyCa,
  VerifyFull,
}

impl Default for TlsMode {
  fn default() -> Self {
    TlsMode::Prefer
  }
}

/// Resolved connection parameters, as produced by `dsn::ConnectOptions` (or
/// built directly by the caller). Immutable once a `Connection` is built
/// from it.
#[derive(Debug, Clone)]
pub struct ConnectParams {
  pub host: String,
  pub port: u16,
  pub unix_socket: Option<PathBuf>,
  pub user: String,
  pub password: Option<String>,
  pub dbname: String,
  pub application_name: Option<String>,
  pub tls_mode: TlsMode,
  pub sslnegotiation: SslNegotiation,
  pub connect_timeout: Option<Duration>,
  /// `keepalives` DSN key: whether `SO_KEEPALIVE` is enabled on the
  /// underlying TCP socket (default on, matching libpq).
  pub keepalives: bool,
  /// `keepalives_interval` DSN key, seconds between probes; `None` leaves
  /// the OS default in place.
  pub keepalives_interval: Option<Duration>,
  /// Extra startup-packet key/value pairs (`options='-c key=value'`
  /// pass-through and any unrecognized DSN key), sent verbatim.
  pub extra: Vec<(String, String)>,
}

impl ConnectParams {
  pub fn new(user: impl Into<String>, dbname: impl Into<String>) -> Self {
    ConnectParams {
      host: "localhost".to_string(),
      port: 5432,
      unix_socket: None,
      user: user.into(),
      password: None,
      dbname: dbname.into(),
      application_name: None,
      tls_mode: TlsMode::default(),
      sslnegotiation: SslNegotiation::default(),
      connect_timeout: None,
      keepalives: true,
      keepalives_interval: None,
      extra: Vec::new(),
    }
  }

  fn keepalive_config(&self) -> KeepaliveConfig {
    KeepaliveConfig {
      enabled: self.keepalives,
      interval: self.keepalives_interval,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
  Idle,
  InTransaction,
  Failed,
}

impl TransactionStatus {
  fn from_byte(b: u8) -> Result<Self> {
    match b {
      b'I' => Ok(TransactionStatus::Idle),
      b'T' => Ok(TransactionStatus::InTransaction),
      b'E' => Ok(TransactionStatus::Failed),
      other => Err(Error::protocol(format!("unknown transaction status byte {other:?}"))),
    }
  }
}

/// A `RowDescription` field describing one result column.
#[derive(Debug, Clone)]
pub struct Column {
  pub name: String,
  pub table_oid: i32,
  pub column_id: i16,
  pub type_oid: i32,
  pub type_size: i16,
  pub type_modifier: i32,
  pub format: i16,
}

#[derive(Debug, Clone)]
pub struct Row {
  pub columns: Arc<Vec<Column>>,
  pub values: Vec<Value>,
}

impl Row {
  pub fn get(&self, index: usize) -> Option<&Value> {
    self.values.get(index)
  }

  pub fn column(&self, name: &str) -> Option<&Value> {
    self.columns.iter().position(|c| c.name == name).and_then(|i| self.values.get(i))
  }
}

/// One statement's worth of results out of a simple-query dispatch (a
/// multi-statement query returns several of these, one per
/// semicolon-separated statement).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
  pub columns: Vec<Column>,
  pub rows: Vec<Row>,
  pub rows_affected: Option<u64>,
}

pub struct Connection {
  stream: Stream,
  params: ConnectParams,
  parameter_status: HashMap<String, String>,
  process_id: i32,
  secret_key: i32,
  tx_status: TransactionStatus,
  /// Sticky "bad connection" cell: once set, every subsequent operation
  /// fails without writing to the wire.
  closed: bool,
  next_statement_id: u32,
}

impl Connection {
  /// A connection wrapper around an already-dialed stream with no startup
  /// handshake performed. Only `cancel.rs` uses this, for the one-shot
  /// `CancelRequest` dial that never speaks the rest of the protocol.
  pub(crate) fn bare(stream: Stream) -> Self {
    Connection {
      stream,
      params: ConnectParams::new("", ""),
      parameter_status: HashMap::new(),
      process_id: 0,
      secret_key: 0,
      tx_status: TransactionStatus::Idle,
      closed: false,
      next_statement_id: 0,
    }
  }

  /// Writes an untyped (no leading type byte) payload, flushes, and shuts
  /// the stream down — the whole lifecycle of a `CancelRequest` dial.
  pub(crate) async fn send_untyped_and_close(&mut self, payload: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    self.stream.send_untyped(payload).await?;
    self.stream.flush_stream().await?;
    let _ = self.stream.shutdown().await;
    self.closed = true;
    Ok(())
  }

  pub async fn connect(params: ConnectParams) -> Result<Self> {
    let stream = match params.connect_timeout {
      Some(timeout) => tokio::time::timeout(timeout, Self::dial(&params))
        .await
        .map_err(|_| Error::config(format!("connection to {}:{} timed out", params.host, params.port)))??,
      None => Self::dial(&params).await?,
    };
    let mut conn = Connection {
      stream,
      params,
      parameter_status: HashMap::new(),
      process_id: 0,
      secret_key: 0,
      tx_status: TransactionStatus::Idle,
      closed: false,
      next_statement_id: 0,
    };
    conn.startup().await?;
    Ok(conn)
  }

  async fn dial(params: &ConnectParams) -> Result<Stream> {
    if let Some(path) = &params.unix_socket {
      return Stream::connect_unix(path.clone()).await;
    }

    let addrs = resolve_addrs(&params.host, params.port).await?;
    let keepalive = params.keepalive_config();
    match params.tls_mode {
      TlsMode::Disable => Stream::connect_tcp(addrs, keepalive).await,
      #[cfg(feature = "ssl")]
      TlsMode::Allow | TlsMode::Prefer => {
        match Self::try_ssl(addrs.clone(), &params.host, keepalive, params.sslnegotiation, params.tls_mode).await {
          Ok(stream) => Ok(stream),
          Err(Error::Tls(_)) => Stream::connect_tcp(addrs, keepalive).await,
          Err(e) => Err(e),
        }
      }
      #[cfg(feature = "ssl")]
      TlsMode::Require | TlsMode::VerifyCa | TlsMode::VerifyFull => {
        Self::try_ssl(addrs, &params.host, keepalive, params.sslnegotiation, params.tls_mode).await
      }
      #[cfg(not(feature = "ssl"))]
      _ => Err(Error::config(
        "a TLS mode other than disable was requested but this build lacks the `ssl` feature",
      )),
    }
  }

  /// Builds the connector for `tls_mode`: `Require` (and the opportunistic
  /// `Allow`/`Prefer`) disable peer verification entirely, since they ask
  /// only for encryption; `VerifyCa`/`VerifyFull` leave the connector's
  /// default peer verification in place and let `Stream::connect_ssl`
  /// decide whether to also check the hostname.
  #[cfg(feature = "ssl")]
  async fn try_ssl(
    addrs: Vec<SocketAddr>,
    domain: &str,
    keepalive: KeepaliveConfig,
    negotiation: SslNegotiation,
    tls_mode: TlsMode,
  ) -> Result<Stream> {
    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| Error::Tls(e.to_string()))?;
    if !matches!(tls_mode, TlsMode::VerifyCa | TlsMode::VerifyFull) {
      builder.set_verify(SslVerifyMode::NONE);
    }
    let connector = builder.build();
    let verify_hostname = tls_mode == TlsMode::VerifyFull && domain.parse::<std::net::IpAddr>().is_err();
    Stream::connect_ssl(addrs, domain.to_string(), connector, keepalive, negotiation, verify_hostname).await
  }

  /// Opens a fresh connection to the same endpoint, performing no startup.
  /// Used by `cancel::CancelHandle` and by `listen::Listener`'s reconnect.
  pub(crate) async fn duplicate_stream(&self) -> Result<Stream> {
    self.stream.duplicate().await
  }

  pub fn backend_key(&self) -> (i32, i32) {
    (self.process_id, self.secret_key)
  }

  pub fn parameter_status(&self, name: &str) -> Option<&str> {
    self.parameter_status.get(name).map(String::as_str)
  }

  pub fn transaction_status(&self) -> TransactionStatus {
    self.tx_status
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }

  pub(crate) fn ensure_usable(&self) -> Result<()> {
    if self.closed {
      return Err(Error::Closed);
    }
    Ok(())
  }

  /// Marks the connection permanently unusable and returns the error
  /// unchanged, so call sites can write `self.stream.send(..).await.map_err(|e| self.bad(e))?`.
  fn bad(&mut self, err: Error) -> Error {
    self.closed = true;
    err
  }

  // -------------------------------------------------------------------
  // Startup and authentication
  // -------------------------------------------------------------------

  async fn startup(&mut self) -> Result<()> {
    let mut payload = BytesMut::new();
    payload.put_i32(PROTOCOL_VERSION);
    write_kv(&mut payload, "user", &self.params.user);
    write_kv(&mut payload, "database", &self.params.dbname);
    write_kv(&mut payload, "client_encoding", "UTF8");
    if let Some(app) = self.params.application_name.clone() {
      write_kv(&mut payload, "application_name", &app);
    }
    for (k, v) in self.params.extra.clone() {
      write_kv(&mut payload, &k, &v);
    }
    payload.put_u8(0);

    self.stream.send_untyped(&payload).await.map_err(|e| self.bad(e))?;
    self.stream.flush_stream().await.map_err(|e| self.bad(e))?;

    loop {
      let (kind, body) = self.stream.recv1().await.map_err(|e| self.bad(e))?;
      match kind {
        b'R' => self.authenticate(body).await.map_err(|e| self.bad(e))?,
        b'S' => self.record_parameter_status(body)?,
        b'K' => self.record_backend_key(body)?,
        b'Z' => {
          self.tx_status = TransactionStatus::from_byte(body[0])?;
          break;
        }
        b'E' => {
          let err = self.stream_db_error(body)?;
          return Err(self.bad(Error::Db(err)));
        }
        b'N' => debug!(notice = %self.stream_db_error(body)?, "startup notice"),
        other => return Err(self.bad(Error::protocol(format!("unexpected message {other:?} during startup")))),
      }
    }
    debug!(process_id = self.process_id, "connection ready");
    Ok(())
  }

  fn stream_db_error(&self, body: Bytes) -> Result<DbError> {
    let mut body = body;
    body.pg_get_backend_error()
  }

  fn record_parameter_status(&mut self, mut body: Bytes) -> Result<()> {
    let name = body.pg_get_null_terminated_string()?;
    let value = body.pg_get_rest_string()?;
    debug!(%name, %value, "parameter status");
    self.parameter_status.insert(name, value);
    Ok(())
  }

  fn record_backend_key(&mut self, mut body: Bytes) -> Result<()> {
    self.process_id = body.pg_get_i32()?;
    self.secret_key = body.pg_get_i32()?;
    Ok(())
  }

  async fn authenticate(&mut self, mut body: Bytes) -> Result<()> {
    match body.pg_get_i32()? {
      0 => Ok(()),
      3 => {
        let password = self.params.password.clone().unwrap_or_default();
        let mut payload = password.into_bytes();
        payload.push(0);
        self.send_password(&payload).await?;
        self.expect_auth_ok().await
      }
      5 => {
        let salt = body.pg_get_fixed_length_bytes(4)?;
        let password = self.params.password.clone().unwrap_or_default();
        let hashed = auth::md5_password(&self.params.user, &password, &salt);
        let mut payload = hashed.into_bytes();
        payload.push(0);
        self.send_password(&payload).await?;
        self.expect_auth_ok().await
      }
      10 => self.authenticate_scram().await,
      code @ (7 | 8 | 9) => Err(Error::auth(format!(
        "server requested GSS/SSPI authentication (code {code}), which has no built-in provider in this driver"
      ))),
      other => Err(Error::auth(format!("unsupported authentication method {other}"))),
    }
  }

  async fn send_password(&mut self, payload: &[u8]) -> Result<()> {
    self.stream.send(b'p', payload).await?;
    self.stream.flush_stream().await
  }

  async fn expect_auth_ok(&mut self) -> Result<()> {
    let (kind, mut body) = self.stream.recv1().await?;
    match kind {
      b'R' => match body.pg_get_i32()? {
        0 => Ok(()),
        other => Err(Error::auth(format!("expected AuthenticationOk, got code {other}"))),
      },
      b'E' => Err(Error::Db(body.pg_get_backend_error()?)),
      other => Err(Error::protocol(format!("unexpected message {other:?} while authenticating"))),
    }
  }

  async fn authenticate_scram(&mut self) -> Result<()> {
    let password = self.params.password.clone().unwrap_or_default();
    let mut client = ScramClient::new(&password);

    let client_first = client.client_first();
    let mut payload = BytesMut::new();
    payload.put_slice(b"SCRAM-SHA-256\0");
    payload.put_i32(client_first.len() as i32);
    payload.put_slice(client_first.as_bytes());
    self.stream.send(b'p', &payload).await?;
    self.stream.flush_stream().await?;

    let server_first = self.expect_sasl_step(11).await?;
    let client_final = client.client_final(&server_first)?;
    self.stream.send(b'p', client_final.as_bytes()).await?;
    self.stream.flush_stream().await?;

    let server_final = self.expect_sasl_step(12).await?;
    client.verify_server_final(&server_final)?;

    self.expect_auth_ok().await
  }

  async fn expect_sasl_step(&mut self, expected_code: i32) -> Result<String> {
    let (kind, mut body) = self.stream.recv1().await?;
    match kind {
      b'R' => {
        let code = body.pg_get_i32()?;
        if code != expected_code {
          return Err(Error::auth(format!("expected SASL step {expected_code}, got {code}")));
        }
        body.pg_get_rest_string()
      }
      b'E' => Err(Error::Db(body.pg_get_backend_error()?)),
      other => Err(Error::protocol(format!("unexpected message {other:?} during SASL exchange"))),
    }
  }

  // -------------------------------------------------------------------
  // Simple query
  // -------------------------------------------------------------------

  pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
    self.ensure_usable()?;

    let mut payload = BytesMut::with_capacity(sql.len() + 1);
    payload.put_slice(sql.as_bytes());
    payload.put_u8(0);
    self.stream.send(b'Q', &payload).await.map_err(|e| self.bad(e))?;
    self.stream.flush_stream().await.map_err(|e| self.bad(e))?;

    let mut results = Vec::new();
    let mut columns = Arc::new(Vec::new());
    let mut rows = Vec::new();

    loop {
      let (kind, body) = self.stream.recv1().await.map_err(|e| self.bad(e))?;
      match kind {
        b'T' => {
          columns = Arc::new(parse_row_description(body)?);
          rows = Vec::new();
        }
        b'D' => rows.push(parse_data_row(&columns, body)?),
        b'C' => {
          results.push(QueryResult {
            columns: columns.as_ref().clone(),
            rows: std::mem::take(&mut rows),
            rows_affected: parse_command_complete(body)?,
          });
        }
        b'I' => results.push(QueryResult::default()),
        b'Z' => {
          self.tx_status = TransactionStatus::from_byte(body[0])?;
          break;
        }
        b'E' => {
          let db_err = self.stream_db_error(body)?.with_query(sql);
          if matches!(db_err.severity, Severity::Fatal | Severity::Panic) {
            self.closed = true;
          }
          self.drain_to_ready().await.map_err(|e| self.bad(e))?;
          return Err(Error::Db(db_err));
        }
        b'N' => warn!(notice = %self.stream_db_error(body)?, "server notice"),
        other => return Err(self.bad(Error::protocol(format!("unexpected message {other:?} in simple query")))),
      }
    }
    Ok(results)
  }

  pub(crate) async fn drain_to_ready(&mut self) -> Result<()> {
    loop {
      let (kind, body) = self.stream.recv1().await?;
      if kind == b'Z' {
        self.tx_status = TransactionStatus::from_byte(body[0])?;
        return Ok(());
      }
    }
  }

  pub async fn ping(&mut self) -> Result<()> {
    self.simple_query("SELECT 1").await.map(|_| ())
  }

  // -------------------------------------------------------------------
  // Extended query framing, driven by `stmt.rs` / `copy.rs`
  // -------------------------------------------------------------------

  pub(crate) async fn send_parse(&mut self, name: &str, sql: &str, param_types: &[i32]) -> Result<()> {
    self.ensure_usable()?;
    let mut payload = BytesMut::new();
    write_cstr(&mut payload, name);
    write_cstr(&mut payload, sql);
    payload.put_i16(param_types.len() as i16);
    for t in param_types {
      payload.put_i32(*t);
    }
    self.stream.send(b'P', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_describe_statement(&mut self, name: &str) -> Result<()> {
    self.send_describe(b'S', name).await
  }

  pub(crate) async fn send_describe_portal(&mut self, name: &str) -> Result<()> {
    self.send_describe(b'P', name).await
  }

  async fn send_describe(&mut self, target: u8, name: &str) -> Result<()> {
    self.ensure_usable()?;
    let mut payload = BytesMut::new();
    payload.put_u8(target);
    write_cstr(&mut payload, name);
    self.stream.send(b'D', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_bind(
    &mut self,
    portal: &str,
    statement: &str,
    param_formats: &[i16],
    params: &[Option<Vec<u8>>],
    result_formats: &[i16],
  ) -> Result<()> {
    self.ensure_usable()?;
    if params.len() > 65535 {
      return Err(Error::config("a single Bind cannot carry more than 65535 parameters"));
    }
    let mut payload = BytesMut::new();
    write_cstr(&mut payload, portal);
    write_cstr(&mut payload, statement);
    payload.put_i16(param_formats.len() as i16);
    for f in param_formats {
      payload.put_i16(*f);
    }
    payload.put_i16(params.len() as i16);
    for p in params {
      match p {
        None => payload.put_i32(-1),
        Some(bytes) => {
          payload.put_i32(bytes.len() as i32);
          payload.put_slice(bytes);
        }
      }
    }
    payload.put_i16(result_formats.len() as i16);
    for f in result_formats {
      payload.put_i16(*f);
    }
    self.stream.send(b'B', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_execute(&mut self, portal: &str, max_rows: i32) -> Result<()> {
    self.ensure_usable()?;
    let mut payload = BytesMut::new();
    write_cstr(&mut payload, portal);
    payload.put_i32(max_rows);
    self.stream.send(b'E', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_close_statement(&mut self, name: &str) -> Result<()> {
    self.send_close(b'S', name).await
  }

  pub(crate) async fn send_close_portal(&mut self, name: &str) -> Result<()> {
    self.send_close(b'P', name).await
  }

  async fn send_close(&mut self, target: u8, name: &str) -> Result<()> {
    self.ensure_usable()?;
    let mut payload = BytesMut::new();
    payload.put_u8(target);
    write_cstr(&mut payload, name);
    self.stream.send(b'C', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_copy_data(&mut self, bytes: &[u8]) -> Result<()> {
    self.ensure_usable()?;
    self.stream.send(b'd', bytes).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_copy_done(&mut self) -> Result<()> {
    self.ensure_usable()?;
    self.stream.send(b'c', &[]).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_copy_fail(&mut self, message: &str) -> Result<()> {
    self.ensure_usable()?;
    let mut payload = BytesMut::new();
    write_cstr(&mut payload, message);
    self.stream.send(b'f', &payload).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn send_sync(&mut self) -> Result<()> {
    self.ensure_usable()?;
    self.stream.send(b'S', &[]).await.map_err(|e| self.bad(e))
  }

  pub(crate) async fn flush_pipeline(&mut self) -> Result<()> {
    self.stream.flush_stream().await.map_err(|e| self.bad(e))
  }

  /// Reads the next frame off the wire, marking the connection bad on any
  /// I/O failure. Used by `stmt.rs`/`copy.rs`/`cancel.rs` to drive their own
  /// sub-protocols after the low-level frames above have been sent.
  pub(crate) async fn recv_frame(&mut self) -> Result<(u8, Bytes)> {
    self.stream.recv1().await.map_err(|e| self.bad(e))
  }

  pub(crate) fn note_ready_for_query(&mut self, status_byte: u8) -> Result<()> {
    self.tx_status = TransactionStatus::from_byte(status_byte)?;
    Ok(())
  }

  pub(crate) fn decode_error(&self, body: Bytes) -> Result<DbError> {
    self.stream_db_error(body)
  }

  pub(crate) fn mark_bad(&mut self) {
    self.closed = true;
  }

  /// A fresh, connection-scoped name for a client-assigned prepared
  /// statement.
  pub(crate) fn next_statement_name(&mut self) -> String {
    self.next_statement_id += 1;
    format!("pq_stmt_{}", self.next_statement_id)
  }
}

async fn resolve_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
  let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
    .await
    .map_err(Error::from)?
    .collect();
  if addrs.is_empty() {
    return Err(Error::config(format!("could not resolve host {host:?}")));
  }
  Ok(addrs)
}

fn write_kv(buf: &mut BytesMut, key: &str, value: &str) {
  write_cstr(buf, key);
  write_cstr(buf, value);
}

fn write_cstr(buf: &mut BytesMut, s: &str) {
  buf.put_slice(s.as_bytes());
  buf.put_u8(0);
}

pub(crate) fn parse_row_description(mut body: Bytes) -> Result<Vec<Column>> {
  let count = body.pg_get_i16()?.max(0) as usize;
  let mut columns = Vec::with_capacity(count);
  for _ in 0..count {
    columns.push(Column {
      name: body.pg_get_null_terminated_string()?,
      table_oid: body.pg_get_i32()?,
      column_id: body.pg_get_i16()?,
      type_oid: body.pg_get_i32()?,
      type_size: body.pg_get_i16()?,
      type_modifier: body.pg_get_i32()?,
      format: body.pg_get_i16()?,
    });
  }
  Ok(columns)
}

pub(crate) fn parse_data_row(columns: &Arc<Vec<Column>>, mut body: Bytes) -> Result<Row> {
  let count = body.pg_get_i16()?.max(0) as usize;
  let mut values = Vec::with_capacity(count);
  for i in 0..count {
    let len = body.pg_get_i32()?;
    if len < 0 {
      values.push(Value::Null);
      continue;
    }
    let raw = body.pg_get_fixed_length_bytes(len as usize)?;
    let type_oid = columns.get(i).map(|c| c.type_oid).unwrap_or(codec::oid::TEXT);
    values.push(codec::decode(type_oid, &raw)?);
  }
  Ok(Row {
    columns: columns.clone(),
    values,
  })
}

pub(crate) fn parse_command_complete(mut body: Bytes) -> Result<Option<u64>> {
  let tag = body.pg_get_rest_string()?;
  Ok(tag.rsplit(' ').next().and_then(|n| n.parse().ok()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transaction_status_from_byte() {
    assert_eq!(TransactionStatus::from_byte(b'I').unwrap(), TransactionStatus::Idle);
    assert_eq!(TransactionStatus::from_byte(b'T').unwrap(), TransactionStatus::InTransaction);
    assert_eq!(TransactionStatus::from_byte(b'E').unwrap(), TransactionStatus::Failed);
    assert!(TransactionStatus::from_byte(b'?').is_err());
  }

  #[test]
  fn parses_row_description_and_data_row() {
    let mut rd = BytesMut::new();
    rd.put_i16(1);
    write_cstr(&mut rd, "id");
    rd.put_i32(0);
    rd.put_i16(1);
    rd.put_i32(codec::oid::INT4);
    rd.put_i16(4);
    rd.put_i32(-1);
    rd.put_i16(0);
    let columns = Arc::new(parse_row_description(rd.freeze()).unwrap());
    assert_eq!(columns[0].name, "id");

    let mut dr = BytesMut::new();
    dr.put_i16(1);
    dr.put_i32(3);
    dr.put_slice(b"123");
    let row = parse_data_row(&columns, dr.freeze()).unwrap();
    assert_eq!(row.get(0), Some(&Value::Int(123)));
    assert_eq!(row.column("id"), Some(&Value::Int(123)));
  }

  #[test]
  fn parses_command_complete_tag() {
    let mut body = BytesMut::new();
    body.put_slice(b"INSERT 0 5\0");
    assert_eq!(parse_command_complete(body.freeze()).unwrap(), Some(5));
  }

  #[tokio::test]
  async fn bind_parameter_limit_rejects_over_65535() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      use tokio::io::AsyncReadExt;
      if let Ok((mut sock, _)) = listener.accept().await {
        let mut buf = [0u8; 4096];
        while !matches!(sock.read(&mut buf).await, Ok(0) | Err(_)) {}
      }
    });

    let stream = Stream::connect_tcp(vec![addr], KeepaliveConfig::default()).await.unwrap();
    let mut conn = Connection::bare(stream);

    let over_limit: Vec<Option<Vec<u8>>> = vec![None; 65536];
    let err = conn.send_bind("", "", &[], &over_limit, &[]).await.unwrap_err();
    assert!(err.to_string().contains("65535"));

    let at_limit: Vec<Option<Vec<u8>>> = vec![None; 65535];
    assert!(conn.send_bind("", "", &[], &at_limit, &[]).await.is_ok());
  }
}
