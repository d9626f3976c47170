//! Duplex byte stream over TCP, Unix domain socket, or TLS, plus the
//! length-prefixed message framing shared by every PostgreSQL wire message
//! after the startup packet.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

#[cfg(feature = "ssl")]
use openssl::ssl::SslConnector;
#[cfg(feature = "ssl")]
use tokio_openssl::SslStream;

use crate::debug;
use crate::error::{Error, Result};

/// `SSLRequest`'s sentinel length/code pair.
pub(crate) const SSL_REQUEST_CODE: i32 = 80877103;

/// `keepalives`/`keepalives_interval` DSN keys, applied to the raw TCP
/// socket via `socket2` right after connect. Unix sockets ignore this.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepaliveConfig {
  pub enabled: bool,
  pub interval: Option<Duration>,
}

/// `sslnegotiation` DSN key: whether to probe with `SSLRequest`
/// first (the default, works against any server) or skip straight to a TLS
/// handshake on the raw socket (`direct`, saves a round-trip against a
/// server known to speak TLS-on-connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslNegotiation {
  Postgres,
  Direct,
}

impl Default for SslNegotiation {
  fn default() -> Self {
    SslNegotiation::Postgres
  }
}

#[derive(Debug)]
pub enum Stream {
  Tcp(BufStream<TcpStream>, Vec<SocketAddr>, KeepaliveConfig),
  Unix(BufStream<UnixStream>, PathBuf),
  #[cfg(feature = "ssl")]
  Ssl(
    Box<SslStream<BufStream<TcpStream>>>,
    Vec<SocketAddr>,
    String,
    SslConnector,
    KeepaliveConfig,
    SslNegotiation,
    bool,
  ),
}

impl Stream {
  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>, keepalive: KeepaliveConfig) -> Result<Self> {
    let addrs = addrs.into();
    let raw = TcpStream::connect(addrs.as_slice()).await?;
    apply_keepalive(&raw, &keepalive)?;
    Ok(Self::Tcp(BufStream::new(raw), addrs, keepalive))
  }

  pub async fn connect_unix(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let s = UnixStream::connect(&path).await.map(BufStream::new)?;
    Ok(Self::Unix(s, path))
  }

  #[cfg(feature = "ssl")]
  pub async fn connect_ssl(
    addrs: impl Into<Vec<SocketAddr>>,
    domain: impl Into<String>,
    ssl_connector: SslConnector,
    keepalive: KeepaliveConfig,
    negotiation: SslNegotiation,
    verify_hostname: bool,
  ) -> Result<Self> {
    let addrs = addrs.into();
    let domain = domain.into();
    let raw = TcpStream::connect(addrs.as_slice()).await?;
    apply_keepalive(&raw, &keepalive)?;
    let mut s = BufStream::new(raw);

    if negotiation == SslNegotiation::Postgres {
      s.write_i32(8).await?;
      s.write_i32(SSL_REQUEST_CODE).await?;
      s.flush().await?;

      match s.read_u8().await? {
        b'S' => {}
        b'N' => return Err(Error::Tls("server refused SSL negotiation".to_string())),
        code => {
          return Err(Error::protocol(format!(
            "unexpected response to SSLRequest: {:?}",
            char::from(code)
          )))
        }
      }
    }

    let mut configuration = ssl_connector
      .configure()
      .map_err(|e| Error::Tls(format!("failed to create ssl configuration: {e}")))?;
    configuration.verify_hostname(verify_hostname);
    let ssl = configuration
      .into_ssl(domain.as_str())
      .map_err(|e| Error::Tls(format!("failed to create ssl context: {e}")))?;
    let mut ssl_stream = SslStream::new(ssl, s).map_err(|e| Error::Tls(format!("failed to create ssl stream: {e}")))?;
    Pin::new(&mut ssl_stream)
      .connect()
      .await
      .map_err(|e| Error::Tls(format!("tls handshake failed: {e}")))?;
    Ok(Self::Ssl(
      Box::new(ssl_stream),
      addrs,
      domain,
      ssl_connector,
      keepalive,
      negotiation,
      verify_hostname,
    ))
  }

  /// Opens a fresh connection to the same endpoint this stream was
  /// established against. Used for out-of-band `CancelRequest` dials
  /// and for the listener's reconnect loop.
  pub async fn duplicate(&self) -> Result<Self> {
    match self {
      Stream::Tcp(_, addrs, keepalive) => Self::connect_tcp(addrs.clone(), *keepalive).await,
      Stream::Unix(_, path) => Self::connect_unix(path.clone()).await,
      #[cfg(feature = "ssl")]
      Stream::Ssl(_, addrs, domain, connector, keepalive, negotiation, verify_hostname) => {
        Self::connect_ssl(addrs.clone(), domain.clone(), connector.clone(), *keepalive, *negotiation, *verify_hostname).await
      }
    }
  }

  /// Writes one length-prefixed typed message: `<type:1><len:4><payload>`.
  pub async fn send(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
    debug::dump_frame("->", Some(kind), payload);
    let len = (payload.len() + 4) as i32;
    self.write_u8(kind).await?;
    self.write_i32(len).await?;
    self.write_all(payload).await?;
    Ok(())
  }

  /// Writes the startup message, which has no leading type byte.
  pub async fn send_untyped(&mut self, payload: &[u8]) -> Result<()> {
    debug::dump_frame("->", None, payload);
    let len = (payload.len() + 4) as i32;
    self.write_i32(len).await?;
    self.write_all(payload).await?;
    Ok(())
  }

  pub async fn flush_stream(&mut self) -> Result<()> {
    self.flush().await?;
    Ok(())
  }

  /// Reads one length-prefixed typed message and returns its type byte and
  /// payload (length field excluded).
  pub async fn recv1(&mut self) -> Result<(u8, Bytes)> {
    let kind = self.read_u8().await?;
    let len = self.read_i32().await?;
    let len = len
      .checked_sub(4)
      .filter(|n| *n >= 0)
      .ok_or_else(|| Error::protocol(format!("invalid message length {len}")))?;
    let len = len as usize;
    let mut buffer = BytesMut::with_capacity(len);
    if len > 0 {
      while buffer.len() < len {
        let n = self.read_buf(&mut buffer).await?;
        if n == 0 {
          return Err(Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)));
        }
      }
    }
    let body = buffer.freeze();
    debug::dump_frame("<-", Some(kind), &body);
    Ok((kind, body))
  }
}

impl AsyncRead for Stream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
    match self.get_mut() {
      Stream::Tcp(s, _, _) => Pin::new(s).poll_read(cx, buf),
      Stream::Unix(s, _) => Pin::new(s).poll_read(cx, buf),
      #[cfg(feature = "ssl")]
      Stream::Ssl(s, _, _, _, _, _, _) => Pin::new(s.as_mut()).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for Stream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
    match self.get_mut() {
      Stream::Tcp(s, _, _) => Pin::new(s).poll_write(cx, buf),
      Stream::Unix(s, _) => Pin::new(s).poll_write(cx, buf),
      #[cfg(feature = "ssl")]
      Stream::Ssl(s, _, _, _, _, _, _) => Pin::new(s.as_mut()).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    match self.get_mut() {
      Stream::Tcp(s, _, _) => Pin::new(s).poll_flush(cx),
      Stream::Unix(s, _) => Pin::new(s).poll_flush(cx),
      #[cfg(feature = "ssl")]
      Stream::Ssl(s, _, _, _, _, _, _) => Pin::new(s.as_mut()).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    match self.get_mut() {
      Stream::Tcp(s, _, _) => Pin::new(s).poll_shutdown(cx),
      Stream::Unix(s, _) => Pin::new(s).poll_shutdown(cx),
      #[cfg(feature = "ssl")]
      Stream::Ssl(s, _, _, _, _, _, _) => Pin::new(s.as_mut()).poll_shutdown(cx),
    }
  }
}

/// Configures `SO_KEEPALIVE` and (where supported) `TCP_KEEPINTVL` on a raw
/// TCP socket via `socket2`'s `SockRef::from(&tokio_stream)`, reaching
/// socket options tokio itself doesn't expose.
fn apply_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> Result<()> {
  if !config.enabled {
    return Ok(());
  }
  let sock = SockRef::from(stream);
  let mut ka = TcpKeepalive::new();
  if let Some(interval) = config.interval {
    ka = ka.with_interval(interval);
  }
  sock.set_tcp_keepalive(&ka).map_err(Error::Io)?;
  Ok(())
}
