//! LISTEN/NOTIFY: a dedicated connection running a receive loop that
//! demultiplexes notifications to per-channel subscribers and reconnects
//! with bounded exponential back-off.
//!
//! `Listener` is a cheap, cloneable handle; the connection itself and its
//! subscriber bookkeeping live in `ListenerTask`, which a caller hands to
//! `tokio::spawn`. `listen`/`unlisten` on the handle post a command onto an
//! internal channel that the task's loop answers through a one-shot reply,
//! so subscribing works the same before or after the task is spawned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{info, warn};

use crate::buf_ext::BufExt;
use crate::conn::{Connection, ConnectParams};
use crate::copy::quote_ident;
use crate::error::{Error, Result};

const MIN_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct Notification {
  pub process_id: i32,
  pub channel: String,
  pub payload: String,
}

enum Command {
  Listen(String, oneshot::Sender<Result<mpsc::UnboundedReceiver<Notification>>>),
  Unlisten(String, oneshot::Sender<Result<()>>),
}

/// Handle side: `Clone`, holds no connection of its own. Safe to keep
/// around (and keep calling `listen`/`unlisten` on) after the matching
/// `ListenerTask` has been moved into a spawned task.
#[derive(Clone)]
pub struct Listener {
  commands: mpsc::UnboundedSender<Command>,
  closed: Arc<AtomicBool>,
  close_signal: Arc<Notify>,
}

/// Owns the connection and subscriber map. Not `Clone` — there is exactly
/// one task driving the receive loop at a time.
pub struct ListenerTask {
  conn: Connection,
  params: ConnectParams,
  channels: HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>,
  commands: mpsc::UnboundedReceiver<Command>,
  commands_open: bool,
  closed: Arc<AtomicBool>,
  close_signal: Arc<Notify>,
}

impl Listener {
  /// Dials the connection and returns the handle plus the task that drives
  /// it. Call `.run()` on the task (typically via `tokio::spawn`) to start
  /// delivering notifications.
  pub async fn connect(params: ConnectParams) -> Result<(Listener, ListenerTask)> {
    let conn = Connection::connect(params.clone()).await?;
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let close_signal = Arc::new(Notify::new());

    let handle = Listener {
      commands: commands_tx,
      closed: closed.clone(),
      close_signal: close_signal.clone(),
    };
    let task = ListenerTask {
      conn,
      params,
      channels: HashMap::new(),
      commands: commands_rx,
      commands_open: true,
      closed,
      close_signal,
    };
    Ok((handle, task))
  }

  /// Subscribes to `channel`, issuing `LISTEN` only if this is the first
  /// subscriber. Returns a receiver fed by the task's dispatch loop.
  pub async fn listen(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Notification>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .commands
      .send(Command::Listen(channel.to_string(), reply_tx))
      .map_err(|_| Error::Closed)?;
    reply_rx.await.map_err(|_| Error::Closed)?
  }

  /// Drops all subscribers for `channel` and issues `UNLISTEN`.
  pub async fn unlisten(&self, channel: &str) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .commands
      .send(Command::Unlisten(channel.to_string(), reply_tx))
      .map_err(|_| Error::Closed)?;
    reply_rx.await.map_err(|_| Error::Closed)?
  }

  /// Idempotent; unblocks the task's receive loop cleanly.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.close_signal.notify_waiters();
  }
}

impl ListenerTask {
  /// Runs the receive loop until `Listener::close()` is called, reconnecting
  /// on any I/O failure with exponential back-off (3s min, 15min max,
  /// doubling). Also answers `listen`/`unlisten` commands from every clone
  /// of the handle this task was created alongside.
  pub async fn run(mut self) -> Result<()> {
    loop {
      if self.closed.load(Ordering::Acquire) {
        return Ok(());
      }
      match self.receive_loop().await {
        Ok(()) => return Ok(()),
        Err(_) if self.closed.load(Ordering::Acquire) => return Ok(()),
        Err(e) => {
          warn!(error = %e, "listener connection lost, reconnecting");
          self.reconnect_with_backoff().await;
        }
      }
    }
  }

  async fn receive_loop(&mut self) -> Result<()> {
    loop {
      tokio::select! {
        frame = self.conn.recv_frame() => {
          let (kind, body) = frame?;
          if kind == b'A' {
            self.dispatch(parse_notification(body)?);
          }
        }
        command = self.commands.recv(), if self.commands_open => {
          match command {
            Some(cmd) => self.handle_command(cmd).await,
            None => self.commands_open = false,
          }
        }
        _ = self.close_signal.notified() => return Ok(()),
      }
    }
  }

  async fn handle_command(&mut self, command: Command) {
    match command {
      Command::Listen(channel, reply) => {
        let result = self.do_listen(&channel).await;
        let _ = reply.send(result);
      }
      Command::Unlisten(channel, reply) => {
        let result = self.do_unlisten(&channel).await;
        let _ = reply.send(result);
      }
    }
  }

  async fn do_listen(&mut self, channel: &str) -> Result<mpsc::UnboundedReceiver<Notification>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let first_subscriber = !self.channels.contains_key(channel);
    self.channels.entry(channel.to_string()).or_default().push(tx);
    if first_subscriber {
      self.conn.simple_query(&format!("LISTEN {}", quote_ident(channel))).await?;
    }
    Ok(rx)
  }

  async fn do_unlisten(&mut self, channel: &str) -> Result<()> {
    self.channels.remove(channel);
    self.conn.simple_query(&format!("UNLISTEN {}", quote_ident(channel))).await?;
    Ok(())
  }

  fn dispatch(&mut self, notification: Notification) {
    if let Some(subscribers) = self.channels.get_mut(&notification.channel) {
      subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }
  }

  async fn reconnect_with_backoff(&mut self) {
    let mut delay = MIN_BACKOFF;
    loop {
      if self.closed.load(Ordering::Acquire) {
        return;
      }
      match Connection::connect(self.params.clone()).await {
        Ok(conn) => {
          self.conn = conn;
          if self.resubscribe().await.is_ok() {
            info!("listener reconnected");
            self.deliver_reconnect_notifications();
            return;
          }
        }
        Err(e) => warn!(error = %e, delay_secs = delay.as_secs(), "listener reconnect attempt failed"),
      }
      tokio::time::sleep(delay).await;
      delay = (delay * 2).min(MAX_BACKOFF);
    }
  }

  async fn resubscribe(&mut self) -> Result<()> {
    for channel in self.channels.keys().cloned().collect::<Vec<_>>() {
      self.conn.simple_query(&format!("LISTEN {}", quote_ident(&channel))).await?;
    }
    Ok(())
  }

  /// Synthetic pid=-1, empty-payload notification delivered to every
  /// subscriber after a successful reconnect, so applications can resync
  /// any events missed during the outage.
  fn deliver_reconnect_notifications(&mut self) {
    for (channel, subscribers) in self.channels.iter_mut() {
      let notification = Notification {
        process_id: -1,
        channel: channel.clone(),
        payload: String::new(),
      };
      subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }
  }
}

fn parse_notification(mut body: Bytes) -> Result<Notification> {
  let process_id = body.pg_get_i32()?;
  let channel = body.pg_get_null_terminated_string()?;
  let payload = body.pg_get_rest_string()?;
  Ok(Notification {
    process_id,
    channel,
    payload,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::BufMut;

  #[test]
  fn parses_notification_payload() {
    let mut body = bytes::BytesMut::new();
    body.put_i32(42);
    body.put_slice(b"ch\0");
    body.put_slice(b"payload");
    let n = parse_notification(body.freeze()).unwrap();
    assert_eq!(n.process_id, 42);
    assert_eq!(n.channel, "ch");
    assert_eq!(n.payload, "payload");
  }

  #[test]
  fn backoff_doubles_and_caps() {
    let mut delay = MIN_BACKOFF;
    for _ in 0..20 {
      delay = (delay * 2).min(MAX_BACKOFF);
    }
    assert_eq!(delay, MAX_BACKOFF);
  }
}
