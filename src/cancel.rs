//! Out-of-band query cancellation: dial a second connection to the same
//! endpoint, send the 16-byte `CancelRequest`, and shut down. A watcher
//! task races a cancellation token against operation completion.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use crate::conn::Connection;
use crate::error::Result;

const CANCEL_REQUEST_CODE: i32 = 80_877_102;
const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// A lightweight, `Clone`-free handle carrying everything needed to cancel
/// the query running on the connection it was taken from.
pub struct CancelHandle {
  conn: Connection,
  process_id: i32,
  secret_key: i32,
}

impl CancelHandle {
  /// Captures a handle good for canceling whatever query `conn` is (or
  /// will be) running. Does not borrow `conn` — it dials its own socket
  /// when `cancel()` is called.
  pub async fn new(conn: &Connection) -> Result<Self> {
    let (process_id, secret_key) = conn.backend_key();
    let stream = conn.duplicate_stream().await?;
    Ok(CancelHandle {
      conn: Connection::bare(stream),
      process_id,
      secret_key,
    })
  }

  /// Sends exactly one `CancelRequest` and closes the dial connection.
  /// Best-effort: the server may have already finished the query, in which
  /// case the cancellation is simply a no-op on the server's side.
  pub async fn cancel(mut self) -> Result<()> {
    let mut payload = BytesMut::with_capacity(12);
    payload.put_i32(CANCEL_REQUEST_CODE);
    payload.put_i32(self.process_id);
    payload.put_i32(self.secret_key);
    self.conn.send_untyped_and_close(&payload).await?;
    debug!(process_id = self.process_id, "sent CancelRequest");
    Ok(())
  }
}

/// Races `operation` against `cancel_token`: if the token resolves first,
/// fires `handle` (captured from the same connection before `operation`
/// took its mutable borrow) and then still awaits `operation` so its (now
/// `query_canceled`) error surfaces to the caller. Bounded by
/// `DEFAULT_CANCEL_TIMEOUT` so a hung dial cannot wedge the watcher
/// forever.
///
/// `handle` is captured separately, rather than this function taking
/// `&Connection` itself, because `operation` is almost always a future
/// that holds `&mut Connection` for the query it is driving — the caller
/// builds the handle first, then the operation, then races the two.
pub async fn watch<F, T>(handle: CancelHandle, cancel_token: impl Future<Output = ()>, operation: F) -> Result<T>
where
  F: Future<Output = Result<T>>,
{
  tokio::pin!(operation);
  tokio::select! {
    result = &mut operation => result,
    _ = cancel_token => {
      match tokio::time::timeout(DEFAULT_CANCEL_TIMEOUT, handle.cancel()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to send CancelRequest"),
        Err(_) => warn!("CancelRequest dial timed out"),
      }
      operation.await
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancel_request_code_matches_protocol_sentinel() {
    assert_eq!(CANCEL_REQUEST_CODE, 80_877_102);
  }
}
