//! A PostgreSQL wire-protocol client: connection lifecycle, authentication,
//! simple and extended query execution, COPY-IN streaming, LISTEN/NOTIFY,
//! and out-of-band cancellation, speaking protocol version 3.0 directly
//! over TCP, Unix sockets, or TLS.

mod auth;
pub mod cancel;
pub mod codec;
pub mod conn;
pub mod copy;
mod debug;
pub mod dsn;
pub mod error;
pub mod listen;
pub mod pgpass;
pub mod stmt;
mod stream;

mod buf_ext;

pub use cancel::{watch as watch_cancellation, CancelHandle};
pub use conn::{Column, Connection, ConnectParams, QueryResult, Row, SslNegotiation, TlsMode, TransactionStatus};
pub use copy::{quote_ident, CopyIn};
pub use error::{DbError, Error, Result, Severity};
pub use listen::{Listener, ListenerTask, Notification};
pub use stmt::{Rows, Statement};
