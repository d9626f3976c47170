use std::time::Duration;

use pq::cancel::CancelHandle;
use pq::codec::Value;
use pq::conn::{ConnectParams, Connection, TransactionStatus};
use pq::copy::quote_ident;
use pq::listen::{Listener, ListenerTask};

#[tokio::test]
async fn test_ping() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  assert!(conn.ping().await.is_ok());
}

#[tokio::test]
async fn test_round_trip_scalars() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  let results = conn
    .simple_query("SELECT E'\\\\x000102'::bytea, 'foobar'::text, NULL::integer, 123, 3.14::float8, false")
    .await
    .unwrap();

  let row = &results[0].rows[0];
  assert_eq!(row.get(0), Some(&Value::Bytes(vec![0x00, 0x01, 0x02])));
  assert_eq!(row.get(1), Some(&Value::Text("foobar".to_string())));
  assert_eq!(row.get(2), Some(&Value::Null));
  assert_eq!(row.get(3), Some(&Value::Int(123)));
  assert_eq!(row.get(4), Some(&Value::Float(3.14)));
  assert_eq!(row.get(5), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn test_transaction_rollback_visibility() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  conn
    .simple_query("CREATE TEMP TABLE rollback_check (i int)")
    .await
    .unwrap();
  conn
    .simple_query("BEGIN; INSERT INTO rollback_check VALUES (1); ROLLBACK;")
    .await
    .unwrap();
  assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

  let results = conn.simple_query("SELECT * FROM rollback_check").await.unwrap();
  assert!(results[0].rows.is_empty());
}

#[tokio::test]
async fn test_query_cancellation() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  let cancel_handle = CancelHandle::new(&conn).await.unwrap();

  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel_handle.cancel().await.unwrap();
  });

  let started = tokio::time::Instant::now();
  let err = conn.simple_query("SELECT pg_sleep(1000)").await.unwrap_err();
  assert!(started.elapsed() < Duration::from_millis(500));
  assert!(err.to_string().contains("57014"));
}

#[tokio::test]
async fn test_listen_notify() {
  let (listener, task): (Listener, ListenerTask) = Listener::connect(default_params()).await.unwrap();
  let mut notifications = listener.listen("ch").await.unwrap();

  let listener_task = tokio::spawn(async move {
    task.run().await.unwrap();
  });

  let mut notifier = Connection::connect(default_params()).await.unwrap();
  notifier.simple_query("NOTIFY \"ch\", 'payload'").await.unwrap();

  let notification = notifications.recv().await.unwrap();
  assert_eq!(notification.channel, "ch");
  assert_eq!(notification.payload, "payload");

  notifier.simple_query("NOTIFY \"ch\"").await.unwrap();
  let notification = notifications.recv().await.unwrap();
  assert_eq!(notification.payload, "");

  // Subscribing after the task has been spawned is the whole point of
  // splitting the handle from the task: `listener` was moved nowhere above.
  let mut more_notifications = listener.listen("ch2").await.unwrap();
  notifier.simple_query("NOTIFY \"ch2\", 'later'").await.unwrap();
  let notification = more_notifications.recv().await.unwrap();
  assert_eq!(notification.channel, "ch2");
  assert_eq!(notification.payload, "later");

  listener.close();
  listener_task.abort();
}

#[tokio::test]
async fn test_scram_success_and_failure() {
  let mut params = default_params();
  params.user = "scram_user".to_string();
  params.password = Some("se%r-*tp\u{3a3}\u{3b2}".to_string());
  let mut conn = Connection::connect(params.clone()).await.unwrap();
  assert!(conn.ping().await.is_ok());

  params.password = Some("incorrect".to_string());
  let err = Connection::connect(params).await.unwrap_err();
  assert!(err.to_string().contains("password authentication failed") || matches!(err, pq::Error::Auth(_)));
}

#[tokio::test]
async fn test_copy_in() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  conn
    .simple_query("CREATE TEMP TABLE copy_check (a int, b text)")
    .await
    .unwrap();
  conn.simple_query("BEGIN").await.unwrap();

  let mut copy = conn
    .copy_in(&format!("COPY {}(a, b) FROM STDIN", quote_ident("copy_check")))
    .await
    .unwrap();

  for i in 0..500 {
    let long_string = "x".repeat(200);
    copy
      .push(&[Some(i.to_string().into_bytes()), Some(long_string.into_bytes())])
      .await
      .unwrap();
  }
  copy.finish().await.unwrap();
  conn.simple_query("COMMIT").await.unwrap();

  let results = conn.simple_query("SELECT count(*) FROM copy_check").await.unwrap();
  assert_eq!(results[0].rows[0].get(0), Some(&Value::Int(500)));
}

#[tokio::test]
async fn test_parameter_count_boundary() {
  let mut conn = Connection::connect(default_params()).await.unwrap();
  let stmt = conn.prepare("SELECT 1", &[]).await.unwrap();
  let over_limit: Vec<Option<Vec<u8>>> = vec![None; 65536];
  let err = conn.query(&stmt, &[], &over_limit, &[]).await.unwrap_err();
  assert!(matches!(err, pq::Error::Config(_)));
}

fn default_params() -> ConnectParams {
  let mut params = ConnectParams::new("postgres", "test");
  params.password = Some("password".to_string());
  params
}
