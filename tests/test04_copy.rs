use std::io;

use bytes::Bytes;
use futures_util::stream;
use pg_session::prelude::*;
use pg_session::testing::{ExecuteScript, MockConnection};

const COPY_SQL: &str = "COPY t FROM STDIN BINARY";

/// Binary-format trailer: a tuple field count of -1.
const TRAILER: [u8; 2] = [0xff, 0xff];

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_copy_prepends_the_binary_preamble() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.set_copy_rows(0);
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let rows = session
        .copy_in_bytes(COPY_SQL, TRAILER.to_vec())
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let written = state.copy_bytes();
    assert_eq!(&written[..BINARY_COPY_PREAMBLE.len()], &BINARY_COPY_PREAMBLE);
    assert_eq!(&written[BINARY_COPY_PREAMBLE.len()..], &TRAILER);

    session.close();
    assert!(session.terminated().await.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_copy_reports_the_server_row_count() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.set_copy_rows(3);
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let payload = vec![0u8; 48]; // three fake tuples
    let rows = session.copy_in_bytes(COPY_SQL, payload).await.unwrap();
    assert_eq!(rows, 3);

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_copy_consumes_buffers_in_order() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.set_copy_rows(2);
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let chunks = stream::iter(vec![
        Ok(Bytes::from_static(b"tuple-1")),
        Ok(Bytes::from_static(b"tuple-2")),
    ]);
    let rows = session.copy_in_stream(COPY_SQL, chunks).await.unwrap();
    assert_eq!(rows, 2);

    let mut expected = BINARY_COPY_PREAMBLE.to_vec();
    expected.extend_from_slice(b"tuple-1");
    expected.extend_from_slice(b"tuple-2");
    assert_eq!(state.copy_bytes(), expected);

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mid_stream_source_error_stops_session_intake() {
    let conn = MockConnection::new();
    let state = conn.state();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let chunks = stream::iter(vec![
        Ok(Bytes::from_static(b"tuple-1")),
        Err(io::Error::other("source went away")),
    ]);
    let err = session.copy_in_stream(COPY_SQL, chunks).await.unwrap_err();
    assert!(matches!(err, PgSessionError::CopySource(_)));

    assert!(!session.is_accepting());
    assert!(state.rollback_count() >= 1, "copy failure must roll back");
    assert!(matches!(
        session.submit("SELECT 1", Vec::new()),
        Err(PgSessionError::SessionNotActive)
    ));

    session.close();
    assert!(session.terminated().await.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_copy_statement_stops_session_intake() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.fail_next_copy(PgSessionError::Server {
        code: "42P01".to_string(),
        message: "relation does not exist".to_string(),
    });
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let err = session
        .copy_in_bytes(COPY_SQL, TRAILER.to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, PgSessionError::Server { .. }));
    assert!(!session.is_accepting());
    assert_eq!(state.rollback_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn copy_emits_a_synthetic_status_before_completion() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.set_copy_rows(5);
    state.push_script(ExecuteScript::ok(Vec::new()));
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let rows = session.copy_in_bytes(COPY_SQL, vec![0u8; 8]).await.unwrap();
    assert_eq!(rows, 5);

    // The session keeps serving regular queries after a successful copy.
    session.query("SELECT 1").fetch_all().await.unwrap();

    session.close();
    session.terminated().await;
}
