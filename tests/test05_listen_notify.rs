use std::time::Duration;

use pg_session::prelude::*;
use pg_session::testing::{ExecuteScript, MockConnection};
use tokio::time::timeout;

fn notification(channel: &str, payload: &str) -> NotifyMessage {
    NotifyMessage {
        channel: channel.to_string(),
        payload: payload.to_string(),
        backend_pid: 4242,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listen_delivers_notifications_within_a_poll_interval() {
    let conn = MockConnection::new();
    let state = conn.state();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let mut events = session.listen("events").await.unwrap();
    assert_eq!(events.channel(), "events");
    assert_eq!(state.executed_sql(), vec!["LISTEN \"events\"".to_string()]);

    state.push_notification(notification("events", "hello"));
    let message = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("notification must arrive within the poll cadence")
        .expect("subscriber must still be connected");
    assert_eq!(message.channel, "events");
    assert_eq!(message.payload, "hello");
    assert_eq!(message.backend_pid, 4242);

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_channels_are_dropped_not_errored() {
    let conn = MockConnection::new();
    let state = conn.state();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let mut events = session.listen("known").await.unwrap();

    state.push_notification(notification("unknown", "lost"));
    state.push_notification(notification("known", "kept"));

    let message = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, "kept");

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_listen_statement_tears_down_the_subscriber() {
    let conn = MockConnection::new();
    let state = conn.state();
    // Error the LISTEN itself without failing the transaction.
    state.push_script(
        ExecuteScript::server_error("42601", "syntax error").with_state(TransactionState::Idle),
    );
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let err = session.listen("bad").await.unwrap_err();
    assert!(matches!(err, PgSessionError::Server { .. }));

    // The session survives and later subscriptions work.
    let mut events = session.listen("good").await.unwrap();
    state.push_notification(notification("good", "still here"));
    let message = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, "still here");

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn channel_names_are_quoted() {
    let conn = MockConnection::new();
    let state = conn.state();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let _events = session.listen("weird channel").await.unwrap();
    assert_eq!(
        state.executed_sql(),
        vec!["LISTEN \"weird channel\"".to_string()]
    );

    session.close();
    session.terminated().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listen_after_close_fails_synchronously() {
    let conn = MockConnection::new();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    session.close();
    let err = session.listen("events").await.unwrap_err();
    assert!(matches!(err, PgSessionError::SessionNotActive));
}
