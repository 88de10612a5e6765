use std::time::Duration;

use pg_session::prelude::*;
use pg_session::testing::{ExecuteScript, MockConnection};

fn insert_script() -> ExecuteScript {
    ExecuteScript::ok(vec![QueryEvent::CommandStatus(CommandStatus {
        command: "INSERT".to_string(),
        oid: 0,
        update_count: 1,
        insert_count: 1,
    })])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_after_open_transaction_rolls_back() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.push_script(insert_script());
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    let rs = session
        .query("INSERT INTO t VALUES (1)")
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(rs.status.as_ref().map(|s| s.update_count), Some(1));
    assert_eq!(state.transaction_state(), TransactionState::Open);

    session.close();
    assert!(session.terminated().await.is_closed());

    assert_eq!(state.rollback_count(), 1);
    assert_eq!(state.executed_sql().len(), 1, "poison must not execute SQL");
    assert_eq!(state.transaction_state(), TransactionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_in_idle_terminates_without_rollback() {
    let conn = MockConnection::new();
    let state = conn.state();
    // A statement that ends its transaction, e.g. an explicit COMMIT.
    state.push_script(
        ExecuteScript::ok(vec![QueryEvent::CommandStatus(CommandStatus {
            command: "COMMIT".to_string(),
            oid: 0,
            update_count: 0,
            insert_count: 0,
        })])
        .with_state(TransactionState::Idle),
    );
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    session.query("COMMIT").fetch_all().await.unwrap();
    session.close();
    assert!(session.terminated().await.is_closed());
    assert_eq!(state.rollback_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_rolls_back_and_exits_without_draining() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.push_script(insert_script());
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    session
        .query("INSERT INTO t VALUES (1)")
        .fetch_all()
        .await
        .unwrap();

    session.abort();
    assert!(session.terminated().await.is_closed());
    assert_eq!(state.rollback_count(), 1);
    assert!(!session.is_accepting());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_every_handle_behaves_like_close() {
    let conn = MockConnection::new();
    let state = conn.state();
    state.push_script(insert_script());
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    session
        .query("INSERT INTO t VALUES (1)")
        .fetch_all()
        .await
        .unwrap();
    drop(session);

    // The loop notices the disconnected queue within one wait interval.
    let mut rolled_back = false;
    for _ in 0..50 {
        if state.rollback_count() == 1 {
            rolled_back = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(rolled_back, "open transaction must be rolled back on drop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_is_idempotent() {
    let conn = MockConnection::new();
    let state = conn.state();
    let session = PgSession::attach(conn, QueryFactory::default()).unwrap();

    session.close();
    session.close();
    assert!(session.terminated().await.is_closed());
    assert_eq!(state.rollback_count(), 0);
}
