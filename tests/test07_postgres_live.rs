#![cfg(feature = "live-tests")]

//! End-to-end tests against a live PostgreSQL server.
//!
//! Configure the target with `TESTING_PG_HOST`, `TESTING_PG_PORT`,
//! `TESTING_PG_USER`, `TESTING_PG_PASSWORD`, and `TESTING_PG_DBNAME`;
//! everything defaults to a local `postgres/postgres` instance.

use std::env;
use std::time::Duration;

use pg_session::prelude::*;
use pg_session::sql::{ColumnSpec, CreateTable};
use tokio::time::timeout;

fn live_config() -> tokio_postgres::Config {
    let mut cfg = tokio_postgres::Config::new();
    cfg.host(env::var("TESTING_PG_HOST").as_deref().unwrap_or("localhost"));
    cfg.port(
        env::var("TESTING_PG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432),
    );
    cfg.user(env::var("TESTING_PG_USER").as_deref().unwrap_or("postgres"));
    cfg.password(env::var("TESTING_PG_PASSWORD").as_deref().unwrap_or("postgres"));
    cfg.dbname(env::var("TESTING_PG_DBNAME").as_deref().unwrap_or("postgres"));
    cfg
}

/// Encode one single-column BIGINT tuple in binary copy format.
fn binary_tuple(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(14);
    out.extend_from_slice(&1i16.to_be_bytes()); // field count
    out.extend_from_slice(&8i32.to_be_bytes()); // field length
    out.extend_from_slice(&value.to_be_bytes());
    out
}

const BINARY_TRAILER: [u8; 2] = [0xff, 0xff];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_trip_query_copy_and_notify() -> Result<(), PgSessionError> {
    let pool = SessionPool::builder(live_config()).max_size(4).build()?;

    let session = pool.seize().await?;
    let table = format!("pg_session_live_{}", std::process::id());

    let ddl = CreateTable::new(&table)
        .if_not_exists()
        .column(ColumnSpec::new("id", "BIGINT").not_null())
        .primary_key(["id"])
        .build();
    session.query(&ddl).fetch_all().await?;
    session.query("COMMIT").fetch_all().await?;

    // Parameterized insert and read-back.
    session
        .query(&format!("INSERT INTO \"{table}\" (id) VALUES ($1)"))
        .params(vec![PgValue::Int(1)])
        .fetch_all()
        .await?;
    let rs = session
        .query(&format!("SELECT id FROM \"{table}\" ORDER BY id"))
        .fetch_all()
        .await?;
    assert_eq!(rs.rows.len(), 1);
    assert_eq!(rs.get(0, "id").and_then(PgValue::as_int), Some(1));
    session.query("COMMIT").fetch_all().await?;

    // Binary copy of two tuples.
    let mut payload = Vec::new();
    payload.extend_from_slice(&binary_tuple(2));
    payload.extend_from_slice(&binary_tuple(3));
    payload.extend_from_slice(&BINARY_TRAILER);
    let rows = session
        .copy_in_bytes(format!("COPY \"{table}\" (id) FROM STDIN BINARY"), payload)
        .await?;
    assert_eq!(rows, 2);
    session.query("COMMIT").fetch_all().await?;

    // Notify across sessions.
    let listener = pool.seize().await?;
    let mut events = listener.listen("pg_session_live").await?;
    listener.query("COMMIT").fetch_all().await?;

    session
        .query("NOTIFY pg_session_live, 'hello'")
        .fetch_all()
        .await?;
    session.query("COMMIT").fetch_all().await?;

    let message = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("notification should arrive")
        .expect("listener session should stay up");
    assert_eq!(message.payload, "hello");

    session
        .query(&format!("DROP TABLE \"{table}\""))
        .fetch_all()
        .await?;
    session.query("COMMIT").fetch_all().await?;

    session.close();
    listener.close();
    assert!(session.terminated().await.is_closed());
    assert!(listener.terminated().await.is_closed());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_error_fails_the_transaction_and_the_session() -> Result<(), PgSessionError> {
    let pool = SessionPool::builder(live_config()).max_size(2).build()?;
    let session = pool.seize().await?;

    let err = session.query("SELECT 1/0").fetch_all().await.unwrap_err();
    assert!(matches!(err, PgSessionError::Server { .. }));

    match session.terminated().await {
        SessionTermination::Error(err) => {
            assert!(matches!(err.as_ref(), PgSessionError::TransactionFailed));
        }
        SessionTermination::Closed => panic!("failed transaction must error the session"),
    }

    // The pool hands out a fresh session afterwards.
    let next = pool.seize().await?;
    let rs = next.query("SELECT 1").fetch_all().await?;
    assert_eq!(rs.rows.len(), 1);
    next.close();
    Ok(())
}
