//! Pooled PostgreSQL sessions with thread-bound execution.
//!
//! Each session seizes one physical connection and drives it from a dedicated
//! consumer thread: queries, bulk `COPY` ingest, and `LISTEN`/`NOTIFY` fan-out
//! all flow through a single work queue, so the connection is never touched
//! concurrently. Results stream back to subscribers as buffered event
//! sequences with exactly one terminal signal.
//!
//! ```no_run
//! use pg_session::{PgValue, SessionPool};
//!
//! # async fn demo() -> Result<(), pg_session::PgSessionError> {
//! let mut config = tokio_postgres::Config::new();
//! config.host("localhost").user("postgres").dbname("postgres");
//! let pool = SessionPool::builder(config).max_size(4).build()?;
//!
//! let session = pool.seize().await?;
//! let rows = session
//!     .query("SELECT name FROM users WHERE id = $1")
//!     .params(vec![PgValue::Int(42)])
//!     .fetch_all()
//!     .await?;
//! println!("{:?}", rows.get(0, "name"));
//! session.close();
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub mod driver;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod query;
pub mod session;
pub mod sql;
pub mod testing;
pub mod types;

// Direct exports for frequently used types
pub use driver::{Connection, CopyHandle, ExecuteFlags, TransactionState};
pub use error::PgSessionError;
pub use pool::{SessionPool, SessionPoolBuilder};
pub use query::{Query, QueryFactory};
pub use session::{
    BINARY_COPY_PREAMBLE, CopySource, NotifyStream, PgSession, QueryStream, ResultSink,
    SessionTermination,
};
pub use types::{
    Column, CommandStatus, DataRow, Notice, NotifyMessage, PgValue, QueryEvent, ResultSet,
    RowDescription,
};
