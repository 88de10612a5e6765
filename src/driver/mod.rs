//! Connection capability consumed by the session loop.
//!
//! The session engine is written against [`Connection`] rather than a
//! concrete driver; [`tokio_pg::TokioPgConnection`] is the bundled
//! implementation and [`crate::testing::MockConnection`] is the scripted one.
//! Every method is invoked from the session's dedicated loop thread only.

use std::io::Read;

use crate::error::PgSessionError;
use crate::session::ResultSink;
use crate::types::{NotifyMessage, PgValue};

pub mod params;
pub mod tokio_pg;

/// Server-observed status of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Open,
    Failed,
}

/// Flags for [`Connection::execute`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteFlags {
    /// Do not prepend an implicit `BEGIN` to this statement; transactional
    /// framing belongs to the session via the autocommit setting.
    pub suppress_begin: bool,
}

impl ExecuteFlags {
    pub const SUPPRESS_BEGIN: ExecuteFlags = ExecuteFlags {
        suppress_begin: true,
    };
}

/// An open `COPY ... FROM STDIN` operation.
///
/// Dropping an unfinished handle aborts the copy on the wire; implementations
/// must not leak a partially opened copy on any exit path.
pub trait CopyHandle: Send {
    /// Append raw bytes to the copy stream.
    ///
    /// # Errors
    /// Returns an error if the server rejects the data or the connection is
    /// lost.
    fn write(&mut self, buf: &[u8]) -> Result<(), PgSessionError>;

    /// Terminate the copy and return the server-reported row count.
    ///
    /// # Errors
    /// Returns an error if the server rejects the copy as a whole.
    fn finish(self: Box<Self>) -> Result<u64, PgSessionError>;
}

/// Facade over one physical PostgreSQL connection.
pub trait Connection: Send {
    /// Toggle autocommit. The session turns it off before its loop starts.
    ///
    /// # Errors
    /// Returns an error if the connection cannot apply the setting.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), PgSessionError>;

    /// Run one statement, emitting result events into `sink`.
    ///
    /// The terminal event is not emitted here; the session loop owns it.
    ///
    /// # Errors
    /// Returns the server error response or the connection failure.
    fn execute(
        &mut self,
        sql: &str,
        params: &[PgValue],
        sink: &ResultSink,
        batch_size: u32,
        flags: ExecuteFlags,
    ) -> Result<(), PgSessionError>;

    /// Roll back the current transaction.
    ///
    /// # Errors
    /// Returns an error if the rollback cannot reach the server.
    fn rollback(&mut self) -> Result<(), PgSessionError>;

    fn transaction_state(&self) -> TransactionState;

    /// Collect pending notifications.
    ///
    /// `hint` biases how long the call may block waiting for the first
    /// message: positive while the session is otherwise idle, zero or below
    /// for a non-blocking drain.
    ///
    /// # Errors
    /// Returns an error if the connection is lost.
    fn notifications(&mut self, hint: i32) -> Result<Vec<NotifyMessage>, PgSessionError>;

    /// Open a `COPY ... FROM STDIN` and return a handle for streaming writes.
    ///
    /// # Errors
    /// Returns an error if the statement is rejected.
    fn copy_in(&mut self, sql: &str) -> Result<Box<dyn CopyHandle>, PgSessionError>;

    /// Run a `COPY ... FROM STDIN`, synchronously draining `reader` on the
    /// calling thread, and return the server-reported row count.
    ///
    /// # Errors
    /// Returns an error if the statement is rejected, the reader fails, or
    /// the server rejects the payload.
    fn copy_in_reader(&mut self, sql: &str, reader: &mut dyn Read) -> Result<u64, PgSessionError>;

    /// Mark the physical connection for destruction instead of reuse.
    fn discard(&mut self);
}
