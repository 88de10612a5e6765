//! Session pool over the `deadpool` managed core.
//!
//! The pool owns physical connections; [`SessionPool::seize`] takes one out
//! and binds it to a fresh session thread. Releasing a session returns its
//! connection to the pool unless the runner discarded it, in which case the
//! connection is destroyed.

use deadpool::managed::{Manager, Metrics, Object, Pool, RecycleError, RecycleResult};

use crate::driver::tokio_pg::TokioPgConnection;
use crate::driver::{Connection, CopyHandle, ExecuteFlags, TransactionState};
use crate::error::PgSessionError;
use crate::query::{DEFAULT_BATCH_SIZE, QueryFactory};
use crate::session::{PgSession, ResultSink};
use crate::types::{NotifyMessage, PgValue};

const DEFAULT_MAX_SESSIONS: usize = 16;

/// deadpool manager dialing [`TokioPgConnection`]s.
#[derive(Debug)]
pub struct PgConnManager {
    config: tokio_postgres::Config,
}

impl Manager for PgConnManager {
    type Type = TokioPgConnection;
    type Error = PgSessionError;

    async fn create(&self) -> Result<TokioPgConnection, PgSessionError> {
        TokioPgConnection::connect(&self.config).await
    }

    async fn recycle(
        &self,
        conn: &mut TokioPgConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<PgSessionError> {
        if conn.is_closed() || conn.is_discarded() {
            return Err(RecycleError::Message("connection no longer usable".into()));
        }
        conn.reset().await.map_err(RecycleError::Backend)
    }
}

/// Pool of physical connections, each seizable as a session.
#[derive(Clone)]
pub struct SessionPool {
    pool: Pool<PgConnManager>,
    batch_size: u32,
}

impl SessionPool {
    /// Start building a pool for `config`.
    #[must_use]
    pub fn builder(config: tokio_postgres::Config) -> SessionPoolBuilder {
        SessionPoolBuilder {
            config,
            max_size: DEFAULT_MAX_SESSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Take a connection out of the pool and bind it to a new session.
    ///
    /// # Errors
    /// Returns an error if a connection cannot be acquired or the session
    /// thread cannot be spawned.
    pub async fn seize(&self) -> Result<PgSession, PgSessionError> {
        let obj = self
            .pool
            .get()
            .await
            .map_err(|err| PgSessionError::Pool(err.to_string()))?;
        PgSession::attach(PooledConn::new(obj), QueryFactory::new(self.batch_size))
    }

    /// Pool status snapshot (size, available, waiting).
    #[must_use]
    pub fn status(&self) -> deadpool::managed::Status {
        self.pool.status()
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("status", &self.pool.status())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Fluent configuration for [`SessionPool`].
#[derive(Debug)]
pub struct SessionPoolBuilder {
    config: tokio_postgres::Config,
    max_size: usize,
    batch_size: u32,
}

impl SessionPoolBuilder {
    /// Cap the number of simultaneously open connections.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Batch size stamped into queries fabricated by seized sessions.
    #[must_use]
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Build the pool. Connections are dialed lazily on first seize.
    ///
    /// # Errors
    /// Returns an error if the pool configuration is rejected.
    pub fn build(self) -> Result<SessionPool, PgSessionError> {
        let manager = PgConnManager {
            config: self.config,
        };
        let pool = Pool::builder(manager)
            .max_size(self.max_size)
            .build()
            .map_err(|err| PgSessionError::Pool(err.to_string()))?;
        Ok(SessionPool {
            pool,
            batch_size: self.batch_size,
        })
    }
}

/// Pool-owned connection handed to a session runner.
///
/// Dropping it returns the connection to the pool; if the session discarded
/// it, the underlying object is taken out of the pool and destroyed instead.
struct PooledConn {
    obj: Option<Object<PgConnManager>>,
}

impl PooledConn {
    fn new(obj: Object<PgConnManager>) -> Self {
        PooledConn { obj: Some(obj) }
    }

    fn inner(&mut self) -> &mut TokioPgConnection {
        let obj = self.obj.as_mut().expect("connection already released");
        &mut **obj
    }
}

impl Connection for PooledConn {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), PgSessionError> {
        self.inner().set_auto_commit(auto_commit)
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[PgValue],
        sink: &ResultSink,
        batch_size: u32,
        flags: ExecuteFlags,
    ) -> Result<(), PgSessionError> {
        self.inner().execute(sql, params, sink, batch_size, flags)
    }

    fn rollback(&mut self) -> Result<(), PgSessionError> {
        self.inner().rollback()
    }

    fn transaction_state(&self) -> TransactionState {
        self.obj
            .as_ref()
            .map_or(TransactionState::Idle, |obj| obj.transaction_state())
    }

    fn notifications(&mut self, hint: i32) -> Result<Vec<NotifyMessage>, PgSessionError> {
        self.inner().notifications(hint)
    }

    fn copy_in(&mut self, sql: &str) -> Result<Box<dyn CopyHandle>, PgSessionError> {
        self.inner().copy_in(sql)
    }

    fn copy_in_reader(
        &mut self,
        sql: &str,
        reader: &mut dyn std::io::Read,
    ) -> Result<u64, PgSessionError> {
        self.inner().copy_in_reader(sql, reader)
    }

    fn discard(&mut self) {
        self.inner().discard();
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            if obj.is_discarded() {
                drop(Object::take(obj));
            }
        }
    }
}
