//! Thread-bound PostgreSQL sessions.
//!
//! A session owns one physical connection end to end, including transaction
//! framing: autocommit is off, so statements join an open transaction until
//! an explicit `COMMIT` or `ROLLBACK` is submitted. Producers interact with
//! the session only through its work queue; a dedicated consumer thread owns
//! the connection.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, watch};

use crate::driver::Connection;
use crate::error::PgSessionError;
use crate::query::QueryFactory;
use crate::sql::quote_ident;
use crate::types::{NotifyMessage, PgValue, QueryEvent, ResultSet};

mod copy;
mod dispatcher;
mod notify;
mod runner;
mod sink;
mod work;

pub use copy::BINARY_COPY_PREAMBLE;
pub use notify::NotifyStream;
pub use sink::{QueryStream, ResultSink};
pub use work::CopySource;

use notify::ListenerMap;
use work::WorkItem;

/// Terminal state of a session, observed through [`PgSession::terminated`].
#[derive(Debug, Clone)]
pub enum SessionTermination {
    /// The session drained and exited cleanly.
    Closed,
    /// The session ended on a failure.
    Error(Arc<PgSessionError>),
}

impl SessionTermination {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionTermination::Closed)
    }
}

/// State shared between the facade and the loop thread.
///
/// Deliberately excludes the queue sender: when every facade handle and cold
/// stream is gone, the queue disconnects and the loop treats that as poison.
pub(crate) struct SessionCore {
    accepting: AtomicBool,
    listeners: ListenerMap,
}

impl SessionCore {
    fn new() -> Self {
        SessionCore {
            accepting: AtomicBool::new(true),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub(crate) fn listener_map(&self) -> ListenerMap {
        Arc::clone(&self.listeners)
    }
}

/// Public submission surface of one session.
///
/// Cloning is cheap; all clones share the same queue and connection. The
/// session stops accepting work after [`close`](PgSession::close), after a
/// copy failure, or after the transaction enters the failed state.
#[derive(Clone)]
pub struct PgSession {
    core: Arc<SessionCore>,
    queue: crossbeam_channel::Sender<WorkItem>,
    terminated: watch::Receiver<Option<SessionTermination>>,
    factory: QueryFactory,
}

impl PgSession {
    /// Bind `conn` to a new consumer thread and return its facade.
    ///
    /// Usually called through [`SessionPool::seize`](crate::pool::SessionPool::seize);
    /// direct attachment exists for custom drivers and tests. Streaming-copy
    /// support requires attachment from within a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the consumer thread cannot be spawned.
    pub fn attach<C>(conn: C, factory: QueryFactory) -> Result<Self, PgSessionError>
    where
        C: Connection + 'static,
    {
        runner::spawn(conn, factory)
    }

    fn assemble(
        core: Arc<SessionCore>,
        queue: crossbeam_channel::Sender<WorkItem>,
        terminated: watch::Receiver<Option<SessionTermination>>,
        factory: QueryFactory,
    ) -> Self {
        PgSession {
            core,
            queue,
            terminated,
            factory,
        }
    }

    /// Submit one statement and return its cold result stream.
    ///
    /// The work item is enqueued when the stream is first polled. Dropping
    /// the stream does not cancel server-side execution; there is no
    /// per-query timeout.
    ///
    /// # Errors
    /// Fails with [`PgSessionError::SessionNotActive`] once the session no
    /// longer accepts work.
    pub fn submit(
        &self,
        sql: impl Into<String>,
        params: Vec<PgValue>,
    ) -> Result<QueryStream, PgSessionError> {
        if !self.core.is_accepting() {
            return Err(PgSessionError::SessionNotActive);
        }
        let query = self.factory.query(sql, params);
        let (sink, rx) = ResultSink::channel();
        let item = WorkItem::Query { query, sink };
        Ok(QueryStream::cold(self.queue.clone(), item, rx))
    }

    /// Fluent form of [`submit`](PgSession::submit).
    #[must_use]
    pub fn query<'s, 'q>(&'s self, sql: &'q str) -> SessionQuery<'s, 'q> {
        SessionQuery {
            session: self,
            sql,
            params: Vec::new(),
        }
    }

    /// Run a `COPY ... FROM STDIN` and return the server-reported row count.
    ///
    /// The binary-format preamble is written unconditionally; `source` must
    /// supply the tuple stream that follows it.
    ///
    /// # Errors
    /// Fails with [`PgSessionError::SessionNotActive`] when not accepting,
    /// or with the copy failure, which also stops the session from accepting
    /// further work.
    pub async fn copy_in(
        &self,
        sql: impl Into<String>,
        source: CopySource,
    ) -> Result<u64, PgSessionError> {
        if !self.core.is_accepting() {
            return Err(PgSessionError::SessionNotActive);
        }
        let (sink, rx) = ResultSink::channel();
        let item = WorkItem::Copy {
            sql: sql.into(),
            source,
            sink,
        };
        self.queue
            .send(item)
            .map_err(|_| PgSessionError::SessionClosed)?;
        let mut stream = QueryStream::hot(rx);
        let mut rows = None;
        while let Some(event) = stream.try_next().await? {
            if let QueryEvent::CommandStatus(status) = event {
                rows = Some(status.update_count);
            }
        }
        rows.ok_or_else(|| {
            PgSessionError::Internal("copy completed without a command status".to_string())
        })
    }

    /// Buffered-source form of [`copy_in`](PgSession::copy_in).
    ///
    /// # Errors
    /// See [`copy_in`](PgSession::copy_in).
    pub async fn copy_in_bytes(
        &self,
        sql: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Result<u64, PgSessionError> {
        self.copy_in(sql, CopySource::Buffered(bytes.into())).await
    }

    /// Streaming-source form of [`copy_in`](PgSession::copy_in). Each buffer
    /// is fully consumed and released before the next is requested. Requires
    /// a multi-threaded runtime: the consumer thread blocks on this stream.
    ///
    /// # Errors
    /// See [`copy_in`](PgSession::copy_in); source failures surface as
    /// [`PgSessionError::CopySource`].
    pub async fn copy_in_stream(
        &self,
        sql: impl Into<String>,
        stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static,
    ) -> Result<u64, PgSessionError> {
        self.copy_in(sql, CopySource::Streaming(stream.boxed()))
            .await
    }

    /// Subscribe to a notification channel.
    ///
    /// The subscriber is registered before `LISTEN` is submitted, so a
    /// notification can never arrive ahead of its mapping. If the `LISTEN`
    /// statement fails, the subscriber is torn down and the error returned.
    ///
    /// # Errors
    /// Fails with [`PgSessionError::SessionNotActive`] when not accepting,
    /// or with the `LISTEN` statement's error.
    pub async fn listen(&self, channel: &str) -> Result<NotifyStream, PgSessionError> {
        if !self.core.is_accepting() {
            return Err(PgSessionError::SessionNotActive);
        }
        let (tx, rx) = mpsc::unbounded_channel::<NotifyMessage>();
        notify::lock_listeners(&self.core.listeners)?.insert(channel.to_string(), tx);

        let listen = async {
            let mut stream = self.submit(format!("LISTEN {}", quote_ident(channel)), Vec::new())?;
            while stream.try_next().await?.is_some() {}
            Ok::<(), PgSessionError>(())
        };
        if let Err(err) = listen.await {
            if let Ok(mut guard) = self.core.listeners.lock() {
                guard.remove(channel);
            }
            return Err(err);
        }
        Ok(NotifyStream::new(channel.to_string(), rx))
    }

    /// Stop accepting work and request a graceful exit once the queue drains.
    /// Idempotent. In-flight items run to completion; an open transaction is
    /// rolled back before the consumer thread exits.
    pub fn close(&self) {
        self.core.stop_accepting();
        let _ = self.queue.send(WorkItem::Poison);
    }

    /// Stop accepting work and exit without draining: any open transaction is
    /// rolled back and queued items fail with a session-closed error.
    pub fn abort(&self) {
        self.core.stop_accepting();
        let _ = self.queue.send(WorkItem::Rollback);
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.core.is_accepting()
    }

    /// Wait for the session's terminal state. Fires at most once; every
    /// caller observes the same value.
    pub async fn terminated(&self) -> SessionTermination {
        let mut rx = self.terminated.clone();
        loop {
            {
                let value = rx.borrow_and_update();
                if let Some(termination) = value.as_ref() {
                    return termination.clone();
                }
            }
            if rx.changed().await.is_err() {
                return SessionTermination::Error(Arc::new(PgSessionError::Internal(
                    "session thread vanished without signalling".to_string(),
                )));
            }
        }
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

/// Builder returned by [`PgSession::query`].
pub struct SessionQuery<'s, 'q> {
    session: &'s PgSession,
    sql: &'q str,
    params: Vec<PgValue>,
}

impl SessionQuery<'_, '_> {
    /// Provide parameters for this statement.
    #[must_use]
    pub fn params(mut self, params: impl Into<Vec<PgValue>>) -> Self {
        self.params = params.into();
        self
    }

    /// Submit and return the cold result stream.
    ///
    /// # Errors
    /// See [`PgSession::submit`].
    pub fn stream(self) -> Result<QueryStream, PgSessionError> {
        self.session.submit(self.sql, self.params)
    }

    /// Submit and collect the full result set.
    ///
    /// # Errors
    /// Returns the submission or execution error.
    pub async fn fetch_all(self) -> Result<ResultSet, PgSessionError> {
        self.stream()?.fetch_all().await
    }
}
