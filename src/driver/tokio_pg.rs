//! Bundled [`Connection`] implementation over `tokio-postgres`.
//!
//! The session loop runs on a plain OS thread, so every server round trip
//! here re-enters the runtime through a captured [`Handle`]. The connection
//! task is spawned at connect time and forwards `NOTIFY` payloads into an
//! unbounded channel drained by [`Connection::notifications`].

use std::future;
use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, TryStreamExt, pin_mut};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, CopyInSink, NoTls};

use super::{Connection, CopyHandle, ExecuteFlags, TransactionState};
use crate::driver::params::{as_sql_refs, classify_pg_error, decode_row};
use crate::error::PgSessionError;
use crate::session::ResultSink;
use crate::types::{Column, CommandStatus, NotifyMessage, PgValue, QueryEvent, RowDescription};

const COPY_READER_CHUNK: usize = 8192;
const NOTIFY_WAIT_CAP_MS: u64 = 10;

/// One physical connection plus its spawned driver task.
pub struct TokioPgConnection {
    client: Client,
    handle: Handle,
    notifications: mpsc::UnboundedReceiver<NotifyMessage>,
    driver_task: JoinHandle<()>,
    txn: TransactionState,
    auto_commit: bool,
    discarded: bool,
}

impl TokioPgConnection {
    /// Dial the server and spawn the connection task on the current runtime.
    ///
    /// # Errors
    /// Returns an error if the TCP/startup handshake fails.
    pub async fn connect(config: &tokio_postgres::Config) -> Result<Self, PgSessionError> {
        let (client, mut connection) = config.connect(NoTls).await.map_err(classify_pg_error)?;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let driver_task = tokio::spawn(async move {
            loop {
                let message =
                    future::poll_fn(|cx| connection.poll_message(cx)).await;
                match message {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        let forwarded = NotifyMessage {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                            backend_pid: n.process_id(),
                        };
                        if notify_tx.send(forwarded).is_err() {
                            break;
                        }
                    }
                    Some(Ok(AsyncMessage::Notice(notice))) => {
                        tracing::debug!(
                            code = notice.code().code(),
                            message = notice.message(),
                            "server notice"
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "postgres connection task ended");
                        break;
                    }
                    None => break,
                }
            }
        });
        Ok(TokioPgConnection {
            client,
            handle: Handle::current(),
            notifications: notify_rx,
            driver_task,
            txn: TransactionState::Idle,
            auto_commit: true,
            discarded: false,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub(crate) fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Scrub leftover state before the connection re-enters the pool.
    ///
    /// # Errors
    /// Returns an error if an open transaction cannot be rolled back.
    pub(crate) async fn reset(&mut self) -> Result<(), PgSessionError> {
        while self.notifications.try_recv().is_ok() {}
        if self.txn != TransactionState::Idle {
            self.client
                .batch_execute("ROLLBACK")
                .await
                .map_err(classify_pg_error)?;
            self.txn = TransactionState::Idle;
        }
        Ok(())
    }

    fn map_error(&mut self, err: tokio_postgres::Error) -> PgSessionError {
        if err.as_db_error().is_some() && self.txn == TransactionState::Open {
            self.txn = TransactionState::Failed;
        }
        classify_pg_error(err)
    }

    /// Open the framing transaction when autocommit is off and nothing is in
    /// flight. With autocommit off the statement-level implicit `BEGIN` is
    /// already absent, so `SUPPRESS_BEGIN` has nothing further to suppress.
    fn open_framing(&mut self) -> Result<(), PgSessionError> {
        if self.auto_commit || self.txn != TransactionState::Idle {
            return Ok(());
        }
        let handle = self.handle.clone();
        handle
            .block_on(self.client.batch_execute("BEGIN"))
            .map_err(|err| self.map_error(err))?;
        self.txn = TransactionState::Open;
        Ok(())
    }

    fn track_statement(&mut self, sql: &str) {
        // COMMIT/ROLLBACK submitted as regular work items close the framing
        // transaction; anything else leaves it open.
        let tag = command_tag(sql);
        if matches!(tag.as_str(), "COMMIT" | "ROLLBACK" | "END" | "ABORT") {
            self.txn = TransactionState::Idle;
        }
    }
}

impl Connection for TokioPgConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), PgSessionError> {
        if auto_commit && self.txn != TransactionState::Idle {
            return Err(PgSessionError::Internal(
                "cannot enable autocommit inside an open transaction".to_string(),
            ));
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[PgValue],
        sink: &ResultSink,
        _batch_size: u32,
        _flags: ExecuteFlags,
    ) -> Result<(), PgSessionError> {
        self.open_framing()?;
        let handle = self.handle.clone();
        handle
            .block_on(run_query(&self.client, sql, params, sink))
            .map_err(|err| self.map_error(err))?;
        self.track_statement(sql);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), PgSessionError> {
        if self.txn == TransactionState::Idle {
            return Ok(());
        }
        let handle = self.handle.clone();
        handle
            .block_on(self.client.batch_execute("ROLLBACK"))
            .map_err(classify_pg_error)?;
        self.txn = TransactionState::Idle;
        Ok(())
    }

    fn transaction_state(&self) -> TransactionState {
        self.txn
    }

    fn notifications(&mut self, hint: i32) -> Result<Vec<NotifyMessage>, PgSessionError> {
        let mut out = Vec::new();
        if hint > 0 && !self.client.is_closed() {
            let wait = Duration::from_millis(u64::from(hint.unsigned_abs()).min(NOTIFY_WAIT_CAP_MS));
            let handle = self.handle.clone();
            let first = handle.block_on(async {
                tokio::time::timeout(wait, self.notifications.recv()).await
            });
            if let Ok(Some(message)) = first {
                out.push(message);
            }
        }
        loop {
            match self.notifications.try_recv() {
                Ok(message) => out.push(message),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    fn copy_in(&mut self, sql: &str) -> Result<Box<dyn CopyHandle>, PgSessionError> {
        self.open_framing()?;
        let handle = self.handle.clone();
        let sink = handle
            .block_on(self.client.copy_in(sql))
            .map_err(|err| self.map_error(err))?;
        Ok(Box::new(TokioCopyHandle {
            sink: Box::pin(sink),
            handle,
        }))
    }

    fn copy_in_reader(&mut self, sql: &str, reader: &mut dyn Read) -> Result<u64, PgSessionError> {
        let mut copy = self.copy_in(sql)?;
        let mut buf = [0u8; COPY_READER_CHUNK];
        loop {
            let n = reader.read(&mut buf).map_err(PgSessionError::CopySource)?;
            if n == 0 {
                break;
            }
            copy.write(&buf[..n])?;
        }
        copy.finish()
    }

    fn discard(&mut self) {
        self.discarded = true;
    }
}

impl Drop for TokioPgConnection {
    fn drop(&mut self) {
        self.driver_task.abort();
    }
}

impl std::fmt::Debug for TokioPgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioPgConnection")
            .field("txn", &self.txn)
            .field("auto_commit", &self.auto_commit)
            .field("discarded", &self.discarded)
            .finish()
    }
}

struct TokioCopyHandle {
    sink: std::pin::Pin<Box<CopyInSink<Bytes>>>,
    handle: Handle,
}

impl CopyHandle for TokioCopyHandle {
    fn write(&mut self, buf: &[u8]) -> Result<(), PgSessionError> {
        let chunk = Bytes::copy_from_slice(buf);
        let handle = self.handle.clone();
        handle
            .block_on(self.sink.send(chunk))
            .map_err(classify_pg_error)
    }

    fn finish(mut self: Box<Self>) -> Result<u64, PgSessionError> {
        let handle = self.handle.clone();
        handle
            .block_on(self.sink.as_mut().finish())
            .map_err(classify_pg_error)
    }
}

async fn run_query(
    client: &Client,
    sql: &str,
    params: &[PgValue],
    sink: &ResultSink,
) -> Result<(), tokio_postgres::Error> {
    // Prepare first so column metadata is known even for empty result sets.
    let statement = client.prepare(sql).await?;
    if !statement.columns().is_empty() {
        sink.next(QueryEvent::RowDescription(describe(&statement)));
    }
    let refs = as_sql_refs(params);
    let stream = client.query_raw(&statement, refs).await?;
    pin_mut!(stream);
    while let Some(row) = stream.try_next().await? {
        sink.next(QueryEvent::Row(decode_row(&row)?));
    }
    let rows = stream.rows_affected().unwrap_or(0);
    let command = command_tag(sql);
    let insert_count = if command == "INSERT" { rows } else { 0 };
    sink.next(QueryEvent::CommandStatus(CommandStatus {
        command,
        oid: 0,
        update_count: rows,
        insert_count,
    }));
    Ok(())
}

fn describe(statement: &tokio_postgres::Statement) -> RowDescription {
    RowDescription {
        columns: statement
            .columns()
            .iter()
            .map(|col| Column {
                name: col.name().to_string(),
                type_oid: col.type_().oid(),
            })
            .collect(),
    }
}

fn command_tag(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}
