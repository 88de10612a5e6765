//! The session consumer loop.
//!
//! Runs on the thread that owns the connection; no other component may touch
//! connection primitives. Work items execute in enqueue order, notifications
//! are interleaved at dequeue-wait granularity, and the transaction state is
//! re-inspected after every iteration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::runtime::Handle;

use crate::driver::{Connection, ExecuteFlags, TransactionState};
use crate::error::PgSessionError;
use crate::session::SessionCore;
use crate::session::copy;
use crate::session::notify::NotificationHub;
use crate::session::work::WorkItem;
use crate::types::{CommandStatus, QueryEvent};

/// Bounded wait of one dequeue attempt; also the notification poll cadence.
pub(crate) const LOOP_WAIT: Duration = Duration::from_millis(100);

/// Observational idle threshold. The loop never terminates itself on idle;
/// disposing idle sessions is the pool's job.
pub(crate) const MAX_IDLE: Duration = Duration::from_secs(300);

pub(super) fn run(
    conn: &mut dyn Connection,
    core: &Arc<SessionCore>,
    queue: &Receiver<WorkItem>,
    runtime: Option<&Handle>,
) -> Result<(), PgSessionError> {
    conn.set_auto_commit(false)?;
    let mut hub = NotificationHub::new(core.listener_map());
    let mut idle_since = Instant::now();

    loop {
        match queue.recv_timeout(LOOP_WAIT) {
            Ok(item) => {
                hub.poll_if_needed(conn, 1)?;
                match item {
                    WorkItem::Poison => {
                        if conn.transaction_state() != TransactionState::Idle {
                            conn.rollback()?;
                        }
                        return Ok(());
                    }
                    WorkItem::Rollback => {
                        conn.rollback()?;
                        return Ok(());
                    }
                    WorkItem::Query { query, sink } => {
                        match conn.execute(
                            &query.sql,
                            &query.params,
                            &sink,
                            query.batch_size,
                            ExecuteFlags::SUPPRESS_BEGIN,
                        ) {
                            Ok(()) => sink.complete(),
                            Err(err) if err.is_connection_loss() => {
                                sink.error(PgSessionError::Unavailable(err.to_string()));
                                return Err(err);
                            }
                            Err(err) => sink.error(err),
                        }
                        hub.poll_if_needed(conn, -1)?;
                    }
                    WorkItem::Copy { sql, source, sink } => {
                        match copy::run(conn, &sql, source, runtime) {
                            Ok(rows) => {
                                sink.next(QueryEvent::CommandStatus(CommandStatus::copy(rows)));
                                sink.complete();
                                hub.poll_if_needed(conn, -1)?;
                            }
                            Err(err) => {
                                // A copy failure is fatal to session intake.
                                let rolled_back = conn.rollback();
                                core.stop_accepting();
                                let lost = err.is_connection_loss();
                                sink.error(err);
                                rolled_back?;
                                if lost {
                                    return Err(PgSessionError::Unavailable(
                                        "connection lost during copy".to_string(),
                                    ));
                                }
                            }
                        }
                    }
                }
                idle_since = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                hub.poll_if_needed(conn, 1)?;
                if idle_since.elapsed() > MAX_IDLE {
                    tracing::trace!(idle_secs = idle_since.elapsed().as_secs(), "session idle");
                }
            }
            // Every facade handle dropped without close(); same as poison.
            Err(RecvTimeoutError::Disconnected) => {
                if conn.transaction_state() != TransactionState::Idle {
                    conn.rollback()?;
                }
                return Ok(());
            }
        }

        match conn.transaction_state() {
            TransactionState::Idle => {}
            TransactionState::Failed => {
                core.stop_accepting();
                fail_pending(queue);
                return Err(PgSessionError::TransactionFailed);
            }
            TransactionState::Open => {
                if !core.is_accepting() && queue.is_empty() {
                    conn.rollback()?;
                }
            }
        }
    }
}

/// Fail every queued item with a session-closed error. Poison and rollback
/// markers carry no sink and are simply dropped.
pub(super) fn fail_pending(queue: &Receiver<WorkItem>) {
    for item in queue.try_iter() {
        match item {
            WorkItem::Query { sink, .. } | WorkItem::Copy { sink, .. } => {
                sink.error(PgSessionError::SessionClosed);
            }
            WorkItem::Poison | WorkItem::Rollback => {}
        }
    }
}
