//! Thread spawn and termination handling for sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::Receiver;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::driver::Connection;
use crate::error::PgSessionError;
use crate::query::QueryFactory;
use crate::session::work::WorkItem;
use crate::session::{PgSession, SessionCore, SessionTermination, dispatcher};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

pub(super) fn spawn<C>(mut conn: C, factory: QueryFactory) -> Result<PgSession, PgSessionError>
where
    C: Connection + 'static,
{
    let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
    let (term_tx, term_rx) = watch::channel(None);
    let core = Arc::new(SessionCore::new());
    let loop_core = Arc::clone(&core);
    let runtime = Handle::try_current().ok();
    let id = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);

    thread::Builder::new()
        .name(format!("pg-session-{id}"))
        .spawn(move || {
            let result = dispatcher::run(&mut conn, &loop_core, &queue_rx, runtime.as_ref());
            finish(conn, result, &loop_core, &queue_rx, &term_tx);
        })
        .map_err(|err| {
            PgSessionError::Internal(format!("failed to spawn session thread: {err}"))
        })?;

    Ok(PgSession::assemble(core, queue_tx, term_rx, factory))
}

fn finish<C: Connection>(
    mut conn: C,
    result: Result<(), PgSessionError>,
    core: &Arc<SessionCore>,
    queue: &Receiver<WorkItem>,
    term_tx: &watch::Sender<Option<SessionTermination>>,
) {
    core.stop_accepting();
    dispatcher::fail_pending(queue);
    let termination = match result {
        Ok(()) => {
            tracing::debug!("session closed");
            SessionTermination::Closed
        }
        Err(err) if err.is_connection_loss() => {
            tracing::warn!(error = %err, "session lost its connection");
            conn.discard();
            SessionTermination::Error(Arc::new(PgSessionError::Unavailable(err.to_string())))
        }
        Err(err) => {
            tracing::warn!(error = %err, "session loop failed");
            SessionTermination::Error(Arc::new(err))
        }
    };
    // Release (or physically close, when discarded) before signalling, so a
    // waiter that immediately re-seizes sees the connection back in the pool.
    drop(conn);
    let _ = term_tx.send(Some(termination));
}
