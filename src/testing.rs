//! Scripted connection for driving the session engine without a server.
//!
//! [`MockConnection`] implements [`Connection`] against shared state the test
//! keeps a handle to: queued execute scripts, pending notifications, copy
//! behavior, and a call log that records the invoking thread (the engine
//! promises every connection call happens on the session's loop thread).

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::driver::{Connection, CopyHandle, ExecuteFlags, TransactionState};
use crate::error::PgSessionError;
use crate::session::ResultSink;
use crate::types::{NotifyMessage, PgValue, QueryEvent};

/// One recorded connection call, tagged with the calling thread.
#[derive(Debug, Clone)]
pub enum MockCall {
    SetAutoCommit { auto_commit: bool, thread: ThreadId },
    Execute { sql: String, suppress_begin: bool, thread: ThreadId },
    Rollback { thread: ThreadId },
    Notifications { hint: i32, thread: ThreadId },
    CopyIn { sql: String, thread: ThreadId },
    CopyFinish { thread: ThreadId },
}

impl MockCall {
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        match self {
            MockCall::SetAutoCommit { thread, .. }
            | MockCall::Execute { thread, .. }
            | MockCall::Rollback { thread }
            | MockCall::Notifications { thread, .. }
            | MockCall::CopyIn { thread, .. }
            | MockCall::CopyFinish { thread } => *thread,
        }
    }
}

/// Scripted response for one `execute` call.
#[derive(Debug)]
pub struct ExecuteScript {
    pub events: Vec<QueryEvent>,
    pub error: Option<PgSessionError>,
    pub state_after: TransactionState,
}

impl ExecuteScript {
    /// Successful statement leaving the framing transaction open.
    #[must_use]
    pub fn ok(events: Vec<QueryEvent>) -> Self {
        ExecuteScript {
            events,
            error: None,
            state_after: TransactionState::Open,
        }
    }

    /// Server error response; the transaction enters the failed state.
    #[must_use]
    pub fn server_error(code: &str, message: &str) -> Self {
        ExecuteScript {
            events: Vec::new(),
            error: Some(PgSessionError::Server {
                code: code.to_string(),
                message: message.to_string(),
            }),
            state_after: TransactionState::Failed,
        }
    }

    /// Override the transaction state observed after this statement.
    #[must_use]
    pub fn with_state(mut self, state: TransactionState) -> Self {
        self.state_after = state;
        self
    }
}

/// Shared observable state behind a [`MockConnection`].
#[derive(Default)]
pub struct MockState {
    calls: Mutex<Vec<MockCall>>,
    scripts: Mutex<VecDeque<ExecuteScript>>,
    txn: Mutex<Option<TransactionState>>,
    pending: Mutex<VecDeque<NotifyMessage>>,
    copy_rows: Mutex<u64>,
    copy_error: Mutex<Option<PgSessionError>>,
    copy_bytes: Mutex<Vec<u8>>,
    discarded: AtomicBool,
}

impl MockState {
    pub fn push_script(&self, script: ExecuteScript) {
        lock(&self.scripts).push_back(script);
    }

    pub fn push_notification(&self, message: NotifyMessage) {
        lock(&self.pending).push_back(message);
    }

    pub fn set_copy_rows(&self, rows: u64) {
        *lock(&self.copy_rows) = rows;
    }

    /// Make the next `copy_in` fail with `error`.
    pub fn fail_next_copy(&self, error: PgSessionError) {
        *lock(&self.copy_error) = Some(error);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Raw bytes written through copy handles, preamble included.
    #[must_use]
    pub fn copy_bytes(&self) -> Vec<u8> {
        lock(&self.copy_bytes).clone()
    }

    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        lock(&self.txn).unwrap_or(TransactionState::Idle)
    }

    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Distinct threads that have touched the connection.
    #[must_use]
    pub fn calling_threads(&self) -> Vec<ThreadId> {
        let mut threads = Vec::new();
        for call in lock(&self.calls).iter() {
            let thread = call.thread();
            if !threads.contains(&thread) {
                threads.push(thread);
            }
        }
        threads
    }

    #[must_use]
    pub fn rollback_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, MockCall::Rollback { .. }))
            .count()
    }

    #[must_use]
    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn set_txn(&self, state: TransactionState) {
        *lock(&self.txn) = Some(state);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("mock state poisoned")
}

/// Scripted [`Connection`] implementation.
#[derive(Default)]
pub struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    #[must_use]
    pub fn new() -> Self {
        MockConnection::default()
    }

    /// Handle to the shared state; keep it before attaching the connection.
    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Connection for MockConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), PgSessionError> {
        self.state.record(MockCall::SetAutoCommit {
            auto_commit,
            thread: thread::current().id(),
        });
        Ok(())
    }

    fn execute(
        &mut self,
        sql: &str,
        _params: &[PgValue],
        sink: &ResultSink,
        _batch_size: u32,
        flags: ExecuteFlags,
    ) -> Result<(), PgSessionError> {
        self.state.record(MockCall::Execute {
            sql: sql.to_string(),
            suppress_begin: flags.suppress_begin,
            thread: thread::current().id(),
        });
        let script = lock(&self.state.scripts)
            .pop_front()
            .unwrap_or_else(|| ExecuteScript::ok(Vec::new()));
        for event in script.events {
            sink.next(event);
        }
        self.state.set_txn(script.state_after);
        match script.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rollback(&mut self) -> Result<(), PgSessionError> {
        self.state.record(MockCall::Rollback {
            thread: thread::current().id(),
        });
        self.state.set_txn(TransactionState::Idle);
        Ok(())
    }

    fn transaction_state(&self) -> TransactionState {
        self.state.transaction_state()
    }

    fn notifications(&mut self, hint: i32) -> Result<Vec<NotifyMessage>, PgSessionError> {
        self.state.record(MockCall::Notifications {
            hint,
            thread: thread::current().id(),
        });
        Ok(lock(&self.state.pending).drain(..).collect())
    }

    fn copy_in(&mut self, sql: &str) -> Result<Box<dyn CopyHandle>, PgSessionError> {
        self.state.record(MockCall::CopyIn {
            sql: sql.to_string(),
            thread: thread::current().id(),
        });
        if let Some(err) = lock(&self.state.copy_error).take() {
            self.state.set_txn(TransactionState::Failed);
            return Err(err);
        }
        self.state.set_txn(TransactionState::Open);
        Ok(Box::new(MockCopyHandle {
            state: Arc::clone(&self.state),
        }))
    }

    fn copy_in_reader(&mut self, sql: &str, reader: &mut dyn Read) -> Result<u64, PgSessionError> {
        let mut copy = self.copy_in(sql)?;
        let mut payload = Vec::new();
        reader
            .read_to_end(&mut payload)
            .map_err(PgSessionError::CopySource)?;
        copy.write(&payload)?;
        copy.finish()
    }

    fn discard(&mut self) {
        self.state.discarded.store(true, Ordering::SeqCst);
    }
}

struct MockCopyHandle {
    state: Arc<MockState>,
}

impl CopyHandle for MockCopyHandle {
    fn write(&mut self, buf: &[u8]) -> Result<(), PgSessionError> {
        lock(&self.state.copy_bytes).extend_from_slice(buf);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, PgSessionError> {
        self.state.record(MockCall::CopyFinish {
            thread: thread::current().id(),
        });
        Ok(*lock(&self.state.copy_rows))
    }
}
