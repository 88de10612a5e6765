//! Per-submission event plumbing between the loop thread and subscribers.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, TryStreamExt};
use tokio::sync::mpsc;

use crate::error::PgSessionError;
use crate::session::work::WorkItem;
use crate::types::{QueryEvent, ResultSet};

pub(crate) enum SinkMessage {
    Event(QueryEvent),
    Complete,
    Error(PgSessionError),
}

/// Emitter half of one work item's result channel.
///
/// Buffering is unbounded per submission; producers are bounded by server
/// round-trip latency. The terminal methods consume the sink, so a work item
/// can receive at most one terminal event.
pub struct ResultSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ResultSink {
    pub(crate) fn channel() -> (ResultSink, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ResultSink { tx }, rx)
    }

    /// Emit one non-terminal result event. Events to a subscriber that has
    /// gone away are discarded; server-side execution is unaffected.
    pub fn next(&self, event: QueryEvent) {
        let _ = self.tx.send(SinkMessage::Event(event));
    }

    pub(crate) fn complete(self) {
        let _ = self.tx.send(SinkMessage::Complete);
    }

    pub(crate) fn error(self, err: PgSessionError) {
        let _ = self.tx.send(SinkMessage::Error(err));
    }
}

struct Seed {
    queue: crossbeam_channel::Sender<WorkItem>,
    item: WorkItem,
}

/// Cold stream of result events for one submission.
///
/// The work item is enqueued on first poll, so an unconsumed stream costs
/// nothing. The stream ends after completion, or after yielding exactly one
/// error. Dropping it does not cancel server-side execution.
pub struct QueryStream {
    seed: Option<Seed>,
    rx: mpsc::UnboundedReceiver<SinkMessage>,
    done: bool,
}

impl QueryStream {
    pub(crate) fn cold(
        queue: crossbeam_channel::Sender<WorkItem>,
        item: WorkItem,
        rx: mpsc::UnboundedReceiver<SinkMessage>,
    ) -> Self {
        QueryStream {
            seed: Some(Seed { queue, item }),
            rx,
            done: false,
        }
    }

    pub(crate) fn hot(rx: mpsc::UnboundedReceiver<SinkMessage>) -> Self {
        QueryStream {
            seed: None,
            rx,
            done: false,
        }
    }

    /// Drain the stream into a [`ResultSet`].
    ///
    /// # Errors
    /// Returns the stream's terminal error, if any.
    pub async fn fetch_all(mut self) -> Result<ResultSet, PgSessionError> {
        let mut out = ResultSet::default();
        while let Some(event) = self.try_next().await? {
            match event {
                QueryEvent::RowDescription(description) => out.description = Some(description),
                QueryEvent::Row(row) => out.rows.push(row),
                QueryEvent::CommandStatus(status) => out.status = Some(status),
                QueryEvent::Notice(notice) => out.notices.push(notice),
            }
        }
        Ok(out)
    }
}

impl Stream for QueryStream {
    type Item = Result<QueryEvent, PgSessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(seed) = this.seed.take() {
            if seed.queue.send(seed.item).is_err() {
                this.done = true;
                return Poll::Ready(Some(Err(PgSessionError::SessionClosed)));
            }
        }
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(SinkMessage::Event(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(SinkMessage::Complete)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(SinkMessage::Error(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            // Sink dropped without a terminal: the loop died out from under us.
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(PgSessionError::SessionClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("enqueued", &self.seed.is_none())
            .field("done", &self.done)
            .finish()
    }
}
