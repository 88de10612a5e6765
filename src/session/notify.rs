//! `LISTEN`/`NOTIFY` fan-out attached to the session loop.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::driver::Connection;
use crate::error::PgSessionError;
use crate::types::NotifyMessage;

pub(crate) type ListenerMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<NotifyMessage>>>>;

/// Per-session mapping from channel name to subscriber.
///
/// Insertions happen on the facade side before the `LISTEN` statement is
/// submitted, so the mapping is visible before the server can send anything
/// on the new channel. Removal happens here, when a subscriber goes away.
pub(crate) struct NotificationHub {
    listeners: ListenerMap,
    bias: i32,
}

impl NotificationHub {
    pub(crate) fn new(listeners: ListenerMap) -> Self {
        NotificationHub { listeners, bias: 0 }
    }

    /// Poll the connection for notifications and dispatch them.
    ///
    /// Short-circuits when nothing is listening. `delta` biases the driver's
    /// blocking-wait hint: positive while the loop is waiting for work,
    /// negative right after completing an item. No backpressure is applied;
    /// subscribers must be fast or buffer.
    pub(crate) fn poll_if_needed(
        &mut self,
        conn: &mut dyn Connection,
        delta: i32,
    ) -> Result<(), PgSessionError> {
        {
            let guard = lock_listeners(&self.listeners)?;
            if guard.is_empty() {
                return Ok(());
            }
        }
        self.bias = (self.bias + delta).clamp(0, 1_000);
        let batch = conn.notifications(self.bias)?;
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = lock_listeners(&self.listeners)?;
        for message in batch {
            let channel = message.channel.clone();
            let stale = if let Some(subscriber) = guard.get(&channel) {
                subscriber.send(message).is_err()
            } else {
                tracing::debug!(channel = %channel, "dropping notification for unknown channel");
                false
            };
            if stale {
                guard.remove(&channel);
                tracing::trace!(channel = %channel, "removed listener with no subscriber");
            }
        }
        Ok(())
    }
}

pub(crate) fn lock_listeners(
    listeners: &ListenerMap,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<NotifyMessage>>>, PgSessionError>
{
    listeners
        .lock()
        .map_err(|_| PgSessionError::Internal("listener registry poisoned".to_string()))
}

/// Stream of notifications for one channel.
///
/// Delivery is best-effort FIFO relative to the session's poll order. The
/// stream ends when the session terminates.
pub struct NotifyStream {
    channel: String,
    rx: mpsc::UnboundedReceiver<NotifyMessage>,
}

impl NotifyStream {
    pub(crate) fn new(channel: String, rx: mpsc::UnboundedReceiver<NotifyMessage>) -> Self {
        NotifyStream { channel, rx }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next notification; `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<NotifyMessage> {
        self.rx.recv().await
    }
}

impl Stream for NotifyStream {
    type Item = NotifyMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for NotifyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyStream")
            .field("channel", &self.channel)
            .finish()
    }
}
