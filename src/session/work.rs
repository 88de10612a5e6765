use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::query::Query;
use crate::session::sink::ResultSink;

/// Payload of a `COPY ... FROM STDIN`.
pub enum CopySource {
    /// Fully materialized payload; the engine logically prepends the binary
    /// preamble without copying.
    Buffered(Bytes),
    /// Lazy sequence of byte buffers. Each buffer is fully consumed before
    /// the next is requested.
    Streaming(BoxStream<'static, io::Result<Bytes>>),
}

impl std::fmt::Debug for CopySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopySource::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            CopySource::Streaming(_) => f.debug_tuple("Streaming").finish(),
        }
    }
}

/// One unit of work submitted to a session.
pub(crate) enum WorkItem {
    /// Graceful close request.
    Poison,
    /// Roll back any open transaction and exit without draining.
    Rollback,
    Query {
        query: Query,
        sink: ResultSink,
    },
    Copy {
        sql: String,
        source: CopySource,
        sink: ResultSink,
    },
}
