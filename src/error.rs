use thiserror::Error;

/// Unified error type for session, pool, driver, and copy operations.
#[derive(Debug, Error)]
pub enum PgSessionError {
    /// The session facade was invoked after the session stopped accepting work.
    #[error("session is not active")]
    SessionNotActive,

    /// The session terminated while this work item was still queued or in flight.
    #[error("session closed before the work item completed")]
    SessionClosed,

    /// The server answered a statement with an error response.
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },

    /// The byte-buffer source feeding a streaming `COPY` failed.
    #[error("copy source error: {0}")]
    CopySource(#[from] std::io::Error),

    /// The physical connection is gone.
    #[error("PostgreSQL unavailable: {0}")]
    Unavailable(String),

    /// A failed transaction state was observed between work items.
    #[error("transaction failed")]
    TransactionFailed,

    #[error("pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error("internal session error: {0}")]
    Internal(String),
}

impl PgSessionError {
    /// True when the error means the physical connection can no longer be used.
    ///
    /// The session runner discards (rather than releases) the connection for
    /// these errors.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        match self {
            PgSessionError::Unavailable(_) => true,
            PgSessionError::Postgres(err) => err.is_closed(),
            _ => false,
        }
    }
}
