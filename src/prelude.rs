//! Glob-import convenience: `use pg_session::prelude::*;`

pub use crate::driver::{Connection, CopyHandle, ExecuteFlags, TransactionState};
pub use crate::error::PgSessionError;
pub use crate::pool::{SessionPool, SessionPoolBuilder};
pub use crate::query::{Query, QueryFactory};
pub use crate::session::{
    BINARY_COPY_PREAMBLE, CopySource, NotifyStream, PgSession, QueryStream, ResultSink,
    SessionTermination,
};
pub use crate::sql::{ColumnSpec, CreateTable, SqlString, SqlWriter};
pub use crate::types::{
    Column, CommandStatus, DataRow, Notice, NotifyMessage, PgValue, QueryEvent, ResultSet,
    RowDescription,
};
