use chrono::NaiveDateTime;
use serde_json::Value;

/// Value enum covering the PostgreSQL types the crate converts natively.
///
/// Used both for statement parameters and for decoded row values.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Json(Value),
    Bytes(Vec<u8>),
}

impl PgValue {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let PgValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let PgValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let PgValue::Bool(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let PgValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<&NaiveDateTime> {
        if let PgValue::Timestamp(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        if let PgValue::Json(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let PgValue::Bytes(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }
}

/// One column of a result-set description.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: u32,
}

/// Shape of the rows that follow, emitted once per result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowDescription {
    pub columns: Vec<Column>,
}

impl RowDescription {
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }
}

/// One decoded data row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub values: Vec<PgValue>,
}

impl DataRow {
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&PgValue> {
        self.values.get(idx)
    }
}

/// Completion tag of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatus {
    pub command: String,
    pub oid: u32,
    pub update_count: u64,
    pub insert_count: u64,
}

impl CommandStatus {
    /// Synthetic status emitted by the session when a `COPY` finishes.
    #[must_use]
    pub fn copy(rows: u64) -> Self {
        CommandStatus {
            command: "COPY".to_string(),
            oid: 0,
            update_count: rows,
            insert_count: 0,
        }
    }
}

/// Asynchronous notice attached to a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub severity: String,
    pub code: String,
    pub message: String,
}

/// Non-terminal events delivered to a work item's sink, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    RowDescription(RowDescription),
    Row(DataRow),
    CommandStatus(CommandStatus),
    Notice(Notice),
}

/// Fully collected output of one submission, built by
/// [`QueryStream::fetch_all`](crate::session::QueryStream::fetch_all).
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub description: Option<RowDescription>,
    pub rows: Vec<DataRow>,
    pub status: Option<CommandStatus>,
    pub notices: Vec<Notice>,
}

impl ResultSet {
    /// Look up a value by row index and column name.
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&PgValue> {
        let idx = self.description.as_ref()?.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}

/// A `NOTIFY` message delivered to a [`listen`](crate::session::PgSession::listen)
/// subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessage {
    pub channel: String,
    pub payload: String,
    pub backend_pid: i32,
}
