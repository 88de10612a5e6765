use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

use crate::error::PgSessionError;
use crate::types::{DataRow, PgValue};

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            PgValue::Int(i) => (*i).to_sql(ty, out),
            PgValue::Float(f) => (*f).to_sql(ty, out),
            PgValue::Text(s) => s.to_sql(ty, out),
            PgValue::Bool(b) => (*b).to_sql(ty, out),
            PgValue::Timestamp(ts) => ts.to_sql(ty, out),
            PgValue::Json(json) => json.to_sql(ty, out),
            PgValue::Bytes(bytes) => bytes.to_sql(ty, out),
            PgValue::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::CHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

/// Borrow a parameter slice in the form `tokio_postgres` wants.
pub(crate) fn as_sql_refs(params: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Decode one wire row into a [`DataRow`].
///
/// # Errors
/// Returns an error if a cell cannot be decoded as any supported type.
pub(crate) fn decode_row(row: &Row) -> Result<DataRow, tokio_postgres::Error> {
    let mut values = Vec::with_capacity(row.columns().len());
    for idx in 0..row.columns().len() {
        values.push(decode_value(row, idx)?);
    }
    Ok(DataRow { values })
}

fn decode_value(row: &Row, idx: usize) -> Result<PgValue, tokio_postgres::Error> {
    let ty = row.columns()[idx].type_();
    let value = match ty.name() {
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map_or(PgValue::Null, |v| PgValue::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map_or(PgValue::Null, |v| PgValue::Int(i64::from(v))),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)?
            .map_or(PgValue::Null, PgValue::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map_or(PgValue::Null, |v| PgValue::Float(f64::from(v))),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)?
            .map_or(PgValue::Null, PgValue::Float),
        "bool" => row
            .try_get::<_, Option<bool>>(idx)?
            .map_or(PgValue::Null, PgValue::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(PgValue::Null, PgValue::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map_or(PgValue::Null, |v| PgValue::Timestamp(v.naive_utc())),
        "json" | "jsonb" => row
            .try_get::<_, Option<Value>>(idx)?
            .map_or(PgValue::Null, PgValue::Json),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(PgValue::Null, PgValue::Bytes),
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map_or(PgValue::Null, PgValue::Text),
    };
    Ok(value)
}

/// Classify a `tokio_postgres` error without touching connection state.
pub(crate) fn classify_pg_error(err: tokio_postgres::Error) -> PgSessionError {
    if let Some(db) = err.as_db_error() {
        PgSessionError::Server {
            code: db.code().code().to_string(),
            message: db.message().to_string(),
        }
    } else if err.is_closed() {
        PgSessionError::Unavailable(err.to_string())
    } else {
        PgSessionError::Postgres(err)
    }
}
