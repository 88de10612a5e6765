use crate::types::PgValue;

/// Default number of rows the driver is asked to surface per round trip.
///
/// Portal-based fetching is not used by the bundled driver, which streams the
/// full result set; the value still rides every query so alternate drivers
/// can honor it.
pub const DEFAULT_BATCH_SIZE: u32 = 1024;

/// One executable statement with its parameters.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub params: Vec<PgValue>,
    pub batch_size: u32,
}

/// Narrow capability for fabricating [`Query`] values.
///
/// Sessions hold this instead of a handle to the owning pool, so the session
/// and the pool stay acyclic and sessions can be constructed directly in
/// tests.
#[derive(Debug, Clone)]
pub struct QueryFactory {
    batch_size: u32,
}

impl QueryFactory {
    #[must_use]
    pub fn new(batch_size: u32) -> Self {
        QueryFactory { batch_size }
    }

    #[must_use]
    pub fn query(&self, sql: impl Into<String>, params: Vec<PgValue>) -> Query {
        Query {
            sql: sql.into(),
            params,
            batch_size: self.batch_size,
        }
    }
}

impl Default for QueryFactory {
    fn default() -> Self {
        QueryFactory::new(DEFAULT_BATCH_SIZE)
    }
}
