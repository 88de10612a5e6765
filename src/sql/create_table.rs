use super::{SqlString, SqlWriter};

/// Table persistence class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    #[default]
    Permanent,
    Temporary,
    Unlogged,
}

/// One column definition.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    name: String,
    type_name: String,
    nullable: bool,
    default: Option<String>,
    generated: Option<String>,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ColumnSpec {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            default: None,
            generated: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn default_expr(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Make this a stored generated column computed from `expression`.
    #[must_use]
    pub fn generated_stored(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(expression.into());
        self
    }

    fn write(&self, w: &mut impl SqlWriter) {
        w.identifier(&self.name);
        w.expression(&self.type_name);
        if let Some(expression) = &self.generated {
            w.keyword("GENERATED ALWAYS AS");
            w.operator(" (");
            w.expression(expression);
            w.operator(")");
            w.keyword("STORED");
        }
        if !self.nullable {
            w.keyword("NOT NULL");
        }
        if let Some(expression) = &self.default {
            w.keyword("DEFAULT");
            w.expression(expression);
        }
    }
}

/// Builder for `CREATE TABLE` statements.
///
/// ```
/// use pg_session::sql::{ColumnSpec, CreateTable};
///
/// let sql = CreateTable::new("events")
///     .if_not_exists()
///     .column(ColumnSpec::new("id", "BIGINT").not_null())
///     .column(ColumnSpec::new("body", "JSONB"))
///     .primary_key(["id"])
///     .storage_parameter("fillfactor", "70")
///     .build();
/// assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"events\""));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CreateTable {
    name: String,
    persistence: Persistence,
    if_not_exists: bool,
    columns: Vec<ColumnSpec>,
    primary_key: Vec<String>,
    storage_parameters: Vec<(String, String)>,
}

impl CreateTable {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        CreateTable {
            name: name.into(),
            ..CreateTable::default()
        }
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a `WITH (...)` storage parameter.
    #[must_use]
    pub fn storage_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage_parameters.push((name.into(), value.into()));
        self
    }

    /// Render through `w`.
    pub fn write(&self, w: &mut impl SqlWriter) {
        w.keyword("CREATE");
        match self.persistence {
            Persistence::Permanent => {}
            Persistence::Temporary => w.keyword("TEMPORARY"),
            Persistence::Unlogged => w.keyword("UNLOGGED"),
        }
        w.keyword("TABLE");
        if self.if_not_exists {
            w.keyword("IF NOT EXISTS");
        }
        w.identifier(&self.name);
        w.operator(" (");
        let column_count = self.columns.len();
        w.list(column_count + usize::from(!self.primary_key.is_empty()), |w, idx| {
            if idx < column_count {
                self.columns[idx].write(w);
            } else {
                w.keyword("PRIMARY KEY");
                w.operator(" (");
                w.list(self.primary_key.len(), |w, pk| w.identifier(&self.primary_key[pk]));
                w.operator(")");
            }
        });
        w.operator(")");
        if !self.storage_parameters.is_empty() {
            w.keyword("WITH");
            w.operator(" (");
            w.list(self.storage_parameters.len(), |w, idx| {
                let (name, value) = &self.storage_parameters[idx];
                w.expression(name);
                w.operator(" = ");
                w.expression(value);
            });
            w.operator(")");
        }
    }

    /// Render to a string with the default writer.
    #[must_use]
    pub fn build(&self) -> String {
        let mut w = SqlString::new();
        self.write(&mut w);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnSpec, CreateTable, Persistence};

    #[test]
    fn renders_full_definition() {
        let sql = CreateTable::new("measurements")
            .persistence(Persistence::Unlogged)
            .if_not_exists()
            .column(ColumnSpec::new("id", "BIGINT").not_null())
            .column(ColumnSpec::new("taken_at", "TIMESTAMPTZ").default_expr("now()"))
            .column(ColumnSpec::new("celsius", "DOUBLE PRECISION"))
            .column(
                ColumnSpec::new("fahrenheit", "DOUBLE PRECISION")
                    .generated_stored("celsius * 9 / 5 + 32"),
            )
            .primary_key(["id"])
            .storage_parameter("fillfactor", "70")
            .build();

        assert_eq!(
            sql,
            "CREATE UNLOGGED TABLE IF NOT EXISTS \"measurements\" (\
             \"id\" BIGINT NOT NULL, \
             \"taken_at\" TIMESTAMPTZ DEFAULT now(), \
             \"celsius\" DOUBLE PRECISION, \
             \"fahrenheit\" DOUBLE PRECISION GENERATED ALWAYS AS (celsius * 9 / 5 + 32) STORED, \
             PRIMARY KEY (\"id\")) \
             WITH (fillfactor = 70)"
        );
    }

    #[test]
    fn temporary_table_without_extras() {
        let sql = CreateTable::new("scratch")
            .persistence(Persistence::Temporary)
            .column(ColumnSpec::new("v", "TEXT"))
            .build();
        assert_eq!(sql, "CREATE TEMPORARY TABLE \"scratch\" (\"v\" TEXT)");
    }
}
