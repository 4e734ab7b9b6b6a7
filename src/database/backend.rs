//! Driver seam between [`super::DatabaseObjectsHandler`] and a concrete database client.

use thiserror::Error;

use super::orm::{ColumnDef, ColumnType};
use crate::error::BoxError;
use crate::types::Value;

/// SQL flavour spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn quote_ident(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Placeholder for the `index`-th (1-based) parameter bound to a column of `column_type`.
    ///
    /// PostgreSQL placeholders carry an explicit cast so parameter types never depend on
    /// server-side inference; geometries are sent as WKB.
    pub fn placeholder(self, index: usize, column_type: &ColumnType) -> String {
        match self {
            Self::Sqlite => format!("?{index}"),
            Self::Postgres => match column_type {
                ColumnType::Integer => format!("${index}::int8"),
                ColumnType::Float => format!("${index}::float8"),
                ColumnType::Boolean => format!("${index}::bool"),
                ColumnType::Text => format!("${index}::text"),
                ColumnType::Bytes => format!("${index}::bytea"),
                ColumnType::Geometry { srid } => format!("ST_GeomFromWKB(${index}::bytea, {srid})"),
            },
        }
    }

    /// Expression selecting `column` in the shape [`SqlBackend::query`] decodes.
    pub fn select_expr(self, column: &ColumnDef) -> String {
        let ident = self.quote_ident(&column.name);
        match (self, &column.column_type) {
            (Self::Sqlite, _) => ident,
            (Self::Postgres, ColumnType::Integer) => format!("{ident}::int8"),
            (Self::Postgres, ColumnType::Float) => format!("{ident}::float8"),
            (Self::Postgres, ColumnType::Text) => format!("{ident}::text"),
            (Self::Postgres, ColumnType::Geometry { .. }) => format!("ST_AsBinary({ident})"),
            (Self::Postgres, ColumnType::Boolean | ColumnType::Bytes) => ident,
        }
    }

    /// `LIMIT`/`OFFSET` clause, empty when neither is set.
    pub fn limit_clause(self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (self, limit, offset) {
            (_, None, None) => String::new(),
            (_, Some(limit), None) => format!(" LIMIT {limit}"),
            (_, Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Self::Postgres, None, Some(offset)) => format!(" OFFSET {offset}"),
            // SQLite only accepts OFFSET after a LIMIT.
            (Self::Sqlite, None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
        }
    }

    /// SQL type of a column in `CREATE TABLE`.
    pub fn column_sql_type(self, column: &ColumnDef) -> String {
        match (self, &column.column_type) {
            (Self::Postgres, ColumnType::Integer) if column.identity => {
                "BIGINT GENERATED BY DEFAULT AS IDENTITY".to_string()
            }
            (Self::Postgres, ColumnType::Integer) => "BIGINT".to_string(),
            (Self::Postgres, ColumnType::Float) => "DOUBLE PRECISION".to_string(),
            (Self::Postgres, ColumnType::Bytes) => "BYTEA".to_string(),
            (Self::Postgres, ColumnType::Geometry { srid }) => format!("geometry(Geometry, {srid})"),
            (Self::Sqlite, ColumnType::Integer) => "INTEGER".to_string(),
            (Self::Sqlite, ColumnType::Float) => "REAL".to_string(),
            (Self::Sqlite, ColumnType::Bytes | ColumnType::Geometry { .. }) => "BLOB".to_string(),
            (_, ColumnType::Boolean) => "BOOLEAN".to_string(),
            (_, ColumnType::Text) => "TEXT".to_string(),
        }
    }

    /// SQL literal for a column default, when it has one.
    pub fn literal(self, value: &Value) -> Option<String> {
        match value {
            Value::Null => Some("NULL".to_string()),
            Value::Int64(v) => Some(v.to_string()),
            Value::Float64(v) if v.is_finite() => Some(v.to_string()),
            Value::Bool(v) => Some(match (self, v) {
                (Self::Postgres, true) => "TRUE".to_string(),
                (Self::Postgres, false) => "FALSE".to_string(),
                (Self::Sqlite, true) => "1".to_string(),
                (Self::Sqlite, false) => "0".to_string(),
            }),
            Value::Utf8(v) => Some(format!("'{}'", v.replace('\'', "''"))),
            Value::Float64(_) | Value::Binary(_) | Value::Geometry(_) => None,
        }
    }
}

/// A bound statement parameter and the type of the column it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    pub value: Value,
    pub column_type: ColumnType,
}

impl SqlParam {
    pub fn new(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type }
    }
}

/// Failure reported by a backend, classified for the handler's error mapping.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("not connected")]
    NotConnected,
    #[error("{0}")]
    Connect(#[source] BoxError),
    #[error("{0}")]
    Constraint(#[source] BoxError),
    #[error("{0}")]
    Other(#[source] BoxError),
}

impl DriverError {
    pub fn other(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Other(message.into())
    }
}

/// A synchronous SQL client able to run parameterized statements.
pub trait SqlBackend {
    fn dialect(&self) -> Dialect;

    /// Human-readable target with credentials masked, for logs and errors.
    fn target(&self) -> String;

    fn connect(&mut self) -> Result<(), DriverError>;

    fn disconnect(&mut self) -> Result<(), DriverError>;

    fn is_connected(&self) -> bool;

    /// Run one or more statements without parameters or results.
    fn batch(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError>;

    /// Run a statement returning rows; each row holds one value per entry of `columns`.
    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[&ColumnDef],
    ) -> Result<Vec<Vec<Value>>, DriverError>;
}
