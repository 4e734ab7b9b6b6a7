//! SQLite backend (file or in-memory), used for local stores and tests.

use std::path::{Path, PathBuf};

use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};

use super::backend::{Dialect, DriverError, SqlBackend, SqlParam};
use super::orm::{ColumnDef, ColumnType};
use crate::geometry::{decode_wkb, encode_wkb};
use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Memory,
    File(PathBuf),
}

/// SQLite database. Geometries are stored as WKB blobs.
///
/// An in-memory database lives as long as its connection: disconnecting discards it.
#[derive(Debug)]
pub struct SqliteBackend {
    location: Location,
    conn: Option<Connection>,
}

impl SqliteBackend {
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, DriverError> {
        self.conn.as_mut().ok_or(DriverError::NotConnected)
    }
}

fn classify(e: rusqlite::Error) -> DriverError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            DriverError::Constraint(Box::new(e))
        }
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::CannotOpen => {
            DriverError::Connect(Box::new(e))
        }
        _ => DriverError::Other(Box::new(e)),
    }
}

fn to_sqlite(param: &SqlParam) -> Result<SqliteValue, DriverError> {
    let value = match (&param.value, param.column_type) {
        (Value::Null, _) => SqliteValue::Null,
        (Value::Int64(v), ColumnType::Integer) => SqliteValue::Integer(*v),
        (Value::Int64(v), ColumnType::Float) => SqliteValue::Real(*v as f64),
        (Value::Float64(v), ColumnType::Float) => SqliteValue::Real(*v),
        (Value::Bool(v), ColumnType::Boolean) => SqliteValue::Integer(i64::from(*v)),
        (Value::Utf8(v), ColumnType::Text) => SqliteValue::Text(v.clone()),
        (Value::Binary(v), ColumnType::Bytes | ColumnType::Geometry { .. }) => {
            SqliteValue::Blob(v.clone())
        }
        (Value::Geometry(g), ColumnType::Geometry { .. }) => {
            SqliteValue::Blob(encode_wkb(g))
        }
        (v, column_type) => {
            return Err(DriverError::other(format!(
                "cannot bind {:?} to a {column_type:?} column",
                v.data_type()
            )));
        }
    };
    Ok(value)
}

fn from_sqlite(raw: ValueRef<'_>, column: &ColumnDef) -> Result<Value, DriverError> {
    let value = match (raw, column.column_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(v), ColumnType::Boolean) => Value::Bool(v != 0),
        (ValueRef::Integer(v), ColumnType::Float) => Value::Float64(v as f64),
        (ValueRef::Integer(v), _) => Value::Int64(v),
        (ValueRef::Real(v), _) => Value::Float64(v),
        (ValueRef::Text(bytes), _) => Value::Utf8(String::from_utf8_lossy(bytes).into_owned()),
        (ValueRef::Blob(bytes), ColumnType::Geometry { .. }) => Value::Geometry(
            decode_wkb(bytes).map_err(|e| DriverError::Other(Box::new(e)))?,
        ),
        (ValueRef::Blob(bytes), _) => Value::Binary(bytes.to_vec()),
    };
    Ok(value)
}

fn bind(params: &[SqlParam]) -> Result<Vec<SqliteValue>, DriverError> {
    params.iter().map(to_sqlite).collect()
}

impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn target(&self) -> String {
        match &self.location {
            Location::Memory => "sqlite::memory:".to_string(),
            Location::File(path) => format!("sqlite:{}", path.display()),
        }
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = match &self.location {
            Location::Memory => Connection::open_in_memory(),
            Location::File(path) => Connection::open(path),
        }
        .map_err(|e| DriverError::Connect(Box::new(e)))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| DriverError::Other(Box::new(e))),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn()?.execute_batch(sql).map_err(classify)
    }

    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError> {
        let values = bind(params)?;
        let changed = self
            .conn()?
            .execute(sql, params_from_iter(values.iter()))
            .map_err(classify)?;
        Ok(changed as u64)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[&ColumnDef],
    ) -> Result<Vec<Vec<Value>>, DriverError> {
        let values = bind(params)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let mut rows = stmt.query(params_from_iter(values.iter())).map_err(classify)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut decoded = Vec::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let raw = row.get_ref(idx).map_err(classify)?;
                decoded.push(from_sqlite(raw, column)?);
            }
            out.push(decoded);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{to_sqlite, SqliteBackend};
    use crate::database::backend::{DriverError, SqlBackend, SqlParam};
    use crate::database::orm::{ColumnDef, ColumnType};
    use crate::types::Value;

    #[test]
    fn operations_require_a_connection() {
        let mut backend = SqliteBackend::in_memory();
        assert!(!backend.is_connected());
        assert!(matches!(backend.batch("SELECT 1"), Err(DriverError::NotConnected)));
    }

    #[test]
    fn unique_violations_are_constraint_errors() {
        let mut backend = SqliteBackend::in_memory();
        backend.connect().unwrap();
        backend.batch("CREATE TABLE t (name TEXT UNIQUE)").unwrap();
        let param = [SqlParam::new(Value::from("a"), ColumnType::Text)];
        assert_eq!(backend.execute("INSERT INTO t (name) VALUES (?1)", &param).unwrap(), 1);
        let err = backend.execute("INSERT INTO t (name) VALUES (?1)", &param).unwrap_err();
        assert!(matches!(err, DriverError::Constraint(_)));

        let name = ColumnDef::new("name", ColumnType::Text);
        let rows = backend.query("SELECT name FROM t", &[], &[&name]).unwrap();
        assert_eq!(rows, vec![vec![Value::from("a")]]);
        backend.disconnect().unwrap();
        assert!(!backend.is_connected());
    }

    #[test]
    fn booleans_round_trip_through_integers() {
        let mut backend = SqliteBackend::in_memory();
        backend.connect().unwrap();
        backend.batch("CREATE TABLE t (flag BOOLEAN)").unwrap();
        backend
            .execute(
                "INSERT INTO t (flag) VALUES (?1)",
                &[SqlParam::new(Value::Bool(true), ColumnType::Boolean)],
            )
            .unwrap();
        let flag = ColumnDef::new("flag", ColumnType::Boolean);
        let rows = backend.query("SELECT flag FROM t", &[], &[&flag]).unwrap();
        assert_eq!(rows[0][0], Value::Bool(true));
    }

    #[rstest]
    #[case(Value::Int64(1), ColumnType::Boolean)]
    #[case(Value::Bool(true), ColumnType::Integer)]
    #[case(Value::Bool(true), ColumnType::Text)]
    #[case(Value::Float64(2.5), ColumnType::Text)]
    #[case(Value::Utf8("3".into()), ColumnType::Integer)]
    fn mismatched_values_are_not_bound(#[case] value: Value, #[case] column_type: ColumnType) {
        let err = to_sqlite(&SqlParam::new(value, column_type)).unwrap_err();
        assert!(matches!(err, DriverError::Other(_)));
    }
}
