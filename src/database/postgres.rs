#![cfg(feature = "postgis")]

//! PostgreSQL/PostGIS backend.

use std::fmt;

use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};

use super::backend::{Dialect, DriverError, SqlBackend, SqlParam};
use super::config::DatabaseConfig;
use super::orm::{ColumnDef, ColumnType};
use crate::geometry::{decode_wkb, encode_wkb};
use crate::reader::source::mask_connection_string;
use crate::types::Value;

/// A PostgreSQL server reached through a connection URL. Geometry columns need PostGIS.
pub struct PostgresBackend {
    url: String,
    client: Option<Client>,
}

impl fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("url", &mask_connection_string(&self.url))
            .field("connected", &self.client.is_some())
            .finish()
    }
}

impl PostgresBackend {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: None,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::from_url(config.url())
    }

    fn client(&mut self) -> Result<&mut Client, DriverError> {
        self.client.as_mut().ok_or(DriverError::NotConnected)
    }
}

fn classify(e: postgres::Error) -> DriverError {
    if e.is_closed() {
        return DriverError::Connect(Box::new(e));
    }
    // SQLSTATE class 23: integrity constraint violation.
    match e.code() {
        Some(state) if state.code().starts_with("23") => DriverError::Constraint(Box::new(e)),
        _ => DriverError::Other(Box::new(e)),
    }
}

type BoxedParam = Box<dyn ToSql + Sync>;

fn to_postgres(param: &SqlParam) -> Result<BoxedParam, DriverError> {
    let boxed: BoxedParam = match (&param.value, param.column_type) {
        (Value::Null, ColumnType::Integer) => Box::new(None::<i64>),
        (Value::Null, ColumnType::Float) => Box::new(None::<f64>),
        (Value::Null, ColumnType::Boolean) => Box::new(None::<bool>),
        (Value::Null, ColumnType::Text) => Box::new(None::<String>),
        (Value::Null, ColumnType::Bytes | ColumnType::Geometry { .. }) => Box::new(None::<Vec<u8>>),
        (Value::Int64(v), ColumnType::Integer) => Box::new(*v),
        (Value::Int64(v), ColumnType::Float) => Box::new(*v as f64),
        (Value::Float64(v), ColumnType::Float) => Box::new(*v),
        (Value::Bool(v), ColumnType::Boolean) => Box::new(*v),
        (Value::Utf8(v), ColumnType::Text) => Box::new(v.clone()),
        (Value::Binary(v), ColumnType::Bytes | ColumnType::Geometry { .. }) => Box::new(v.clone()),
        (Value::Geometry(g), ColumnType::Geometry { .. }) => Box::new(encode_wkb(g)),
        (v, column_type) => {
            return Err(DriverError::other(format!(
                "cannot bind {:?} to a {column_type:?} column",
                v.data_type()
            )));
        }
    };
    Ok(boxed)
}

fn from_postgres(row: &Row, idx: usize, column: &ColumnDef) -> Result<Value, DriverError> {
    let value = match column.column_type {
        ColumnType::Integer => Value::from(row.try_get::<_, Option<i64>>(idx).map_err(classify)?),
        ColumnType::Float => Value::from(row.try_get::<_, Option<f64>>(idx).map_err(classify)?),
        ColumnType::Boolean => Value::from(row.try_get::<_, Option<bool>>(idx).map_err(classify)?),
        ColumnType::Text => Value::from(row.try_get::<_, Option<String>>(idx).map_err(classify)?),
        ColumnType::Bytes => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(classify)?
            .map_or(Value::Null, Value::Binary),
        ColumnType::Geometry { .. } => match row.try_get::<_, Option<Vec<u8>>>(idx).map_err(classify)? {
            Some(wkb) => Value::Geometry(decode_wkb(&wkb).map_err(|e| DriverError::Other(Box::new(e)))?),
            None => Value::Null,
        },
    };
    Ok(value)
}

fn bind(params: &[SqlParam]) -> Result<Vec<BoxedParam>, DriverError> {
    params.iter().map(to_postgres).collect()
}

fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref()).collect()
}

impl SqlBackend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn target(&self) -> String {
        mask_connection_string(&self.url)
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = Client::connect(&self.url, NoTls).map_err(|e| DriverError::Connect(Box::new(e)))?;
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        match self.client.take() {
            Some(client) => client.close().map_err(|e| DriverError::Other(Box::new(e))),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.client()?.batch_execute(sql).map_err(classify)
    }

    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError> {
        let boxed = bind(params)?;
        self.client()?.execute(sql, &as_refs(&boxed)).map_err(classify)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[&ColumnDef],
    ) -> Result<Vec<Vec<Value>>, DriverError> {
        let boxed = bind(params)?;
        let rows = self.client()?.query(sql, &as_refs(&boxed)).map_err(classify)?;
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| from_postgres(row, idx, column))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }
}
