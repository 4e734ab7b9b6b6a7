//! CRUD over [`Entity`] types, translated to SQL for a [`SqlBackend`].

use log::{debug, error, info, trace, warn};

use super::backend::{Dialect, DriverError, SqlBackend, SqlParam};
use super::orm::{ColumnType, Entity, Record, TableMapping};
use super::query::Query;
use crate::error::{EtlError, EtlResult};
use crate::types::Value;

/// Connection lifecycle and entity persistence against one database.
pub trait DatabaseHandler {
    fn connect(&mut self) -> EtlResult<()>;

    fn disconnect(&mut self) -> EtlResult<()>;

    fn is_connected(&self) -> bool;

    /// Run raw SQL without parameters; returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> EtlResult<u64>;

    /// Create the entity's table (and its PostgreSQL schema) when missing.
    fn create_table<E: Entity>(&mut self) -> EtlResult<()>;

    fn query<E: Entity>(&mut self, query: &Query) -> EtlResult<Vec<E>>;

    /// Insert one entity and return the stored row, generated identity values included.
    fn insert<E: Entity>(&mut self, entity: &E) -> EtlResult<E>;

    /// Insert every entity in a single transaction.
    fn insert_many<E: Entity>(&mut self, entities: &[E]) -> EtlResult<Vec<E>>;

    /// Update the row matching the entity's primary key.
    fn update<E: Entity>(&mut self, entity: &E) -> EtlResult<u64>;

    fn delete<E: Entity>(&mut self, query: &Query) -> EtlResult<u64>;

    /// Return the first row whose content equals the entity's, inserting it when none does.
    fn get_or_create<E: Entity>(&mut self, entity: &E) -> EtlResult<E>;
}

/// [`DatabaseHandler`] over any [`SqlBackend`].
///
/// Every call runs in its own transaction; [`DatabaseObjectsHandler::unit_of_work`] groups
/// several calls into one. The connection is closed on drop.
///
/// ```
/// use etl_toolbox::database::{DatabaseHandler, DatabaseObjectsHandler, SqliteBackend};
///
/// let mut handler = DatabaseObjectsHandler::new(SqliteBackend::in_memory());
/// handler.connect()?;
/// handler.execute("CREATE TABLE notes (body TEXT)")?;
/// assert_eq!(handler.execute("INSERT INTO notes (body) VALUES ('hello')")?, 1);
/// # Ok::<(), etl_toolbox::EtlError>(())
/// ```
#[derive(Debug)]
pub struct DatabaseObjectsHandler<B: SqlBackend> {
    backend: B,
    in_transaction: bool,
}

impl<B: SqlBackend> DatabaseObjectsHandler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_transaction: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `f` inside one transaction: committed when it returns `Ok`, rolled back otherwise.
    pub fn unit_of_work<T>(&mut self, f: impl FnOnce(&mut Self) -> EtlResult<T>) -> EtlResult<T> {
        self.transaction("unit of work", f)
    }

    fn transaction<T>(
        &mut self,
        operation: &str,
        f: impl FnOnce(&mut Self) -> EtlResult<T>,
    ) -> EtlResult<T> {
        if self.in_transaction {
            return f(self);
        }
        self.ensure_connected(operation)?;
        self.backend
            .batch("BEGIN")
            .map_err(|e| self.driver_error(operation, e))?;

        self.in_transaction = true;
        let result = f(self);
        self.in_transaction = false;

        match result {
            Ok(value) => match self.backend.batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    // A failed COMMIT (deferred constraints) leaves the transaction open.
                    let mapped = self.driver_error(operation, e);
                    self.rollback(operation);
                    Err(mapped)
                }
            },
            Err(e) => {
                self.rollback(operation);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, operation: &str) {
        if let Err(rollback) = self.backend.batch("ROLLBACK") {
            warn!("[{operation}] rollback failed: {rollback}");
        }
    }

    fn ensure_connected(&self, operation: &str) -> EtlResult<()> {
        if self.backend.is_connected() {
            Ok(())
        } else {
            Err(self.driver_error(operation, DriverError::NotConnected))
        }
    }

    fn driver_error(&self, operation: &str, err: DriverError) -> EtlError {
        let target = self.backend.target();
        let mapped = match err {
            DriverError::NotConnected => EtlError::Connection {
                target,
                source: "handler is not connected".into(),
            },
            DriverError::Connect(source) => EtlError::Connection { target, source },
            DriverError::Constraint(source) => EtlError::Persistence {
                operation: operation.to_string(),
                source,
            },
            DriverError::Other(source) => EtlError::Database {
                operation: operation.to_string(),
                source,
            },
        };
        error!("[{operation}] {mapped}");
        mapped
    }

    fn fetch<E: Entity>(
        &mut self,
        operation: &str,
        sql: &str,
        params: &[SqlParam],
    ) -> EtlResult<Vec<E>> {
        trace!("{sql}");
        let mapping = E::mapping();
        let columns: Vec<_> = mapping.columns.iter().collect();
        let rows = self
            .backend
            .query(sql, params, &columns)
            .map_err(|e| self.driver_error(operation, e))?;

        rows.into_iter()
            .map(|row| {
                let mut record = Record::new(mapping.name.clone());
                for (col, value) in mapping.columns.iter().zip(row) {
                    record.set(col.name.clone(), value);
                }
                E::from_record(&record)
            })
            .collect()
    }

    fn insert_row<E: Entity>(&mut self, entity: &E, operation: &str) -> EtlResult<E> {
        let mapping = E::mapping();
        let dialect = self.backend.dialect();
        let record = entity.to_record();
        ensure_mapped(mapping, &record)?;

        let mut names = Vec::new();
        let mut placeholders = Vec::new();
        let mut params = Vec::new();
        for col in &mapping.columns {
            let value = match (record.value(&col.name), &col.default) {
                (None | Some(Value::Null), _) if col.identity => continue,
                (None | Some(Value::Null), Some(default)) => default.clone(),
                (None | Some(Value::Null), None) => continue,
                (Some(value), _) => value.clone(),
            };
            names.push(dialect.quote_ident(&col.name));
            placeholders.push(dialect.placeholder(params.len() + 1, &col.column_type));
            params.push(SqlParam::new(value, col.column_type));
        }

        let table = mapping.sql_name(dialect);
        let returning = select_list(mapping, dialect);
        let sql = if names.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING {returning}")
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING {returning}",
                names.join(", "),
                placeholders.join(", ")
            )
        };

        let mut stored = self.fetch::<E>(operation, &sql, &params)?;
        let stored = stored.pop().ok_or_else(|| EtlError::Database {
            operation: operation.to_string(),
            source: "insert returned no row".into(),
        })?;
        debug!("inserted 1 row into {}", mapping.qualified_name());
        Ok(stored)
    }
}

fn ensure_mapped(mapping: &TableMapping, record: &Record) -> EtlResult<()> {
    match record.iter().find(|(column, _)| mapping.column(column).is_none()) {
        Some((column, _)) => Err(EtlError::Mapping {
            entity: mapping.qualified_name(),
            column: column.to_string(),
            message: "column is not part of the table mapping".to_string(),
        }),
        None => Ok(()),
    }
}

fn select_list(mapping: &TableMapping, dialect: Dialect) -> String {
    mapping
        .columns
        .iter()
        .map(|col| dialect.select_expr(col))
        .collect::<Vec<_>>()
        .join(", ")
}

impl<B: SqlBackend> DatabaseHandler for DatabaseObjectsHandler<B> {
    fn connect(&mut self) -> EtlResult<()> {
        self.backend
            .connect()
            .map_err(|e| self.driver_error("connect", e))?;
        info!("connected to {}", self.backend.target());
        Ok(())
    }

    fn disconnect(&mut self) -> EtlResult<()> {
        if !self.backend.is_connected() {
            return Ok(());
        }
        self.in_transaction = false;
        self.backend
            .disconnect()
            .map_err(|e| self.driver_error("disconnect", e))?;
        debug!("disconnected from {}", self.backend.target());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    fn execute(&mut self, sql: &str) -> EtlResult<u64> {
        self.ensure_connected("execute")?;
        trace!("{sql}");
        self.backend
            .execute(sql, &[])
            .map_err(|e| self.driver_error("execute", e))
    }

    fn create_table<E: Entity>(&mut self) -> EtlResult<()> {
        let mapping = E::mapping();
        let dialect = self.backend.dialect();
        let operation = format!("create table {}", mapping.qualified_name());
        self.transaction(&operation, |h| {
            if let (Some(schema), Dialect::Postgres) = (&mapping.schema, dialect) {
                let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", dialect.quote_ident(schema));
                h.backend.batch(&sql).map_err(|e| h.driver_error(&operation, e))?;
            }
            let sql = mapping.create_table_sql(dialect);
            trace!("{sql}");
            h.backend.batch(&sql).map_err(|e| h.driver_error(&operation, e))
        })
    }

    fn query<E: Entity>(&mut self, query: &Query) -> EtlResult<Vec<E>> {
        let mapping = E::mapping();
        let dialect = self.backend.dialect();
        let (clause, params) = query.to_sql(mapping, dialect, 1)?;
        let sql = format!(
            "SELECT {} FROM {}{clause}",
            select_list(mapping, dialect),
            mapping.sql_name(dialect)
        );
        let operation = format!("query {}", mapping.qualified_name());
        let found = self.transaction(&operation, |h| h.fetch::<E>(&operation, &sql, &params))?;
        debug!("{operation}: {} row(s)", found.len());
        Ok(found)
    }

    fn insert<E: Entity>(&mut self, entity: &E) -> EtlResult<E> {
        let operation = format!("insert into {}", E::mapping().qualified_name());
        self.transaction(&operation, |h| h.insert_row(entity, &operation))
    }

    fn insert_many<E: Entity>(&mut self, entities: &[E]) -> EtlResult<Vec<E>> {
        let operation = format!("insert into {}", E::mapping().qualified_name());
        self.transaction(&operation, |h| {
            entities
                .iter()
                .map(|entity| h.insert_row(entity, &operation))
                .collect()
        })
    }

    fn update<E: Entity>(&mut self, entity: &E) -> EtlResult<u64> {
        let mapping = E::mapping();
        let dialect = self.backend.dialect();
        let primary_key = mapping.primary_key_columns();
        if primary_key.is_empty() {
            return Err(EtlError::configuration(format!(
                "{} has no primary key to update by",
                mapping.qualified_name()
            )));
        }

        let record = entity.to_record();
        ensure_mapped(mapping, &record)?;

        let mut params = Vec::new();
        let mut assignments = Vec::new();
        for col in mapping.columns.iter().filter(|c| !c.primary_key && !c.identity) {
            let Some(value) = record.value(&col.name) else {
                continue;
            };
            params.push(SqlParam::new(value.clone(), col.column_type));
            assignments.push(format!(
                "{} = {}",
                dialect.quote_ident(&col.name),
                dialect.placeholder(params.len(), &col.column_type)
            ));
        }
        if assignments.is_empty() {
            debug!("nothing to update on {}", mapping.qualified_name());
            return Ok(0);
        }

        let mut keys = Vec::with_capacity(primary_key.len());
        for col in primary_key {
            let value = match record.value(&col.name) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    return Err(EtlError::configuration(format!(
                        "primary key '{}' of {} is null",
                        col.name,
                        mapping.qualified_name()
                    )));
                }
            };
            params.push(SqlParam::new(value, col.column_type));
            keys.push(format!(
                "{} = {}",
                dialect.quote_ident(&col.name),
                dialect.placeholder(params.len(), &col.column_type)
            ));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            mapping.sql_name(dialect),
            assignments.join(", "),
            keys.join(" AND ")
        );
        let operation = format!("update {}", mapping.qualified_name());
        self.transaction(&operation, |h| {
            trace!("{sql}");
            h.backend
                .execute(&sql, &params)
                .map_err(|e| h.driver_error(&operation, e))
        })
    }

    fn delete<E: Entity>(&mut self, query: &Query) -> EtlResult<u64> {
        if query.is_windowed() {
            return Err(EtlError::configuration(
                "delete does not accept ORDER BY, LIMIT or OFFSET",
            ));
        }
        let mapping = E::mapping();
        let dialect = self.backend.dialect();
        let (clause, params) = query.to_sql(mapping, dialect, 1)?;
        let sql = format!("DELETE FROM {}{clause}", mapping.sql_name(dialect));
        let operation = format!("delete from {}", mapping.qualified_name());
        let deleted = self.transaction(&operation, |h| {
            trace!("{sql}");
            h.backend
                .execute(&sql, &params)
                .map_err(|e| h.driver_error(&operation, e))
        })?;
        debug!("{operation}: {deleted} row(s)");
        Ok(deleted)
    }

    fn get_or_create<E: Entity>(&mut self, entity: &E) -> EtlResult<E> {
        let mapping = E::mapping();
        // Geometries cannot be compared by equality; they do not take part in the lookup.
        let lookup: Vec<(String, Value)> = entity
            .content_values()
            .into_iter()
            .filter(|(column, _)| {
                !matches!(
                    mapping.column(column).map(|c| c.column_type),
                    Some(ColumnType::Geometry { .. })
                )
            })
            .collect();
        if lookup.is_empty() {
            return self.insert(entity);
        }

        let query = lookup
            .into_iter()
            .fold(Query::and(), |query, (column, value)| query.eq(column, value));
        let operation = format!("get or create {}", mapping.qualified_name());
        self.transaction(&operation, |h| {
            let mut found = h.query::<E>(&query)?;
            if found.is_empty() {
                h.insert(entity)
            } else {
                debug!("{} already exists, returning the stored row", mapping.qualified_name());
                Ok(found.swap_remove(0))
            }
        })
    }
}

impl<B: SqlBackend> Drop for DatabaseObjectsHandler<B> {
    fn drop(&mut self) {
        if self.backend.is_connected() {
            if let Err(e) = self.backend.disconnect() {
                warn!("closing {} on drop failed: {e}", self.backend.target());
            }
        }
    }
}

/// Connect `handler`, run `f`, and disconnect whatever `f` returned.
pub fn with_connection<H, T>(handler: &mut H, f: impl FnOnce(&mut H) -> EtlResult<T>) -> EtlResult<T>
where
    H: DatabaseHandler,
{
    handler.connect()?;
    let result = f(handler);
    let closed = handler.disconnect();
    let value = result?;
    closed?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{DatabaseHandler, DatabaseObjectsHandler};
    use crate::database::sqlite::SqliteBackend;
    use crate::error::EtlError;

    #[test]
    fn raw_sql_needs_a_connection() {
        let mut handler = DatabaseObjectsHandler::new(SqliteBackend::in_memory());
        let err = handler.execute("SELECT 1").unwrap_err();
        assert!(matches!(err, EtlError::Connection { .. }));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let mut handler = DatabaseObjectsHandler::new(SqliteBackend::in_memory());
        handler.connect().unwrap();
        handler.execute("CREATE TABLE t (v INTEGER NOT NULL)").unwrap();

        let err = handler
            .unit_of_work(|h| {
                h.execute("INSERT INTO t (v) VALUES (1)")?;
                h.execute("INSERT INTO t (v) VALUES (NULL)")
            })
            .unwrap_err();
        assert!(matches!(err, EtlError::Persistence { .. }));

        handler.execute("CREATE TABLE counts AS SELECT COUNT(*) AS n FROM t").unwrap();
        assert_eq!(handler.execute("DELETE FROM counts WHERE n = 0").unwrap(), 1);
    }
}
