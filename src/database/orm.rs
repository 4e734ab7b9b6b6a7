//! Declarative table mappings and the [`Entity`] trait.
//!
//! A Rust type becomes persistable by describing its table once (usually in a `LazyLock`) and
//! converting itself to and from a [`Record`]:
//!
//! ```
//! use std::sync::LazyLock;
//!
//! use etl_toolbox::database::{ColumnDef, ColumnType, Entity, Record, TableMapping};
//! use etl_toolbox::EtlResult;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Station {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! static STATIONS: LazyLock<TableMapping> = LazyLock::new(|| {
//!     TableMapping::new(
//!         "stations",
//!         vec![
//!             ColumnDef::new("id", ColumnType::Integer).primary_key().identity(),
//!             ColumnDef::new("name", ColumnType::Text).not_null().unique(),
//!         ],
//!     )
//! });
//!
//! impl Entity for Station {
//!     fn mapping() -> &'static TableMapping {
//!         &STATIONS
//!     }
//!
//!     fn to_record(&self) -> Record {
//!         Record::new("stations").with("id", self.id).with("name", self.name.as_str())
//!     }
//!
//!     fn from_record(record: &Record) -> EtlResult<Self> {
//!         Ok(Self {
//!             id: record.get("id")?,
//!             name: record.require("name")?,
//!         })
//!     }
//! }
//!
//! assert!(Station::is_identity_column("id"));
//! ```

use geo::Geometry;

use super::backend::Dialect;
use crate::error::{EtlError, EtlResult};
use crate::types::{DataType, Value};

/// Storage type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Bytes,
    Geometry { srid: i32 },
}

impl ColumnType {
    pub fn data_type(self) -> DataType {
        match self {
            Self::Integer => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Boolean => DataType::Bool,
            Self::Text => DataType::Utf8,
            Self::Bytes => DataType::Binary,
            Self::Geometry { .. } => DataType::Geometry,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// One mapped column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    /// Generated by the database (identity / auto-increment).
    pub identity: bool,
    pub unique: bool,
    pub nullable: bool,
    /// Applied when an inserted record leaves the column null.
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            identity: false,
            unique: false,
            nullable: true,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Table name, optional schema and ordered columns of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableMapping {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// `schema.name`, or `name` without a schema.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Quoted table reference for `dialect`. SQLite has no schemas, so the schema is dropped.
    pub fn sql_name(&self, dialect: Dialect) -> String {
        match (&self.schema, dialect) {
            (Some(schema), Dialect::Postgres) => {
                format!("{}.{}", dialect.quote_ident(schema), dialect.quote_ident(&self.name))
            }
            _ => dialect.quote_ident(&self.name),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn identity_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.identity).collect()
    }

    pub fn unique_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.unique).collect()
    }

    pub fn is_identity_column(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.identity)
    }

    /// The declared default of `name`; `None` for unknown columns or columns without one.
    pub fn default_value_for_column(&self, name: &str) -> Option<&Value> {
        self.column(name).and_then(|c| c.default.as_ref())
    }

    pub fn default_values_for_columns<'a>(
        &'a self,
        names: &[&'a str],
    ) -> Vec<(&'a str, Option<&'a Value>)> {
        names
            .iter()
            .map(|name| (*name, self.default_value_for_column(name)))
            .collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this mapping.
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let pk = self.primary_key_columns();
        // A lone INTEGER PRIMARY KEY is SQLite's rowid alias and must be declared inline.
        let inline_pk = dialect == Dialect::Sqlite
            && pk.len() == 1
            && pk[0].column_type == ColumnType::Integer;

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut def = format!(
                    "{} {}",
                    dialect.quote_ident(&col.name),
                    dialect.column_sql_type(col)
                );
                if inline_pk && col.primary_key {
                    def.push_str(" PRIMARY KEY");
                } else if !col.nullable {
                    def.push_str(" NOT NULL");
                }
                if col.unique && !col.primary_key {
                    def.push_str(" UNIQUE");
                }
                if let Some(literal) = col.default.as_ref().and_then(|v| dialect.literal(v)) {
                    def.push_str(" DEFAULT ");
                    def.push_str(&literal);
                }
                def
            })
            .collect();

        if !pk.is_empty() && !inline_pk {
            let names = pk
                .iter()
                .map(|c| dialect.quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("PRIMARY KEY ({names})"));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.sql_name(dialect),
            parts.join(", ")
        )
    }
}

/// Column values of one row, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entity: String,
    values: Vec<(String, Value)>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            values: Vec::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing an existing value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.values.push((column, value)),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Typed value of `column`; `None` when the column is absent or null.
    pub fn get<T: FromValue>(&self, column: &str) -> EtlResult<Option<T>> {
        match self.value(column) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value)
                .map(Some)
                .map_err(|message| self.mapping_error(column, message)),
        }
    }

    /// Typed value of `column`, failing when it is absent or null.
    pub fn require<T: FromValue>(&self, column: &str) -> EtlResult<T> {
        self.get(column)?
            .ok_or_else(|| self.mapping_error(column, "value is missing".to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn mapping_error(&self, column: &str, message: String) -> EtlError {
        EtlError::Mapping {
            entity: self.entity.clone(),
            column: column.to_string(),
            message,
        }
    }
}

/// Conversion from a stored [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn unexpected(expected: &str, value: &Value) -> String {
    match value.data_type() {
        Some(found) => format!("expected {expected}, found {found:?}"),
        None => format!("expected {expected}, found null"),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_i64().ok_or_else(|| unexpected("integer", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|_| format!("{v} is out of range for i32"))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Float64(v) => Ok(*v),
            Value::Int64(v) => Ok(*v as f64),
            other => Err(unexpected("float", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int64(0) => Ok(false),
            Value::Int64(1) => Ok(true),
            other => Err(unexpected("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| unexpected("text", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Binary(v) => Ok(v.clone()),
            other => Err(unexpected("bytes", other)),
        }
    }
}

impl FromValue for Geometry<f64> {
    fn from_value(value: &Value) -> Result<Self, String> {
        value.as_geometry().cloned().ok_or_else(|| unexpected("geometry", value))
    }
}

/// A Rust type mapped onto a database table.
pub trait Entity: Sized {
    fn mapping() -> &'static TableMapping;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> EtlResult<Self>;

    fn is_identity_column(column: &str) -> bool {
        Self::mapping().is_identity_column(column)
    }

    /// Values that describe the entity's content: non-null, non-identity, and different from
    /// the column default. Ordered as the mapping's columns.
    fn content_values(&self) -> Vec<(String, Value)> {
        let mapping = Self::mapping();
        let record = self.to_record();
        mapping
            .columns
            .iter()
            .filter(|col| !col.identity)
            .filter_map(|col| {
                let value = record.value(&col.name)?;
                if value.is_null() || col.default.as_ref() == Some(value) {
                    return None;
                }
                Some((col.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Equality on [`Entity::content_values`]; generated keys and defaults are ignored.
    fn content_eq(&self, other: &Self) -> bool {
        self.content_values() == other.content_values()
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, ColumnType, Record, TableMapping};
    use crate::database::backend::Dialect;
    use crate::error::EtlError;
    use crate::types::Value;

    fn mapping() -> TableMapping {
        TableMapping::new(
            "stations",
            vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key().identity(),
                ColumnDef::new("name", ColumnType::Text).not_null().unique(),
                ColumnDef::new("active", ColumnType::Boolean).default_value(true),
                ColumnDef::new("geom", ColumnType::Geometry { srid: 4326 }),
            ],
        )
    }

    #[test]
    fn column_queries() {
        let m = mapping().with_schema("gis");
        assert_eq!(m.qualified_name(), "gis.stations");
        assert_eq!(m.sql_name(Dialect::Sqlite), "\"stations\"");
        assert_eq!(m.primary_key_columns().len(), 1);
        assert!(m.is_identity_column("id"));
        assert!(!m.is_identity_column("name"));
        assert_eq!(m.unique_columns()[0].name, "name");
        assert_eq!(
            m.default_values_for_columns(&["active", "name", "missing"]),
            vec![("active", Some(&Value::Bool(true))), ("name", None), ("missing", None)]
        );
    }

    #[test]
    fn create_table_per_dialect() {
        let m = mapping().with_schema("gis");
        assert_eq!(
            m.create_table_sql(Dialect::Postgres),
            "CREATE TABLE IF NOT EXISTS \"gis\".\"stations\" (\
             \"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY NOT NULL, \
             \"name\" TEXT NOT NULL UNIQUE, \
             \"active\" BOOLEAN DEFAULT TRUE, \
             \"geom\" geometry(Geometry, 4326), \
             PRIMARY KEY (\"id\"))"
        );
        assert_eq!(
            m.create_table_sql(Dialect::Sqlite),
            "CREATE TABLE IF NOT EXISTS \"stations\" (\
             \"id\" INTEGER PRIMARY KEY, \
             \"name\" TEXT NOT NULL UNIQUE, \
             \"active\" BOOLEAN DEFAULT 1, \
             \"geom\" BLOB)"
        );
    }

    #[test]
    fn record_getters_report_mapping_errors() {
        let record = Record::new("stations")
            .with("id", 7_i64)
            .with("name", "Alert")
            .with("geom", Value::Null);
        assert_eq!(record.get::<i64>("id").unwrap(), Some(7));
        assert_eq!(record.get::<String>("geom").unwrap(), None);

        let err = record.require::<i64>("name").unwrap_err();
        match err {
            EtlError::Mapping { entity, column, .. } => {
                assert_eq!(entity, "stations");
                assert_eq!(column, "name");
            }
            other => panic!("expected Mapping, got {other:?}"),
        }
        assert!(matches!(record.require::<bool>("missing"), Err(EtlError::Mapping { .. })));
    }
}
