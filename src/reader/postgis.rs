#![cfg(feature = "postgis")]

//! PostgreSQL/PostGIS table reader.

use std::fmt;

use postgres::{Client, NoTls};

use super::infer::{normalize_column_name, project_table};
use super::source::mask_connection_string;
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::geometry::decode_wkb;
use crate::types::{DataType, Field, ReaderData, Schema, Table, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostGisOptions {
    /// Table to read (required).
    pub table_name: String,
    /// Database schema; defaults to the connection's `current_schema()`.
    pub schema: Option<String>,
    /// Geometry column; defaults to the first geometry/geography column.
    pub geometry_column: Option<String>,
    pub lowercase_columns: bool,
    pub column_schema: Option<Schema>,
}

impl PostGisOptions {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    /// `"schema"."table"`, or `"table"` without a schema.
    pub fn formatted_table_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table_name)),
            None => quote_ident(&self.table_name),
        }
    }
}

/// A PostGIS table materialized at construction. The connection is closed once the read ends.
pub struct PostGisReader {
    url: String,
    options: PostGisOptions,
    data: ReaderData,
}

impl fmt::Debug for PostGisReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostGisReader")
            .field("url", &mask_connection_string(&self.url))
            .field("options", &self.options)
            .field("rows", &self.data.row_count())
            .finish()
    }
}

impl PostGisReader {
    pub fn open(url: &str, options: PostGisOptions) -> EtlResult<Self> {
        if options.table_name.trim().is_empty() {
            return Err(EtlError::configuration(
                "a table_name is required to read from a database source",
            ));
        }
        let table = read_postgis_table(url, &options)?;
        Ok(Self {
            url: url.to_owned(),
            options,
            data: ReaderData::Table(table),
        })
    }

    pub fn options(&self) -> &PostGisOptions {
        &self.options
    }

    pub fn formatted_table_name(&self) -> String {
        self.options.formatted_table_name()
    }
}

impl DataReader for PostGisReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::PostGis
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgColumnKind {
    Int,
    Float,
    Bool,
    Bytes,
    Geometry,
    Text,
}

impl PgColumnKind {
    fn classify(data_type: &str, udt_name: &str) -> Self {
        match (data_type, udt_name) {
            (_, "geometry" | "geography") => Self::Geometry,
            ("smallint" | "integer" | "bigint", _) => Self::Int,
            ("real" | "double precision" | "numeric", _) => Self::Float,
            ("boolean", _) => Self::Bool,
            ("bytea", _) => Self::Bytes,
            _ => Self::Text,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Self::Int => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Bool => DataType::Bool,
            Self::Bytes => DataType::Binary,
            Self::Geometry => DataType::Geometry,
            Self::Text => DataType::Utf8,
        }
    }

    /// Select expression normalizing the column to a type the driver decodes directly.
    fn select_expr(self, column: &str) -> String {
        let ident = quote_ident(column);
        match self {
            Self::Int => format!("{ident}::int8"),
            Self::Float => format!("{ident}::float8"),
            Self::Bool => ident,
            Self::Bytes => ident,
            Self::Geometry => format!("ST_AsBinary({ident})"),
            Self::Text => format!("{ident}::text"),
        }
    }
}

fn db_err(operation: String) -> impl FnOnce(postgres::Error) -> EtlError {
    move |e| EtlError::Database {
        operation,
        source: Box::new(e),
    }
}

/// Read every row of `options.table_name` into a [`Table`].
pub fn read_postgis_table(url: &str, options: &PostGisOptions) -> EtlResult<Table> {
    let target = mask_connection_string(url);
    let mut client = Client::connect(url, NoTls).map_err(|e| EtlError::Connection {
        target: target.clone(),
        source: Box::new(e),
    })?;
    log::debug!("connected to {target}");

    let result = read_with_client(&mut client, options);
    if let Err(e) = client.close() {
        log::warn!("closing connection to {target} failed: {e}");
    }
    result
}

fn read_with_client(client: &mut Client, options: &PostGisOptions) -> EtlResult<Table> {
    let table_name = options.formatted_table_name();
    let columns: Vec<(String, PgColumnKind)> = client
        .query(
            "SELECT column_name::text, data_type::text, udt_name::text \
             FROM information_schema.columns \
             WHERE table_name = $1 AND table_schema = COALESCE($2::text, current_schema()) \
             ORDER BY ordinal_position",
            &[&options.table_name, &options.schema],
        )
        .map_err(db_err(format!("describe {table_name}")))?
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let udt_name: String = row.get(2);
            (name, PgColumnKind::classify(&data_type, &udt_name))
        })
        .collect();

    if columns.is_empty() {
        return Err(EtlError::configuration(format!("table {table_name} not found")));
    }

    let geometry_column = match &options.geometry_column {
        Some(configured) => {
            if !columns
                .iter()
                .any(|(name, kind)| name == configured && *kind == PgColumnKind::Geometry)
            {
                return Err(EtlError::configuration(format!(
                    "geometry column '{configured}' not found in {table_name}"
                )));
            }
            Some(configured.clone())
        }
        None => columns
            .iter()
            .find(|(_, kind)| *kind == PgColumnKind::Geometry)
            .map(|(name, _)| name.clone()),
    };

    let select_list = columns
        .iter()
        .map(|(name, kind)| kind.select_expr(name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {table_name}");
    log::trace!("{sql}");

    let pg_rows = client
        .query(sql.as_str(), &[])
        .map_err(db_err(format!("read {table_name}")))?;

    let mut rows = Vec::with_capacity(pg_rows.len());
    for pg_row in &pg_rows {
        let mut row = Vec::with_capacity(columns.len());
        for (idx, (name, kind)) in columns.iter().enumerate() {
            row.push(decode_cell(pg_row, idx, *kind, name, &table_name)?);
        }
        rows.push(row);
    }

    let rename = |name: &str| {
        if options.lowercase_columns && geometry_column.as_deref() != Some(name) {
            normalize_column_name(name)
        } else {
            name.to_owned()
        }
    };
    let schema = Schema::new(
        columns
            .iter()
            .map(|(name, kind)| Field::new(rename(name), kind.data_type()))
            .collect(),
    );

    log::debug!("read {} rows from {table_name}", rows.len());
    let mut table = Table::new(schema, rows);
    if let Some(geom) = geometry_column {
        table = table.with_geometry_column(geom);
    }
    match &options.column_schema {
        Some(schema) => project_table(table, schema),
        None => Ok(table),
    }
}

fn decode_cell(
    row: &postgres::Row,
    idx: usize,
    kind: PgColumnKind,
    column: &str,
    table_name: &str,
) -> EtlResult<Value> {
    let get_err = |e: postgres::Error| EtlError::Database {
        operation: format!("decode {table_name}.{column}"),
        source: Box::new(e),
    };
    let value = match kind {
        PgColumnKind::Int => Value::from(row.try_get::<_, Option<i64>>(idx).map_err(get_err)?),
        PgColumnKind::Float => Value::from(row.try_get::<_, Option<f64>>(idx).map_err(get_err)?),
        PgColumnKind::Bool => Value::from(row.try_get::<_, Option<bool>>(idx).map_err(get_err)?),
        PgColumnKind::Text => Value::from(row.try_get::<_, Option<String>>(idx).map_err(get_err)?),
        PgColumnKind::Bytes => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(get_err)?
            .map_or(Value::Null, Value::Binary),
        PgColumnKind::Geometry => match row.try_get::<_, Option<Vec<u8>>>(idx).map_err(get_err)? {
            Some(wkb) => Value::Geometry(decode_wkb(&wkb).map_err(|e| match e {
                EtlError::Geometry { message, .. } => EtlError::Geometry {
                    context: format!("{table_name}.{column}"),
                    message,
                },
                other => other,
            })?),
            None => Value::Null,
        },
    };
    Ok(value)
}
