//! OGC GeoPackage reader.
//!
//! A GeoPackage is an SQLite database; layers are listed in `gpkg_contents` and geometry columns
//! in `gpkg_geometry_columns`. Geometries are stored as GeoPackage binary blobs.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::infer::{coerce_value, normalize_column_name, project_table, Observed, TypeInference};
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::geometry::decode_gpkg;
use crate::types::{DataType, Field, ReaderData, Schema, Table, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoPackageOptions {
    /// Layer to read; defaults to the first layer in `gpkg_contents`.
    pub layer: Option<String>,
    pub lowercase_columns: bool,
    pub column_schema: Option<Schema>,
}

/// A GeoPackage whose selected layer is materialized at construction.
#[derive(Debug, Clone)]
pub struct GeoPackageReader {
    path: PathBuf,
    options: GeoPackageOptions,
    layers: Vec<String>,
    layer: String,
    data: ReaderData,
}

impl GeoPackageReader {
    pub fn open(path: impl AsRef<Path>, options: GeoPackageOptions) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_read_only(&path)?;
        let layers = list_layers(&conn, &path)?;

        let layer = match options.layer.as_deref() {
            Some(layer) => {
                ensure_layer(&layers, layer)?;
                layer.to_string()
            }
            None => layers.first().cloned().ok_or_else(|| {
                EtlError::configuration(format!("GeoPackage '{}' has no layers", path.display()))
            })?,
        };

        let table = read_layer_from(&conn, &path, &layer, &options)?;
        Ok(Self {
            path,
            options,
            layers,
            layer,
            data: ReaderData::Table(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layer names in `gpkg_contents` order.
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// The layer materialized at construction.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Read another layer on demand.
    pub fn read_layer(&self, layer: &str) -> EtlResult<Table> {
        ensure_layer(&self.layers, layer)?;
        let conn = open_read_only(&self.path)?;
        read_layer_from(&conn, &self.path, layer, &self.options)
    }
}

impl DataReader for GeoPackageReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::GeoPackage
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

fn gpkg_err(path: &Path) -> impl Fn(rusqlite::Error) -> EtlError + '_ {
    move |source| EtlError::GeoPackage {
        path: path.to_path_buf(),
        source,
    }
}

fn open_read_only(path: &Path) -> EtlResult<Connection> {
    if !path.exists() {
        return Err(EtlError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "geopackage not found"),
        ));
    }
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(gpkg_err(path))
}

fn ensure_layer(layers: &[String], layer: &str) -> EtlResult<()> {
    if layers.iter().any(|l| l == layer) {
        Ok(())
    } else {
        Err(EtlError::configuration(format!(
            "layer '{layer}' not found in GeoPackage (layers: {layers:?})"
        )))
    }
}

fn list_layers(conn: &Connection, path: &Path) -> EtlResult<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT table_name FROM gpkg_contents \
             WHERE data_type IN ('features', 'attributes') ORDER BY rowid",
        )
        .map_err(gpkg_err(path))?;
    let layers = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(gpkg_err(path))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(gpkg_err(path))?;
    Ok(layers)
}

/// Quote an SQLite identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map a declared SQLite/GeoPackage column type onto a [`DataType`], when it is unambiguous.
fn declared_type(decl: &str) -> Option<DataType> {
    let decl = decl.to_ascii_uppercase();
    match decl.as_str() {
        "INTEGER" | "INT" | "MEDIUMINT" | "SMALLINT" | "TINYINT" => Some(DataType::Int64),
        "REAL" | "DOUBLE" | "FLOAT" => Some(DataType::Float64),
        "BOOLEAN" => Some(DataType::Bool),
        "DATE" | "DATETIME" => Some(DataType::Utf8),
        "BLOB" => Some(DataType::Binary),
        d if d.starts_with("TEXT") => Some(DataType::Utf8),
        _ => None,
    }
}

/// Declared type, unless the stored values disagree with it.
///
/// SQLite affinity lets an `INTEGER` column hold `REAL` or `TEXT` values, so the
/// observed values decide whenever they do not fit the declaration.
fn column_type(declared: Option<DataType>, inference: &TypeInference) -> DataType {
    let Some(declared) = declared else {
        return inference.resolve();
    };
    if !inference.has_values() {
        return declared;
    }
    match (declared, inference.resolve()) {
        (DataType::Float64, DataType::Int64 | DataType::Float64) => DataType::Float64,
        (DataType::Int64, observed @ (DataType::Int64 | DataType::Float64)) => observed,
        (DataType::Bool, DataType::Int64 | DataType::Bool) => DataType::Bool,
        (DataType::Utf8, _) => DataType::Utf8,
        (_, observed) => observed,
    }
}

struct ColumnInfo {
    name: String,
    declared: Option<DataType>,
    is_geometry: bool,
}

fn read_layer_from(
    conn: &Connection,
    path: &Path,
    layer: &str,
    options: &GeoPackageOptions,
) -> EtlResult<Table> {
    let geometry_column: Option<String> = conn
        .query_row(
            "SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1",
            [layer],
            |row| row.get(0),
        )
        .optional()
        .map_err(gpkg_err(path))?;

    let mut stmt = conn
        .prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(gpkg_err(path))?;
    let columns: Vec<ColumnInfo> = stmt
        .query_map([layer], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .map_err(gpkg_err(path))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(gpkg_err(path))?
        .into_iter()
        // The integer primary key (`fid`) is the feature id, not an attribute.
        .filter(|(_, decl, pk)| !(*pk == 1 && decl.eq_ignore_ascii_case("INTEGER")))
        .map(|(name, decl, _)| {
            let is_geometry = geometry_column.as_deref() == Some(name.as_str());
            ColumnInfo {
                declared: declared_type(&decl),
                is_geometry,
                name,
            }
        })
        .collect();

    let select_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {}", quote_ident(layer));

    let mut inference = vec![TypeInference::default(); columns.len()];
    let mut rows: Vec<Vec<Value>> = Vec::new();
    if !columns.is_empty() {
        let mut stmt = conn.prepare(&sql).map_err(gpkg_err(path))?;
        let mut result = stmt.query([]).map_err(gpkg_err(path))?;
        while let Some(row) = result.next().map_err(gpkg_err(path))? {
            let mut out = Vec::with_capacity(columns.len());
            for (idx, (col, slot)) in columns.iter().zip(inference.iter_mut()).enumerate() {
                let raw = row.get_ref(idx).map_err(gpkg_err(path))?;
                let (observed, value) = sqlite_to_value(raw, col, layer)?;
                slot.observe(observed);
                out.push(value);
            }
            rows.push(out);
        }
    }

    let schema = Schema::new(
        columns
            .iter()
            .zip(inference.iter())
            .map(|(col, inf)| {
                let data_type = if col.is_geometry {
                    DataType::Geometry
                } else {
                    column_type(col.declared, inf)
                };
                let name = if options.lowercase_columns && !col.is_geometry {
                    normalize_column_name(&col.name)
                } else {
                    col.name.clone()
                };
                Field::new(name, data_type)
            })
            .collect(),
    );

    let rows: Vec<Vec<Value>> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(schema.fields.iter())
                .map(|(v, f)| match (v, f.data_type) {
                    (Value::Int64(i), DataType::Bool) => Value::Bool(i != 0),
                    (v, t) => coerce_value(v, t),
                })
                .collect()
        })
        .collect();

    log::debug!(
        "read layer '{layer}' from {} ({} features)",
        path.display(),
        rows.len()
    );
    let mut table = Table::new(schema, rows);
    if let Some(geom) = columns.iter().find(|c| c.is_geometry) {
        table = table.with_geometry_column(geom.name.clone());
    }
    match &options.column_schema {
        Some(schema) => project_table(table, schema),
        None => Ok(table),
    }
}

fn sqlite_to_value(raw: ValueRef<'_>, col: &ColumnInfo, layer: &str) -> EtlResult<(Observed, Value)> {
    let pair = match raw {
        ValueRef::Null => (Observed::Null, Value::Null),
        ValueRef::Blob(bytes) if col.is_geometry => {
            let decoded = decode_gpkg(bytes).map_err(|e| match e {
                EtlError::Geometry { message, .. } => EtlError::Geometry {
                    context: format!("{layer}.{}", col.name),
                    message,
                },
                other => other,
            })?;
            match decoded.geometry {
                Some(g) => (Observed::Geometry, Value::Geometry(g)),
                None => (Observed::Null, Value::Null),
            }
        }
        ValueRef::Integer(i) => (Observed::Int, Value::Int64(i)),
        ValueRef::Real(f) => (Observed::Float, Value::Float64(f)),
        ValueRef::Text(bytes) => (
            Observed::Text,
            Value::Utf8(String::from_utf8_lossy(bytes).into_owned()),
        ),
        ValueRef::Blob(bytes) => (Observed::Binary, Value::Binary(bytes.to_vec())),
    };
    Ok(pair)
}
