//! ESRI Shapefile reader (`.shp` geometries + sibling `.dbf` attributes).

use std::path::{Path, PathBuf};

use ::shapefile::dbase::{self, FieldValue};
use ::shapefile::{PolygonRing, Shape, ShapeReader};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

use super::infer::{
    coerce_value, exact_i64, normalize_column_name, project_table, Observed, TypeInference,
};
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::types::{DataType, Field, ReaderData, Schema, Table, Value};

/// Name of the geometry column appended after the attribute columns.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// dBase pseudo-field some readers report for the record deletion marker.
const DELETION_FLAG: &str = "DeletionFlag";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapefileOptions {
    pub lowercase_columns: bool,
    pub column_schema: Option<Schema>,
}

/// A shapefile materialized into a geospatial [`Table`] at construction.
#[derive(Debug, Clone)]
pub struct ShapefileReader {
    path: PathBuf,
    data: ReaderData,
}

impl ShapefileReader {
    pub fn open(path: impl AsRef<Path>, options: &ShapefileOptions) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = read_shapefile_from_path(&path, options)?;
        Ok(Self {
            path,
            data: ReaderData::Table(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataReader for ShapefileReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Shapefile
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

fn shp_err(path: &Path, e: impl std::fmt::Display) -> EtlError {
    EtlError::Shapefile {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Read a `.shp` file and its `.dbf` attribute table into a [`Table`].
///
/// Attribute columns keep `.dbf` order; the geometry column comes last.
pub fn read_shapefile_from_path(path: impl AsRef<Path>, options: &ShapefileOptions) -> EtlResult<Table> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EtlError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "shapefile not found"),
        ));
    }

    let shapes = ShapeReader::from_path(path)
        .and_then(|reader| reader.read())
        .map_err(|e| shp_err(path, e))?;

    let dbf_path = path.with_extension("dbf");
    let (names, records) = if dbf_path.exists() {
        let mut dbf = dbase::Reader::from_path(&dbf_path).map_err(|e| shp_err(&dbf_path, e))?;
        let names: Vec<String> = dbf
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .filter(|name| name != DELETION_FLAG)
            .collect();
        let records = dbf.read().map_err(|e| shp_err(&dbf_path, e))?;
        (names, Some(records))
    } else {
        log::warn!("{} has no sibling .dbf; reading geometries only", path.display());
        (Vec::new(), None)
    };

    if let Some(records) = &records {
        if records.len() != shapes.len() {
            return Err(shp_err(
                path,
                format!("{} shapes but {} attribute records", shapes.len(), records.len()),
            ));
        }
    }

    let mut inference = vec![TypeInference::default(); names.len()];
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(shapes.len());
    for (idx, shape) in shapes.into_iter().enumerate() {
        let mut row = Vec::with_capacity(names.len() + 1);
        if let Some(record) = records.as_ref().and_then(|r| r.get(idx)) {
            for (name, slot) in names.iter().zip(inference.iter_mut()) {
                let (observed, value) = record.get(name).map_or((Observed::Null, Value::Null), field_to_value);
                slot.observe(observed);
                row.push(value);
            }
        }
        row.push(shape_to_geometry(shape).map_or(Value::Null, Value::Geometry));
        rows.push(row);
    }

    let mut fields: Vec<Field> = names
        .iter()
        .zip(inference.iter())
        .map(|(name, inf)| {
            let name = if options.lowercase_columns {
                normalize_column_name(name)
            } else {
                name.clone()
            };
            Field::new(name, inf.resolve())
        })
        .collect();
    fields.push(Field::new(GEOMETRY_COLUMN, DataType::Geometry));
    let schema = Schema::new(fields);

    let feature_count = rows.len();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(schema.fields.iter())
                .map(|(v, f)| coerce_value(v, f.data_type))
                .collect()
        })
        .collect();

    log::debug!("read shapefile {} ({feature_count} features)", path.display());
    let table = Table::new(schema, rows).with_geometry_column(GEOMETRY_COLUMN);
    match &options.column_schema {
        Some(schema) => project_table(table, schema),
        None => Ok(table),
    }
}

fn field_to_value(value: &FieldValue) -> (Observed, Value) {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) if !s.trim().is_empty() => {
            (Observed::Text, Value::Utf8(s.trim().to_string()))
        }
        FieldValue::Character(_) | FieldValue::Memo(_) => (Observed::Null, Value::Null),
        FieldValue::Numeric(Some(n)) => match exact_i64(*n) {
            Some(i) => (Observed::Int, Value::Int64(i)),
            None => (Observed::Float, Value::Float64(*n)),
        },
        FieldValue::Float(Some(n)) => (Observed::Float, Value::Float64(f64::from(*n))),
        FieldValue::Numeric(None) | FieldValue::Float(None) => (Observed::Null, Value::Null),
        FieldValue::Integer(i) => (Observed::Int, Value::Int64(i64::from(*i))),
        FieldValue::Double(d) | FieldValue::Currency(d) => (Observed::Float, Value::Float64(*d)),
        FieldValue::Logical(Some(b)) => (Observed::Bool, Value::Bool(*b)),
        FieldValue::Logical(None) | FieldValue::Date(None) => (Observed::Null, Value::Null),
        FieldValue::Date(Some(d)) => (
            Observed::Text,
            Value::Utf8(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day())),
        ),
        other => (Observed::Text, Value::Utf8(format!("{other:?}"))),
    }
}

trait ShapePoint {
    fn coord(&self) -> Coord<f64>;
}

impl ShapePoint for ::shapefile::Point {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl ShapePoint for ::shapefile::PointM {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl ShapePoint for ::shapefile::PointZ {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

fn line<P: ShapePoint>(points: &[P]) -> LineString<f64> {
    LineString::new(points.iter().map(ShapePoint::coord).collect())
}

fn polyline<P: ShapePoint>(parts: &[Vec<P>]) -> Geometry<f64> {
    match parts {
        [single] => Geometry::LineString(line(single)),
        _ => Geometry::MultiLineString(MultiLineString::new(parts.iter().map(|p| line(p)).collect())),
    }
}

/// Outer rings start a new polygon; inner rings are holes of the preceding outer ring.
fn polygon<P: ShapePoint>(rings: &[PolygonRing<P>]) -> Geometry<f64> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push((line(points), Vec::new())),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(line(points)),
                None => polygons.push((line(points), Vec::new())),
            },
        }
    }
    let mut polygons: Vec<Polygon<f64>> = polygons
        .into_iter()
        .map(|(exterior, holes)| Polygon::new(exterior, holes))
        .collect();
    match polygons.len() {
        1 => Geometry::Polygon(polygons.remove(0)),
        _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
    }
}

fn multipoint<P: ShapePoint>(points: &[P]) -> Geometry<f64> {
    Geometry::MultiPoint(MultiPoint::new(
        points.iter().map(|p| Point(p.coord())).collect(),
    ))
}

fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    let geometry = match shape {
        Shape::NullShape => return None,
        Shape::Point(p) => Geometry::Point(Point(p.coord())),
        Shape::PointM(p) => Geometry::Point(Point(p.coord())),
        Shape::PointZ(p) => Geometry::Point(Point(p.coord())),
        Shape::Polyline(l) => polyline(l.parts()),
        Shape::PolylineM(l) => polyline(l.parts()),
        Shape::PolylineZ(l) => polyline(l.parts()),
        Shape::Polygon(p) => polygon(p.rings()),
        Shape::PolygonM(p) => polygon(p.rings()),
        Shape::PolygonZ(p) => polygon(p.rings()),
        Shape::Multipoint(m) => multipoint(m.points()),
        Shape::MultipointM(m) => multipoint(m.points()),
        Shape::MultipointZ(m) => multipoint(m.points()),
        Shape::Multipatch(_) => {
            log::warn!("multipatch shapes are not supported; reading as null geometry");
            return None;
        }
    };
    Some(geometry)
}
