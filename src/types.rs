//! Core data model types shared by every reader.
//!
//! Readers produce a [`Table`]: an ordered [`Schema`] of typed [`Field`]s plus row-major
//! [`Value`] cells. Geospatial readers additionally name the column holding each row's geometry.
//! Multi-sheet sources produce a [`SheetMap`].

use std::fmt;

use geo::Geometry;

/// Logical data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Opaque bytes.
    Binary,
    /// Vector geometry (2D).
    Geometry,
}

/// A single named, typed column in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// An ordered list of fields describing the shape of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` when the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Vector geometry.
    Geometry(Geometry<f64>),
}

impl Value {
    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The data type this value belongs to, or `None` for nulls.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Utf8(_) => Some(DataType::Utf8),
            Self::Binary(_) => Some(DataType::Binary),
            Self::Geometry(_) => Some(DataType::Geometry),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Self::Geometry(g) => Some(g),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(v: Geometry<f64>) -> Self {
        Self::Geometry(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Self::Geometry(g) => write!(f, "{g:?}"),
        }
    }
}

/// In-memory table.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// Name of the column holding row geometries, for geospatial tables.
    pub geometry_column: Option<String>,
}

impl Table {
    /// Create a table from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            geometry_column: None,
        }
    }

    /// Mark `column` as the geometry column of this table.
    pub fn with_geometry_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_column = Some(column.into());
        self
    }

    /// Number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the table.
    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.schema.field_names().map(str::to_owned).collect()
    }

    /// `true` when the table carries a geometry column.
    pub fn is_geospatial(&self) -> bool {
        self.geometry_column.is_some()
    }

    /// All values of `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|row| row.get(idx).unwrap_or(&Value::Null)).collect())
    }

    /// The cell at `row` / `column`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Per-row geometries (`None` for null geometries). Empty for non-geospatial tables.
    pub fn geometries(&self) -> Vec<Option<&Geometry<f64>>> {
        let Some(idx) = self
            .geometry_column
            .as_deref()
            .and_then(|name| self.schema.index_of(name))
        else {
            return Vec::new();
        };
        self.rows
            .iter()
            .map(|row| row.get(idx).and_then(Value::as_geometry))
            .collect()
    }
}

/// Ordered mapping of sheet name to table, in workbook order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetMap {
    sheets: Vec<(String, Table)>,
}

impl SheetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sheet, keeping the position of an existing entry.
    pub fn insert(&mut self, name: impl Into<String>, table: Table) {
        let name = name.into();
        match self.sheets.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = table,
            None => self.sheets.push((name, table)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sheet names in workbook order.
    pub fn names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}

impl IntoIterator for SheetMap {
    type Item = (String, Table);
    type IntoIter = std::vec::IntoIter<(String, Table)>;

    fn into_iter(self) -> Self::IntoIter {
        self.sheets.into_iter()
    }
}

/// Column names of a [`ReaderData`], per sheet for workbooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Columns {
    Table(Vec<String>),
    Sheets(Vec<(String, Vec<String>)>),
}

/// Materialized result of one reader.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderData {
    /// A single table (most formats, or one selected sheet).
    Table(Table),
    /// Every sheet of a workbook, keyed by sheet name.
    Sheets(SheetMap),
}

impl ReaderData {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            Self::Sheets(_) => None,
        }
    }

    pub fn as_sheets(&self) -> Option<&SheetMap> {
        match self {
            Self::Sheets(s) => Some(s),
            Self::Table(_) => None,
        }
    }

    pub fn into_table(self) -> Option<Table> {
        match self {
            Self::Table(t) => Some(t),
            Self::Sheets(_) => None,
        }
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Table(t) => t.row_count(),
            Self::Sheets(s) => s.iter().map(|(_, t)| t.row_count()).sum(),
        }
    }

    /// Number of tables held (1, or the number of sheets).
    pub fn table_count(&self) -> usize {
        match self {
            Self::Table(_) => 1,
            Self::Sheets(s) => s.len(),
        }
    }

    pub fn columns(&self) -> Columns {
        match self {
            Self::Table(t) => Columns::Table(t.column_names()),
            Self::Sheets(s) => Columns::Sheets(
                s.iter()
                    .map(|(name, t)| (name.to_owned(), t.column_names()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Columns, DataType, Field, ReaderData, Schema, SheetMap, Table, Value};
    use geo::{Geometry, Point};

    fn sample_table() -> Table {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("geometry", DataType::Geometry),
        ]);
        Table::new(
            schema,
            vec![
                vec![Value::Int64(1), Value::Geometry(Geometry::Point(Point::new(1.0, 2.0)))],
                vec![Value::Int64(2), Value::Null],
            ],
        )
        .with_geometry_column("geometry")
    }

    #[test]
    fn table_accessors() {
        let t = sample_table();
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.column_names(), vec!["id".to_string(), "geometry".to_string()]);
        assert_eq!(t.value(1, "id"), Some(&Value::Int64(2)));
        assert_eq!(t.column("missing"), None);
        assert!(t.is_geospatial());

        let geoms = t.geometries();
        assert_eq!(geoms.len(), 2);
        assert!(geoms[0].is_some());
        assert!(geoms[1].is_none());
    }

    #[test]
    fn sheet_map_keeps_workbook_order() {
        let mut sheets = SheetMap::new();
        sheets.insert("b", sample_table());
        sheets.insert("a", sample_table());
        sheets.insert("b", Table::new(Schema::default(), Vec::new()));

        assert_eq!(sheets.names(), vec!["b", "a"]);
        assert_eq!(sheets.get("b").map(Table::row_count), Some(0));

        let data = ReaderData::Sheets(sheets);
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.table_count(), 2);
        match data.columns() {
            Columns::Sheets(cols) => assert_eq!(cols[1].0, "a"),
            Columns::Table(_) => panic!("expected per-sheet columns"),
        }
    }

    #[test]
    fn optional_values_convert_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Utf8("x".to_string()));
    }
}
