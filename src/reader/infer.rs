//! Column type inference and header normalization shared by the readers.

use crate::error::{EtlError, EtlResult};
use crate::types::{DataType, Schema, Table, Value};

/// What a single non-typed cell looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observed {
    Null,
    Int,
    Float,
    Bool,
    Text,
    Binary,
    Geometry,
}

/// Accumulates observations for one column and resolves the narrowest type that fits all of them.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TypeInference {
    ints: bool,
    floats: bool,
    bools: bool,
    text: bool,
    binary: bool,
    geometry: bool,
}

impl TypeInference {
    pub(crate) fn observe(&mut self, observed: Observed) {
        match observed {
            Observed::Null => {}
            Observed::Int => self.ints = true,
            Observed::Float => self.floats = true,
            Observed::Bool => self.bools = true,
            Observed::Text => self.text = true,
            Observed::Binary => self.binary = true,
            Observed::Geometry => self.geometry = true,
        }
    }

    /// `true` once any non-null cell was observed.
    pub(crate) fn has_values(&self) -> bool {
        self.ints || self.floats || self.bools || self.text || self.binary || self.geometry
    }

    pub(crate) fn resolve(&self) -> DataType {
        let numeric = self.ints || self.floats;
        let kinds = [numeric, self.bools, self.text, self.binary, self.geometry]
            .iter()
            .filter(|seen| **seen)
            .count();
        if kinds != 1 || self.text {
            return DataType::Utf8;
        }
        if self.geometry {
            DataType::Geometry
        } else if self.binary {
            DataType::Binary
        } else if self.bools {
            DataType::Bool
        } else if self.floats {
            DataType::Float64
        } else {
            DataType::Int64
        }
    }
}

/// Classify a raw text cell (CSV).
pub(crate) fn observe_text(raw: &str) -> Observed {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Observed::Null
    } else if trimmed.parse::<i64>().is_ok() {
        Observed::Int
    } else if parse_finite(trimmed).is_some() {
        Observed::Float
    } else if matches!(trimmed.to_ascii_lowercase().as_str(), "true" | "false") {
        Observed::Bool
    } else {
        Observed::Text
    }
}

/// Convert a raw text cell into `data_type`.
///
/// `row` is the 1-based user-facing row number used in error messages.
pub(crate) fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: DataType,
    raw: &str,
) -> EtlResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_err = |message: String| EtlError::Parse {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_err(e.to_string())),
        DataType::Float64 => match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Float64(f)),
            Ok(_) => Err(parse_err("expected a finite number".to_string())),
            Err(e) => Err(parse_err(e.to_string())),
        },
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(parse_err),
        DataType::Binary => Ok(Value::Binary(trimmed.as_bytes().to_vec())),
        DataType::Geometry => Err(parse_err(
            "geometry columns cannot be parsed from text".to_string(),
        )),
    }
}

/// Parse a float, rejecting `nan` and the infinities.
pub(crate) fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// `f` as an `i64` when it is integral and inside the `i64` range.
pub(crate) fn exact_i64(f: f64) -> Option<i64> {
    let in_range = f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64;
    (in_range && f.fract() == 0.0).then(|| f as i64)
}

pub(crate) fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

/// Lower-case a column name and replace spaces with underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Apply [`normalize_column_name`] to every header when `enabled`.
pub(crate) fn normalize_headers(headers: Vec<String>, enabled: bool) -> Vec<String> {
    if enabled {
        headers.iter().map(|h| normalize_column_name(h)).collect()
    } else {
        headers
    }
}

/// Widen already-typed cells to the resolved column type (e.g. ints in a float column).
pub(crate) fn coerce_value(value: Value, data_type: DataType) -> Value {
    match (value, data_type) {
        (Value::Int64(v), DataType::Float64) => Value::Float64(v as f64),
        (Value::Null, _) => Value::Null,
        (v, DataType::Utf8) if v.data_type() != Some(DataType::Utf8) => Value::Utf8(v.to_string()),
        (v, _) => v,
    }
}

/// Select and convert the columns of an already materialized table to `schema`.
///
/// Used by readers whose sources carry their own typing (Shapefile, GeoPackage, PostGIS).
pub(crate) fn project_table(table: Table, schema: &Schema) -> EtlResult<Table> {
    let mut col_idxs = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        let idx = table.schema.index_of(&field.name).ok_or_else(|| EtlError::SchemaMismatch {
            message: format!(
                "missing required column '{}'. columns={:?}",
                field.name,
                table.column_names()
            ),
        })?;
        col_idxs.push(idx);
    }

    let mut rows = Vec::with_capacity(table.rows.len());
    for (idx0, row) in table.rows.into_iter().enumerate() {
        let mut row: Vec<Option<Value>> = row.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(schema.len());
        for (field, &idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let value = row.get_mut(idx).and_then(Option::take).unwrap_or(Value::Null);
            out.push(convert_value(idx0 + 1, &field.name, field.data_type, value)?);
        }
        rows.push(out);
    }

    let geometry_column = table
        .geometry_column
        .filter(|name| schema.index_of(name).is_some());
    Ok(Table {
        schema: schema.clone(),
        rows,
        geometry_column,
    })
}

fn convert_value(row: usize, column: &str, data_type: DataType, value: Value) -> EtlResult<Value> {
    match (value, data_type) {
        (Value::Null, _) => Ok(Value::Null),
        (v, t) if v.data_type() == Some(t) => Ok(v),
        (Value::Int64(i), DataType::Float64) => Ok(Value::Float64(i as f64)),
        (Value::Float64(f), DataType::Int64) => exact_i64(f).map(Value::Int64).ok_or_else(|| {
            EtlError::Parse {
                row,
                column: column.to_owned(),
                raw: f.to_string(),
                message: "expected an integer in the i64 range".to_string(),
            }
        }),
        (Value::Utf8(s), t) => parse_typed_value(row, column, t, &s),
        (v, DataType::Utf8) => Ok(Value::Utf8(v.to_string())),
        (v, t) => Err(EtlError::Parse {
            row,
            column: column.to_owned(),
            raw: v.to_string(),
            message: format!("cannot convert {:?} to {t:?}", v.data_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        coerce_value, convert_value, exact_i64, normalize_column_name, observe_text,
        parse_typed_value, Observed, TypeInference,
    };
    use crate::error::EtlError;
    use crate::types::{DataType, Value};

    fn infer(cells: &[&str]) -> DataType {
        let mut inference = TypeInference::default();
        for c in cells {
            inference.observe(observe_text(c));
        }
        inference.resolve()
    }

    #[test]
    fn infers_narrowest_type() {
        assert_eq!(infer(&["1", "2", ""]), DataType::Int64);
        assert_eq!(infer(&["1", "2.5"]), DataType::Float64);
        assert_eq!(infer(&["true", "False"]), DataType::Bool);
        assert_eq!(infer(&["1", "abc"]), DataType::Utf8);
        assert_eq!(infer(&["true", "1"]), DataType::Utf8);
        assert_eq!(infer(&["", ""]), DataType::Utf8);
    }

    #[test]
    fn non_finite_words_stay_text() {
        assert_eq!(infer(&["1.5", "inf"]), DataType::Utf8);
        assert_eq!(infer(&["NaN"]), DataType::Utf8);
        assert_eq!(infer(&["-Infinity", "2"]), DataType::Utf8);
        let err = parse_typed_value(3, "score", DataType::Float64, "nan").unwrap_err();
        assert!(matches!(err, EtlError::Parse { row: 3, .. }));
    }

    #[test]
    fn float_to_int_checks_range() {
        assert_eq!(exact_i64(42.0), Some(42));
        assert_eq!(exact_i64(-3.0), Some(-3));
        assert_eq!(exact_i64(2.5), None);
        assert_eq!(exact_i64(1e19), None);
        assert_eq!(exact_i64(-1e19), None);
        assert_eq!(exact_i64(f64::NAN), None);

        let converted = convert_value(1, "elev", DataType::Int64, Value::Float64(7.0)).unwrap();
        assert_eq!(converted, Value::Int64(7));
        let err = convert_value(2, "elev", DataType::Int64, Value::Float64(9.3e18)).unwrap_err();
        assert!(matches!(err, EtlError::Parse { row: 2, .. }));
    }

    #[test]
    fn geometry_only_columns_resolve_to_geometry() {
        let mut inference = TypeInference::default();
        inference.observe(Observed::Geometry);
        inference.observe(Observed::Null);
        assert_eq!(inference.resolve(), DataType::Geometry);
    }

    #[test]
    fn normalizes_headers() {
        assert_eq!(normalize_column_name(" Station Name "), "station_name");
        assert_eq!(normalize_column_name("ID"), "id");
    }

    #[test]
    fn ints_widen_into_float_columns() {
        assert_eq!(coerce_value(Value::Int64(2), DataType::Float64), Value::Float64(2.0));
        assert_eq!(coerce_value(Value::Bool(true), DataType::Utf8), Value::Utf8("true".into()));
    }
}
