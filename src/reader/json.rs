//! JSON reader.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single JSON object: `{"a":1}`
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! Nested objects are flattened into dot-path columns (e.g. `user.name`). Arrays are kept as their
//! JSON text.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Map;

use super::infer::{coerce_value, normalize_column_name, Observed, TypeInference};
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::types::{DataType, Field, ReaderData, Schema, Table, Value};

const IN_MEMORY: &str = "<memory>";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonOptions {
    /// Lower-case column names and replace spaces with `_`.
    pub lowercase_columns: bool,
    /// Explicit typed projection; field names are dot paths into each object.
    pub column_schema: Option<Schema>,
}

/// A JSON document materialized into a [`Table`] at construction.
#[derive(Debug, Clone)]
pub struct JsonReader {
    path: PathBuf,
    options: JsonOptions,
    data: ReaderData,
}

impl JsonReader {
    pub fn open(path: impl AsRef<Path>, options: JsonOptions) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = read_json_from_path(&path, &options)?;
        Ok(Self {
            path,
            options,
            data: ReaderData::Table(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &JsonOptions {
        &self.options
    }
}

impl DataReader for JsonReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Json
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

/// Read a JSON file into a [`Table`].
pub fn read_json_from_path(path: impl AsRef<Path>, options: &JsonOptions) -> EtlResult<Table> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
    read_json(&text, options, path)
}

/// Read JSON from an in-memory string into a [`Table`].
pub fn read_json_from_str(input: &str, options: &JsonOptions) -> EtlResult<Table> {
    read_json(input, options, Path::new(IN_MEMORY))
}

fn read_json(input: &str, options: &JsonOptions, path: &Path) -> EtlResult<Table> {
    let values = parse_documents(input, path)?;

    let mut objects = Vec::with_capacity(values.len());
    for (idx0, v) in values.iter().enumerate() {
        let obj = v.as_object().ok_or_else(|| EtlError::Json {
            path: path.to_path_buf(),
            message: format!("row {} is not a json object", idx0 + 1),
        })?;
        objects.push(obj);
    }

    match &options.column_schema {
        Some(schema) => project_objects(&objects, schema),
        None => infer_objects(&objects, options.lowercase_columns),
    }
}

fn parse_documents(input: &str, path: &Path) -> EtlResult<Vec<serde_json::Value>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EtlError::Json {
            path: path.to_path_buf(),
            message: "json input is empty".to_string(),
        });
    }

    // First try parsing as a single JSON value (array or object).
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return match v {
            serde_json::Value::Array(items) => Ok(items),
            serde_json::Value::Object(_) => Ok(vec![v]),
            _ => Err(EtlError::Json {
                path: path.to_path_buf(),
                message: "json must be an object, an array of objects, or NDJSON".to_string(),
            }),
        };
    }

    // Fall back to NDJSON.
    let mut values = Vec::new();
    for (i, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v = serde_json::from_str::<serde_json::Value>(line).map_err(|e| EtlError::Json {
            path: path.to_path_buf(),
            message: format!("invalid ndjson at line {}: {}", i + 1, e),
        })?;
        values.push(v);
    }
    Ok(values)
}

fn infer_objects(
    objects: &[&Map<String, serde_json::Value>],
    lowercase_columns: bool,
) -> EtlResult<Table> {
    let mut columns: Vec<String> = Vec::new();
    let mut inference: Vec<TypeInference> = Vec::new();
    let mut flat_rows: Vec<Vec<(usize, Value)>> = Vec::with_capacity(objects.len());

    for obj in objects {
        let mut flat = Vec::new();
        flatten_object("", obj, &mut flat);

        let mut row = Vec::with_capacity(flat.len());
        for (key, jv) in flat {
            let name = if lowercase_columns {
                normalize_column_name(&key)
            } else {
                key
            };
            let idx = match columns.iter().position(|c| *c == name) {
                Some(idx) => idx,
                None => {
                    columns.push(name);
                    inference.push(TypeInference::default());
                    columns.len() - 1
                }
            };
            let (observed, value) = json_to_value(jv);
            inference[idx].observe(observed);
            row.push((idx, value));
        }
        flat_rows.push(row);
    }

    let schema = Schema::new(
        columns
            .into_iter()
            .zip(inference.iter())
            .map(|(name, inf)| Field::new(name, inf.resolve()))
            .collect(),
    );

    let rows = flat_rows
        .into_iter()
        .map(|flat| {
            let mut row = vec![Value::Null; schema.len()];
            for (idx, value) in flat {
                row[idx] = coerce_value(value, schema.fields[idx].data_type);
            }
            row
        })
        .collect();

    Ok(Table::new(schema, rows))
}

/// Collect leaf values with their dot paths, in document order.
fn flatten_object<'a>(
    prefix: &str,
    obj: &'a Map<String, serde_json::Value>,
    out: &mut Vec<(String, &'a serde_json::Value)>,
) {
    for (key, v) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match v {
            serde_json::Value::Object(nested) if !nested.is_empty() => {
                flatten_object(&path, nested, out)
            }
            _ => out.push((path, v)),
        }
    }
}

fn json_to_value(v: &serde_json::Value) -> (Observed, Value) {
    match v {
        serde_json::Value::Null => (Observed::Null, Value::Null),
        serde_json::Value::Bool(b) => (Observed::Bool, Value::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => (Observed::Int, Value::Int64(i)),
            None => (Observed::Float, n.as_f64().map_or(Value::Null, Value::Float64)),
        },
        serde_json::Value::String(s) => (Observed::Text, Value::Utf8(s.clone())),
        other => (Observed::Text, Value::Utf8(other.to_string())),
    }
}

fn project_objects(objects: &[&Map<String, serde_json::Value>], schema: &Schema) -> EtlResult<Table> {
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(objects.len());

    for (idx0, obj) in objects.iter().enumerate() {
        let row_num = idx0 + 1;
        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let jv = get_by_dot_path(obj, &field.name).ok_or_else(|| EtlError::SchemaMismatch {
                message: format!("row {row_num} missing required field '{}'", field.name),
            })?;
            row.push(convert_json_value(row_num, &field.name, field.data_type, jv)?);
        }
        rows.push(row);
    }

    Ok(Table::new(schema.clone(), rows))
}

fn get_by_dot_path<'a>(
    root: &'a Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        match current {
            serde_json::Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn convert_json_value(
    row: usize,
    column: &str,
    data_type: DataType,
    v: &serde_json::Value,
) -> EtlResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }

    let parse_err = |message: &str| EtlError::Parse {
        row,
        column: column.to_string(),
        raw: v.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(
            v.as_str().map_or_else(|| v.to_string(), str::to_string),
        )),
        DataType::Bool => v.as_bool().map(Value::Bool).ok_or_else(|| parse_err("expected bool")),
        DataType::Int64 => {
            if let Some(n) = v.as_i64() {
                Ok(Value::Int64(n))
            } else if let Some(n) = v.as_u64() {
                i64::try_from(n)
                    .map(Value::Int64)
                    .map_err(|_| parse_err("u64 out of range for i64"))
            } else {
                Err(parse_err("expected integer number"))
            }
        }
        DataType::Float64 => v.as_f64().map(Value::Float64).ok_or_else(|| parse_err("expected number")),
        DataType::Binary => v
            .as_str()
            .map(|s| Value::Binary(s.as_bytes().to_vec()))
            .ok_or_else(|| parse_err("expected string")),
        DataType::Geometry => Err(parse_err("geometry columns are not supported for json")),
    }
}

#[cfg(test)]
mod tests {
    use super::{read_json_from_str, JsonOptions};
    use crate::types::{DataType, Value};

    #[test]
    fn flattens_nested_objects_and_unions_keys() {
        let input = r#"[
            {"id": 1, "user": {"name": "Ana"}, "tags": ["a", "b"]},
            {"id": 2, "score": 1.5}
        ]"#;
        let table = read_json_from_str(input, &JsonOptions::default()).unwrap();
        assert_eq!(table.column_names(), vec!["id", "user.name", "tags", "score"]);
        assert_eq!(table.value(0, "tags"), Some(&Value::Utf8(r#"["a","b"]"#.to_string())));
        assert_eq!(table.value(1, "user.name"), Some(&Value::Null));
        assert_eq!(table.schema.fields[3].data_type, DataType::Float64);
    }

    #[test]
    fn ints_and_floats_widen_to_float() {
        let input = "{\"v\": 1}\n{\"v\": 2.5}\n";
        let table = read_json_from_str(input, &JsonOptions::default()).unwrap();
        assert_eq!(table.schema.fields[0].data_type, DataType::Float64);
        assert_eq!(table.rows[0][0], Value::Float64(1.0));
    }
}
