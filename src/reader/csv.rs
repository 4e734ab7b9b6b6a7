//! CSV reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use super::infer::{normalize_headers, observe_text, parse_typed_value, TypeInference};
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::types::{Field, ReaderData, Schema, Table, Value};

/// Label used in errors when reading from an in-memory source.
const IN_MEMORY: &str = "<memory>";

/// CSV dialect and projection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvOptions {
    /// Field delimiter (default `,`).
    pub delimiter: u8,
    /// Lines skipped before the header line.
    pub skip_rows: usize,
    /// Trailing data rows dropped.
    pub skip_footer: usize,
    /// Maximum number of data rows kept.
    pub n_rows: Option<usize>,
    /// Lower-case headers and replace spaces with `_` (default `true`).
    pub lowercase_columns: bool,
    /// Explicit typed projection. When `None`, column types are inferred.
    pub column_schema: Option<Schema>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_rows: 0,
            skip_footer: 0,
            n_rows: None,
            lowercase_columns: true,
            column_schema: None,
        }
    }
}

/// A CSV file materialized into a [`Table`] at construction.
#[derive(Debug, Clone)]
pub struct CsvReader {
    path: PathBuf,
    options: CsvOptions,
    data: ReaderData,
}

impl CsvReader {
    pub fn open(path: impl AsRef<Path>, options: CsvOptions) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = read_csv_from_path(&path, &options)?;
        Ok(Self {
            path,
            options,
            data: ReaderData::Table(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }
}

impl DataReader for CsvReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Csv
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

/// Read a CSV file into a [`Table`].
///
/// Rules:
///
/// - CSV must have a header line (after `skip_rows` skipped lines).
/// - With a `column_schema`, headers must contain all schema fields (order can differ) and
///   each value is parsed according to the field type.
/// - Without one, every header becomes a column whose type is inferred from its cells.
pub fn read_csv_from_path(path: impl AsRef<Path>, options: &CsvOptions) -> EtlResult<Table> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| EtlError::io(path, e))?;
    read_csv(file, options, path)
}

/// Read CSV data from any byte source into a [`Table`].
pub fn read_csv_from_reader<R: Read>(input: R, options: &CsvOptions) -> EtlResult<Table> {
    read_csv(input, options, Path::new(IN_MEMORY))
}

fn read_csv<R: Read>(input: R, options: &CsvOptions, path: &Path) -> EtlResult<Table> {
    let mut input = BufReader::new(input);
    let mut skipped = String::new();
    for _ in 0..options.skip_rows {
        skipped.clear();
        let n = input
            .read_line(&mut skipped)
            .map_err(|e| EtlError::io(path, e))?;
        if n == 0 {
            break;
        }
    }

    let csv_err = |source: csv::Error| EtlError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .from_reader(input);

    let headers: Vec<String> = rdr.headers().map_err(csv_err)?.iter().map(str::to_owned).collect();
    if headers.is_empty() {
        return Err(EtlError::SchemaMismatch {
            message: format!("csv '{}' has no header row", path.display()),
        });
    }
    let headers = normalize_headers(headers, options.lowercase_columns);

    let mut records = Vec::new();
    for result in rdr.records() {
        records.push(result.map_err(csv_err)?);
    }
    let keep = records.len().saturating_sub(options.skip_footer);
    records.truncate(keep);
    if let Some(n) = options.n_rows {
        records.truncate(n);
    }

    // 1-based line of the first data row: skipped lines + header + 1.
    let first_data_row = options.skip_rows + 2;

    match &options.column_schema {
        Some(schema) => project_records(&headers, &records, schema, first_data_row),
        None => infer_records(&headers, &records, first_data_row),
    }
}

fn project_records(
    headers: &[String],
    records: &[csv::StringRecord],
    schema: &Schema,
    first_data_row: usize,
) -> EtlResult<Table> {
    // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match headers.iter().position(|h| *h == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(EtlError::SchemaMismatch {
                    message: format!(
                        "missing required column '{field}'. headers={headers:?}",
                        field = field.name
                    ),
                });
            }
        }
    }

    let mut rows = Vec::with_capacity(records.len());
    for (idx0, record) in records.iter().enumerate() {
        let user_row = first_data_row + idx0;
        let mut row = Vec::with_capacity(schema.fields.len());
        for (field, &csv_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let raw = record.get(csv_idx).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, field.data_type, raw)?);
        }
        rows.push(row);
    }

    Ok(Table::new(schema.clone(), rows))
}

fn infer_records(
    headers: &[String],
    records: &[csv::StringRecord],
    first_data_row: usize,
) -> EtlResult<Table> {
    let mut inference = vec![TypeInference::default(); headers.len()];
    for record in records {
        for (col, slot) in inference.iter_mut().enumerate() {
            slot.observe(observe_text(record.get(col).unwrap_or("")));
        }
    }

    let schema = Schema::new(
        headers
            .iter()
            .zip(inference.iter())
            .map(|(name, inf)| Field::new(name.clone(), inf.resolve()))
            .collect(),
    );

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(records.len());
    for (idx0, record) in records.iter().enumerate() {
        let user_row = first_data_row + idx0;
        let mut row = Vec::with_capacity(schema.len());
        for (col, field) in schema.fields.iter().enumerate() {
            let raw = record.get(col).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, field.data_type, raw)?);
        }
        rows.push(row);
    }

    Ok(Table::new(schema, rows))
}

#[cfg(test)]
mod tests {
    use super::{read_csv_from_reader, CsvOptions};
    use crate::error::EtlError;
    use crate::types::{DataType, Field, Schema, Value};

    #[test]
    fn skips_leading_lines_and_footer() {
        let input = "exported 2024-01-01\nId,Station Name\n1,Alert\n2,Eureka\n3,Resolute\ntotal,3\n";
        let opts = CsvOptions {
            skip_rows: 1,
            skip_footer: 1,
            ..CsvOptions::default()
        };
        let table = read_csv_from_reader(input.as_bytes(), &opts).unwrap();
        assert_eq!(table.column_names(), vec!["id", "station_name"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.schema.fields[0].data_type, DataType::Int64);
    }

    #[test]
    fn n_rows_limits_rows_and_keeps_case_when_disabled() {
        let input = "A;B\n1;x\n2;y\n3;z\n";
        let opts = CsvOptions {
            delimiter: b';',
            n_rows: Some(2),
            lowercase_columns: false,
            ..CsvOptions::default()
        };
        let table = read_csv_from_reader(input.as_bytes(), &opts).unwrap();
        assert_eq!(table.column_names(), vec!["A", "B"]);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn typed_projection_reports_row_numbers() {
        let input = "skip me\nid,score\n1,1.5\n2,oops\n";
        let opts = CsvOptions {
            skip_rows: 1,
            column_schema: Some(Schema::new(vec![
                Field::new("score", DataType::Float64),
                Field::new("id", DataType::Int64),
            ])),
            ..CsvOptions::default()
        };
        let err = read_csv_from_reader(input.as_bytes(), &opts).unwrap_err();
        match err {
            EtlError::Parse { row, column, .. } => {
                assert_eq!(row, 4);
                assert_eq!(column, "score");
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn empty_cells_are_null() {
        let table = read_csv_from_reader("a,b\n1,\n,x\n".as_bytes(), &CsvOptions::default()).unwrap();
        assert_eq!(table.rows[0][1], Value::Null);
        assert_eq!(table.rows[1][0], Value::Null);
        assert_eq!(table.schema.fields[0].data_type, DataType::Int64);
    }
}
