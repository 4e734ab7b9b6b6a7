#![cfg(feature = "excel")]

//! Workbook reader (`.xlsx`, `.xls`, `.xlsm`, `.xlsb`, `.ods`).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};

use super::infer::{
    coerce_value, exact_i64, normalize_headers, parse_bool, parse_finite, Observed, TypeInference,
};
use super::{DataReader, ReaderKind};
use crate::error::{EtlError, EtlResult};
use crate::types::{DataType, Field, ReaderData, Schema, SheetMap, Table, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExcelOptions {
    /// Sheet to read. `None` reads every sheet into a [`SheetMap`].
    pub sheet_name: Option<String>,
    /// Rows skipped before looking for the header row.
    pub skip_rows: usize,
    /// Trailing data rows dropped.
    pub skip_footer: usize,
    /// Lower-case headers and replace spaces with `_`.
    pub lowercase_columns: bool,
    /// Explicit typed projection applied to every sheet read.
    pub column_schema: Option<Schema>,
}

/// A workbook whose configured sheet (or all sheets) is materialized at construction.
#[derive(Debug, Clone)]
pub struct ExcelReader {
    path: PathBuf,
    options: ExcelOptions,
    sheet_names: Vec<String>,
    data: ReaderData,
}

impl ExcelReader {
    /// Behavior:
    /// - Reads `sheet_name` if provided; otherwise every sheet, in workbook order
    /// - Detects the first non-empty row (after `skip_rows`) as the header row
    /// - Infers column types unless a `column_schema` is given
    pub fn open(path: impl AsRef<Path>, options: ExcelOptions) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut workbook = open_workbook_auto(&path).map_err(|source| excel_err(&path, source))?;
        let sheet_names = workbook.sheet_names();

        let data = match options.sheet_name.as_deref() {
            Some(sheet) => {
                ensure_sheet(&sheet_names, sheet)?;
                ReaderData::Table(read_sheet_from(&mut workbook, &path, sheet, &options)?)
            }
            None => {
                let mut sheets = SheetMap::new();
                for sheet in &sheet_names {
                    sheets.insert(sheet.clone(), read_sheet_from(&mut workbook, &path, sheet, &options)?);
                }
                ReaderData::Sheets(sheets)
            }
        };

        log::debug!("read workbook {} ({} sheets)", path.display(), sheet_names.len());
        Ok(Self {
            path,
            options,
            sheet_names,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ExcelOptions {
        &self.options
    }

    /// Sheet names in workbook order.
    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Read one sheet on demand, re-opening the workbook.
    pub fn read_sheet(&self, sheet: &str) -> EtlResult<Table> {
        ensure_sheet(&self.sheet_names, sheet)?;
        let mut workbook =
            open_workbook_auto(&self.path).map_err(|source| excel_err(&self.path, source))?;
        read_sheet_from(&mut workbook, &self.path, sheet, &self.options)
    }
}

impl DataReader for ExcelReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Excel
    }

    fn data(&self) -> &ReaderData {
        &self.data
    }

    fn into_data(self) -> ReaderData {
        self.data
    }
}

fn excel_err(path: &Path, source: calamine::Error) -> EtlError {
    EtlError::Excel {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_sheet(sheet_names: &[String], sheet: &str) -> EtlResult<()> {
    if sheet_names.iter().any(|s| s == sheet) {
        Ok(())
    } else {
        Err(EtlError::configuration(format!(
            "sheet '{sheet}' not found in Excel file (sheets: {sheet_names:?})"
        )))
    }
}

type Workbook = calamine::Sheets<BufReader<File>>;

fn read_sheet_from(
    workbook: &mut Workbook,
    path: &Path,
    sheet: &str,
    options: &ExcelOptions,
) -> EtlResult<Table> {
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|source| excel_err(path, source))?;
    read_range(sheet, &range, options)
}

fn read_range(sheet: &str, range: &calamine::Range<Data>, options: &ExcelOptions) -> EtlResult<Table> {
    let mut rows = range.rows().enumerate().skip(options.skip_rows);

    let Some((header_idx0, header_row)) = rows
        .by_ref()
        .find(|(_, row)| row.iter().any(|c| !matches!(c, Data::Empty)))
    else {
        return match &options.column_schema {
            Some(_) => Err(EtlError::SchemaMismatch {
                message: format!("sheet '{sheet}': sheet has no non-empty rows (no header row found)"),
            }),
            None => Ok(Table::new(Schema::default(), Vec::new())),
        };
    };

    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(idx, c)| match cell_to_header_string(c) {
            h if h.trim().is_empty() => format!("Unnamed: {idx}"),
            h => h.trim().to_string(),
        })
        .collect();
    let headers = normalize_headers(headers, options.lowercase_columns);

    let mut data_rows: Vec<(usize, &[Data])> = rows
        .filter(|(_, row)| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|(idx0, row)| (idx0 + 1, row))
        .collect();
    let keep = data_rows.len().saturating_sub(options.skip_footer);
    data_rows.truncate(keep);

    log::trace!("sheet '{sheet}': header at row {}, {} data rows", header_idx0 + 1, data_rows.len());

    match &options.column_schema {
        Some(schema) => project_rows(sheet, &headers, &data_rows, schema),
        None => Ok(infer_rows(&headers, &data_rows)),
    }
}

fn infer_rows(headers: &[String], data_rows: &[(usize, &[Data])]) -> Table {
    let mut inference = vec![TypeInference::default(); headers.len()];
    let mut cells: Vec<Vec<Value>> = Vec::with_capacity(data_rows.len());
    for (_, row) in data_rows {
        let mut out = Vec::with_capacity(headers.len());
        for (col, slot) in inference.iter_mut().enumerate() {
            let (observed, value) = cell_to_value(row.get(col).unwrap_or(&Data::Empty));
            slot.observe(observed);
            out.push(value);
        }
        cells.push(out);
    }

    let schema = Schema::new(
        headers
            .iter()
            .zip(inference.iter())
            .map(|(name, inf)| Field::new(name.clone(), inf.resolve()))
            .collect(),
    );
    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(schema.fields.iter())
                .map(|(v, f)| coerce_value(v, f.data_type))
                .collect()
        })
        .collect();
    Table::new(schema, rows)
}

fn cell_to_value(c: &Data) -> (Observed, Value) {
    match c {
        Data::Empty | Data::Error(_) => (Observed::Null, Value::Null),
        Data::Int(i) => (Observed::Int, Value::Int64(*i)),
        Data::Float(f) => match exact_i64(*f) {
            Some(i) => (Observed::Int, Value::Int64(i)),
            None => (Observed::Float, Value::Float64(*f)),
        },
        Data::Bool(b) => (Observed::Bool, Value::Bool(*b)),
        Data::String(s) if s.trim().is_empty() => (Observed::Null, Value::Null),
        Data::String(s) => (Observed::Text, Value::Utf8(s.clone())),
        other => (Observed::Text, Value::Utf8(other.to_string())),
    }
}

fn project_rows(
    sheet: &str,
    headers: &[String],
    data_rows: &[(usize, &[Data])],
    schema: &Schema,
) -> EtlResult<Table> {
    let mut col_idxs: Vec<usize> = Vec::with_capacity(schema.fields.len());
    for f in &schema.fields {
        match headers.iter().position(|h| *h == f.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(EtlError::SchemaMismatch {
                    message: format!(
                        "sheet '{sheet}': missing required column '{}'. headers={headers:?}",
                        f.name
                    ),
                });
            }
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(data_rows.len());
    for (user_row, row) in data_rows {
        let mut out_row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (field, &col_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let cell = row.get(col_idx).unwrap_or(&Data::Empty);
            let col_label = format!("{sheet}:{name}", name = field.name);
            out_row.push(convert_cell(*user_row, &col_label, field.data_type, cell)?);
        }
        rows.push(out_row);
    }

    Ok(Table::new(schema.clone(), rows))
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) => exact_i64(*f).map_or_else(|| f.to_string(), |i| i.to_string()),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn convert_cell(row: usize, column: &str, data_type: DataType, c: &Data) -> EtlResult<Value> {
    if matches!(c, Data::Empty) {
        return Ok(Value::Null);
    }

    let parse_err = |raw: String, message: String| EtlError::Parse {
        row,
        column: column.to_string(),
        raw,
        message,
    };

    match (data_type, c) {
        (DataType::Utf8, Data::String(s)) => Ok(Value::Utf8(s.clone())),
        (DataType::Utf8, other) => Ok(Value::Utf8(other.to_string())),
        (DataType::Bool, Data::Bool(b)) => Ok(Value::Bool(*b)),
        (DataType::Bool, Data::Int(i)) => Ok(Value::Bool(*i != 0)),
        (DataType::Bool, Data::Float(f)) => Ok(Value::Bool(*f != 0.0)),
        (DataType::Bool, Data::String(s)) => parse_bool(s)
            .map(Value::Bool)
            .map_err(|message| parse_err(s.clone(), message)),
        (DataType::Int64, Data::Int(i)) => Ok(Value::Int64(*i)),
        (DataType::Int64, Data::Float(f)) => exact_i64(*f).map(Value::Int64).ok_or_else(|| {
            parse_err(c.to_string(), "expected an integer in the i64 range".to_string())
        }),
        (DataType::Int64, Data::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_err(s.clone(), e.to_string())),
        (DataType::Float64, Data::Float(f)) => Ok(Value::Float64(*f)),
        (DataType::Float64, Data::Int(i)) => Ok(Value::Float64(*i as f64)),
        (DataType::Float64, Data::String(s)) => parse_finite(s.trim())
            .map(Value::Float64)
            .ok_or_else(|| parse_err(s.clone(), "expected a finite number".to_string())),
        (DataType::Binary, Data::String(s)) => Ok(Value::Binary(s.as_bytes().to_vec())),
        (expected, other) => Err(parse_err(
            other.to_string(),
            format!("cannot convert cell to {expected:?}"),
        )),
    }
}
