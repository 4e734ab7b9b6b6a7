#![cfg(feature = "excel")]

use std::path::{Path, PathBuf};

use rstest::rstest;
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

use etl_toolbox::reader::excel::{ExcelOptions, ExcelReader};
use etl_toolbox::reader::{DataReader, ReaderFactory, ReaderOptions};
use etl_toolbox::types::{DataType, Field, Schema, Value};
use etl_toolbox::EtlError;

fn write_workbook(dir: &Path) -> PathBuf {
    let path = dir.join("stations.xlsx");
    let mut workbook = Workbook::new();

    let stations = workbook.add_worksheet();
    stations.set_name("Stations").unwrap();
    stations.write_string(0, 0, "Station Id").unwrap();
    stations.write_string(0, 1, "Name").unwrap();
    stations.write_string(0, 2, "Elevation").unwrap();
    stations.write_string(0, 3, "Active").unwrap();
    for (row, (id, name, elevation, active)) in [
        (1, "Alert", 65.0, true),
        (2, "Eureka", 10.5, false),
        (3, "Resolute", 67.0, true),
    ]
    .into_iter()
    .enumerate()
    {
        let row = row as u32 + 1;
        stations.write_number(row, 0, id).unwrap();
        stations.write_string(row, 1, name).unwrap();
        stations.write_number(row, 2, elevation).unwrap();
        stations.write_boolean(row, 3, active).unwrap();
    }
    stations.write_string(4, 1, "total").unwrap();

    let readings = workbook.add_worksheet();
    readings.set_name("Readings").unwrap();
    readings.write_string(0, 0, "station").unwrap();
    readings.write_string(0, 1, "value").unwrap();
    readings.write_number(1, 0, 1).unwrap();
    readings.write_number(1, 1, -40.5).unwrap();

    workbook.save(&path).unwrap();
    path
}

#[test]
fn without_sheet_name_every_sheet_is_read_in_order() {
    let dir = TempDir::new().unwrap();
    let path = write_workbook(dir.path());

    let reader = ExcelReader::open(&path, ExcelOptions::default()).unwrap();
    assert_eq!(reader.sheet_names(), ["Stations", "Readings"]);

    let sheets = reader.data().as_sheets().unwrap();
    assert_eq!(sheets.names(), vec!["Stations", "Readings"]);
    let readings = sheets.get("Readings").unwrap();
    assert_eq!(readings.rows, vec![vec![Value::Int64(1), Value::Float64(-40.5)]]);
}

#[test]
fn selected_sheet_with_footer_and_lowercase() {
    let dir = TempDir::new().unwrap();
    let path = write_workbook(dir.path());

    let opts = ExcelOptions {
        sheet_name: Some("Stations".to_string()),
        skip_footer: 1,
        lowercase_columns: true,
        ..ExcelOptions::default()
    };
    let reader = ExcelReader::open(&path, opts).unwrap();
    let table = reader.data().as_table().unwrap();

    assert_eq!(table.column_names(), vec!["station_id", "name", "elevation", "active"]);
    assert_eq!(table.row_count(), 3);
    let types: Vec<DataType> = table.schema.fields.iter().map(|f| f.data_type).collect();
    assert_eq!(
        types,
        vec![DataType::Int64, DataType::Utf8, DataType::Float64, DataType::Bool]
    );
    assert_eq!(table.value(1, "elevation"), Some(&Value::Float64(10.5)));
}

#[test]
fn read_sheet_and_typed_projection() {
    let dir = TempDir::new().unwrap();
    let path = write_workbook(dir.path());

    let opts = ExcelOptions {
        sheet_name: Some("Readings".to_string()),
        column_schema: Some(Schema::new(vec![
            Field::new("value", DataType::Float64),
            Field::new("station", DataType::Utf8),
        ])),
        ..ExcelOptions::default()
    };
    let reader = ExcelReader::open(&path, opts).unwrap();
    let table = reader.read_sheet("Readings").unwrap();
    assert_eq!(table.column_names(), vec!["value", "station"]);
    assert_eq!(table.rows[0][0], Value::Float64(-40.5));

    let err = reader.read_sheet("Missing").unwrap_err();
    assert!(matches!(err, EtlError::Configuration { .. }));
}

fn write_two_sheets(dir: &Path) -> PathBuf {
    let path = dir.join("two_sheets.xlsx");
    let mut workbook = Workbook::new();

    let first = workbook.add_worksheet();
    first.set_name("Sheet1").unwrap();
    first.write_string(0, 0, "id").unwrap();
    first.write_string(0, 1, "name").unwrap();
    first.write_number(1, 0, 1).unwrap();
    first.write_string(1, 1, "Alert").unwrap();
    first.write_number(2, 0, 2).unwrap();
    first.write_string(2, 1, "Eureka").unwrap();

    let second = workbook.add_worksheet();
    second.set_name("Sheet2").unwrap();
    second.write_string(0, 0, "code").unwrap();
    second.write_string(1, 0, "NU").unwrap();

    workbook.save(&path).unwrap();
    path
}

#[rstest]
#[case("Sheet1", &["id", "name"], 2)]
#[case("Sheet2", &["code"], 1)]
fn factory_reads_every_sheet_and_one_on_demand(
    #[case] sheet: &str,
    #[case] columns: &[&str],
    #[case] rows: usize,
) {
    let dir = TempDir::new().unwrap();
    let path = write_two_sheets(dir.path());

    let factory = ReaderFactory::new(path.as_path(), &ReaderOptions::default()).unwrap();
    let sheets = factory.data().as_sheets().unwrap();
    assert_eq!(sheets.names(), vec!["Sheet1", "Sheet2"]);
    assert_eq!(sheets.get(sheet).unwrap().row_count(), rows);

    let table = factory.read_sheet(sheet).unwrap();
    assert_eq!(table.column_names(), columns);
    assert_eq!(table.row_count(), rows);
    assert_eq!(&table, sheets.get(sheet).unwrap());
}
