use etl_toolbox::reader::json::{read_json_from_path, read_json_from_str, JsonOptions, JsonReader};
use etl_toolbox::reader::DataReader;
use etl_toolbox::types::{DataType, Field, Schema, Value};
use etl_toolbox::EtlError;

#[test]
fn array_of_objects_flattens_nested_keys() {
    let reader = JsonReader::open("tests/fixtures/people.json", JsonOptions::default()).unwrap();
    let table = reader.data().as_table().unwrap();

    assert_eq!(
        table.column_names(),
        vec!["id", "user.name", "user.city", "score", "active"]
    );
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.value(2, "user.city"), Some(&Value::Null));
    assert_eq!(table.schema.fields[3].data_type, DataType::Float64);
    assert_eq!(table.schema.fields[4].data_type, DataType::Bool);
}

#[test]
fn ndjson_is_read_line_by_line() {
    let table = read_json_from_path("tests/fixtures/people.ndjson", &JsonOptions::default()).unwrap();
    assert_eq!(table.column_names(), vec!["id", "name"]);
    assert_eq!(table.value(1, "id"), Some(&Value::Int64(2)));
}

#[test]
fn dot_path_schema_selects_nested_values() {
    let opts = JsonOptions {
        column_schema: Some(Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("user.name", DataType::Utf8),
        ])),
        ..JsonOptions::default()
    };
    let table = read_json_from_path("tests/fixtures/people.json", &opts).unwrap();
    assert_eq!(table.rows[0], vec![Value::Int64(1), Value::Utf8("Ada Lovelace".to_string())]);
}

#[test]
fn lowercase_option_normalizes_keys() {
    let opts = JsonOptions {
        lowercase_columns: true,
        ..JsonOptions::default()
    };
    let table = read_json_from_str(r#"{"Station Name": "Alert"}"#, &opts).unwrap();
    assert_eq!(table.column_names(), vec!["station_name"]);
}

#[test]
fn scalar_documents_are_rejected() {
    let err = read_json_from_str("[1, 2]", &JsonOptions::default()).unwrap_err();
    assert!(matches!(err, EtlError::Json { .. }));
    let err = read_json_from_str("   ", &JsonOptions::default()).unwrap_err();
    assert!(matches!(err, EtlError::Json { .. }));
}
