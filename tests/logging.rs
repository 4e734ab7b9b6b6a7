use std::fs;

use log::{Level, LevelFilter, Log, Record};
use tempfile::TempDir;

use etl_toolbox::logging::{EtlLogger, LogFormat, LoggerConfig, LoggerType, Profile, PROGRESS_TARGET};

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn config_loads_from_json() {
    let config = LoggerConfig::from_json_file("tests/fixtures/logger.json").unwrap();
    assert_eq!(config.name, "loader");
    assert_eq!(config.level, Some(LevelFilter::Warn));
    assert_eq!(config.logger_type, LoggerType::Simple);
    assert_eq!(config.logger_file_name, "run.log");
    assert!(!config.stderr);
}

#[test]
fn records_are_filtered_and_written_to_the_log_file() {
    let dir = TempDir::new().unwrap();
    let config = LoggerConfig::from_json_file("tests/fixtures/logger.json").unwrap();
    let profile = Profile::resolve_with(&config, no_env).unwrap();
    assert_eq!(profile.format, LogFormat::Simple);

    let logger = EtlLogger::with_profile(&config, profile, dir.path()).unwrap();
    assert_eq!(logger.file_path(), dir.path().join("loader_run.log"));

    logger.log(
        &Record::builder()
            .args(format_args!("3 rows skipped"))
            .level(Level::Warn)
            .target("loader")
            .build(),
    );
    logger.log(
        &Record::builder()
            .args(format_args!("opening stations.csv"))
            .level(Level::Info)
            .target("loader")
            .build(),
    );
    logger.close();

    let written = fs::read_to_string(logger.file_path()).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2, "{written}");
    assert!(lines[0].ends_with(" :: WARNING  :: 3 rows skipped"), "{}", lines[0]);
    assert!(lines[1].contains("------------------ closing logger ------------------"));
}

#[test]
fn default_format_shows_name_level_and_module() {
    let dir = TempDir::new().unwrap();
    let config = LoggerConfig {
        stderr: false,
        ..LoggerConfig::new("etl")
    };
    let profile = Profile::resolve_with(&config, no_env).unwrap();
    let logger = EtlLogger::with_profile(&config, profile, dir.path()).unwrap();

    let line = logger.format_record(
        &Record::builder()
            .args(format_args!("read 3 rows"))
            .level(Level::Info)
            .target("etl_toolbox::reader::csv")
            .module_path(Some("etl_toolbox::reader::csv"))
            .build(),
    );
    assert!(
        line.ends_with(" :: [etl        :: INFO      ]  csv      :: read 3 rows"),
        "{line}"
    );
}

#[test]
fn progress_records_need_a_verbose_logger() {
    let dir = TempDir::new().unwrap();
    let quiet = LoggerConfig {
        stderr: false,
        ..LoggerConfig::new("quiet")
    };
    let verbose = LoggerConfig {
        logger_type: LoggerType::Verbose,
        stderr: false,
        ..LoggerConfig::new("verbose")
    };

    let quiet = EtlLogger::with_profile(&quiet, Profile::resolve_with(&quiet, no_env).unwrap(), dir.path())
        .unwrap();
    let verbose =
        EtlLogger::with_profile(&verbose, Profile::resolve_with(&verbose, no_env).unwrap(), dir.path())
            .unwrap();

    let metadata = log::Metadata::builder()
        .level(Level::Info)
        .target(PROGRESS_TARGET)
        .build();
    assert!(!quiet.enabled(&metadata));
    assert!(verbose.enabled(&metadata));
    assert_eq!(verbose.max_level(), LevelFilter::Debug);

    let line = verbose.format_record(
        &Record::builder()
            .args(format_args!("50%"))
            .level(Level::Info)
            .target(PROGRESS_TARGET)
            .build(),
    );
    assert!(line.contains(":: PROGRESS"), "{line}");
}
