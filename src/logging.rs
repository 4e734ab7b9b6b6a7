//! Configurable `log` backend writing to stderr and a per-logger file.
//!
//! A logger is described by a [`LoggerConfig`]. Its [`LoggerType`] picks a profile:
//!
//! | type      | level                         | format  | progress records        |
//! |-----------|-------------------------------|---------|-------------------------|
//! | `default` | `LOGGER_LEVEL`, else all      | default | hidden                  |
//! | `verbose` | debug                         | verbose | shown                   |
//! | `simple`  | info                          | simple  | hidden                  |
//! | `custom`  | `LOGGER_LEVEL`, else all      | verbose when `VERBOSE_LOGGER` is set, else default | shown when `VERBOSE_LOGGER` is set |
//!
//! An explicit [`LoggerConfig::level`] overrides the profile level. Progress records (emitted
//! with [`progress!`](crate::progress)) bypass the level threshold.
//!
//! ```no_run
//! use etl_toolbox::logging::{self, LoggerConfig, LoggerType};
//!
//! # fn main() -> Result<(), etl_toolbox::EtlError> {
//! let logger = logging::init(LoggerConfig {
//!     logger_type: LoggerType::Verbose,
//!     ..LoggerConfig::new("ingest")
//! })?;
//! log::info!("starting");
//! etl_toolbox::progress!("10/200 files");
//! logger.close();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Deserializer};

use crate::error::{EtlError, EtlResult};

#[doc(hidden)]
pub use log as __log;

/// Target used by [`progress!`](crate::progress) records.
pub const PROGRESS_TARGET: &str = "progress";

pub const ENV_LOGGER_LEVEL: &str = "LOGGER_LEVEL";
pub const ENV_VERBOSE_LOGGER: &str = "VERBOSE_LOGGER";
pub const ENV_LOGGING_FILE_PATH: &str = "LOGGING_FILE_PATH";
pub const ENV_LOGGER_TYPE: &str = "LOGGER_TYPE";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Emit a progress record. Shown only by verbose loggers, whatever their level.
#[macro_export]
macro_rules! progress {
    ($($arg:tt)+) => {
        $crate::logging::__log::info!(target: $crate::logging::PROGRESS_TARGET, $($arg)+)
    };
}

/// Logger profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerType {
    #[default]
    Default,
    Verbose,
    Simple,
    Custom,
}

impl FromStr for LoggerType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "verbose" => Ok(Self::Verbose),
            "simple" => Ok(Self::Simple),
            "custom" => Ok(Self::Custom),
            other => Err(EtlError::configuration(format!(
                "unknown logger type '{other}' (expected default, verbose, simple or custom)"
            ))),
        }
    }
}

/// Line layout of a logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `ts :: [name       :: LEVEL     ]  module   :: message`
    Default,
    /// `ts :: [name       :: LEVEL   ] module   :: message`
    Verbose,
    /// `ts :: LEVEL    :: message`
    Simple,
}

/// Logger configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Logger name; also prefixes the log file name.
    pub name: String,
    /// Explicit level; overrides the profile level.
    #[serde(deserialize_with = "deserialize_level")]
    pub level: Option<LevelFilter>,
    pub logger_type: LoggerType,
    /// File name, written as `<name>_<logger_file_name>`.
    pub logger_file_name: String,
    /// Directory of the log file; `LOGGING_FILE_PATH` or the temp dir when `None`.
    pub file_path: Option<PathBuf>,
    /// Also write to stderr.
    pub stderr: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: "etl".to_string(),
            level: None,
            logger_type: LoggerType::Default,
            logger_file_name: "default.log".to_string(),
            file_path: None,
            stderr: true,
        }
    }
}

impl LoggerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// `new(name)` with `LOGGER_TYPE` applied when set.
    pub fn from_env(name: impl Into<String>) -> EtlResult<Self> {
        let mut config = Self::new(name);
        if let Ok(raw) = std::env::var(ENV_LOGGER_TYPE) {
            config.logger_type = raw.parse()?;
        }
        Ok(config)
    }

    /// Load a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| EtlError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Option<LevelFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawLevel {
        Name(String),
        Number(u32),
    }

    match Option::<RawLevel>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawLevel::Number(n)) => Ok(Some(level_from_number(n))),
        Some(RawLevel::Name(s)) => parse_level(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

fn level_from_number(n: u32) -> LevelFilter {
    match n {
        0..=9 => LevelFilter::Trace,
        10..=19 => LevelFilter::Debug,
        20..=29 => LevelFilter::Info,
        30..=39 => LevelFilter::Warn,
        _ => LevelFilter::Error,
    }
}

/// Parse a level name (`NOTSET`, `DEBUG`, `INFO`, `WARNING`, `ERROR`, `CRITICAL`, plus
/// `TRACE`/`WARN`/`OFF`) or a numeric level (`10`, `20`, ...).
pub fn parse_level(raw: &str) -> EtlResult<LevelFilter> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u32>() {
        return Ok(level_from_number(n));
    }
    match trimmed.to_ascii_uppercase().as_str() {
        "NOTSET" | "TRACE" => Ok(LevelFilter::Trace),
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARNING" | "WARN" => Ok(LevelFilter::Warn),
        "ERROR" | "CRITICAL" | "FATAL" => Ok(LevelFilter::Error),
        "OFF" => Ok(LevelFilter::Off),
        other => Err(EtlError::configuration(format!("unknown log level '{other}'"))),
    }
}

/// Level, format and verbosity resolved from a [`LoggerConfig`] and the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub verbose: bool,
}

impl Profile {
    /// Resolve against the process environment.
    pub fn resolve(config: &LoggerConfig) -> EtlResult<Self> {
        Self::resolve_with(config, |key| std::env::var(key).ok())
    }

    /// Resolve with `lookup` standing in for the environment.
    pub fn resolve_with<F>(config: &LoggerConfig, lookup: F) -> EtlResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_level = || -> EtlResult<LevelFilter> {
            lookup(ENV_LOGGER_LEVEL).map_or(Ok(LevelFilter::Trace), |raw| parse_level(&raw))
        };

        let (level, format, verbose) = match config.logger_type {
            LoggerType::Default => (env_level()?, LogFormat::Default, false),
            LoggerType::Verbose => (LevelFilter::Debug, LogFormat::Verbose, true),
            LoggerType::Simple => (LevelFilter::Info, LogFormat::Simple, false),
            LoggerType::Custom => {
                let verbose = lookup(ENV_VERBOSE_LOGGER).is_some_and(|v| is_truthy(&v));
                let format = if verbose {
                    LogFormat::Verbose
                } else {
                    LogFormat::Default
                };
                (env_level()?, format, verbose)
            }
        };

        Ok(Self {
            level: config.level.unwrap_or(level),
            format,
            verbose,
        })
    }
}

fn is_truthy(raw: &str) -> bool {
    match raw.trim().parse::<i64>() {
        Ok(n) => n != 0,
        Err(_) => matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "on"),
    }
}

/// `log` backend built from a [`LoggerConfig`].
pub struct EtlLogger {
    name: String,
    profile: Profile,
    stderr: bool,
    file_path: PathBuf,
    file: Mutex<File>,
}

impl fmt::Debug for EtlLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtlLogger")
            .field("name", &self.name)
            .field("profile", &self.profile)
            .field("stderr", &self.stderr)
            .field("file_path", &self.file_path)
            .finish()
    }
}

impl EtlLogger {
    /// Resolve the profile and open (append) the log file.
    pub fn new(config: &LoggerConfig) -> EtlResult<Self> {
        let profile = Profile::resolve(config)?;
        let dir = match &config.file_path {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| EtlError::io(dir, e))?;
                dir.clone()
            }
            None => std::env::var_os(ENV_LOGGING_FILE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        };
        Self::with_profile(config, profile, &dir)
    }

    /// Build a logger with an already resolved profile, writing under `dir`.
    pub fn with_profile(config: &LoggerConfig, profile: Profile, dir: &Path) -> EtlResult<Self> {
        let file_path = dir.join(format!("{}_{}", config.name, config.logger_file_name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .map_err(|e| EtlError::io(&file_path, e))?;
        Ok(Self {
            name: config.name.clone(),
            profile,
            stderr: config.stderr,
            file_path,
            file: Mutex::new(file),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Highest level this logger lets through `log`'s global filter.
    pub fn max_level(&self) -> LevelFilter {
        if self.profile.verbose {
            self.profile.level.max(LevelFilter::Info)
        } else {
            self.profile.level
        }
    }

    /// Render one record in this logger's format.
    pub fn format_record(&self, record: &Record<'_>) -> String {
        let ts = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let level = if record.target() == PROGRESS_TARGET {
            "PROGRESS"
        } else {
            level_name(record.level())
        };
        let module = record
            .module_path()
            .and_then(|m| m.rsplit("::").next())
            .unwrap_or_else(|| record.target());
        let name = &self.name;
        let msg = record.args();
        match self.profile.format {
            LogFormat::Default => format!("{ts} :: [{name:<10} :: {level:<10}]  {module:<8} :: {msg}"),
            LogFormat::Verbose => format!("{ts} :: [{name:<10} :: {level:<8}] {module:<8} :: {msg}"),
            LogFormat::Simple => format!("{ts} :: {level:<8} :: {msg}"),
        }
    }

    fn write_line(&self, line: &str) {
        if self.stderr {
            eprintln!("{line}");
        }
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }

    /// Append the closing marker to the log file.
    pub fn close(&self) {
        let line = format!(
            "{} :: ------------------ closing logger ------------------ ",
            chrono::Local::now().format(TIMESTAMP_FORMAT)
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }
}

fn level_name(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARNING",
        log::Level::Info => "INFO",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

impl Log for EtlLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        if metadata.target() == PROGRESS_TARGET {
            self.profile.verbose
        } else {
            metadata.level() <= self.profile.level
        }
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.write_line(&self.format_record(record));
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install a logger built from `config` as the global `log` backend.
///
/// The logger lives for the rest of the process; the returned handle is used to [`EtlLogger::close`] it.
pub fn init(config: LoggerConfig) -> EtlResult<&'static EtlLogger> {
    let logger: &'static EtlLogger = Box::leak(Box::new(EtlLogger::new(&config)?));
    log::set_logger(logger).map_err(|e| EtlError::Logging {
        message: e.to_string(),
    })?;
    log::set_max_level(logger.max_level());
    Ok(logger)
}
