use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type used across the toolbox.
pub type EtlResult<T> = Result<T, EtlError>;

/// Boxed driver error carried by database-facing variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type returned by readers, database handlers and the logger.
///
/// Wrapped library errors carry the source (path, connection target) or operation that failed.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The source descriptor names a format or scheme no reader handles.
    #[error("unsupported source '{descriptor}': {reason}")]
    UnsupportedSource { descriptor: String, reason: String },

    /// A reader or handler is missing a required parameter, or a parameter is invalid.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The database could not be reached, or rejected the credentials.
    #[error("connection to {target} failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: BoxError,
    },

    /// A write was rejected by the database (constraint or integrity violation).
    #[error("{operation} rejected by the database: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// Any other database driver failure.
    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error.
    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[cfg(feature = "excel")]
    /// Excel parsing error (feature-gated behind `excel`).
    #[error("excel error in {}: {source}", path.display())]
    Excel {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    /// JSON parsing error.
    #[error("json error in {}: {message}", path.display())]
    Json { path: PathBuf, message: String },

    /// Shapefile (`.shp`/`.dbf`) parsing error.
    #[error("shapefile error in {}: {message}", path.display())]
    Shapefile { path: PathBuf, message: String },

    /// GeoPackage (SQLite) access error.
    #[error("geopackage error in {}: {source}", path.display())]
    GeoPackage {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A geometry blob could not be decoded or encoded.
    #[error("invalid geometry in {context}: {message}")]
    Geometry { context: String, message: String },

    /// The input does not conform to the requested column schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A value could not be parsed into the requested [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    Parse {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// A database record could not be mapped onto an entity.
    #[error("cannot map column '{column}' of {entity}: {message}")]
    Mapping {
        entity: String,
        column: String,
        message: String,
    },

    /// The logger could not be set up.
    #[error("logging error: {message}")]
    Logging { message: String },
}

impl EtlError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for failures caused by unreachable files or databases.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Connection { .. } => true,
            Self::Csv { source, .. } => matches!(source.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }
}
