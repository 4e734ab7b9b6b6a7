//! Database access: connection settings, table mappings, a query builder and the
//! [`DatabaseHandler`] that persists [`Entity`] types.
//!
//! - [`config`]: [`DatabaseConfig`] for PostgreSQL servers
//! - [`orm`]: [`TableMapping`], [`ColumnDef`], [`Record`] and the [`Entity`] trait
//! - [`query`]: [`Query`] filters
//! - [`backend`]: the [`SqlBackend`] driver seam, implemented by [`SqliteBackend`] and
//!   `PostgresBackend` (feature `postgis`)
//! - [`handler`]: [`DatabaseObjectsHandler`]

pub mod backend;
pub mod config;
pub mod handler;
pub mod orm;
#[cfg(feature = "postgis")]
pub mod postgres;
pub mod query;
pub mod sqlite;

pub use backend::{Dialect, DriverError, SqlBackend, SqlParam};
pub use config::DatabaseConfig;
pub use handler::{with_connection, DatabaseHandler, DatabaseObjectsHandler};
pub use orm::{ColumnDef, ColumnType, Entity, FromValue, Record, TableMapping};
#[cfg(feature = "postgis")]
pub use postgres::PostgresBackend;
pub use query::{Condition, Query};
pub use sqlite::SqliteBackend;
