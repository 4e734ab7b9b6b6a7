//! Connection settings for a PostgreSQL/PostGIS database.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use urlencoding::encode;

use crate::error::{EtlError, EtlResult};

pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";

const DEFAULT_PORT: u16 = 5432;
const MASK: &str = "****";

/// Host, port, database and credentials of a PostgreSQL server.
///
/// The password defaults to the `DB_PASSWORD` environment variable (empty when unset). It never
/// appears in `Display`/`Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default = "password_from_env", skip_serializing)]
    password: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn password_from_env() -> String {
    std::env::var(ENV_DB_PASSWORD).unwrap_or_default()
}

impl DatabaseConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password_from_env(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Build a configuration from `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER` and `DB_PASSWORD`.
    pub fn from_env() -> EtlResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EtlResult<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| EtlError::configuration(format!("environment variable {key} is not set")))
        };
        let port = match lookup(ENV_DB_PORT) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                EtlError::configuration(format!("{ENV_DB_PORT} must be a port number, got '{raw}'"))
            })?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            host: required(ENV_DB_HOST)?,
            port,
            database: required(ENV_DB_NAME)?,
            user: required(ENV_DB_USER)?,
            password: lookup(ENV_DB_PASSWORD).unwrap_or_default(),
        })
    }

    /// Load a configuration from a JSON file. A missing `password` key falls back to `DB_PASSWORD`.
    pub fn from_json_file(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| EtlError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Full connection URL, credentials included.
    pub fn url(&self) -> String {
        self.format_url(&encode(&self.user), &encode(&self.password))
    }

    /// Connection URL with the user and/or password replaced by `****`.
    pub fn safe_url(&self, show_user: bool, show_password: bool) -> String {
        let user = if show_user {
            encode(&self.user).into_owned()
        } else {
            MASK.to_string()
        };
        let password = if show_password {
            encode(&self.password).into_owned()
        } else {
            MASK.to_string()
        };
        self.format_url(&user, &password)
    }

    fn format_url(&self, user: &str, password: &str) -> String {
        format!(
            "postgresql://{user}:{password}@{}:{}/{}",
            self.host, self.port, self.database
        )
    }
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseConfig(url : {})", self.safe_url(false, false))
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
