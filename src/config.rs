//! Environment-driven configuration for the store layer.
//!
//! Configuration is consumed, not owned: values come from process
//! environment variables, optionally seeded from a `.env.<environment>` file.
//!
//! ```
//! use kvbridge::config::{Environment, StoreConfig};
//!
//! let config = StoreConfig::default();
//! assert_eq!(config.host, "localhost");
//! assert_eq!(config.port, 6379);
//! assert_eq!(config.environment, Environment::Development);
//! ```

use crate::error::{Error, Result};
use crate::serialization::Codec;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default Redis connection pool size.
/// Override with REDIS_POOL_SIZE environment variable
pub const DEFAULT_POOL_SIZE: u32 = 16;

/// Default TTL applied by the generic cache interface (seconds).
pub const DEFAULT_TTL_SECS: u64 = 3600;

const DEFAULT_PORT: u16 = 6379;

/// Deployment environment.
///
/// Used solely to gate destructive operations such as
/// [`StoreResetService::clean_database`](crate::StoreResetService::clean_database).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
    Other(String),
}

impl Environment {
    /// Read `NODE_ENV`, falling back to `APP_ENV`, then `Development`.
    pub fn from_env() -> Self {
        std::env::var("NODE_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .map(|v| Environment::parse(&v))
            .unwrap_or_default()
    }

    /// Parse an environment name, case-insensitively.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "development" | "dev" => Environment::Development,
            "test" | "testing" => Environment::Test,
            "production" | "prod" => Environment::Production,
            other => Environment::Other(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
            Environment::Other(name) => name,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the key-value store connection and cache defaults.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    /// Pool checkout / connect limit.
    pub connection_timeout: Duration,
    /// Per-command limit enforced by `CacheService`. `None` leaves the
    /// store client's own defaults in charge.
    pub command_timeout: Option<Duration>,
    /// TTL for `set` calls that pass none. `None` = no expiry.
    pub default_ttl: Option<Duration>,
    /// Prefix for generic cache keys (`"{namespace}:{key}"`).
    pub namespace: Option<String>,
    pub codec: Codec,
    pub environment: Environment,
    /// Primary data store URL.
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
            command_timeout: None,
            default_ttl: Some(Duration::from_secs(DEFAULT_TTL_SECS)),
            namespace: None,
            codec: Codec::default(),
            environment: Environment::default(),
            database_url: None,
        }
    }
}

impl StoreConfig {
    /// Build configuration from process environment variables.
    ///
    /// Absent variables fall back to [`StoreConfig::default`]. Present but
    /// malformed numeric variables are a `ConfigError`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let defaults = StoreConfig::default();

        let default_ttl = match parse_var::<u64>("REDIS_TTL")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.default_ttl,
        };

        let codec = match non_empty_var("CACHE_CODEC") {
            Some(name) => name.parse()?,
            None => defaults.codec,
        };

        Ok(StoreConfig {
            host: non_empty_var("REDIS_HOST").unwrap_or(defaults.host),
            port: parse_var("REDIS_PORT")?.unwrap_or(defaults.port),
            username: non_empty_var("REDIS_USERNAME"),
            password: non_empty_var("REDIS_PASSWORD"),
            database: parse_var("REDIS_DB")?.unwrap_or(defaults.database),
            pool_size: parse_var("REDIS_POOL_SIZE")?.unwrap_or(defaults.pool_size),
            connection_timeout: defaults.connection_timeout,
            command_timeout: parse_var::<u64>("REDIS_COMMAND_TIMEOUT_MS")?
                .map(Duration::from_millis),
            default_ttl,
            namespace: non_empty_var("CACHE_NAMESPACE"),
            codec,
            environment: Environment::from_env(),
            database_url: non_empty_var("DATABASE_URL"),
        })
    }

    /// Load `.env.<environment>` and `.env` (if present) from the working
    /// directory, then read the environment.
    ///
    /// Variables already set in the process are never overridden.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if an env file is malformed or a
    /// variable cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// [`load`](Self::load) with the env files looked up in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_file = format!(".env.{}", Environment::from_env());
        for file in [env_file.as_str(), ".env"] {
            let path = dir.join(file);
            match dotenvy::from_path(&path) {
                Ok(()) => debug!("Loaded environment file {}", path.display()),
                Err(e) if e.not_found() => {}
                Err(e) => {
                    return Err(Error::ConfigError(format!(
                        "Failed to load {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Self::from_env()
    }

    /// Build the Redis connection URL.
    ///
    /// Credentials are percent-encoded. A password without a username
    /// authenticates as `default`; a username without a password is ignored.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if host and port do not form a valid URL.
    pub fn connection_string(&self) -> Result<String> {
        let address = format!("redis://{}:{}/{}", self.host, self.port, self.database);
        let mut url = Url::parse(&address)
            .map_err(|e| Error::ConfigError(format!("Invalid Redis address {}: {}", address, e)))?;

        if let Some(password) = &self.password {
            let username = self.username.as_deref().unwrap_or("default");
            url.set_username(username)
                .and_then(|()| url.set_password(Some(password)))
                .map_err(|()| {
                    Error::ConfigError(format!("Cannot attach credentials to {}", address))
                })?;
        }

        Ok(url.into())
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::ConfigError(format!("{}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}
