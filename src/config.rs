use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_ACTIVITY_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub storage_root: PathBuf,
    pub max_upload_bytes: u64,
    pub activity_bus_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::configuration("DATABASE_URL not set"))?;

        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let busy_timeout_secs = parse_var("DATABASE_BUSY_TIMEOUT_SECS", DEFAULT_BUSY_TIMEOUT_SECS)?;
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let activity_bus_capacity = parse_var("ACTIVITY_BUS_CAPACITY", DEFAULT_ACTIVITY_BUS_CAPACITY)?;

        if max_connections == 0 {
            return Err(AppError::configuration("DATABASE_MAX_CONNECTIONS must be at least 1"));
        }
        if activity_bus_capacity == 0 {
            return Err(AppError::configuration("ACTIVITY_BUS_CAPACITY must be at least 1"));
        }

        let storage_root = std::env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage"));

        Ok(Self {
            database_url,
            max_connections,
            busy_timeout: Duration::from_secs(busy_timeout_secs),
            storage_root,
            max_upload_bytes,
            activity_bus_capacity,
        })
    }

    /// Config for a database file at `database_url` with every other knob at its default.
    pub fn for_database(database_url: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
            storage_root: storage_root.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            activity_bus_capacity: DEFAULT_ACTIVITY_BUS_CAPACITY,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_falls_back_to_default() {
        let value: u32 = parse_var("DOCVAULT_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn garbage_value_is_a_configuration_error() {
        std::env::set_var("DOCVAULT_TEST_GARBAGE", "ten");
        let result: Result<u32, _> = parse_var("DOCVAULT_TEST_GARBAGE", 1);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn for_database_uses_defaults() {
        let config = Config::for_database("sqlite://test.db", "/tmp/store");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }
}
