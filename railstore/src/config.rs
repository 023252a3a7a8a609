//! Engine configuration.
//!
//! Configuration is loaded from environment variables, with defaults for
//! everything.
//!
//! # Environment Variables
//!
//! - `RAILSTORE_DATA_DIRECTORY`: Directory where table files are stored (default: `./data`)
//! - `RAILSTORE_CACHE_CAPACITY`: Records cached per table file (default: `300`)
//!
//! # Invariants
//!
//! - `cache_capacity` is always positive

use std::path::PathBuf;

use crate::storage::DEFAULT_CACHE_CAPACITY;

const DATA_DIRECTORY_VAR: &str = "RAILSTORE_DATA_DIRECTORY";
const CACHE_CAPACITY_VAR: &str = "RAILSTORE_CACHE_CAPACITY";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory where table files are stored.
    /// A unique table `t` lives at `{data_directory}/t_index.db` and
    /// `{data_directory}/t_data.db`; a multi-value table at `{data_directory}/t.db`.
    pub data_directory: PathBuf,
    /// Capacity of each file's record cache.
    pub cache_capacity: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DATA_DIRECTORY)
    }
}

impl EngineConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    /// Default capacity of each file's record cache.
    pub const DEFAULT_CACHE_CAPACITY: usize = DEFAULT_CACHE_CAPACITY;

    /// Configuration for `data_directory` with the default cache capacity.
    #[must_use]
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Replace the cache capacity.
    ///
    /// # Pre-conditions
    /// - `cache_capacity > 0`
    #[must_use]
    pub const fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        assert!(cache_capacity > 0, "cache capacity must be positive");
        self.cache_capacity = cache_capacity;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `RAILSTORE_CACHE_CAPACITY` is set but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_directory = lookup(DATA_DIRECTORY_VAR)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let cache_capacity = match lookup(CACHE_CAPACITY_VAR) {
            Some(value) => Self::parse_cache_capacity(&value)?,
            None => Self::DEFAULT_CACHE_CAPACITY,
        };

        Ok(Self {
            data_directory,
            cache_capacity,
        })
    }

    fn parse_cache_capacity(value: &str) -> Result<usize, ConfigError> {
        match value.trim().parse::<usize>() {
            Ok(capacity) if capacity > 0 => Ok(capacity),
            _ => Err(ConfigError::InvalidValue {
                name: CACHE_CAPACITY_VAR.to_string(),
                message: format!("'{value}' is not a positive integer"),
            }),
        }
    }
}
