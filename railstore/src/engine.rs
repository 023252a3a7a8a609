//! Engine context: configuration plus the tables opened under it.
//!
//! An [`Engine`] owns an [`EngineConfig`] and opens named tables inside the
//! configured data directory. Each table value owns its files exclusively;
//! the engine keeps no shared state beyond configuration.
//!
//! # Table Files
//!
//! - **Unique tables**: `{data_directory}/{name}_index.db` and `{data_directory}/{name}_data.db`
//! - **Multi-value tables**: `{data_directory}/{name}.db`
//!
//! # Invariants
//!
//! - The data directory exists once an `Engine` has been constructed
//! - Table names are validated before any path is built from them

use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::storage::btree::{BPlusTree, BTreeError, MultiBPlusTree};
use crate::storage::record::Record;

/// Maximum length of a table name.
const MAX_TABLE_NAME_LENGTH: usize = 128;

/// Opens tables inside a data directory.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create the engine, creating the data directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_directory).map_err(EngineError::CreateDirectory)?;
        tracing::info!(
            "Opened engine at '{}' with cache capacity {}",
            config.data_directory.display(),
            config.cache_capacity
        );
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open (or create) the unique-key table `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is not a valid table name
    /// - Either table file cannot be opened or is corrupt
    pub fn open_table<K, V>(&self, name: &str) -> Result<BPlusTree<K, V>, EngineError>
    where
        K: Record + Ord + Clone,
        V: Record,
    {
        let base = self.table_base(name)?;
        let table = BPlusTree::open(&base, self.config.cache_capacity)?;
        tracing::info!("Opened table '{name}'");
        Ok(table)
    }

    /// Open (or create) the multi-value table `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is not a valid table name
    /// - The table file cannot be opened or is corrupt
    pub fn open_multi_table<K, V>(&self, name: &str) -> Result<MultiBPlusTree<K, V>, EngineError>
    where
        K: Record + Ord + Clone,
        V: Record + Ord + Clone,
    {
        let base = self.table_base(name)?;
        let table = MultiBPlusTree::open(&base, self.config.cache_capacity)?;
        tracing::info!("Opened multi-value table '{name}'");
        Ok(table)
    }

    fn table_base(&self, name: &str) -> Result<PathBuf, EngineError> {
        validate_table_name(name)?;
        Ok(self.config.data_directory.join(name))
    }
}

/// Error returned when validating a table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableNameError {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong,
    /// The name contains invalid characters.
    InvalidCharacters,
}

impl std::fmt::Display for TableNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "table name must not be empty"),
            Self::TooLong => write!(
                f,
                "table name exceeds maximum length of {MAX_TABLE_NAME_LENGTH} characters"
            ),
            Self::InvalidCharacters => write!(
                f,
                "table name contains invalid characters; only alphanumeric, hyphens, and underscores are allowed"
            ),
        }
    }
}

impl std::error::Error for TableNameError {}

/// Validate that a table name is well-formed.
///
/// Valid names are non-empty, at most 128 characters, and contain only
/// alphanumeric characters, hyphens, and underscores. This keeps every
/// table inside the data directory.
///
/// # Examples
///
/// ```
/// use railstore::engine::validate_table_name;
///
/// assert!(validate_table_name("train_seats").is_ok());
/// assert!(validate_table_name("").is_err());
/// assert!(validate_table_name("../evil").is_err());
/// ```
pub fn validate_table_name(name: &str) -> Result<(), TableNameError> {
    if name.is_empty() {
        return Err(TableNameError::Empty);
    }

    if name.len() > MAX_TABLE_NAME_LENGTH {
        return Err(TableNameError::TooLong);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TableNameError::InvalidCharacters);
    }

    Ok(())
}

/// Errors that can occur when opening tables.
#[derive(Debug)]
pub enum EngineError {
    /// The table name is not valid.
    InvalidTableName(TableNameError),
    /// The data directory could not be created.
    CreateDirectory(std::io::Error),
    /// A table file could not be opened.
    Tree(BTreeError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTableName(e) => write!(f, "invalid table name: {e}"),
            Self::CreateDirectory(e) => write!(f, "failed to create data directory: {e}"),
            Self::Tree(e) => write!(f, "table error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidTableName(e) => Some(e),
            Self::CreateDirectory(e) => Some(e),
            Self::Tree(e) => Some(e),
        }
    }
}

impl From<TableNameError> for EngineError {
    fn from(e: TableNameError) -> Self {
        Self::InvalidTableName(e)
    }
}

impl From<BTreeError> for EngineError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixed_str::FixedStr;
    use crate::types::OrderStatus;
    use tempfile::tempdir;

    type Username = FixedStr<20>;

    fn engine(dir: &std::path::Path) -> Engine {
        Engine::new(EngineConfig::new(dir.join("data")).with_cache_capacity(32)).expect("engine")
    }

    #[test]
    fn test_new_creates_data_directory() {
        let dir = tempdir().expect("create temp dir");
        let engine = engine(dir.path());
        assert!(dir.path().join("data").is_dir());
        assert_eq!(engine.config().cache_capacity, 32);
    }

    #[test]
    fn test_table_files_land_in_data_directory() {
        let dir = tempdir().expect("create temp dir");
        let engine = engine(dir.path());

        let mut users = engine
            .open_table::<Username, (u32, bool)>("users")
            .expect("open users");
        users
            .insert(Username::new("alice").expect("fits"), (10, true))
            .expect("insert");
        users.close().expect("close");

        let mut orders = engine
            .open_multi_table::<Username, (u64, OrderStatus)>("orders")
            .expect("open orders");
        orders
            .insert(Username::new("alice").expect("fits"), (1, OrderStatus::Pending))
            .expect("insert");
        orders.close().expect("close");

        let data = dir.path().join("data");
        assert!(data.join("users_index.db").is_file());
        assert!(data.join("users_data.db").is_file());
        assert!(data.join("orders.db").is_file());
    }

    #[test]
    fn test_tables_survive_a_new_engine() {
        let dir = tempdir().expect("create temp dir");
        {
            let engine = engine(dir.path());
            let mut orders = engine
                .open_multi_table::<u32, (u64, OrderStatus)>("orders")
                .expect("open");
            orders.insert(7, (2, OrderStatus::Success)).expect("insert");
            orders.insert(7, (1, OrderStatus::Refunded)).expect("insert");
            orders.close().expect("close");
        }

        let engine = engine(dir.path());
        let mut orders = engine
            .open_multi_table::<u32, (u64, OrderStatus)>("orders")
            .expect("reopen");
        let mut found = Vec::new();
        orders.find(&7, &mut found).expect("find");
        assert_eq!(
            found,
            vec![(1, OrderStatus::Refunded), (2, OrderStatus::Success)]
        );
    }

    #[test]
    fn test_invalid_table_names_are_rejected() {
        let dir = tempdir().expect("create temp dir");
        let engine = engine(dir.path());

        for name in ["", "../evil", "a/b", "with space", "dot.db"] {
            let result = engine.open_table::<u32, u32>(name);
            assert!(
                matches!(result, Err(EngineError::InvalidTableName(_))),
                "{name:?} accepted"
            );
        }
        assert!(!dir.path().join("evil_index.db").exists());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("train-seats_2").is_ok());
        assert_eq!(validate_table_name(""), Err(TableNameError::Empty));
        assert_eq!(
            validate_table_name(&"a".repeat(MAX_TABLE_NAME_LENGTH + 1)),
            Err(TableNameError::TooLong)
        );
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LENGTH)).is_ok());
        assert_eq!(
            validate_table_name("app.name"),
            Err(TableNameError::InvalidCharacters)
        );
    }

    #[test]
    fn test_corrupt_table_is_reported() {
        let dir = tempdir().expect("create temp dir");
        let engine = engine(dir.path());
        std::fs::write(dir.path().join("data").join("broken.db"), [0xab; 64]).expect("write");

        let result = engine.open_multi_table::<u32, u32>("broken");
        assert!(matches!(result, Err(EngineError::Tree(BTreeError::File(_)))));
    }
}
