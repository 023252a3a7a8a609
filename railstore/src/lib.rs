//! File-backed ordered storage for a train reservation service.
//!
//! Tables are B+ trees over paged files with a bounded write-back cache:
//!
//! - [`BPlusTree`]: one value per key (users, trains)
//! - [`MultiBPlusTree`]: many values per key (orders by user, trains by station)
//!
//! Open tables through an [`Engine`], which places their files in the
//! configured data directory:
//!
//! ```no_run
//! use railstore::{Engine, EngineConfig, FixedStr};
//!
//! let engine = Engine::new(EngineConfig::from_env()?)?;
//! let mut users = engine.open_table::<FixedStr<20>, u32>("users")?;
//! users.insert(FixedStr::new("alice")?, 10)?;
//! assert_eq!(users.get(&FixedStr::new("alice")?)?, Some(&10));
//! users.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Everything is single-threaded and blocking. Dirty state is written back
//! on `close()` or when a table is dropped.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod engine;
pub mod storage;
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError};
pub use storage::{BPlusTree, BTreeError, FixedStr, MultiBPlusTree, Record};
pub use types::OrderStatus;
