//! File-backed storage engine.
//!
//! Layers, lowest first:
//!
//! - [`record`]: fixed-size binary encoding of everything stored on disk
//! - [`slab`]: fixed-capacity in-memory pool with an intrusive free list
//! - [`file`]: a file of fixed-size records with an on-disk free list
//! - [`hash_index`]: address to slot lookup for the cache
//! - [`cache`]: bounded write-back LRU cache over a paged file
//! - [`value_store`]: values packed into shared blocks
//! - [`btree`]: unique and multi-value B+ trees
//!
//! Every file starts with a header block:
//!
//! ```text
//! tail      : 8 bytes (end of the data region)
//! free_head : 8 bytes (first freed record, 0 if none)
//! payload   : caller-defined (tree root, open value block)
//! crc32     : 4 bytes over the preceding header bytes
//! ```
//!
//! Address 0 falls inside the header, so it is never a record address and
//! serves as the null address everywhere.

pub mod btree;
pub mod cache;
pub mod file;
pub mod fixed_str;
pub mod hash_index;
pub mod record;
pub mod slab;
pub mod value_store;

pub use btree::{BPlusTree, BTreeError, MultiBPlusTree};
pub use cache::{CacheStats, DEFAULT_CACHE_CAPACITY, RecordCache};
pub use file::{Address, FileError, NULL_ADDRESS, PagedFile};
pub use fixed_str::FixedStr;
pub use hash_index::HashIndex;
pub use record::{PAGE_BUDGET, Record, RecordError};
pub use slab::{SlabAllocator, SlotId};
pub use value_store::ValueStore;
