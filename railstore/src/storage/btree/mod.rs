//! Disk-based B+ trees.
//!
//! Two trees share one structural core ([`Tree`]):
//!
//! - [`BPlusTree`]: unique keys. Leaves hold `(key, value address)` slots and
//!   the values live in a [`ValueStore`](crate::storage::ValueStore).
//! - [`MultiBPlusTree`]: duplicate keys. Leaves hold `(key, value)` pairs
//!   inline, ordered by key and then value.
//!
//! # Structure
//!
//! - Internal nodes: separators and child addresses
//! - Leaf nodes: entries in order, singly linked to the next leaf for scans
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use railstore::storage::btree::MultiBPlusTree;
//!
//! let mut seats = MultiBPlusTree::<u32, u64>::open(Path::new("data/seats"), 300)?;
//! seats.insert(5, 2)?;
//! seats.insert(5, 1)?;
//!
//! let mut found = Vec::new();
//! seats.find(&5, &mut found)?;
//! assert_eq!(found, vec![1, 2]);
//! # Ok::<(), railstore::storage::btree::BTreeError>(())
//! ```

#[cfg(test)]
mod check;
mod multi;
mod node;
mod tree;
mod unique;

pub use multi::{MultiBPlusTree, MultiLayout, Pair};
pub use node::{InternalNode, LeafNode, MIN_DEGREE, Node, degree_for};
pub use tree::{BTreeError, Layout, Tree};
pub use unique::{BPlusTree, Slot, UniqueLayout, data_path, index_path};
