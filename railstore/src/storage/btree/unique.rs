//! Unique-key B+ tree with values in a separate value store.

use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::storage::btree::tree::{BTreeError, Layout, Tree};
use crate::storage::file::{ADDRESS_SIZE, Address};
use crate::storage::record::{Record, RecordError};
use crate::storage::value_store::ValueStore;

/// Leaf entry of a unique tree: a key and the address of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<K> {
    pub key: K,
    pub value: Address,
}

impl<K: Record> Record for Slot<K> {
    const SIZE: usize = K::SIZE + ADDRESS_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.key.encode(&mut buf[..K::SIZE]);
        self.value.encode(&mut buf[K::SIZE..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Ok(Self {
            key: K::decode(&buf[..K::SIZE])?,
            value: u64::decode(&buf[K::SIZE..])?,
        })
    }
}

pub struct UniqueLayout<K>(PhantomData<K>);

impl<K: Record + Ord + Clone> Layout for UniqueLayout<K> {
    type Sep = K;
    type Entry = Slot<K>;

    fn separator(entry: &Slot<K>) -> &K {
        &entry.key
    }
}

/// Path of the node file for a table at `base`.
#[must_use]
pub fn index_path(base: &Path) -> PathBuf {
    with_suffix(base, "_index.db")
}

/// Path of the value file for a table at `base`.
#[must_use]
pub fn data_path(base: &Path) -> PathBuf {
    with_suffix(base, "_data.db")
}

pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Ordered map from `K` to `V`.
///
/// Inserting a key that is already present leaves the stored value
/// untouched.
pub struct BPlusTree<K: Record + Ord + Clone, V: Record> {
    tree: Tree<UniqueLayout<K>>,
    values: ValueStore<V>,
}

impl<K: Record + Ord + Clone, V: Record> BPlusTree<K, V> {
    /// Open (or create) the table whose files start with `base`.
    ///
    /// Nodes live in `{base}_index.db`, values in `{base}_data.db`. Each
    /// file gets its own cache of `cache_capacity` records.
    pub fn open(base: &Path, cache_capacity: usize) -> Result<Self, BTreeError> {
        Ok(Self {
            tree: Tree::open(&index_path(base), cache_capacity)?,
            values: ValueStore::open(&data_path(base), cache_capacity)?,
        })
    }

    /// Borrow the value stored for `key`.
    pub fn get(&mut self, key: &K) -> Result<Option<&V>, BTreeError> {
        let Some(address) = self.tree.get(key)?.map(|slot| slot.value) else {
            return Ok(None);
        };
        Ok(Some(self.values.get(address)?))
    }

    /// Mutably borrow the value stored for `key`.
    pub fn get_mut(&mut self, key: &K) -> Result<Option<&mut V>, BTreeError> {
        let Some(address) = self.tree.get(key)?.map(|slot| slot.value) else {
            return Ok(None);
        };
        Ok(Some(self.values.get_mut(address)?))
    }

    /// Whether `key` is present.
    pub fn contains_key(&mut self, key: &K) -> Result<bool, BTreeError> {
        Ok(self.tree.get(key)?.is_some())
    }

    /// Insert `value` under `key` unless the key is already present.
    ///
    /// Returns `false` (storing nothing) if the key exists.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, BTreeError> {
        let values = &mut self.values;
        self.tree.insert_with(key, |key| {
            Ok(Slot {
                key,
                value: values.insert(value)?,
            })
        })
    }

    /// Remove `key` and its value. Returns whether the key was present.
    pub fn remove(&mut self, key: &K) -> Result<bool, BTreeError> {
        match self.tree.remove_entry(key)? {
            Some(slot) => {
                self.values.remove(slot.value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether the table has no keys.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of keys.
    pub fn len(&mut self) -> Result<usize, BTreeError> {
        self.tree.len()
    }

    /// All keys in order.
    pub fn keys(&mut self) -> Result<Vec<K>, BTreeError> {
        let mut keys = Vec::new();
        self.tree.scan(
            |_| false,
            |slot| {
                keys.push(slot.key.clone());
                ControlFlow::Continue(())
            },
        )?;
        Ok(keys)
    }

    /// Remove every key and value.
    pub fn clear(&mut self) -> Result<(), BTreeError> {
        self.tree.clear()?;
        self.values.clear()?;
        Ok(())
    }

    /// Write back cached nodes and values and sync both files.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        self.tree.flush()?;
        self.values.flush()?;
        Ok(())
    }

    /// Flush and close both files.
    pub fn close(self) -> Result<(), BTreeError> {
        let Self { tree, values } = self;
        let tree_result = tree.close();
        values.close()?;
        tree_result
    }

    #[cfg(test)]
    pub(crate) const fn tree_mut(&mut self) -> &mut Tree<UniqueLayout<K>> {
        &mut self.tree
    }
}
