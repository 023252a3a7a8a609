//! Multi-value B+ tree: several values per key, stored inline as pairs.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::path::Path;

use crate::storage::btree::tree::{BTreeError, Layout, Tree};
use crate::storage::btree::unique::with_suffix;
use crate::storage::record::{Record, RecordError};

/// A key and one of its values. Ordered by key, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K: Record, V: Record> Record for Pair<K, V> {
    const SIZE: usize = K::SIZE + V::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.key.encode(&mut buf[..K::SIZE]);
        self.value.encode(&mut buf[K::SIZE..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Ok(Self {
            key: K::decode(&buf[..K::SIZE])?,
            value: V::decode(&buf[K::SIZE..])?,
        })
    }
}

pub struct MultiLayout<K, V>(PhantomData<(K, V)>);

impl<K, V> Layout for MultiLayout<K, V>
where
    K: Record + Ord + Clone,
    V: Record + Ord + Clone,
{
    type Sep = Pair<K, V>;
    type Entry = Pair<K, V>;

    fn separator(entry: &Pair<K, V>) -> &Pair<K, V> {
        entry
    }
}

/// Ordered multimap from `K` to `V`.
///
/// Any number of values may share a key; an exact `(key, value)` pair is
/// stored at most once.
pub struct MultiBPlusTree<K, V>
where
    K: Record + Ord + Clone,
    V: Record + Ord + Clone,
{
    tree: Tree<MultiLayout<K, V>>,
}

impl<K, V> MultiBPlusTree<K, V>
where
    K: Record + Ord + Clone,
    V: Record + Ord + Clone,
{
    /// Open (or create) the table stored in `{base}.db`.
    pub fn open(base: &Path, cache_capacity: usize) -> Result<Self, BTreeError> {
        Ok(Self {
            tree: Tree::open(&with_suffix(base, ".db"), cache_capacity)?,
        })
    }

    /// Insert the pair `(key, value)`. Returns `false` if it was already
    /// present.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, BTreeError> {
        self.tree.insert_with(Pair { key, value }, Ok)
    }

    /// Remove the pair `(key, value)`. Returns whether it was present.
    pub fn remove(&mut self, key: K, value: V) -> Result<bool, BTreeError> {
        Ok(self.tree.remove_entry(&Pair { key, value })?.is_some())
    }

    /// Whether the pair `(key, value)` is present.
    pub fn contains(&mut self, key: K, value: V) -> Result<bool, BTreeError> {
        Ok(self.tree.get(&Pair { key, value })?.is_some())
    }

    /// Append every value stored under `key` to `out`, in value order.
    pub fn find(&mut self, key: &K, out: &mut Vec<V>) -> Result<(), BTreeError> {
        self.tree.scan(
            |sep| sep.key < *key,
            |pair| match pair.key.cmp(key) {
                Ordering::Less => ControlFlow::Continue(()),
                Ordering::Equal => {
                    out.push(pair.value.clone());
                    ControlFlow::Continue(())
                }
                Ordering::Greater => ControlFlow::Break(()),
            },
        )
    }

    /// Whether the table has no pairs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of pairs.
    pub fn len(&mut self) -> Result<usize, BTreeError> {
        self.tree.len()
    }

    /// Remove every pair.
    pub fn clear(&mut self) -> Result<(), BTreeError> {
        self.tree.clear()
    }

    /// Write back cached nodes and sync the file.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        self.tree.flush()
    }

    /// Flush and close.
    pub fn close(self) -> Result<(), BTreeError> {
        self.tree.close()
    }

    #[cfg(test)]
    pub(crate) const fn tree_mut(&mut self) -> &mut Tree<MultiLayout<K, V>> {
        &mut self.tree
    }
}
