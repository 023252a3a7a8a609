//! Chained hash table from file addresses to cache slots.
//!
//! # Design
//!
//! - Fixed bucket count; bucket = `address % BUCKET_COUNT`
//! - Chain nodes live in a [`SlabAllocator`] sized to the number of entries
//!   the owner will ever hold, so the table never allocates after creation
//! - New entries are pushed at the head of their chain
//!
//! # Invariants
//!
//! - Each address appears at most once across all chains
//! - `len()` == number of chain nodes in use

use crate::storage::file::Address;
use crate::storage::slab::{SlabAllocator, SlotId};

/// Number of hash buckets.
pub const BUCKET_COUNT: usize = 631;

struct ChainNode<V> {
    address: Address,
    value: V,
    next: Option<SlotId>,
}

/// Hash index mapping an [`Address`] to a small copyable handle.
pub struct HashIndex<V: Copy> {
    buckets: Vec<Option<SlotId>>,
    nodes: SlabAllocator<ChainNode<V>>,
}

impl<V: Copy> HashIndex<V> {
    /// Create an index that holds at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: vec![None; BUCKET_COUNT],
            nodes: SlabAllocator::new(capacity),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // result is < BUCKET_COUNT
    const fn bucket(address: Address) -> usize {
        (address % BUCKET_COUNT as u64) as usize
    }

    /// Look up the value stored for `address`.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<V> {
        let mut cursor = self.buckets[Self::bucket(address)];
        while let Some(id) = cursor {
            let node = self.nodes.get(id);
            if node.address == address {
                return Some(node.value);
            }
            cursor = node.next;
        }
        None
    }

    /// Map `address` to `value`, returning the previous value if any.
    ///
    /// # Panics
    /// Panics if the address is new and the index is full.
    pub fn insert(&mut self, address: Address, value: V) -> Option<V> {
        let bucket = Self::bucket(address);
        let mut cursor = self.buckets[bucket];
        while let Some(id) = cursor {
            let node = self.nodes.get_mut(id);
            if node.address == address {
                return Some(std::mem::replace(&mut node.value, value));
            }
            cursor = node.next;
        }

        let id = self.nodes.acquire(ChainNode {
            address,
            value,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(id);
        None
    }

    /// Remove `address`, returning its value if it was present.
    pub fn remove(&mut self, address: Address) -> Option<V> {
        let bucket = Self::bucket(address);
        let mut prev: Option<SlotId> = None;
        let mut cursor = self.buckets[bucket];
        while let Some(id) = cursor {
            let node = self.nodes.get(id);
            let next = node.next;
            if node.address == address {
                match prev {
                    None => self.buckets[bucket] = next,
                    Some(prev) => self.nodes.get_mut(prev).next = next,
                }
                return Some(self.nodes.release(id).value);
            }
            prev = cursor;
            cursor = next;
        }
        None
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.buckets.fill(None);
        self.nodes.clear();
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut index = HashIndex::new(8);
        assert_eq!(index.insert(100, 'a'), None);
        assert_eq!(index.insert(200, 'b'), None);
        assert_eq!(index.get(100), Some('a'));
        assert_eq!(index.get(200), Some('b'));
        assert_eq!(index.get(300), None);

        assert_eq!(index.remove(100), Some('a'));
        assert_eq!(index.get(100), None);
        assert_eq!(index.remove(100), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut index = HashIndex::new(1);
        assert_eq!(index.insert(7, 1), None);
        // Same address does not take a second chain node
        assert_eq!(index.insert(7, 2), Some(1));
        assert_eq!(index.get(7), Some(2));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_colliding_chain() {
        let bucket_count = BUCKET_COUNT as u64;
        let addresses: Vec<u64> = (0..6).map(|i| 5 + i * bucket_count).collect();
        let mut index = HashIndex::new(addresses.len());
        for (i, &address) in addresses.iter().enumerate() {
            index.insert(address, i);
        }

        // Remove from the middle, the head and the tail of the chain
        assert_eq!(index.remove(addresses[2]), Some(2));
        assert_eq!(index.remove(addresses[5]), Some(5));
        assert_eq!(index.remove(addresses[0]), Some(0));

        for (i, &address) in addresses.iter().enumerate() {
            let expected = [1, 3, 4].contains(&i).then_some(i);
            assert_eq!(index.get(address), expected, "address {address}");
        }
    }

    #[test]
    fn test_clear() {
        let mut index = HashIndex::new(2);
        index.insert(1, ());
        index.insert(2, ());
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.get(1), None);
        index.insert(3, ());
        index.insert(4, ());
        assert_eq!(index.len(), 2);
    }
}
