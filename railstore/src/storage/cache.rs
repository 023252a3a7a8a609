//! Write-back LRU cache over a [`PagedFile`].
//!
//! The cache keeps up to `capacity` decoded records in memory, ordered from
//! most to least recently used. Lookups go through a [`HashIndex`]; entries
//! live in a [`SlabAllocator`] and link to each other by [`SlotId`].
//!
//! # Design
//!
//! - A miss reads through to the file and installs the record at the front
//! - Before installing into a full cache, the tail entry is evicted; a dirty
//!   tail is written to the file first, and stays cached if that write fails
//! - `readwrite` and `write` mark the entry dirty
//! - `free` drops the cached entry without writing it back
//! - Dirty entries are written back in recency order on `flush`, `close`
//!   and drop
//!
//! # Invariants
//!
//! - `index.len() == entries.len() <= capacity`
//! - Each cached address appears exactly once in the recency list
//! - A read observes the latest write to that address, cached or not

use std::path::Path;

use crate::storage::file::{Address, FileError, PagedFile};
use crate::storage::hash_index::HashIndex;
use crate::storage::record::Record;
use crate::storage::slab::{SlabAllocator, SlotId};

/// Default number of records held by a cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 300;

/// Counters describing cache behavior since the cache was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Accesses served from memory.
    pub hits: u64,
    /// Accesses that read through to the file.
    pub misses: u64,
    /// Entries discarded to make room.
    pub evictions: u64,
    /// Dirty entries written back to the file.
    pub writebacks: u64,
}

struct Entry<T> {
    address: Address,
    record: T,
    dirty: bool,
    /// Toward the most recently used end.
    prev: Option<SlotId>,
    /// Toward the least recently used end.
    next: Option<SlotId>,
}

/// A bounded write-back cache of `T` records stored in a paged file with an
/// `H` header.
pub struct RecordCache<T: Record, H: Record + Default> {
    file: PagedFile<T, H>,
    index: HashIndex<SlotId>,
    entries: SlabAllocator<Entry<T>>,
    /// Most recently used entry.
    head: Option<SlotId>,
    /// Least recently used entry.
    tail: Option<SlotId>,
    capacity: usize,
    stats: CacheStats,
    closed: bool,
}

impl<T: Record, H: Record + Default> RecordCache<T, H> {
    /// Open (or create) the file at `path` behind a cache of `capacity`
    /// records.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, FileError> {
        assert!(capacity > 0, "Cache capacity must be positive");
        let file = PagedFile::open(path)?;
        Ok(Self {
            file,
            index: HashIndex::new(capacity),
            entries: SlabAllocator::new(capacity),
            head: None,
            tail: None,
            capacity,
            stats: CacheStats::default(),
            closed: false,
        })
    }

    /// Borrow the record at `address`.
    pub fn readonly(&mut self, address: Address) -> Result<&T, FileError> {
        let id = self.touch(address)?;
        Ok(&self.entries.get(id).record)
    }

    /// Mutably borrow the record at `address` and mark it dirty.
    pub fn readwrite(&mut self, address: Address) -> Result<&mut T, FileError> {
        let id = self.touch(address)?;
        let entry = self.entries.get_mut(id);
        entry.dirty = true;
        Ok(&mut entry.record)
    }

    /// Store `record` at `address`. The file is updated on write-back.
    pub fn write(&mut self, address: Address, record: T) -> Result<(), FileError> {
        if let Some(id) = self.index.get(address) {
            self.stats.hits += 1;
            self.move_to_front(id);
            let entry = self.entries.get_mut(id);
            entry.record = record;
            entry.dirty = true;
            return Ok(());
        }

        self.file.check_address(address)?;
        self.install(address, record, true)?;
        Ok(())
    }

    /// Reserve a record in the file.
    pub fn allocate(&mut self) -> Result<Address, FileError> {
        self.file.allocate()
    }

    /// Release the record at `address`, discarding any cached copy.
    pub fn free(&mut self, address: Address) -> Result<(), FileError> {
        self.file.free(address)?;
        if let Some(id) = self.index.remove(address) {
            self.unlink(id);
            let _ = self.entries.release(id);
        }
        Ok(())
    }

    /// The file's header payload.
    #[must_use]
    pub const fn header(&self) -> &H {
        self.file.header()
    }

    /// Mutable access to the file's header payload.
    pub const fn header_mut(&mut self) -> &mut H {
        self.file.header_mut()
    }

    /// Drop every cached record and empty the file.
    pub fn reset(&mut self) -> Result<(), FileError> {
        self.index.clear();
        self.entries.clear();
        self.head = None;
        self.tail = None;
        self.file.reset()
    }

    /// Write back every dirty record and sync the file.
    pub fn flush(&mut self) -> Result<(), FileError> {
        self.write_back_all()?;
        self.file.sync()
    }

    /// Flush and close.
    pub fn close(mut self) -> Result<(), FileError> {
        self.closed = true;
        self.flush()?;
        tracing::debug!(
            "Closed {}: {} hits, {} misses, {} evictions, {} writebacks",
            self.file.path().display(),
            self.stats.hits,
            self.stats.misses,
            self.stats.evictions,
            self.stats.writebacks
        );
        Ok(())
    }

    /// Counters since open.
    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of records currently cached.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of cached records.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of record slots in the backing file, live or freed.
    #[must_use]
    pub const fn slot_count(&self) -> u64 {
        self.file.slot_count()
    }

    /// Find or load `address` and make it the most recently used entry.
    fn touch(&mut self, address: Address) -> Result<SlotId, FileError> {
        if let Some(id) = self.index.get(address) {
            self.stats.hits += 1;
            self.move_to_front(id);
            return Ok(id);
        }

        self.stats.misses += 1;
        let record = self.file.read(address)?;
        self.install(address, record, false)
    }

    fn install(&mut self, address: Address, record: T, dirty: bool) -> Result<SlotId, FileError> {
        if self.entries.len() == self.capacity {
            self.evict_tail()?;
        }

        let id = self.entries.acquire(Entry {
            address,
            record,
            dirty,
            prev: None,
            next: None,
        });
        self.push_front(id);
        let _ = self.index.insert(address, id);
        Ok(id)
    }

    fn evict_tail(&mut self) -> Result<(), FileError> {
        let Some(id) = self.tail else {
            return Ok(());
        };

        let entry = self.entries.get(id);
        if entry.dirty {
            self.file.write(entry.address, &entry.record)?;
            self.stats.writebacks += 1;
        }

        self.unlink(id);
        let entry = self.entries.release(id);
        let _ = self.index.remove(entry.address);
        self.stats.evictions += 1;
        Ok(())
    }

    fn write_back_all(&mut self) -> Result<(), FileError> {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let entry = self.entries.get(id);
            cursor = entry.next;
            if entry.dirty {
                self.file.write(entry.address, &entry.record)?;
                self.entries.get_mut(id).dirty = false;
                self.stats.writebacks += 1;
            }
        }
        Ok(())
    }

    fn push_front(&mut self, id: SlotId) {
        let old_head = self.head;
        {
            let entry = self.entries.get_mut(id);
            entry.prev = None;
            entry.next = old_head;
        }
        match old_head {
            Some(head) => self.entries.get_mut(head).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    fn unlink(&mut self, id: SlotId) {
        let (prev, next) = {
            let entry = self.entries.get(id);
            (entry.prev, entry.next)
        };
        match prev {
            Some(prev) => self.entries.get_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entries.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, id: SlotId) {
        if self.head != Some(id) {
            self.unlink(id);
            self.push_front(id);
        }
    }
}

impl<T: Record, H: Record + Default> Drop for RecordCache<T, H> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.write_back_all() {
            tracing::error!(
                "Failed to write back cache for {} on drop: {e}",
                self.file.path().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    type Cache = RecordCache<u64, u64>;

    fn allocate_n(cache: &mut Cache, n: usize) -> Vec<Address> {
        (0..n)
            .map(|_| cache.allocate().expect("allocate"))
            .collect()
    }

    #[test]
    fn test_write_then_read_hits() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 4).expect("open");
        let a = cache.allocate().expect("allocate");

        cache.write(a, 11).expect("write");
        assert_eq!(*cache.readonly(a).expect("read"), 11);
        *cache.readwrite(a).expect("readwrite") += 1;
        assert_eq!(*cache.readonly(a).expect("read"), 12);

        let stats = cache.stats();
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hits, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_write_overwrites_cached_entry() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 2).expect("open");
        let a = cache.allocate().expect("allocate");
        cache.write(a, 1).expect("write");
        cache.write(a, 2).expect("write");
        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.readonly(a).expect("read"), 2);
    }

    #[test]
    fn test_eviction_writes_back_dirty_tail() {
        let dir = tempdir().expect("create temp dir");
        let capacity = 300;
        let mut cache = Cache::open(&dir.path().join("c.db"), capacity).expect("open");
        let addresses = allocate_n(&mut cache, capacity + 50);

        for (i, &address) in addresses.iter().enumerate() {
            cache.write(address, i as u64 * 10).expect("write");
        }
        assert_eq!(cache.len(), capacity);
        assert_eq!(cache.stats().evictions, 50);
        assert_eq!(cache.stats().writebacks, 50);

        // The first address was evicted; reading goes back to the file
        assert_eq!(*cache.readonly(addresses[0]).expect("read"), 0);
        assert_eq!(cache.stats().misses, 1);
        for (i, &address) in addresses.iter().enumerate() {
            assert_eq!(*cache.readonly(address).expect("read"), i as u64 * 10);
        }
    }

    #[test]
    fn test_recently_used_entry_survives_eviction() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 2).expect("open");
        let [a, b, c] = [0; 3].map(|_| cache.allocate().expect("allocate"));
        cache.write(a, 1).expect("write");
        cache.write(b, 2).expect("write");

        // Touch a so that b becomes least recently used
        let _ = cache.readonly(a).expect("read");
        cache.write(c, 3).expect("write");

        let before = cache.stats().misses;
        let _ = cache.readonly(a).expect("read");
        assert_eq!(cache.stats().misses, before);
        let _ = cache.readonly(b).expect("read");
        assert_eq!(cache.stats().misses, before + 1);
    }

    #[test]
    fn test_free_discards_without_write_back() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 4).expect("open");
        let [a, b] = [0; 2].map(|_| cache.allocate().expect("allocate"));
        cache.write(a, 1).expect("write");
        cache.write(b, 2).expect("write");

        cache.free(a).expect("free");
        assert_eq!(cache.len(), 1);
        cache.flush().expect("flush");
        assert_eq!(cache.stats().writebacks, 1);

        // The freed record is handed out again
        assert_eq!(cache.allocate().expect("allocate"), a);
    }

    #[test]
    fn test_reopen_sees_dirty_writes() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("c.db");
        let addresses;
        {
            let mut cache = Cache::open(&path, 8).expect("open");
            addresses = allocate_n(&mut cache, 20);
            for (i, &address) in addresses.iter().enumerate() {
                cache.write(address, i as u64).expect("write");
            }
            *cache.header_mut() = 99;
            cache.close().expect("close");
        }
        {
            let mut cache = Cache::open(&path, 8).expect("reopen");
            assert_eq!(*cache.header(), 99);
            for (i, &address) in addresses.iter().enumerate() {
                assert_eq!(*cache.readonly(address).expect("read"), i as u64);
            }
            *cache.readwrite(addresses[3]).expect("readwrite") = 333;
            // Dropped without close: still written back
        }
        let mut cache = Cache::open(&path, 8).expect("reopen");
        assert_eq!(*cache.readonly(addresses[3]).expect("read"), 333);
    }

    #[test]
    fn test_write_to_unallocated_address_fails() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 4).expect("open");
        assert!(matches!(
            cache.write(4096, 1),
            Err(FileError::InvalidAddress { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reset() {
        let dir = tempdir().expect("create temp dir");
        let mut cache = Cache::open(&dir.path().join("c.db"), 4).expect("open");
        let a = cache.allocate().expect("allocate");
        cache.write(a, 1).expect("write");
        *cache.header_mut() = 4;

        cache.reset().expect("reset");
        assert!(cache.is_empty());
        assert_eq!(*cache.header(), 0);
        assert_eq!(cache.slot_count(), 0);
    }
}
