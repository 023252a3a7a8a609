//! Value store: many small values packed into shared blocks.
//!
//! Each block is one record of a cached paged file and holds up to
//! [`Block::MAXSIZE`] values. A value's address is the byte offset of its
//! slot, so the owning block is recovered by rounding down to the block
//! stride. The file header holds the address of the open block, the one new
//! values are appended to.
//!
//! # Invariants
//!
//! - `live <= cursor <= MAXSIZE` for every block
//! - Slots `cursor..MAXSIZE` have never been handed out since the block was
//!   (re)opened, so a freed slot is not reused while its block is live
//! - A block whose live count reaches 0 is freed, unless it is the open
//!   block, which is rewound instead

use std::path::Path;

use crate::storage::cache::RecordCache;
use crate::storage::file::{Address, FileError, NULL_ADDRESS, PagedFile};
use crate::storage::record::{PAGE_BUDGET, Record, RecordError};

const BLOCK_HEADER_SIZE: usize = 8;

/// A block of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<V> {
    /// Number of handed-out slots not yet removed.
    live: u32,
    /// `values.len()` is the high-water slot cursor.
    values: Vec<V>,
}

impl<V: Record> Block<V> {
    /// Number of value slots per block.
    pub const MAXSIZE: usize = {
        let size = if V::SIZE == 0 { 1 } else { V::SIZE };
        let per_block = PAGE_BUDGET / size;
        if per_block == 0 { 1 } else { per_block }
    };

    fn single(value: V) -> Self {
        Self {
            live: 1,
            values: vec![value],
        }
    }
}

impl<V: Record> Record for Block<V> {
    const SIZE: usize = BLOCK_HEADER_SIZE + Self::MAXSIZE * V::SIZE;

    #[allow(clippy::cast_possible_truncation)] // cursor <= MAXSIZE <= PAGE_BUDGET
    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        self.live.encode(&mut buf[..4]);
        (self.values.len() as u32).encode(&mut buf[4..8]);
        for (value, chunk) in self
            .values
            .iter()
            .zip(buf[BLOCK_HEADER_SIZE..].chunks_exact_mut(V::SIZE))
        {
            value.encode(chunk);
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let live = u32::decode(&buf[..4])?;
        let cursor = u32::decode(&buf[4..8])? as usize;
        if cursor > Self::MAXSIZE {
            return Err(RecordError::LengthOutOfRange {
                len: cursor,
                max: Self::MAXSIZE,
            });
        }
        if live as usize > cursor {
            return Err(RecordError::LengthOutOfRange {
                len: live as usize,
                max: cursor,
            });
        }

        let values = buf[BLOCK_HEADER_SIZE..]
            .chunks_exact(V::SIZE)
            .take(cursor)
            .map(V::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { live, values })
    }
}

/// Store of `V` values addressed by [`Address`].
pub struct ValueStore<V: Record> {
    blocks: RecordCache<Block<V>, Address>,
}

impl<V: Record> ValueStore<V> {
    const DATA_START: Address = PagedFile::<Block<V>, Address>::DATA_START;
    const STRIDE: u64 = PagedFile::<Block<V>, Address>::STRIDE;
    #[allow(clippy::cast_possible_truncation)]
    const VALUE_SIZE: u64 = V::SIZE as u64;

    /// Open (or create) the store at `path` with a cache of
    /// `cache_capacity` blocks.
    ///
    /// # Panics
    /// Panics if `V` has an encoded size of 0 or capacity is 0.
    pub fn open(path: &Path, cache_capacity: usize) -> Result<Self, FileError> {
        assert!(V::SIZE > 0, "Stored values must have a non-zero size");
        Ok(Self {
            blocks: RecordCache::open(path, cache_capacity)?,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot_address(block: Address, index: usize) -> Address {
        block + BLOCK_HEADER_SIZE as u64 + index as u64 * Self::VALUE_SIZE
    }

    /// Split a value address into its block address and slot index.
    #[allow(clippy::cast_possible_truncation)]
    const fn locate(address: Address) -> Result<(Address, usize), FileError> {
        let first_slot = Self::DATA_START + BLOCK_HEADER_SIZE as u64;
        if address < first_slot {
            return Err(FileError::InvalidAddress {
                address,
                reason: "below the first value slot",
            });
        }
        let offset = (address - Self::DATA_START) % Self::STRIDE;
        let block = address - offset;
        let Some(within) = offset.checked_sub(BLOCK_HEADER_SIZE as u64) else {
            return Err(FileError::InvalidAddress {
                address,
                reason: "inside a block header",
            });
        };
        if within % Self::VALUE_SIZE != 0 {
            return Err(FileError::InvalidAddress {
                address,
                reason: "not aligned to a value slot",
            });
        }
        Ok((block, (within / Self::VALUE_SIZE) as usize))
    }

    /// Store `value` and return its address.
    pub fn insert(&mut self, value: V) -> Result<Address, FileError> {
        let open = *self.blocks.header();
        if open != NULL_ADDRESS {
            let block = self.blocks.readwrite(open)?;
            if block.values.len() < Block::<V>::MAXSIZE {
                let index = block.values.len();
                block.values.push(value);
                block.live += 1;
                return Ok(Self::slot_address(open, index));
            }
        }

        let address = self.blocks.allocate()?;
        self.blocks.write(address, Block::single(value))?;
        *self.blocks.header_mut() = address;
        Ok(Self::slot_address(address, 0))
    }

    /// Borrow the value at `address`.
    pub fn get(&mut self, address: Address) -> Result<&V, FileError> {
        let (block, index) = Self::locate(address)?;
        self.blocks
            .readonly(block)?
            .values
            .get(index)
            .ok_or(FileError::InvalidAddress {
                address,
                reason: "slot was never handed out",
            })
    }

    /// Mutably borrow the value at `address`.
    pub fn get_mut(&mut self, address: Address) -> Result<&mut V, FileError> {
        let (block, index) = Self::locate(address)?;
        self.blocks
            .readwrite(block)?
            .values
            .get_mut(index)
            .ok_or(FileError::InvalidAddress {
                address,
                reason: "slot was never handed out",
            })
    }

    /// Overwrite the value at `address`.
    pub fn write(&mut self, address: Address, value: V) -> Result<(), FileError> {
        *self.get_mut(address)? = value;
        Ok(())
    }

    /// Release the value at `address`.
    pub fn remove(&mut self, address: Address) -> Result<(), FileError> {
        let (block_address, index) = Self::locate(address)?;
        let is_open = *self.blocks.header() == block_address;

        let block = self.blocks.readwrite(block_address)?;
        if index >= block.values.len() || block.live == 0 {
            return Err(FileError::InvalidAddress {
                address,
                reason: "slot is not live",
            });
        }
        block.live -= 1;
        if block.live > 0 {
            return Ok(());
        }

        if is_open {
            block.values.clear();
            Ok(())
        } else {
            self.blocks.free(block_address)
        }
    }

    /// Remove every value.
    pub fn clear(&mut self) -> Result<(), FileError> {
        self.blocks.reset()
    }

    /// Write back cached blocks and sync the file.
    pub fn flush(&mut self) -> Result<(), FileError> {
        self.blocks.flush()
    }

    /// Flush and close.
    pub fn close(self) -> Result<(), FileError> {
        self.blocks.close()
    }

    /// Number of block slots in the backing file, live or freed.
    #[must_use]
    pub const fn block_count(&self) -> u64 {
        self.blocks.slot_count()
    }
}
