//! Fixed-capacity slab allocator.
//!
//! The slab hands out slots from a block reserved up front. A released slot
//! stores the index of the next free slot, so the free list lives inside the
//! slots themselves and costs no extra memory.
//!
//! # Design
//!
//! - `acquire`: pop the free list if non-empty, else bump the cursor
//! - `release`: push the slot onto the free list
//! - Both are O(1)
//!
//! # Invariants
//!
//! - `slots.len() <= capacity` (the bump cursor is `slots.len()`)
//! - `len` == number of occupied slots
//! - A `SlotId` held by a caller refers to an occupied slot until released

/// Handle to an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// Index of the slot inside the slab.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum Slot<T> {
    Occupied(T),
    /// Free slot; holds the next free slot index (`None` ends the list).
    Vacant { next_free: Option<u32> },
}

/// A pool of `capacity` slots of `T`.
///
/// # Pre-conditions
/// - `capacity` must be > 0 and fit in a `u32`
pub struct SlabAllocator<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    capacity: usize,
    len: usize,
}

impl<T> SlabAllocator<T> {
    /// Create a slab that can hold `capacity` live values.
    ///
    /// # Panics
    /// Panics if capacity is 0 or does not fit in a `u32`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Slab capacity must be positive");
        assert!(
            u32::try_from(capacity).is_ok(),
            "Slab capacity must fit in u32"
        );

        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            capacity,
            len: 0,
        }
    }

    /// Store `value` in a free slot and return its handle.
    ///
    /// # Panics
    /// Panics if every slot is occupied. Callers size the slab to the
    /// maximum number of values they will ever hold at once.
    #[allow(clippy::cast_possible_truncation)] // capacity fits in u32 (checked in new)
    pub fn acquire(&mut self, value: T) -> SlotId {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant { next_free } = *slot else {
                panic!("Slab free list points at occupied slot #{index}");
            };
            self.free_head = next_free;
            *slot = Slot::Occupied(value);
            self.len += 1;
            return SlotId(index);
        }

        assert!(
            self.slots.len() < self.capacity,
            "Slab exhausted: all {} slots are occupied",
            self.capacity
        );
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied(value));
        self.len += 1;
        SlotId(index)
    }

    /// Free the slot behind `id` and return the value it held.
    ///
    /// # Panics
    /// Panics if the slot is already free.
    pub fn release(&mut self, id: SlotId) -> T {
        let slot = std::mem::replace(
            &mut self.slots[id.index()],
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        match slot {
            Slot::Occupied(value) => {
                self.free_head = Some(id.0);
                self.len -= 1;
                value
            }
            Slot::Vacant { next_free } => {
                // Undo the replace before reporting the double release.
                self.slots[id.index()] = Slot::Vacant { next_free };
                panic!("Slab slot {id} released twice");
            }
        }
    }

    /// Borrow the value behind `id`.
    ///
    /// # Panics
    /// Panics if the slot is free.
    #[must_use]
    pub fn get(&self, id: SlotId) -> &T {
        match &self.slots[id.index()] {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("Slab slot {id} is vacant"),
        }
    }

    /// Mutably borrow the value behind `id`.
    ///
    /// # Panics
    /// Panics if the slot is free.
    pub fn get_mut(&mut self, id: SlotId) -> &mut T {
        match &mut self.slots[id.index()] {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("Slab slot {id} is vacant"),
        }
    }

    /// Drop every value and rewind the cursor.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.len = 0;
    }

    /// Number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of occupied slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
