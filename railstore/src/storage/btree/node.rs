//! B+ tree node types and serialization.
//!
//! Every node occupies one record of the node file:
//!
//! ```text
//! node_type : 1 byte (1 = internal, 2 = leaf)
//! count     : 4 bytes (entries for a leaf, keys for an internal node)
//! parent    : 8 bytes (0 for the root)
//! next      : 8 bytes (next leaf in key order, 0 if none; 0 for internal)
//! body      : leaf entries, or internal keys followed by count + 1 children
//! ```
//!
//! The body is sized for the largest node either kind can hold, so both
//! kinds share one record size.

use crate::storage::file::{ADDRESS_SIZE, Address, NULL_ADDRESS};
use crate::storage::record::{PAGE_BUDGET, Record, RecordError};

/// Smallest usable degree. Keeps split and merge well defined for keys
/// too large to fit several per page.
pub const MIN_DEGREE: usize = 4;

const NODE_HEADER_SIZE: usize = 1 + 4 + 2 * ADDRESS_SIZE;

const INTERNAL_TAG: u8 = 1;
const LEAF_TAG: u8 = 2;

/// Degree of a tree whose separators encode to `separator_size` bytes.
///
/// A leaf splits when it reaches `degree` entries; an internal node splits
/// when it exceeds `degree` keys.
#[must_use]
pub const fn degree_for(separator_size: usize) -> usize {
    let degree = PAGE_BUDGET / (ADDRESS_SIZE + separator_size);
    if degree < MIN_DEGREE {
        MIN_DEGREE
    } else {
        degree
    }
}

/// A leaf node: entries in sorted order plus the link to the next leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<E> {
    pub parent: Address,
    pub next: Address,
    pub entries: Vec<E>,
}

/// An internal node with `keys.len() + 1` children.
///
/// `children[i]` holds separators `>= keys[i - 1]` and `< keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<S> {
    pub parent: Address,
    pub keys: Vec<S>,
    pub children: Vec<Address>,
}

/// A tree node with separators of type `S` and leaf entries of type `E`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<S, E> {
    Internal(InternalNode<S>),
    Leaf(LeafNode<E>),
}

impl<E> LeafNode<E> {
    #[must_use]
    pub const fn new(parent: Address, next: Address, entries: Vec<E>) -> Self {
        Self {
            parent,
            next,
            entries,
        }
    }
}

impl<S> InternalNode<S> {
    /// A new root with one separator and two children.
    #[must_use]
    pub fn root(left: Address, key: S, right: Address) -> Self {
        Self {
            parent: NULL_ADDRESS,
            keys: vec![key],
            children: vec![left, right],
        }
    }

    /// Position of `child` among this node's children.
    #[must_use]
    pub fn child_position(&self, child: Address) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }
}

impl<S: Record, E: Record> Node<S, E> {
    /// See [`degree_for`].
    pub const DEGREE: usize = degree_for(S::SIZE);

    /// Fewest entries (or keys) a non-root node may hold.
    pub const MIN_OCCUPANCY: usize = Self::DEGREE / 2;

    const LEAF_BODY: usize = Self::DEGREE * E::SIZE;
    const INTERNAL_KEYS: usize = Self::DEGREE * S::SIZE;
    const INTERNAL_BODY: usize = Self::INTERNAL_KEYS + (Self::DEGREE + 1) * ADDRESS_SIZE;

    /// Parent address (0 for the root).
    #[must_use]
    pub const fn parent(&self) -> Address {
        match self {
            Self::Internal(node) => node.parent,
            Self::Leaf(node) => node.parent,
        }
    }

    pub const fn set_parent(&mut self, parent: Address) {
        match self {
            Self::Internal(node) => node.parent = parent,
            Self::Leaf(node) => node.parent = parent,
        }
    }

    /// Entry count for a leaf, key count for an internal node.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Internal(node) => node.keys.len(),
            Self::Leaf(node) => node.entries.len(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

#[allow(clippy::cast_possible_truncation)] // counts are bounded by DEGREE
impl<S: Record, E: Record> Record for Node<S, E> {
    const SIZE: usize = NODE_HEADER_SIZE
        + if Self::LEAF_BODY > Self::INTERNAL_BODY {
            Self::LEAF_BODY
        } else {
            Self::INTERNAL_BODY
        };

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        let (tag, parent, next) = match self {
            Self::Internal(node) => (INTERNAL_TAG, node.parent, NULL_ADDRESS),
            Self::Leaf(node) => (LEAF_TAG, node.parent, node.next),
        };
        buf[0] = tag;
        (self.len() as u32).encode(&mut buf[1..5]);
        parent.encode(&mut buf[5..13]);
        next.encode(&mut buf[13..NODE_HEADER_SIZE]);

        let body = &mut buf[NODE_HEADER_SIZE..];
        match self {
            Self::Leaf(node) => {
                for (entry, chunk) in node.entries.iter().zip(body.chunks_exact_mut(E::SIZE)) {
                    entry.encode(chunk);
                }
            }
            Self::Internal(node) => {
                let (keys, children) = body.split_at_mut(Self::INTERNAL_KEYS);
                for (key, chunk) in node.keys.iter().zip(keys.chunks_exact_mut(S::SIZE)) {
                    key.encode(chunk);
                }
                for (child, chunk) in node
                    .children
                    .iter()
                    .zip(children.chunks_exact_mut(ADDRESS_SIZE))
                {
                    child.encode(chunk);
                }
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let tag = buf[0];
        let count = u32::decode(&buf[1..5])? as usize;
        let parent = u64::decode(&buf[5..13])?;
        let next = u64::decode(&buf[13..NODE_HEADER_SIZE])?;
        let body = &buf[NODE_HEADER_SIZE..];

        match tag {
            LEAF_TAG => {
                if count >= Self::DEGREE {
                    return Err(RecordError::LengthOutOfRange {
                        len: count,
                        max: Self::DEGREE - 1,
                    });
                }
                let entries = body
                    .chunks_exact(E::SIZE)
                    .take(count)
                    .map(E::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Leaf(LeafNode::new(parent, next, entries)))
            }
            INTERNAL_TAG => {
                if count > Self::DEGREE {
                    return Err(RecordError::LengthOutOfRange {
                        len: count,
                        max: Self::DEGREE,
                    });
                }
                let (keys, children) = body.split_at(Self::INTERNAL_KEYS);
                let keys = keys
                    .chunks_exact(S::SIZE)
                    .take(count)
                    .map(S::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                let children = children
                    .chunks_exact(ADDRESS_SIZE)
                    .take(count + 1)
                    .map(u64::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Internal(InternalNode {
                    parent,
                    keys,
                    children,
                }))
            }
            other => Err(RecordError::InvalidTag {
                type_name: "node",
                tag: other,
            }),
        }
    }
}
