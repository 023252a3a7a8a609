//! Disk-based B+ tree over a record cache.
//!
//! [`Tree`] holds the structural algorithm shared by the unique-key and the
//! multi-value trees. A [`Layout`] names the separator type that orders the
//! tree and the entry type stored in leaves.
//!
//! Nodes are read out of the cache, modified, and written back. Insert
//! propagation and underflow repair walk parent addresses in a loop; nothing
//! recurses on tree height.

use std::ops::ControlFlow;
use std::path::Path;

use crate::storage::btree::node::{InternalNode, LeafNode, Node};
use crate::storage::cache::{CacheStats, RecordCache};
use crate::storage::file::{Address, FileError, NULL_ADDRESS};
use crate::storage::record::Record;

/// Deepest tree a walk will follow before reporting a cycle.
const MAX_HEIGHT: usize = 64;

/// The types stored in a tree.
pub trait Layout {
    /// Orders the tree; internal nodes hold separators.
    type Sep: Record + Ord + Clone;
    /// Stored in leaves.
    type Entry: Record + Clone;

    /// The separator an entry is ordered by.
    fn separator(entry: &Self::Entry) -> &Self::Sep;
}

pub type TreeNode<L> = Node<<L as Layout>::Sep, <L as Layout>::Entry>;

/// A B+ tree stored in one paged file. The file header holds the root
/// address (0 when the tree is empty).
pub struct Tree<L: Layout> {
    pub(crate) nodes: RecordCache<TreeNode<L>, Address>,
}

/// Which sibling a rebalance step works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sibling {
    Left,
    Right,
}

impl<L: Layout> Tree<L> {
    /// See [`Node::DEGREE`].
    pub const DEGREE: usize = TreeNode::<L>::DEGREE;
    const MIN_OCCUPANCY: usize = TreeNode::<L>::MIN_OCCUPANCY;

    /// Open (or create) the tree stored at `path`.
    pub fn open(path: &Path, cache_capacity: usize) -> Result<Self, BTreeError> {
        Ok(Self {
            nodes: RecordCache::open(path, cache_capacity)?,
        })
    }

    /// Address of the root node (0 when empty).
    #[must_use]
    pub const fn root(&self) -> Address {
        *self.nodes.header()
    }

    const fn set_root(&mut self, root: Address) {
        *self.nodes.header_mut() = root;
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root() == NULL_ADDRESS
    }

    /// Descend from the root to a leaf.
    ///
    /// At each internal node, `goes_right(separator)` decides whether the
    /// target lies at or beyond that separator; the walk takes the child
    /// after the last separator for which it holds. Returns 0 for an empty
    /// tree.
    pub fn descend(&mut self, goes_right: impl Fn(&L::Sep) -> bool) -> Result<Address, BTreeError> {
        let mut address = self.root();
        if address == NULL_ADDRESS {
            return Ok(NULL_ADDRESS);
        }

        for _ in 0..MAX_HEIGHT {
            match self.nodes.readonly(address)? {
                Node::Leaf(_) => return Ok(address),
                Node::Internal(node) => {
                    let index = node.keys.partition_point(|key| goes_right(key));
                    address = *node.children.get(index).ok_or(BTreeError::Corrupt {
                        address,
                        reason: "internal node is missing a child",
                    })?;
                }
            }
        }
        Err(BTreeError::Corrupt {
            address,
            reason: "tree deeper than any valid tree",
        })
    }

    /// The leaf that owns `sep`.
    fn find_leaf(&mut self, sep: &L::Sep) -> Result<Address, BTreeError> {
        self.descend(|key| key <= sep)
    }

    fn leaf(&mut self, address: Address) -> Result<&LeafNode<L::Entry>, BTreeError> {
        match self.nodes.readonly(address)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(BTreeError::Corrupt {
                address,
                reason: "expected a leaf node",
            }),
        }
    }

    fn leaf_mut(&mut self, address: Address) -> Result<&mut LeafNode<L::Entry>, BTreeError> {
        match self.nodes.readwrite(address)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(BTreeError::Corrupt {
                address,
                reason: "expected a leaf node",
            }),
        }
    }

    fn internal_mut(&mut self, address: Address) -> Result<&mut InternalNode<L::Sep>, BTreeError> {
        match self.nodes.readwrite(address)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(BTreeError::Corrupt {
                address,
                reason: "expected an internal node",
            }),
        }
    }

    fn set_parent(&mut self, address: Address, parent: Address) -> Result<(), BTreeError> {
        self.nodes.readwrite(address)?.set_parent(parent);
        Ok(())
    }

    /// Index of the first entry whose separator is not less than `sep`.
    fn lower_bound(entries: &[L::Entry], sep: &L::Sep) -> usize {
        entries.partition_point(|entry| L::separator(entry) < sep)
    }

    /// The entry whose separator equals `sep`.
    pub fn get(&mut self, sep: &L::Sep) -> Result<Option<&L::Entry>, BTreeError> {
        let address = self.find_leaf(sep)?;
        if address == NULL_ADDRESS {
            return Ok(None);
        }
        let leaf = self.leaf(address)?;
        let index = Self::lower_bound(&leaf.entries, sep);
        Ok(leaf
            .entries
            .get(index)
            .filter(|entry| L::separator(entry) == sep))
    }

    /// Mutable access to the entry whose separator equals `sep`.
    ///
    /// Callers must not change the entry's separator.
    pub fn get_mut(&mut self, sep: &L::Sep) -> Result<Option<&mut L::Entry>, BTreeError> {
        let address = self.find_leaf(sep)?;
        if address == NULL_ADDRESS {
            return Ok(None);
        }
        let index = {
            let leaf = self.leaf(address)?;
            let index = Self::lower_bound(&leaf.entries, sep);
            match leaf.entries.get(index) {
                Some(entry) if L::separator(entry) == sep => index,
                _ => return Ok(None),
            }
        };
        Ok(self.leaf_mut(address)?.entries.get_mut(index))
    }

    /// Insert the entry `make` builds from `sep` unless `sep` is already
    /// present.
    ///
    /// `make` runs only when the insert will happen. Returns whether an
    /// entry was inserted.
    pub fn insert_with(
        &mut self,
        sep: L::Sep,
        make: impl FnOnce(L::Sep) -> Result<L::Entry, BTreeError>,
    ) -> Result<bool, BTreeError> {
        let address = self.find_leaf(&sep)?;
        if address == NULL_ADDRESS {
            let entry = make(sep)?;
            let root = self.nodes.allocate()?;
            self.nodes.write(
                root,
                Node::Leaf(LeafNode::new(NULL_ADDRESS, NULL_ADDRESS, vec![entry])),
            )?;
            self.set_root(root);
            tracing::trace!("Created root leaf {root}");
            return Ok(true);
        }

        let index = {
            let leaf = self.leaf(address)?;
            let index = Self::lower_bound(&leaf.entries, &sep);
            if leaf
                .entries
                .get(index)
                .is_some_and(|entry| *L::separator(entry) == sep)
            {
                return Ok(false);
            }
            index
        };

        let entry = make(sep)?;
        let leaf = self.leaf_mut(address)?;
        leaf.entries.insert(index, entry);
        if leaf.entries.len() < Self::DEGREE {
            return Ok(true);
        }

        self.split_leaf(address)?;
        Ok(true)
    }

    /// Split a full leaf and push the new separator upward.
    fn split_leaf(&mut self, address: Address) -> Result<(), BTreeError> {
        let (parent, next, moved) = {
            let leaf = self.leaf_mut(address)?;
            let moved = leaf.entries.split_off(Self::DEGREE / 2);
            (leaf.parent, leaf.next, moved)
        };
        let separator = L::separator(&moved[0]).clone();

        let right = self.nodes.allocate()?;
        self.nodes
            .write(right, Node::Leaf(LeafNode::new(parent, next, moved)))?;
        self.leaf_mut(address)?.next = right;

        self.insert_into_parent(address, separator, right, parent)
    }

    /// Add `separator` and its `right` child next to `left` in `parent`,
    /// splitting ancestors as needed.
    fn insert_into_parent(
        &mut self,
        mut left: Address,
        mut separator: L::Sep,
        mut right: Address,
        mut parent: Address,
    ) -> Result<(), BTreeError> {
        loop {
            if parent == NULL_ADDRESS {
                let root = self.nodes.allocate()?;
                self.nodes
                    .write(root, Node::Internal(InternalNode::root(left, separator, right)))?;
                self.set_parent(left, root)?;
                self.set_parent(right, root)?;
                self.set_root(root);
                tracing::trace!("Tree grew a new root {root}");
                return Ok(());
            }

            let node = self.internal_mut(parent)?;
            let position = node.child_position(left).ok_or(BTreeError::Corrupt {
                address: parent,
                reason: "parent does not list its child",
            })?;
            node.keys.insert(position, separator);
            node.children.insert(position + 1, right);
            if node.keys.len() <= Self::DEGREE {
                return Ok(());
            }

            // The median moves up instead of staying in either half.
            let carry = Self::DEGREE / 2;
            let mut moved_keys = node.keys.split_off(carry);
            let moved_children = node.children.split_off(carry + 1);
            let median = moved_keys.remove(0);
            let grandparent = node.parent;

            let sibling = self.nodes.allocate()?;
            for &child in &moved_children {
                self.set_parent(child, sibling)?;
            }
            self.nodes.write(
                sibling,
                Node::Internal(InternalNode {
                    parent: grandparent,
                    keys: moved_keys,
                    children: moved_children,
                }),
            )?;

            left = parent;
            separator = median;
            right = sibling;
            parent = grandparent;
        }
    }

    /// Remove and return the entry whose separator equals `sep`.
    pub fn remove_entry(&mut self, sep: &L::Sep) -> Result<Option<L::Entry>, BTreeError> {
        let address = self.find_leaf(sep)?;
        if address == NULL_ADDRESS {
            return Ok(None);
        }

        let index = {
            let leaf = self.leaf(address)?;
            let index = Self::lower_bound(&leaf.entries, sep);
            match leaf.entries.get(index) {
                Some(entry) if L::separator(entry) == sep => index,
                _ => return Ok(None),
            }
        };

        let leaf = self.leaf_mut(address)?;
        let removed = leaf.entries.remove(index);
        if leaf.entries.len() < Self::MIN_OCCUPANCY {
            self.rebalance(address)?;
        }
        Ok(Some(removed))
    }

    /// Repair underflow at `address` and upward.
    fn rebalance(&mut self, mut address: Address) -> Result<(), BTreeError> {
        for _ in 0..MAX_HEIGHT {
            let (parent, len) = {
                let node = self.nodes.readonly(address)?;
                (node.parent(), node.len())
            };

            if address == self.root() {
                return self.shrink_root(address);
            }
            if len >= Self::MIN_OCCUPANCY {
                return Ok(());
            }

            let siblings = {
                let Node::Internal(parent_node) = self.nodes.readonly(parent)? else {
                    return Err(BTreeError::Corrupt {
                        address: parent,
                        reason: "expected an internal node",
                    });
                };
                let position = parent_node.child_position(address).ok_or(BTreeError::Corrupt {
                    address: parent,
                    reason: "parent does not list its child",
                })?;
                let left = position
                    .checked_sub(1)
                    .map(|i| (i, parent_node.children[i]));
                let right = parent_node
                    .children
                    .get(position + 1)
                    .map(|&child| (position, child));
                (left, right)
            };
            let (left, right) = siblings;

            if let Some((key_index, sibling)) = right
                && self.nodes.readonly(sibling)?.len() > Self::MIN_OCCUPANCY
            {
                return self.borrow(Sibling::Right, address, sibling, parent, key_index);
            }
            if let Some((key_index, sibling)) = left
                && self.nodes.readonly(sibling)?.len() > Self::MIN_OCCUPANCY
            {
                return self.borrow(Sibling::Left, address, sibling, parent, key_index);
            }

            match (right, left) {
                (Some((key_index, sibling)), _) => self.merge(address, sibling, parent, key_index)?,
                (None, Some((key_index, sibling))) => {
                    self.merge(sibling, address, parent, key_index)?;
                }
                (None, None) => {
                    return Err(BTreeError::Corrupt {
                        address: parent,
                        reason: "non-root node has no siblings",
                    });
                }
            }
            address = parent;
        }
        Err(BTreeError::Corrupt {
            address,
            reason: "tree deeper than any valid tree",
        })
    }

    /// Collapse an empty leaf root, or promote the only child of an internal
    /// root with no separators.
    fn shrink_root(&mut self, root: Address) -> Result<(), BTreeError> {
        let promoted = match self.nodes.readonly(root)? {
            Node::Leaf(leaf) if leaf.entries.is_empty() => NULL_ADDRESS,
            Node::Internal(node) if node.keys.is_empty() => {
                *node.children.first().ok_or(BTreeError::Corrupt {
                    address: root,
                    reason: "internal node is missing a child",
                })?
            }
            _ => return Ok(()),
        };

        if promoted != NULL_ADDRESS {
            self.set_parent(promoted, NULL_ADDRESS)?;
        }
        self.nodes.free(root)?;
        self.set_root(promoted);
        tracing::trace!("Tree root {root} collapsed into {promoted}");
        Ok(())
    }

    /// Move one entry (or key) from `sibling` into the underfull `node`.
    /// `key_index` is the parent separator between the two.
    fn borrow(
        &mut self,
        from: Sibling,
        node: Address,
        sibling: Address,
        parent: Address,
        key_index: usize,
    ) -> Result<(), BTreeError> {
        let mut target = self.nodes.readonly(node)?.clone();
        let mut source = self.nodes.readonly(sibling)?.clone();
        let mut parent_node = match self.nodes.readonly(parent)? {
            Node::Internal(internal) => internal.clone(),
            Node::Leaf(_) => {
                return Err(BTreeError::Corrupt {
                    address: parent,
                    reason: "expected an internal node",
                });
            }
        };

        let mut moved_child = None;
        match (&mut target, &mut source, from) {
            (Node::Leaf(target), Node::Leaf(source), Sibling::Right) => {
                target.entries.push(source.entries.remove(0));
                parent_node.keys[key_index] = L::separator(&source.entries[0]).clone();
            }
            (Node::Leaf(target), Node::Leaf(source), Sibling::Left) => {
                let entry = source.entries.pop().ok_or(BTreeError::Corrupt {
                    address: sibling,
                    reason: "sibling leaf is empty",
                })?;
                parent_node.keys[key_index] = L::separator(&entry).clone();
                target.entries.insert(0, entry);
            }
            (Node::Internal(target), Node::Internal(source), Sibling::Right) => {
                let separator = source.keys.remove(0);
                let key = std::mem::replace(&mut parent_node.keys[key_index], separator);
                target.keys.push(key);
                let child = source.children.remove(0);
                target.children.push(child);
                moved_child = Some(child);
            }
            (Node::Internal(target), Node::Internal(source), Sibling::Left) => {
                let (Some(key), Some(child)) = (source.keys.pop(), source.children.pop()) else {
                    return Err(BTreeError::Corrupt {
                        address: sibling,
                        reason: "sibling internal node is empty",
                    });
                };
                let key = std::mem::replace(&mut parent_node.keys[key_index], key);
                target.keys.insert(0, key);
                target.children.insert(0, child);
                moved_child = Some(child);
            }
            _ => {
                return Err(BTreeError::Corrupt {
                    address: parent,
                    reason: "siblings are at different levels",
                });
            }
        }

        self.nodes.write(node, target)?;
        self.nodes.write(sibling, source)?;
        self.nodes.write(parent, Node::Internal(parent_node))?;
        if let Some(child) = moved_child {
            self.set_parent(child, node)?;
        }
        Ok(())
    }

    /// Fold `right` into `left` and drop separator `key_index` from the
    /// parent.
    fn merge(
        &mut self,
        left: Address,
        right: Address,
        parent: Address,
        key_index: usize,
    ) -> Result<(), BTreeError> {
        let right_node = self.nodes.readonly(right)?.clone();
        let separator = {
            let parent_node = self.internal_mut(parent)?;
            if key_index >= parent_node.keys.len() {
                return Err(BTreeError::Corrupt {
                    address: parent,
                    reason: "separator index out of range",
                });
            }
            parent_node.children.remove(key_index + 1);
            parent_node.keys.remove(key_index)
        };

        match right_node {
            Node::Leaf(right_leaf) => {
                let left_leaf = self.leaf_mut(left)?;
                left_leaf.entries.extend(right_leaf.entries);
                left_leaf.next = right_leaf.next;
            }
            Node::Internal(right_internal) => {
                for &child in &right_internal.children {
                    self.set_parent(child, left)?;
                }
                let left_internal = self.internal_mut(left)?;
                left_internal.keys.push(separator);
                left_internal.keys.extend(right_internal.keys);
                left_internal.children.extend(right_internal.children);
            }
        }

        self.nodes.free(right)?;
        Ok(())
    }

    /// Visit entries in order, starting at the first entry of the leaf
    /// `descend(goes_right)` reaches, until `visit` breaks or the entries
    /// run out.
    pub fn scan(
        &mut self,
        goes_right: impl Fn(&L::Sep) -> bool,
        mut visit: impl FnMut(&L::Entry) -> ControlFlow<()>,
    ) -> Result<(), BTreeError> {
        let mut address = self.descend(goes_right)?;
        while address != NULL_ADDRESS {
            let leaf = self.leaf(address)?;
            for entry in &leaf.entries {
                if visit(entry).is_break() {
                    return Ok(());
                }
            }
            address = leaf.next;
        }
        Ok(())
    }

    /// Number of entries, counted along the leaf chain.
    pub fn len(&mut self) -> Result<usize, BTreeError> {
        let mut count = 0;
        self.scan(
            |_| false,
            |_| {
                count += 1;
                ControlFlow::Continue(())
            },
        )?;
        Ok(count)
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> Result<(), BTreeError> {
        self.nodes.reset()?;
        Ok(())
    }

    /// Write back cached nodes and sync the file.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        self.nodes.flush()?;
        Ok(())
    }

    /// Flush and close.
    pub fn close(self) -> Result<(), BTreeError> {
        self.nodes.close()?;
        Ok(())
    }

    /// Counters of the node cache.
    #[must_use]
    pub const fn cache_stats(&self) -> CacheStats {
        self.nodes.stats()
    }

    /// Number of node slots in the file, live or freed.
    #[must_use]
    pub const fn node_slots(&self) -> u64 {
        self.nodes.slot_count()
    }
}

/// Errors that can occur during B+ tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// File I/O or record error.
    File(FileError),
    /// The on-disk structure is inconsistent.
    Corrupt {
        address: Address,
        reason: &'static str,
    },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Corrupt { address, reason } => {
                write!(f, "corrupt tree at node {address}: {reason}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<FileError> for BTreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}
