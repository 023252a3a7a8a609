//! Structural checks for tests.
//!
//! Walks a whole tree and verifies:
//! - separators strictly increase within each node and entries respect the
//!   separator bounds inherited from ancestors
//! - every non-root node holds at least `DEGREE / 2` entries or keys, and no
//!   node holds more than it may
//! - each internal node has one more child than keys
//! - parent links point at the node that lists the child
//! - all leaves sit at the same depth
//! - the leaf chain visits the leaves in key order and ends with 0

use crate::storage::btree::node::Node;
use crate::storage::btree::tree::{Layout, Tree};
use crate::storage::file::{Address, NULL_ADDRESS};

struct Frame<S> {
    address: Address,
    parent: Address,
    depth: usize,
    /// Inclusive lower bound.
    low: Option<S>,
    /// Exclusive upper bound.
    high: Option<S>,
}

/// Check every invariant and return the number of entries.
#[allow(clippy::too_many_lines)] // one walk checks every node kind
pub fn check_tree<L: Layout>(tree: &mut Tree<L>) -> Result<usize, String> {
    let degree = Tree::<L>::DEGREE;
    let min = degree / 2;
    let root = tree.root();
    if root == NULL_ADDRESS {
        return Ok(0);
    }

    let mut leaves = Vec::new();
    let mut leaf_depth = None;
    let mut count = 0;
    let mut stack = vec![Frame::<L::Sep> {
        address: root,
        parent: NULL_ADDRESS,
        depth: 0,
        low: None,
        high: None,
    }];

    while let Some(frame) = stack.pop() {
        let address = frame.address;
        let node = tree
            .nodes
            .readonly(address)
            .map_err(|e| format!("node {address}: {e}"))?
            .clone();

        if node.parent() != frame.parent {
            return Err(format!(
                "node {address}: parent is {}, expected {}",
                node.parent(),
                frame.parent
            ));
        }
        if address != root && node.len() < min {
            return Err(format!(
                "node {address}: {} entries, below minimum {min}",
                node.len()
            ));
        }

        let in_bounds = |sep: &L::Sep| {
            frame.low.as_ref().is_none_or(|low| sep >= low)
                && frame.high.as_ref().is_none_or(|high| sep < high)
        };

        match node {
            Node::Leaf(leaf) => {
                if leaf.entries.is_empty() {
                    return Err(format!("node {address}: empty leaf"));
                }
                if leaf.entries.len() >= degree {
                    return Err(format!("node {address}: overfull leaf"));
                }
                let separators: Vec<&L::Sep> = leaf.entries.iter().map(L::separator).collect();
                if separators.windows(2).any(|pair| pair[0] >= pair[1]) {
                    return Err(format!("node {address}: leaf entries out of order"));
                }
                if !separators.iter().all(|&sep| in_bounds(sep)) {
                    return Err(format!("node {address}: leaf entry outside parent bounds"));
                }
                match leaf_depth {
                    None => leaf_depth = Some(frame.depth),
                    Some(depth) if depth != frame.depth => {
                        return Err(format!(
                            "node {address}: leaf at depth {}, expected {depth}",
                            frame.depth
                        ));
                    }
                    Some(_) => {}
                }
                count += leaf.entries.len();
                leaves.push((address, leaf.next));
            }
            Node::Internal(internal) => {
                if internal.keys.is_empty() || internal.keys.len() > degree {
                    return Err(format!(
                        "node {address}: {} keys in internal node",
                        internal.keys.len()
                    ));
                }
                if internal.children.len() != internal.keys.len() + 1 {
                    return Err(format!("node {address}: child count does not match keys"));
                }
                if internal.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                    return Err(format!("node {address}: keys out of order"));
                }
                if !internal.keys.iter().all(|key| in_bounds(key)) {
                    return Err(format!("node {address}: key outside parent bounds"));
                }

                // Pushed in reverse so leaves are visited left to right.
                for (i, &child) in internal.children.iter().enumerate().rev() {
                    let low = if i == 0 {
                        frame.low.clone()
                    } else {
                        Some(internal.keys[i - 1].clone())
                    };
                    let high = internal
                        .keys
                        .get(i)
                        .cloned()
                        .or_else(|| frame.high.clone());
                    stack.push(Frame {
                        address: child,
                        parent: address,
                        depth: frame.depth + 1,
                        low,
                        high,
                    });
                }
            }
        }
    }

    for (i, &(address, next)) in leaves.iter().enumerate() {
        let expected = leaves.get(i + 1).map_or(NULL_ADDRESS, |&(a, _)| a);
        if next != expected {
            return Err(format!(
                "leaf {address}: next is {next}, expected {expected}"
            ));
        }
    }
    Ok(count)
}
