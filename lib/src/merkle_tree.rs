//! Incremental Merkle tree of deposit commitments
//!
//! Append-only, fixed-depth binary tree. Unfilled positions hold the
//! precomputed empty-subtree value for their depth, so an insert only
//! recomputes the `levels` nodes between the new leaf and the root.
//!
//! The tree also remembers the last `K` roots. Withdrawals are proven against
//! whatever root the prover last saw, which may already be a few deposits old
//! by the time the pool processes them.

use std::collections::VecDeque;

use ark_bn254::Fr;
use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::crypto::{field_serde, zero_leaf, FieldHasher, HashError};
use crate::error::PoolError;

/// Maximum supported depth; leaf indices fit in a `u32`.
pub const MAX_LEVELS: usize = 32;

/// Membership proof for one leaf.
///
/// `directions[d] == 0` means the running node is the left child at depth `d`
/// and `siblings[d]` is its right sibling; `1` means the reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    #[serde(with = "field_serde::seq")]
    pub siblings: Vec<Fr>,
    pub directions: Vec<u8>,
}

impl MerklePath {
    /// One sibling and one direction bit per level, nothing else.
    ///
    /// A shorter path would let an interior node pass for a leaf.
    pub fn spans(&self, levels: usize) -> bool {
        self.siblings.len() == levels
            && self.directions.len() == levels
            && self.directions.iter().all(|bit| *bit <= 1)
    }

    /// Hash `leaf` bottom-up along the path.
    pub fn compute_root<H: FieldHasher>(&self, hasher: &H, leaf: Fr) -> Result<Fr, HashError> {
        let mut node = leaf;
        for (sibling, direction) in self.siblings.iter().zip(&self.directions) {
            node = if *direction == 0 {
                hasher.hash_pair(node, *sibling)?
            } else {
                hasher.hash_pair(*sibling, node)?
            };
        }
        Ok(node)
    }

    /// Leaf index encoded by the direction bits.
    pub fn leaf_index(&self) -> u64 {
        self.directions
            .iter()
            .enumerate()
            .fold(0u64, |acc, (depth, bit)| acc | (u64::from(*bit & 1) << depth))
    }
}

/// Bounded window of recent roots, oldest first.
#[derive(Debug, Clone)]
struct RootHistory {
    capacity: usize,
    roots: VecDeque<Fr>,
}

impl RootHistory {
    fn new(capacity: usize, initial: Fr) -> Self {
        let mut roots = VecDeque::with_capacity(capacity);
        roots.push_back(initial);
        Self { capacity, roots }
    }

    fn push(&mut self, root: Fr) {
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    fn contains(&self, root: &Fr) -> bool {
        // zero is never a valid root
        !root.is_zero() && self.roots.iter().any(|known| known == root)
    }
}

/// Fixed-depth append-only Merkle tree with root history.
#[derive(Debug, Clone)]
pub struct IncrementalMerkleTree<H> {
    hasher: H,
    levels: usize,
    /// `zeros[d]` is the root of an empty subtree of height `d`.
    zeros: Vec<Fr>,
    /// `layers[0]` holds the leaves, `layers[levels]` the root once non-empty.
    layers: Vec<Vec<Fr>>,
    history: RootHistory,
}

impl<H: FieldHasher> IncrementalMerkleTree<H> {
    /// Create an empty tree of depth `levels` remembering `root_history_size` roots.
    pub fn new(hasher: H, levels: usize, root_history_size: usize) -> Result<Self, PoolError> {
        if levels == 0 || levels > MAX_LEVELS {
            return Err(ConfigError::Levels(levels).into());
        }
        if root_history_size == 0 {
            return Err(ConfigError::RootHistory.into());
        }

        let mut zeros = Vec::with_capacity(levels + 1);
        zeros.push(zero_leaf());
        for depth in 0..levels {
            let below = zeros[depth];
            zeros.push(hasher.hash_pair(below, below)?);
        }

        let empty_root = zeros[levels];
        Ok(Self {
            hasher,
            levels,
            zeros,
            layers: vec![Vec::new(); levels + 1],
            history: RootHistory::new(root_history_size, empty_root),
        })
    }

    /// Rebuild a tree by inserting `leaves` in order.
    pub fn from_leaves(
        hasher: H,
        levels: usize,
        root_history_size: usize,
        leaves: &[Fr],
    ) -> Result<Self, PoolError> {
        let mut tree = Self::new(hasher, levels, root_history_size)?;
        for leaf in leaves {
            tree.insert(*leaf)?;
        }
        Ok(tree)
    }

    /// Depth of the tree.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Number of leaf slots, `2^levels`.
    pub fn capacity(&self) -> u64 {
        1u64 << self.levels
    }

    /// Number of inserted leaves.
    pub fn len(&self) -> u64 {
        self.layers[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Number of roots remembered.
    pub fn root_history_size(&self) -> usize {
        self.history.capacity
    }

    /// Leaves in insertion order.
    pub fn leaves(&self) -> &[Fr] {
        &self.layers[0]
    }

    /// Empty-subtree value at height `depth`.
    pub fn zero_at(&self, depth: usize) -> Option<Fr> {
        self.zeros.get(depth).copied()
    }

    /// Current root.
    pub fn root(&self) -> Fr {
        self.layers[self.levels]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.levels])
    }

    /// Recent roots, oldest first. The last entry is [`Self::root`].
    pub fn roots(&self) -> impl Iterator<Item = &Fr> + '_ {
        self.history.roots.iter()
    }

    /// Whether `root` is one of the last `K` roots.
    pub fn is_known_root(&self, root: &Fr) -> bool {
        self.history.contains(root)
    }

    fn node(&self, depth: usize, index: usize) -> Fr {
        self.layers[depth]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[depth])
    }

    /// Append a leaf and return its index.
    ///
    /// The new path is hashed before anything is written, so a failure leaves
    /// the tree untouched.
    pub fn insert(&mut self, leaf: Fr) -> Result<u64, PoolError> {
        if self.is_full() {
            return Err(PoolError::TreeFull {
                capacity: self.capacity(),
            });
        }

        let index = self.layers[0].len();
        let mut path = Vec::with_capacity(self.levels + 1);
        path.push(leaf);

        let mut current = leaf;
        let mut position = index;
        for depth in 0..self.levels {
            current = if position % 2 == 0 {
                self.hasher.hash_pair(current, self.zeros[depth])?
            } else {
                self.hasher
                    .hash_pair(self.node(depth, position - 1), current)?
            };
            position /= 2;
            path.push(current);
        }

        let mut position = index;
        for (depth, node) in path.into_iter().enumerate() {
            let layer = &mut self.layers[depth];
            if position == layer.len() {
                layer.push(node);
            } else {
                layer[position] = node;
            }
            position /= 2;
        }

        let root = self.root();
        self.history.push(root);
        debug!(index, levels = self.levels, "inserted merkle leaf");

        Ok(index as u64)
    }

    /// Merkle path for the leaf at `index`.
    pub fn path(&self, index: u64) -> Result<MerklePath, PoolError> {
        if index >= self.len() {
            return Err(PoolError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.levels);
        let mut directions = Vec::with_capacity(self.levels);
        let mut position = index as usize;
        for depth in 0..self.levels {
            siblings.push(self.node(depth, position ^ 1));
            directions.push((position & 1) as u8);
            position >>= 1;
        }

        Ok(MerklePath {
            siblings,
            directions,
        })
    }
}
