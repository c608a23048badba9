//! Nullifier registry.
//!
//! A nullifier hash is published exactly once, when its note is withdrawn.
//! Presence in the registry means the note is spent.
//!
//! Only membership matters, so the registry is a plain hash set and gives no
//! ordering guarantee. Marking an already present hash fails instead of
//! overwriting it, which is what turns a replayed withdrawal into
//! [`PoolError::AlreadySpent`].

use std::collections::HashSet;

use ark_bn254::Fr;

use crate::error::PoolError;

/// Set of spent nullifier hashes.
#[derive(Clone, Debug, Default)]
pub struct NullifierRegistry {
    spent: HashSet<Fr>,
}

impl NullifierRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            spent: HashSet::new(),
        }
    }

    /// Returns `true` if the nullifier hash has already been spent.
    pub fn is_spent(&self, nullifier_hash: &Fr) -> bool {
        self.spent.contains(nullifier_hash)
    }

    /// Mark a nullifier hash as spent.
    ///
    /// Check and insert happen under the same `&mut` borrow, so no other
    /// caller can observe the hash as unspent in between.
    pub fn mark_spent(&mut self, nullifier_hash: Fr) -> Result<(), PoolError> {
        if !self.spent.insert(nullifier_hash) {
            return Err(PoolError::AlreadySpent);
        }
        Ok(())
    }

    /// Undo a mark made earlier in the same failed operation.
    pub(crate) fn revert(&mut self, nullifier_hash: &Fr) {
        self.spent.remove(nullifier_hash);
    }

    /// Number of spent nullifiers tracked.
    pub fn len(&self) -> usize {
        self.spent.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    /// Spent hashes in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Fr> + '_ {
        self.spent.iter()
    }
}

impl FromIterator<Fr> for NullifierRegistry {
    fn from_iter<I: IntoIterator<Item = Fr>>(iter: I) -> Self {
        Self {
            spent: iter.into_iter().collect(),
        }
    }
}
