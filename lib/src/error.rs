//! Error taxonomy for the shielded pool.
//!
//! Every variant is terminal for the operation that produced it. Nothing is
//! retried inside the crate; callers decide on retry policy (for example,
//! fetching a fresher root after [`PoolError::UnknownRoot`]).

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::HashError;
use crate::ledger::LedgerError;

/// Errors produced by the tree, the nullifier registry and the pool state machine.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Deposit or withdrawal amount rejected by the deposit policy.
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    /// The asset ledger refused a transfer.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] LedgerError),

    /// All `2^levels` leaf slots are occupied.
    #[error("merkle tree is full ({capacity} leaves)")]
    TreeFull {
        /// Number of leaf slots in the tree.
        capacity: u64,
    },

    /// Requested leaf index has not been inserted yet.
    #[error("leaf index {index} out of range ({len} leaves inserted)")]
    IndexOutOfRange {
        /// Requested index.
        index: u64,
        /// Number of inserted leaves.
        len: u64,
    },

    /// Withdrawal root is not among the recent roots.
    #[error("cannot find your merkle root")]
    UnknownRoot,

    /// Nullifier hash has already been spent.
    #[error("the note has been already spent")]
    AlreadySpent,

    /// Relayer fee or refund exceeds what the withdrawal pays out.
    #[error("invalid fee: {0}")]
    InvalidFee(&'static str),

    /// The verifier rejected the proof or faulted.
    #[error("invalid withdraw proof")]
    InvalidProof,

    /// Commitment is not usable as a leaf.
    #[error("invalid commitment: {0}")]
    InvalidCommitment(&'static str),

    /// Commitment has already been deposited.
    #[error("the commitment has been submitted")]
    DuplicateCommitment,

    /// Snapshot contents are inconsistent with the rebuilt tree.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(&'static str),

    /// Hash adapter failure.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Invalid pool configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
