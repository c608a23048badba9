pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod merkle_tree;
pub mod note;
pub mod nullifier;
pub mod policy;
pub mod pool;
pub mod shared;
pub mod verifier;

// Re-export the main types for convenience
pub use config::{ConfigError, PoolConfig, PoolVariant};
pub use crypto::{FieldHasher, HashError, PoseidonHasher};
pub use error::PoolError;
pub use ledger::{AssetLedger, InMemoryLedger, LedgerError};
pub use merkle_tree::{IncrementalMerkleTree, MerklePath};
pub use note::{Note, ParsedNote};
pub use nullifier::NullifierRegistry;
pub use policy::{DepositPolicy, FixedDenomination, SharesWithFees, FEES_GROWTH_PRECISION};
pub use pool::{
    DepositEvent, PoolEvent, PoolSnapshot, ShieldedPool, WithdrawRequest, WithdrawalEvent,
};
pub use shared::{SharedLedger, SharedPool};
pub use verifier::{
    Proof, ProofVerifier, PublicInputs, ShareClaim, SignalSchema, TransparentVerifier,
    WithdrawWitness,
};
