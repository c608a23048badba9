//! Shielded pool state machine.
//!
//! Deposits pull assets into pool custody and append a leaf to the commitment
//! tree. Withdrawals check a proof against a recent root, burn the nullifier
//! hash and pay the recipient, relayer and caller. A failed operation leaves
//! the tree, the registry, the fee counters and all balances as they were,
//! with one exception: if a payout fails halfway and the legs already paid
//! cannot be pulled back, the nullifier stays spent.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, U256};
use ark_bn254::Fr;
use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::crypto::{field_serde, field_to_hex, FieldHasher};
use crate::error::PoolError;
use crate::ledger::{AssetLedger, LedgerError};
use crate::merkle_tree::{IncrementalMerkleTree, MerklePath};
use crate::nullifier::NullifierRegistry;
use crate::policy::{DepositPolicy, FeeAccounting, Settlement, SharesWithFees};
use crate::verifier::{Proof, ProofVerifier, PublicInputs};

/// Emitted for every accepted deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Leaf inserted into the tree.
    #[serde(with = "field_serde")]
    pub commitment: Fr,
    pub leaf_index: u64,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
}

/// Emitted for every accepted withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub recipient: Address,
    #[serde(with = "field_serde")]
    pub nullifier_hash: Fr,
    pub relayer: Address,
    pub fee: U256,
    /// Amount received by the recipient.
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEvent {
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
}

/// A withdrawal as submitted by a relayer or the note owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub proof: Proof,
    pub inputs: PublicInputs,
}

/// Serializable pool state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub levels: usize,
    pub root_history_size: usize,
    /// Recent roots, oldest first.
    #[serde(with = "field_serde::seq")]
    pub roots: Vec<Fr>,
    /// Leaves in insertion order.
    #[serde(with = "field_serde::seq")]
    pub leaves: Vec<Fr>,
    /// Deposited commitments in insertion order.
    #[serde(with = "field_serde::seq")]
    pub commitments: Vec<Fr>,
    #[serde(with = "field_serde::seq")]
    pub nullifiers: Vec<Fr>,
    pub fees_accrued: U256,
    pub total_shares: U256,
}

/// Shielded pool over a deposit policy `P`, hasher `H` and proof verifier `V`.
#[derive(Debug)]
pub struct ShieldedPool<P, H, V> {
    /// Custody account on the asset ledger.
    address: Address,
    policy: P,
    hasher: H,
    verifier: V,
    tree: IncrementalMerkleTree<H>,
    nullifiers: NullifierRegistry,
    commitments: HashSet<Fr>,
    /// Deposit order of `commitments`, kept for snapshots.
    commitment_log: Vec<Fr>,
    accounting: FeeAccounting,
    events: Vec<PoolEvent>,
}

/// A payout leg failed.
struct PayoutFailure {
    source: LedgerError,
    /// Every leg paid before the failure is back in custody.
    reversed: bool,
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl<P, H, V> ShieldedPool<P, H, V>
where
    P: DepositPolicy,
    H: FieldHasher + Clone,
    V: ProofVerifier,
{
    /// Create an empty pool with custody account `address`.
    pub fn new(
        address: Address,
        policy: P,
        hasher: H,
        verifier: V,
        levels: usize,
        root_history_size: usize,
    ) -> Result<Self, PoolError> {
        let tree = IncrementalMerkleTree::new(hasher.clone(), levels, root_history_size)?;
        info!(
            %address,
            levels,
            root_history_size,
            schema = ?policy.schema(),
            "created shielded pool"
        );
        Ok(Self {
            address,
            policy,
            hasher,
            verifier,
            tree,
            nullifiers: NullifierRegistry::new(),
            commitments: HashSet::new(),
            commitment_log: Vec::new(),
            accounting: FeeAccounting::default(),
            events: Vec::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn tree(&self) -> &IncrementalMerkleTree<H> {
        &self.tree
    }

    /// Current Merkle root.
    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn is_known_root(&self, root: &Fr) -> bool {
        self.tree.is_known_root(root)
    }

    pub fn is_spent(&self, nullifier_hash: &Fr) -> bool {
        self.nullifiers.is_spent(nullifier_hash)
    }

    /// Merkle path for the deposit at `leaf_index`.
    pub fn path(&self, leaf_index: u64) -> Result<MerklePath, PoolError> {
        self.tree.path(leaf_index)
    }

    /// Cumulative accrued-fee index.
    pub fn fees_accrued(&self) -> U256 {
        self.accounting.fees_accrued
    }

    /// Shares deposited and not yet withdrawn.
    pub fn total_shares(&self) -> U256 {
        self.accounting.total_shares
    }

    pub fn events(&self) -> &[PoolEvent] {
        &self.events
    }

    /// Deposit `amount` from `depositor` under `commitment`.
    ///
    /// The depositor must have approved the pool address for `amount`.
    pub fn deposit<L: AssetLedger>(
        &mut self,
        ledger: &mut L,
        depositor: Address,
        commitment: Fr,
        amount: U256,
    ) -> Result<DepositEvent, PoolError> {
        if commitment.is_zero() {
            return Err(PoolError::InvalidCommitment("commitment must be non-zero"));
        }
        if self.commitments.contains(&commitment) {
            return Err(PoolError::DuplicateCommitment);
        }
        self.policy.validate_deposit(amount)?;
        if self.tree.is_full() {
            return Err(PoolError::TreeFull {
                capacity: self.tree.capacity(),
            });
        }

        let leaf = self
            .policy
            .leaf(&self.hasher, commitment, &self.accounting, amount)?;
        let total_shares = self
            .accounting
            .total_shares
            .checked_add(self.policy.shares_for(amount))
            .ok_or(PoolError::InvalidAmount("outstanding shares overflow"))?;

        ledger.transfer_from(self.address, depositor, self.address, amount)?;

        let leaf_index = match self.tree.insert(leaf) {
            Ok(index) => index,
            Err(err) => {
                if let Err(refund_err) = ledger.transfer(self.address, depositor, amount) {
                    error!(%depositor, %amount, %refund_err, "failed to refund deposit");
                }
                return Err(err);
            }
        };

        self.commitments.insert(commitment);
        self.commitment_log.push(commitment);
        self.accounting.total_shares = total_shares;

        let event = DepositEvent {
            commitment: leaf,
            leaf_index,
            timestamp: unix_timestamp(),
        };
        info!(
            leaf_index,
            %depositor,
            %amount,
            commitment = %field_to_hex(&leaf),
            "deposit"
        );
        self.events.push(PoolEvent::Deposit(event.clone()));
        Ok(event)
    }

    /// Process a withdrawal submitted by `caller`.
    pub fn withdraw<L: AssetLedger>(
        &mut self,
        ledger: &mut L,
        caller: Address,
        request: &WithdrawRequest,
    ) -> Result<WithdrawalEvent, PoolError> {
        let inputs = &request.inputs;
        let nullifier_hash = inputs.nullifier_hash;

        if !self.tree.is_known_root(&inputs.root) {
            warn!(root = %field_to_hex(&inputs.root), "withdrawal against unknown root");
            return Err(PoolError::UnknownRoot);
        }
        if self.nullifiers.is_spent(&nullifier_hash) {
            warn!(
                nullifier_hash = %field_to_hex(&nullifier_hash),
                "withdrawal of spent note"
            );
            return Err(PoolError::AlreadySpent);
        }

        let settlement = self.policy.settle(inputs, &self.accounting)?;
        let custody = ledger.balance_of(self.address);
        if custody < settlement.gross {
            return Err(LedgerError::InsufficientBalance {
                account: self.address,
                balance: custody,
                needed: settlement.gross,
            }
            .into());
        }
        let total_shares = self
            .accounting
            .total_shares
            .checked_sub(settlement.shares_burned)
            .ok_or(PoolError::InvalidAmount(
                "share amount exceeds outstanding shares",
            ))?;

        self.verify(request)?;

        self.nullifiers.mark_spent(nullifier_hash)?;
        if let Err(failure) = self.pay_out(ledger, caller, inputs, &settlement) {
            if failure.reversed {
                self.nullifiers.revert(&nullifier_hash);
            } else {
                // the note is partly paid out, so it must not be spendable again
                self.accounting.total_shares = total_shares;
                error!(
                    nullifier_hash = %field_to_hex(&nullifier_hash),
                    "partial payout could not be reversed, nullifier stays spent"
                );
            }
            return Err(failure.source.into());
        }
        self.accounting.total_shares = total_shares;

        let event = WithdrawalEvent {
            recipient: inputs.recipient,
            nullifier_hash,
            relayer: inputs.relayer,
            fee: settlement.fee,
            amount: settlement.to_recipient,
        };
        info!(
            recipient = %inputs.recipient,
            relayer = %inputs.relayer,
            amount = %settlement.to_recipient,
            fee = %settlement.fee,
            refund = %settlement.refund,
            reward = %settlement.reward,
            "withdrawal"
        );
        self.events.push(PoolEvent::Withdrawal(event.clone()));
        Ok(event)
    }

    fn verify(&self, request: &WithdrawRequest) -> Result<(), PoolError> {
        let signals = self
            .policy
            .schema()
            .encode(&request.inputs)
            .map_err(|err| {
                warn!(%err, "withdrawal inputs do not fit the signal schema");
                PoolError::InvalidProof
            })?;

        match self.verifier.verify(&request.proof, &signals) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("withdraw proof rejected");
                Err(PoolError::InvalidProof)
            }
            Err(fault) => {
                warn!(%fault, "withdraw proof verification faulted");
                Err(PoolError::InvalidProof)
            }
        }
    }

    /// Pay recipient, relayer and caller, undoing earlier legs if a later one fails.
    fn pay_out<L: AssetLedger>(
        &self,
        ledger: &mut L,
        caller: Address,
        inputs: &PublicInputs,
        settlement: &Settlement,
    ) -> Result<(), PayoutFailure> {
        let legs = [
            (inputs.recipient, settlement.to_recipient),
            (inputs.relayer, settlement.fee),
            (caller, settlement.refund),
        ];

        let mut paid = Vec::with_capacity(legs.len());
        for (to, amount) in legs {
            if amount.is_zero() {
                continue;
            }
            if let Err(source) = ledger.transfer(self.address, to, amount) {
                let reversed = self.reverse(ledger, &paid);
                return Err(PayoutFailure { source, reversed });
            }
            paid.push((to, amount));
        }
        Ok(())
    }

    /// Pull completed payouts back into custody, newest first.
    ///
    /// Returns `false` if any of them stayed with its receiver.
    fn reverse<L: AssetLedger>(&self, ledger: &mut L, paid: &[(Address, U256)]) -> bool {
        let mut reversed = true;
        for (account, amount) in paid.iter().rev() {
            match ledger.transfer(*account, self.address, *amount) {
                Ok(()) => debug!(%account, %amount, "reversed transfer"),
                Err(err) => {
                    error!(%account, %amount, %err, "failed to reverse transfer");
                    reversed = false;
                }
            }
        }
        reversed
    }

    /// Capture the pool state.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            levels: self.tree.levels(),
            root_history_size: self.tree.root_history_size(),
            roots: self.tree.roots().copied().collect(),
            leaves: self.tree.leaves().to_vec(),
            commitments: self.commitment_log.clone(),
            nullifiers: self.nullifiers.iter().copied().collect(),
            fees_accrued: self.accounting.fees_accrued,
            total_shares: self.accounting.total_shares,
        }
    }

    /// Rebuild a pool from `snapshot`.
    ///
    /// The tree is replayed from the leaves; the replayed root history must
    /// match the recorded one.
    pub fn restore(
        snapshot: &PoolSnapshot,
        address: Address,
        policy: P,
        hasher: H,
        verifier: V,
    ) -> Result<Self, PoolError> {
        let tree = IncrementalMerkleTree::from_leaves(
            hasher.clone(),
            snapshot.levels,
            snapshot.root_history_size,
            &snapshot.leaves,
        )?;
        if !tree.roots().eq(snapshot.roots.iter()) {
            return Err(PoolError::CorruptSnapshot(
                "root history does not match the leaves",
            ));
        }
        if !policy.issues_shares()
            && !(snapshot.total_shares.is_zero() && snapshot.fees_accrued.is_zero())
        {
            return Err(PoolError::CorruptSnapshot(
                "fee accounting on a pool without shares",
            ));
        }

        if snapshot.commitments.len() != snapshot.leaves.len() {
            return Err(PoolError::CorruptSnapshot(
                "commitment count does not match the leaves",
            ));
        }
        let commitments: HashSet<Fr> = snapshot.commitments.iter().copied().collect();
        if commitments.len() != snapshot.commitments.len() || commitments.contains(&Fr::zero()) {
            return Err(PoolError::CorruptSnapshot("invalid commitment set"));
        }

        let nullifiers: NullifierRegistry = snapshot.nullifiers.iter().copied().collect();
        if nullifiers.len() != snapshot.nullifiers.len() {
            return Err(PoolError::CorruptSnapshot("duplicate nullifier"));
        }

        info!(
            %address,
            leaves = snapshot.leaves.len(),
            nullifiers = nullifiers.len(),
            "restored shielded pool"
        );
        Ok(Self {
            address,
            policy,
            hasher,
            verifier,
            tree,
            nullifiers,
            commitments,
            commitment_log: snapshot.commitments.clone(),
            accounting: FeeAccounting {
                fees_accrued: snapshot.fees_accrued,
                total_shares: snapshot.total_shares,
            },
            events: Vec::new(),
        })
    }
}

impl<H, V> ShieldedPool<SharesWithFees, H, V>
where
    H: FieldHasher + Clone,
    V: ProofVerifier,
{
    /// Advance the accrued-fee index by `delta` (scaled by `FEES_GROWTH_PRECISION`).
    ///
    /// The growth is funded up front: the rewards it creates for the
    /// outstanding shares, rounded up, are pulled from `payer` into custody
    /// before the index moves. `payer` must have approved the pool for that
    /// amount. Returns the new index.
    pub fn add_fees_growth<L: AssetLedger>(
        &mut self,
        ledger: &mut L,
        payer: Address,
        delta: U256,
    ) -> Result<U256, PoolError> {
        let fees_accrued = self
            .accounting
            .fees_accrued
            .checked_add(delta)
            .ok_or(PoolError::InvalidAmount("fee index overflow"))?;
        let funding = SharesWithFees::growth_funding(self.accounting.total_shares, delta)?;
        if !funding.is_zero() {
            ledger.transfer_from(self.address, payer, self.address, funding)?;
        }
        self.accounting.fees_accrued = fees_accrued;
        info!(%payer, %delta, %funding, %fees_accrued, "fee growth");
        Ok(fees_accrued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PoseidonHasher;
    use crate::ledger::InMemoryLedger;
    use crate::note::Note;
    use crate::policy::{FixedDenomination, FEES_GROWTH_PRECISION};
    use crate::verifier::{
        ShareClaim, SignalSchema, StaticVerifier, TransparentVerifier, WithdrawWitness,
    };

    const POOL: Address = Address::repeat_byte(0x77);
    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);
    const RELAYER: Address = Address::repeat_byte(0x5e);
    const FEE_PAYER: Address = Address::repeat_byte(0xfe);

    type BasePool = ShieldedPool<FixedDenomination, PoseidonHasher, TransparentVerifier<PoseidonHasher>>;
    type SharesPool = ShieldedPool<SharesWithFees, PoseidonHasher, TransparentVerifier<PoseidonHasher>>;

    fn base_pool(levels: usize, history: usize) -> BasePool {
        ShieldedPool::new(
            POOL,
            FixedDenomination::new(U256::from(100)),
            PoseidonHasher,
            TransparentVerifier::new(PoseidonHasher, SignalSchema::BaseV1, levels),
            levels,
            history,
        )
        .unwrap()
    }

    fn shares_pool() -> SharesPool {
        ShieldedPool::new(
            POOL,
            SharesWithFees::new(U256::from(100)),
            PoseidonHasher,
            TransparentVerifier::new(PoseidonHasher, SignalSchema::SharesV2, 10),
            10,
            30,
        )
        .unwrap()
    }

    fn funded_ledger() -> InMemoryLedger {
        let mut ledger = InMemoryLedger::new();
        ledger.mint(ALICE, U256::from(1000)).unwrap();
        ledger.approve(ALICE, POOL, U256::MAX);
        ledger.mint(FEE_PAYER, U256::from(100)).unwrap();
        ledger.approve(FEE_PAYER, POOL, U256::MAX);
        ledger
    }

    fn base_request(pool: &BasePool, note: &Note, leaf_index: u64, fee: u64) -> WithdrawRequest {
        let inputs = PublicInputs {
            root: pool.root(),
            nullifier_hash: note.nullifier_hash(&PoseidonHasher).unwrap(),
            recipient: BOB,
            relayer: RELAYER,
            fee: U256::from(fee),
            refund: U256::ZERO,
            share_claim: None,
        };
        let proof = WithdrawWitness::prove(
            note,
            pool.path(leaf_index).unwrap(),
            SignalSchema::BaseV1,
            &inputs,
        )
        .unwrap();
        WithdrawRequest { proof, inputs }
    }

    #[test]
    fn test_deposit_then_withdraw_pays_recipient_and_relayer() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let note = Note::new();

        let event = pool
            .deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        assert_eq!(event.leaf_index, 0);
        assert_eq!(ledger.balance_of(POOL), U256::from(100));

        let request = base_request(&pool, &note, event.leaf_index, 10);
        let withdrawal = pool.withdraw(&mut ledger, RELAYER, &request).unwrap();

        assert_eq!(withdrawal.amount, U256::from(90));
        assert_eq!(ledger.balance_of(BOB), U256::from(90));
        assert_eq!(ledger.balance_of(RELAYER), U256::from(10));
        assert_eq!(ledger.balance_of(POOL), U256::ZERO);
        assert!(pool.is_spent(&request.inputs.nullifier_hash));
        assert_eq!(pool.events().len(), 2);
    }

    #[test]
    fn test_double_withdraw_rejected() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        let second = Note::new();
        pool.deposit(&mut ledger, ALICE, second.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();

        let request = base_request(&pool, &note, 0, 0);
        pool.withdraw(&mut ledger, BOB, &request).unwrap();
        let before = ledger.balance_of(POOL);

        assert!(matches!(
            pool.withdraw(&mut ledger, BOB, &request),
            Err(PoolError::AlreadySpent)
        ));
        assert_eq!(ledger.balance_of(POOL), before);
    }

    #[test]
    fn test_deposit_rejections_leave_state_unchanged() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let root = pool.root();

        assert!(matches!(
            pool.deposit(&mut ledger, ALICE, Fr::from(5u64), U256::from(99)),
            Err(PoolError::InvalidAmount(_))
        ));
        assert!(matches!(
            pool.deposit(&mut ledger, ALICE, Fr::zero(), U256::from(100)),
            Err(PoolError::InvalidCommitment(_))
        ));
        assert!(matches!(
            pool.deposit(&mut ledger, BOB, Fr::from(5u64), U256::from(100)),
            Err(PoolError::TransferFailed(_))
        ));

        assert_eq!(pool.root(), root);
        assert!(pool.tree().is_empty());
        assert_eq!(ledger.balance_of(ALICE), U256::from(1000));
    }

    #[test]
    fn test_duplicate_commitment_rejected() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        pool.deposit(&mut ledger, ALICE, Fr::from(5u64), U256::from(100))
            .unwrap();
        assert!(matches!(
            pool.deposit(&mut ledger, ALICE, Fr::from(5u64), U256::from(100)),
            Err(PoolError::DuplicateCommitment)
        ));
        assert_eq!(ledger.balance_of(POOL), U256::from(100));
    }

    #[test]
    fn test_full_tree_rejects_before_transfer() {
        let mut pool = base_pool(1, 30);
        let mut ledger = funded_ledger();
        pool.deposit(&mut ledger, ALICE, Fr::from(1u64), U256::from(100))
            .unwrap();
        pool.deposit(&mut ledger, ALICE, Fr::from(2u64), U256::from(100))
            .unwrap();
        let root = pool.root();

        assert!(matches!(
            pool.deposit(&mut ledger, ALICE, Fr::from(3u64), U256::from(100)),
            Err(PoolError::TreeFull { capacity: 2 })
        ));
        assert_eq!(pool.root(), root);
        assert_eq!(ledger.balance_of(ALICE), U256::from(800));
    }

    #[test]
    fn test_unknown_root_rejected() {
        let mut pool = base_pool(10, 2);
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        let request = base_request(&pool, &note, 0, 10);

        // push the proven root out of the two-root window
        pool.deposit(&mut ledger, ALICE, Fr::from(11u64), U256::from(100))
            .unwrap();
        pool.deposit(&mut ledger, ALICE, Fr::from(12u64), U256::from(100))
            .unwrap();

        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::UnknownRoot)
        ));
        assert_eq!(ledger.balance_of(POOL), U256::from(300));
        assert!(!pool.is_spent(&request.inputs.nullifier_hash));
    }

    #[test]
    fn test_rejected_proof_changes_nothing() {
        let mut pool: ShieldedPool<_, _, _> = ShieldedPool::new(
            POOL,
            FixedDenomination::new(U256::from(100)),
            PoseidonHasher,
            StaticVerifier(false),
            10,
            30,
        )
        .unwrap();
        let mut ledger = funded_ledger();
        pool.deposit(&mut ledger, ALICE, Fr::from(1u64), U256::from(100))
            .unwrap();

        let request = WithdrawRequest {
            proof: Proof::default(),
            inputs: PublicInputs {
                root: pool.root(),
                nullifier_hash: Fr::from(9u64),
                recipient: BOB,
                relayer: RELAYER,
                fee: U256::from(10),
                refund: U256::ZERO,
                share_claim: None,
            },
        };
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::InvalidProof)
        ));
        assert!(!pool.is_spent(&Fr::from(9u64)));
        assert_eq!(ledger.balance_of(POOL), U256::from(100));
        assert_eq!(ledger.balance_of(BOB), U256::ZERO);
    }

    #[test]
    fn test_tampered_fee_invalidates_proof() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();

        let mut request = base_request(&pool, &note, 0, 10);
        request.inputs.fee = U256::from(50);
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::InvalidProof)
        ));
        assert_eq!(ledger.balance_of(RELAYER), U256::ZERO);
    }

    #[test]
    fn test_fee_above_denomination_rejected() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        let request = base_request(&pool, &note, 0, 101);
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::InvalidFee(_))
        ));
    }

    #[test]
    fn test_insolvent_pool_rejects_before_marking() {
        let mut pool: ShieldedPool<_, _, _> = ShieldedPool::new(
            POOL,
            FixedDenomination::new(U256::from(100)),
            PoseidonHasher,
            StaticVerifier(true),
            10,
            30,
        )
        .unwrap();
        let mut ledger = InMemoryLedger::new();
        let request = WithdrawRequest {
            proof: Proof::default(),
            inputs: PublicInputs {
                root: pool.root(),
                nullifier_hash: Fr::from(9u64),
                recipient: BOB,
                relayer: RELAYER,
                fee: U256::ZERO,
                refund: U256::ZERO,
                share_claim: None,
            },
        };
        assert!(matches!(
            pool.withdraw(&mut ledger, BOB, &request),
            Err(PoolError::TransferFailed(LedgerError::InsufficientBalance { .. }))
        ));
        assert!(!pool.is_spent(&Fr::from(9u64)));
    }

    #[test]
    fn test_refund_paid_to_caller() {
        let mut pool = base_pool(10, 30);
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();

        let mut inputs = base_request(&pool, &note, 0, 10).inputs;
        inputs.refund = U256::from(5);
        let proof =
            WithdrawWitness::prove(&note, pool.path(0).unwrap(), SignalSchema::BaseV1, &inputs)
                .unwrap();
        let caller = Address::repeat_byte(0xca);
        pool.withdraw(&mut ledger, caller, &WithdrawRequest { proof, inputs })
            .unwrap();

        assert_eq!(ledger.balance_of(BOB), U256::from(85));
        assert_eq!(ledger.balance_of(RELAYER), U256::from(10));
        assert_eq!(ledger.balance_of(caller), U256::from(5));
        assert_eq!(ledger.balance_of(POOL), U256::ZERO);
    }

    /// Ledger that fails the chosen transfers once, then behaves normally.
    struct FlakyLedger {
        inner: InMemoryLedger,
        fail_payout_to: Option<Address>,
        fail_pull_back_from: Option<Address>,
    }

    impl AssetLedger for FlakyLedger {
        fn transfer_from(
            &mut self,
            spender: Address,
            from: Address,
            to: Address,
            amount: U256,
        ) -> Result<(), LedgerError> {
            self.inner.transfer_from(spender, from, to, amount)
        }

        fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
            if from == POOL && self.fail_payout_to == Some(to) {
                self.fail_payout_to = None;
                return Err(LedgerError::Overflow);
            }
            if to == POOL && self.fail_pull_back_from == Some(from) {
                self.fail_pull_back_from = None;
                return Err(LedgerError::Overflow);
            }
            self.inner.transfer(from, to, amount)
        }

        fn balance_of(&self, account: Address) -> U256 {
            self.inner.balance_of(account)
        }
    }

    fn flaky_ledger() -> FlakyLedger {
        FlakyLedger {
            inner: funded_ledger(),
            fail_payout_to: None,
            fail_pull_back_from: None,
        }
    }

    #[test]
    fn test_failed_payout_is_reversed_and_retryable() {
        let mut pool = base_pool(10, 30);
        let mut ledger = flaky_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        let request = base_request(&pool, &note, 0, 10);

        ledger.fail_payout_to = Some(RELAYER);
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::TransferFailed(LedgerError::Overflow))
        ));
        assert!(!pool.is_spent(&request.inputs.nullifier_hash));
        assert_eq!(ledger.balance_of(BOB), U256::ZERO);
        assert_eq!(ledger.balance_of(POOL), U256::from(100));

        pool.withdraw(&mut ledger, RELAYER, &request).unwrap();
        assert_eq!(ledger.balance_of(BOB), U256::from(90));
        assert_eq!(ledger.balance_of(RELAYER), U256::from(10));
    }

    #[test]
    fn test_unreversed_payout_keeps_nullifier_spent() {
        let mut pool = base_pool(10, 30);
        let mut ledger = flaky_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(100))
            .unwrap();
        let request = base_request(&pool, &note, 0, 10);

        // the relayer leg fails and the recipient's 90 cannot be pulled back
        ledger.fail_payout_to = Some(RELAYER);
        ledger.fail_pull_back_from = Some(BOB);
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::TransferFailed(_))
        ));
        assert!(pool.is_spent(&request.inputs.nullifier_hash));
        assert_eq!(ledger.balance_of(BOB), U256::from(90));
        assert_eq!(ledger.balance_of(POOL), U256::from(10));

        // the ledger works again, but the note cannot be paid a second time
        assert!(matches!(
            pool.withdraw(&mut ledger, RELAYER, &request),
            Err(PoolError::AlreadySpent)
        ));
        assert_eq!(ledger.balance_of(BOB), U256::from(90));
        assert_eq!(ledger.balance_of(POOL), U256::from(10));
    }

    fn shares_request(
        pool: &SharesPool,
        note: &Note,
        leaf_index: u64,
        fees_accrued: U256,
        share_amount: u64,
    ) -> WithdrawRequest {
        let inputs = PublicInputs {
            root: pool.root(),
            nullifier_hash: note.nullifier_hash(&PoseidonHasher).unwrap(),
            recipient: ALICE,
            relayer: RELAYER,
            fee: U256::ZERO,
            refund: U256::ZERO,
            share_claim: Some(ShareClaim {
                fees_accrued,
                share_amount: U256::from(share_amount),
            }),
        };
        let proof = WithdrawWitness::prove(
            note,
            pool.path(leaf_index).unwrap(),
            SignalSchema::SharesV2,
            &inputs,
        )
        .unwrap();
        WithdrawRequest { proof, inputs }
    }

    #[test]
    fn test_shares_round_trip_refunds_depositor() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        let note = Note::new();

        pool.add_fees_growth(&mut ledger, FEE_PAYER, U256::from(100))
            .unwrap();
        let event = pool
            .deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();
        assert_eq!(pool.total_shares(), U256::from(20));
        assert_ne!(event.commitment, note.commitment(&PoseidonHasher).unwrap());

        let request = shares_request(&pool, &note, 0, U256::from(100), 20);
        pool.withdraw(&mut ledger, ALICE, &request).unwrap();

        assert_eq!(ledger.balance_of(POOL), U256::ZERO);
        assert_eq!(pool.total_shares(), U256::ZERO);
        assert_eq!(ledger.balance_of(ALICE), U256::from(1000));
    }

    #[test]
    fn test_shares_reward_after_fee_growth() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        let note = Note::new();

        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();
        // half a token per share, paid in by the fee payer
        pool.add_fees_growth(&mut ledger, FEE_PAYER, FEES_GROWTH_PRECISION / U256::from(2))
            .unwrap();
        assert_eq!(ledger.balance_of(POOL), U256::from(30));
        assert_eq!(ledger.balance_of(FEE_PAYER), U256::from(90));

        let request = shares_request(&pool, &note, 0, U256::ZERO, 20);
        let event = pool.withdraw(&mut ledger, ALICE, &request).unwrap();
        assert_eq!(event.amount, U256::from(30));
        assert_eq!(ledger.balance_of(POOL), U256::ZERO);
        assert_eq!(ledger.balance_of(ALICE), U256::from(1010));
    }

    #[test]
    fn test_fee_growth_is_funded_for_every_depositor() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        ledger.mint(BOB, U256::from(20)).unwrap();
        ledger.approve(BOB, POOL, U256::from(20));
        let first = Note::new();
        let second = Note::new();
        pool.deposit(&mut ledger, ALICE, first.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();
        pool.deposit(&mut ledger, BOB, second.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();

        // one token per share over 40 shares
        pool.add_fees_growth(&mut ledger, FEE_PAYER, FEES_GROWTH_PRECISION)
            .unwrap();
        assert_eq!(ledger.balance_of(POOL), U256::from(80));
        assert_eq!(ledger.balance_of(FEE_PAYER), U256::from(60));

        let event = pool
            .withdraw(&mut ledger, ALICE, &shares_request(&pool, &first, 0, U256::ZERO, 20))
            .unwrap();
        assert_eq!(event.amount, U256::from(40));
        let event = pool
            .withdraw(&mut ledger, ALICE, &shares_request(&pool, &second, 1, U256::ZERO, 20))
            .unwrap();
        assert_eq!(event.amount, U256::from(40));

        assert_eq!(ledger.balance_of(POOL), U256::ZERO);
        assert_eq!(pool.total_shares(), U256::ZERO);
    }

    #[test]
    fn test_unfunded_fee_growth_rejected() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        ledger.approve(FEE_PAYER, POOL, U256::ZERO);
        pool.deposit(&mut ledger, ALICE, Fr::from(3u64), U256::from(20))
            .unwrap();

        assert!(matches!(
            pool.add_fees_growth(&mut ledger, FEE_PAYER, FEES_GROWTH_PRECISION),
            Err(PoolError::TransferFailed(LedgerError::InsufficientAllowance { .. }))
        ));
        assert_eq!(pool.fees_accrued(), U256::ZERO);
        assert_eq!(ledger.balance_of(POOL), U256::from(20));
        assert_eq!(ledger.balance_of(FEE_PAYER), U256::from(100));
    }

    #[test]
    fn test_shares_claim_must_match_leaf() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();
        pool.deposit(&mut ledger, ALICE, Fr::from(3u64), U256::from(20))
            .unwrap();

        // claiming more shares than were deposited under this note
        let request = shares_request(&pool, &note, 0, U256::ZERO, 40);
        assert!(matches!(
            pool.withdraw(&mut ledger, ALICE, &request),
            Err(PoolError::InvalidProof)
        ));
        assert_eq!(pool.total_shares(), U256::from(40));
        assert_eq!(ledger.balance_of(POOL), U256::from(40));
    }

    #[test]
    fn test_snapshot_restore_preserves_state() {
        let mut pool = shares_pool();
        let mut ledger = funded_ledger();
        let note = Note::new();
        pool.add_fees_growth(&mut ledger, FEE_PAYER, U256::from(7))
            .unwrap();
        pool.deposit(&mut ledger, ALICE, note.commitment(&PoseidonHasher).unwrap(), U256::from(20))
            .unwrap();
        pool.deposit(&mut ledger, ALICE, Fr::from(3u64), U256::from(30))
            .unwrap();
        let request = shares_request(&pool, &note, 0, U256::from(7), 20);
        pool.withdraw(&mut ledger, ALICE, &request).unwrap();

        let snapshot = pool.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: PoolSnapshot = serde_json::from_str(&json).unwrap();
        let restored: SharesPool = ShieldedPool::restore(
            &decoded,
            POOL,
            SharesWithFees::new(U256::from(100)),
            PoseidonHasher,
            TransparentVerifier::new(PoseidonHasher, SignalSchema::SharesV2, 10),
        )
        .unwrap();

        assert_eq!(restored.root(), pool.root());
        assert_eq!(
            restored.tree().roots().collect::<Vec<_>>(),
            pool.tree().roots().collect::<Vec<_>>()
        );
        assert!(restored.is_spent(&request.inputs.nullifier_hash));
        assert_eq!(restored.fees_accrued(), U256::from(7));
        assert_eq!(restored.total_shares(), U256::from(30));
    }

    #[test]
    fn test_restore_rejects_tampered_snapshot() {
        let mut pool = base_pool(4, 5);
        let mut ledger = funded_ledger();
        pool.deposit(&mut ledger, ALICE, Fr::from(1u64), U256::from(100))
            .unwrap();

        let restore = |snapshot: &PoolSnapshot| {
            BasePool::restore(
                snapshot,
                POOL,
                FixedDenomination::new(U256::from(100)),
                PoseidonHasher,
                TransparentVerifier::new(PoseidonHasher, SignalSchema::BaseV1, 4),
            )
        };

        let mut tampered = pool.snapshot();
        tampered.leaves[0] = Fr::from(2u64);
        assert!(matches!(
            restore(&tampered),
            Err(PoolError::CorruptSnapshot(_))
        ));

        let mut duplicated = pool.snapshot();
        duplicated.nullifiers = vec![Fr::from(1u64), Fr::from(1u64)];
        assert!(matches!(
            restore(&duplicated),
            Err(PoolError::CorruptSnapshot(_))
        ));

        // a fixed-denomination pool never carries shares or a fee index
        let mut with_shares = pool.snapshot();
        with_shares.total_shares = U256::from(100);
        assert!(matches!(
            restore(&with_shares),
            Err(PoolError::CorruptSnapshot(_))
        ));
        let mut with_fees = pool.snapshot();
        with_fees.fees_accrued = U256::from(1);
        assert!(matches!(
            restore(&with_fees),
            Err(PoolError::CorruptSnapshot(_))
        ));

        assert!(restore(&pool.snapshot()).is_ok());
    }
}
