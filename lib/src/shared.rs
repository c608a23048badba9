//! Thread-safe handles.
//!
//! Deposits and withdrawals take the pool write lock for their whole
//! duration; queries take the read lock. The ledger is locked per call.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use ark_bn254::Fr;
use parking_lot::{Mutex, RwLock};

use crate::crypto::FieldHasher;
use crate::error::PoolError;
use crate::ledger::{AssetLedger, LedgerError};
use crate::merkle_tree::MerklePath;
use crate::policy::{DepositPolicy, SharesWithFees};
use crate::pool::{DepositEvent, PoolSnapshot, ShieldedPool, WithdrawRequest, WithdrawalEvent};
use crate::verifier::ProofVerifier;

/// Cloneable handle to a ledger shared between threads.
#[derive(Debug, Default)]
pub struct SharedLedger<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedLedger<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: AssetLedger> SharedLedger<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Run `f` with exclusive access to the ledger.
    pub fn with<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}

impl<L: AssetLedger> AssetLedger for SharedLedger<L> {
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.inner.lock().transfer_from(spender, from, to, amount)
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        self.inner.lock().transfer(from, to, amount)
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.inner.lock().balance_of(account)
    }
}

/// Cloneable handle to a pool shared between threads.
#[derive(Debug)]
pub struct SharedPool<P, H, V> {
    inner: Arc<RwLock<ShieldedPool<P, H, V>>>,
}

impl<P, H, V> Clone for SharedPool<P, H, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, H, V> SharedPool<P, H, V>
where
    P: DepositPolicy,
    H: FieldHasher + Clone,
    V: ProofVerifier,
{
    pub fn new(pool: ShieldedPool<P, H, V>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(pool)),
        }
    }

    pub fn deposit<L: AssetLedger>(
        &self,
        ledger: &mut L,
        depositor: Address,
        commitment: Fr,
        amount: U256,
    ) -> Result<DepositEvent, PoolError> {
        self.inner
            .write()
            .deposit(ledger, depositor, commitment, amount)
    }

    pub fn withdraw<L: AssetLedger>(
        &self,
        ledger: &mut L,
        caller: Address,
        request: &WithdrawRequest,
    ) -> Result<WithdrawalEvent, PoolError> {
        self.inner.write().withdraw(ledger, caller, request)
    }

    pub fn root(&self) -> Fr {
        self.inner.read().root()
    }

    pub fn is_known_root(&self, root: &Fr) -> bool {
        self.inner.read().is_known_root(root)
    }

    pub fn is_spent(&self, nullifier_hash: &Fr) -> bool {
        self.inner.read().is_spent(nullifier_hash)
    }

    pub fn path(&self, leaf_index: u64) -> Result<MerklePath, PoolError> {
        self.inner.read().path(leaf_index)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.read().snapshot()
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&ShieldedPool<P, H, V>) -> R) -> R {
        let guard = self.inner.read();
        f(&*guard)
    }
}

impl<H, V> SharedPool<SharesWithFees, H, V>
where
    H: FieldHasher + Clone,
    V: ProofVerifier,
{
    pub fn add_fees_growth<L: AssetLedger>(
        &self,
        ledger: &mut L,
        payer: Address,
        delta: U256,
    ) -> Result<U256, PoolError> {
        self.inner.write().add_fees_growth(ledger, payer, delta)
    }
}
