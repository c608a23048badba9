//! Fungible asset ledger.
//!
//! The pool never owns asset balances itself; it moves them through an
//! [`AssetLedger`] with ERC20 transfer semantics. Each call is all-or-nothing.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Ledger transfer failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance for {account}: have {balance}, need {needed}")]
    InsufficientBalance {
        account: Address,
        balance: U256,
        needed: U256,
    },
    #[error("insufficient allowance from {owner} to {spender}: have {allowance}, need {needed}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: U256,
        needed: U256,
    },
    #[error("balance overflow")]
    Overflow,
}

/// External balance ledger consumed by the pool.
pub trait AssetLedger {
    /// Move `amount` from `from` to `to` on behalf of `spender`, consuming allowance.
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError>;

    /// Move `amount` owned by `from` to `to`.
    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError>;

    /// Current balance of `account`.
    fn balance_of(&self, account: Address) -> U256;
}

/// In-memory ERC20-style ledger with mint and allowances.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit freshly minted tokens to `to`.
    pub fn mint(&mut self, to: Address, amount: U256) -> Result<(), LedgerError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.total_supply = supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    /// Set the allowance of `spender` over `owner`'s tokens. `U256::MAX` never decreases.
    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((owner, spender), amount);
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                balance: from_balance,
                needed: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        self.balances.insert(from, from_balance - amount);
        self.balances.insert(to, to_balance);
        Ok(())
    }
}

impl AssetLedger for InMemoryLedger {
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: from,
                spender,
                allowance,
                needed: amount,
            });
        }

        self.move_balance(from, to, amount)?;
        if allowance != U256::MAX {
            self.allowances.insert((from, spender), allowance - amount);
        }
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        self.move_balance(from, to, amount)
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }
}
