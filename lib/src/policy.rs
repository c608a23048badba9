//! Deposit policies.
//!
//! The pool state machine is the same for both variants; what differs is how
//! a deposit amount is validated, which leaf goes into the tree, and how much
//! a withdrawal pays out. Those decisions live behind [`DepositPolicy`].

use alloy_primitives::U256;
use ark_bn254::Fr;

use crate::crypto::{u256_to_field, FieldHasher, HashError};
use crate::error::PoolError;
use crate::verifier::{PublicInputs, ShareClaim, SignalSchema};

/// Fixed-point scale of the accrued-fee index (fees per share).
pub const FEES_GROWTH_PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Leaf of the shares variant: `hash(commitment, feesAccrued, shareAmount)`.
pub fn app_commitment<H: FieldHasher>(
    hasher: &H,
    commitment: Fr,
    fees_accrued: Fr,
    share_amount: Fr,
) -> Result<Fr, HashError> {
    hasher.hash(&[commitment, fees_accrued, share_amount])
}

/// Pool-wide fee and share counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeAccounting {
    /// Cumulative accrued-fee index, scaled by [`FEES_GROWTH_PRECISION`].
    pub fees_accrued: U256,
    /// Shares deposited and not yet withdrawn.
    pub total_shares: U256,
}

/// How a validated withdrawal is paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Total leaving pool custody.
    pub gross: U256,
    pub to_recipient: U256,
    pub fee: U256,
    pub refund: U256,
    /// Accrued-fee reward included in `gross`.
    pub reward: U256,
    /// Shares removed from `total_shares`.
    pub shares_burned: U256,
}

impl Settlement {
    fn split(gross: U256, reward: U256, shares_burned: U256, fee: U256, refund: U256) -> Result<Self, PoolError> {
        let deductions = fee
            .checked_add(refund)
            .ok_or(PoolError::InvalidFee("fee and refund overflow"))?;
        if deductions > gross {
            return Err(PoolError::InvalidFee("fee and refund exceed the payout"));
        }
        Ok(Self {
            gross,
            to_recipient: gross - deductions,
            fee,
            refund,
            reward,
            shares_burned,
        })
    }
}

/// Variant-specific rules of the pool.
pub trait DepositPolicy {
    /// Public-signal layout the verifier expects.
    fn schema(&self) -> SignalSchema;

    /// Fixed amount (base) or per-deposit cap (shares).
    fn denomination(&self) -> U256;

    /// Reject amounts this policy does not accept.
    fn validate_deposit(&self, amount: U256) -> Result<(), PoolError>;

    /// Leaf inserted for `commitment`.
    fn leaf<H: FieldHasher>(
        &self,
        hasher: &H,
        commitment: Fr,
        accounting: &FeeAccounting,
        amount: U256,
    ) -> Result<Fr, PoolError>;

    /// Shares minted by a deposit of `amount`.
    fn shares_for(&self, amount: U256) -> U256;

    /// Whether deposits mint shares and earn fee growth.
    fn issues_shares(&self) -> bool {
        !self.shares_for(U256::from(1)).is_zero()
    }

    /// Validate the amount-related inputs of a withdrawal and compute the payout.
    fn settle(
        &self,
        inputs: &PublicInputs,
        accounting: &FeeAccounting,
    ) -> Result<Settlement, PoolError>;
}

/// Tornado-style pool: every deposit is exactly `denomination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDenomination {
    pub denomination: U256,
}

impl FixedDenomination {
    pub fn new(denomination: U256) -> Self {
        Self { denomination }
    }
}

impl DepositPolicy for FixedDenomination {
    fn schema(&self) -> SignalSchema {
        SignalSchema::BaseV1
    }

    fn denomination(&self) -> U256 {
        self.denomination
    }

    fn validate_deposit(&self, amount: U256) -> Result<(), PoolError> {
        if amount != self.denomination {
            return Err(PoolError::InvalidAmount(
                "deposit must equal the pool denomination",
            ));
        }
        Ok(())
    }

    fn leaf<H: FieldHasher>(
        &self,
        _hasher: &H,
        commitment: Fr,
        _accounting: &FeeAccounting,
        _amount: U256,
    ) -> Result<Fr, PoolError> {
        Ok(commitment)
    }

    fn shares_for(&self, _amount: U256) -> U256 {
        U256::ZERO
    }

    fn settle(
        &self,
        inputs: &PublicInputs,
        _accounting: &FeeAccounting,
    ) -> Result<Settlement, PoolError> {
        if inputs.share_claim.is_some() {
            return Err(PoolError::InvalidAmount(
                "share claim on a fixed-denomination pool",
            ));
        }
        if inputs.fee > self.denomination {
            return Err(PoolError::InvalidFee("fee exceeds transfer value"));
        }
        Settlement::split(
            self.denomination,
            U256::ZERO,
            U256::ZERO,
            inputs.fee,
            inputs.refund,
        )
    }
}

/// Variable-amount pool whose deposits earn a share of accrued fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharesWithFees {
    /// Largest single deposit.
    pub denomination: U256,
}

impl SharesWithFees {
    pub fn new(denomination: U256) -> Self {
        Self { denomination }
    }

    /// Fees earned by `share_amount` shares since the index stood at `since`.
    pub fn reward(
        share_amount: U256,
        since: U256,
        accounting: &FeeAccounting,
    ) -> Result<U256, PoolError> {
        if since > accounting.fees_accrued {
            return Err(PoolError::InvalidFee("fees accrued ahead of the pool index"));
        }
        share_amount
            .checked_mul(accounting.fees_accrued - since)
            .map(|scaled| scaled / FEES_GROWTH_PRECISION)
            .ok_or(PoolError::InvalidAmount("fee reward overflow"))
    }

    /// Assets that back `delta` of index growth over `total_shares`, rounded up.
    pub fn growth_funding(total_shares: U256, delta: U256) -> Result<U256, PoolError> {
        let scaled = total_shares
            .checked_mul(delta)
            .ok_or(PoolError::InvalidAmount("fee growth overflow"))?;
        let funding = scaled / FEES_GROWTH_PRECISION;
        if (scaled % FEES_GROWTH_PRECISION).is_zero() {
            Ok(funding)
        } else {
            Ok(funding + U256::from(1))
        }
    }

    fn claim<'a>(inputs: &'a PublicInputs) -> Result<&'a ShareClaim, PoolError> {
        inputs
            .share_claim
            .as_ref()
            .ok_or(PoolError::InvalidAmount("missing share claim"))
    }
}

impl DepositPolicy for SharesWithFees {
    fn schema(&self) -> SignalSchema {
        SignalSchema::SharesV2
    }

    fn denomination(&self) -> U256 {
        self.denomination
    }

    fn validate_deposit(&self, amount: U256) -> Result<(), PoolError> {
        if amount.is_zero() {
            return Err(PoolError::InvalidAmount("deposit must be positive"));
        }
        if amount > self.denomination {
            return Err(PoolError::InvalidAmount(
                "deposit exceeds the pool denomination",
            ));
        }
        Ok(())
    }

    fn leaf<H: FieldHasher>(
        &self,
        hasher: &H,
        commitment: Fr,
        accounting: &FeeAccounting,
        amount: U256,
    ) -> Result<Fr, PoolError> {
        Ok(app_commitment(
            hasher,
            commitment,
            u256_to_field(accounting.fees_accrued),
            u256_to_field(amount),
        )?)
    }

    fn shares_for(&self, amount: U256) -> U256 {
        amount
    }

    fn settle(
        &self,
        inputs: &PublicInputs,
        accounting: &FeeAccounting,
    ) -> Result<Settlement, PoolError> {
        let claim = Self::claim(inputs)?;
        if claim.share_amount.is_zero() {
            return Err(PoolError::InvalidAmount("share amount must be positive"));
        }
        if claim.share_amount > accounting.total_shares {
            return Err(PoolError::InvalidAmount(
                "share amount exceeds outstanding shares",
            ));
        }
        if inputs.fee > claim.share_amount {
            return Err(PoolError::InvalidFee("fee exceeds share amount"));
        }

        let reward = Self::reward(claim.share_amount, claim.fees_accrued, accounting)?;
        let gross = claim
            .share_amount
            .checked_add(reward)
            .ok_or(PoolError::InvalidAmount("payout overflow"))?;
        Settlement::split(gross, reward, claim.share_amount, inputs.fee, inputs.refund)
    }
}
