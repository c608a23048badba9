//! In-memory pool simulation.
//!
//! Plays every party of the protocol against an [`InMemoryLedger`]: a
//! depositor funds N notes, then a relayer submits a withdrawal for each of
//! them, proven with the transparent witness.

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context};
use innocent_lib::crypto::field_to_hex;
use innocent_lib::{
    AssetLedger, DepositPolicy, FixedDenomination, InMemoryLedger, Note, PoolConfig,
    PoolSnapshot, PoolVariant, PoseidonHasher, PublicInputs, ShareClaim, SharesWithFees,
    ShieldedPool, SignalSchema, TransparentVerifier, WithdrawRequest, WithdrawWitness,
};
use tracing::info;

/// Pool custody account
pub const POOL_ADDRESS: Address = Address::repeat_byte(0x77);
/// Account funding the deposits
pub const DEPOSITOR: Address = Address::repeat_byte(0x11);
/// Account receiving the withdrawals
pub const RECIPIENT: Address = Address::repeat_byte(0x22);
/// Relayer submitting the withdrawals and collecting fees
pub const RELAYER: Address = Address::repeat_byte(0x33);
/// Source of the fee income behind index growth
pub const FEE_PAYER: Address = Address::repeat_byte(0x44);

type SimulatedPool<P> = ShieldedPool<P, PoseidonHasher, TransparentVerifier<PoseidonHasher>>;

/// Simulation knobs on top of the pool config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParams {
    pub deposits: usize,
    /// Per-deposit amount for the shares variant; defaults to the denomination.
    pub amount: Option<u128>,
    /// Relayer fee per withdrawal.
    pub fee: u128,
    /// Accrued-fee index growth applied between deposits and withdrawals.
    pub fees_growth: u128,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            deposits: 1,
            amount: None,
            fee: 0,
            fees_growth: 0,
        }
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub variant: PoolVariant,
    pub deposits: usize,
    pub withdrawals: usize,
    /// Final root as `0x` hex.
    pub root: String,
    pub depositor_balance: U256,
    pub recipient_balance: U256,
    pub relayer_balance: U256,
    pub pool_balance: U256,
    pub fees_accrued: U256,
    pub total_shares: U256,
    pub snapshot: PoolSnapshot,
}

struct DepositedNote {
    note: Note,
    leaf_index: u64,
    claim: Option<ShareClaim>,
}

fn new_pool<P: DepositPolicy>(policy: P, config: &PoolConfig) -> anyhow::Result<SimulatedPool<P>> {
    let schema = policy.schema();
    let pool = ShieldedPool::new(
        POOL_ADDRESS,
        policy,
        PoseidonHasher,
        TransparentVerifier::new(PoseidonHasher, schema, config.levels),
        config.levels,
        config.root_history_size,
    )?;
    Ok(pool)
}

fn funded_ledger(amount: U256, deposits: usize) -> anyhow::Result<InMemoryLedger> {
    let total = amount
        .checked_mul(U256::from(deposits))
        .context("deposit total overflows")?;
    let mut ledger = InMemoryLedger::new();
    ledger.mint(DEPOSITOR, total)?;
    ledger.approve(DEPOSITOR, POOL_ADDRESS, total);
    Ok(ledger)
}

fn deposit_all<P: DepositPolicy>(
    pool: &mut SimulatedPool<P>,
    ledger: &mut InMemoryLedger,
    count: usize,
    amount: U256,
    on_step: &mut dyn FnMut(&str),
) -> anyhow::Result<Vec<DepositedNote>> {
    let mut notes = Vec::with_capacity(count);
    for i in 0..count {
        let note = Note::new();
        let claim = match pool.policy().schema() {
            SignalSchema::BaseV1 => None,
            SignalSchema::SharesV2 => Some(ShareClaim {
                fees_accrued: pool.fees_accrued(),
                share_amount: amount,
            }),
        };
        let commitment = note.commitment(pool.hasher())?;
        let event = pool
            .deposit(ledger, DEPOSITOR, commitment, amount)
            .with_context(|| format!("deposit {} failed", i + 1))?;
        on_step(&format!("deposit {} -> leaf {}", i + 1, event.leaf_index));
        notes.push(DepositedNote {
            note,
            leaf_index: event.leaf_index,
            claim,
        });
    }
    Ok(notes)
}

fn withdraw_all<P: DepositPolicy>(
    pool: &mut SimulatedPool<P>,
    ledger: &mut InMemoryLedger,
    notes: &[DepositedNote],
    fee: U256,
    on_step: &mut dyn FnMut(&str),
) -> anyhow::Result<usize> {
    let schema = pool.policy().schema();
    for (i, deposited) in notes.iter().enumerate() {
        let inputs = PublicInputs {
            root: pool.root(),
            nullifier_hash: deposited.note.nullifier_hash(pool.hasher())?,
            recipient: RECIPIENT,
            relayer: RELAYER,
            fee,
            refund: U256::ZERO,
            share_claim: deposited.claim,
        };
        let proof = WithdrawWitness::prove(
            &deposited.note,
            pool.path(deposited.leaf_index)?,
            schema,
            &inputs,
        )?;
        let event = pool
            .withdraw(ledger, RELAYER, &WithdrawRequest { proof, inputs })
            .with_context(|| format!("withdrawal {} failed", i + 1))?;
        on_step(&format!("withdrawal {} -> {} to recipient", i + 1, event.amount));
    }
    Ok(notes.len())
}

fn report<P: DepositPolicy>(
    pool: &SimulatedPool<P>,
    ledger: &InMemoryLedger,
    variant: PoolVariant,
    deposits: usize,
    withdrawals: usize,
) -> SimulationReport {
    SimulationReport {
        variant,
        deposits,
        withdrawals,
        root: field_to_hex(&pool.root()),
        depositor_balance: ledger.balance_of(DEPOSITOR),
        recipient_balance: ledger.balance_of(RECIPIENT),
        relayer_balance: ledger.balance_of(RELAYER),
        pool_balance: ledger.balance_of(POOL_ADDRESS),
        fees_accrued: pool.fees_accrued(),
        total_shares: pool.total_shares(),
        snapshot: pool.snapshot(),
    }
}

/// Run a full deposit/withdraw cycle on a fresh pool.
///
/// `on_step` receives a short progress message after every deposit and
/// withdrawal.
pub fn run_simulation(
    config: &PoolConfig,
    params: &SimulationParams,
    on_step: &mut dyn FnMut(&str),
) -> anyhow::Result<SimulationReport> {
    config.validate()?;
    if params.deposits == 0 {
        bail!("at least one deposit is required");
    }
    let denomination = U256::from(config.denomination);
    let fee = U256::from(params.fee);

    match config.variant {
        PoolVariant::Base => {
            if params.fees_growth != 0 {
                bail!("fee growth requires the shares variant");
            }
            let mut pool = new_pool(FixedDenomination::new(denomination), config)?;
            let mut ledger = funded_ledger(denomination, params.deposits)?;

            let notes = deposit_all(&mut pool, &mut ledger, params.deposits, denomination, on_step)?;
            let withdrawals = withdraw_all(&mut pool, &mut ledger, &notes, fee, on_step)?;

            info!(deposits = notes.len(), withdrawals, "base simulation finished");
            Ok(report(&pool, &ledger, config.variant, notes.len(), withdrawals))
        }
        PoolVariant::Shares => {
            let amount = U256::from(params.amount.unwrap_or(config.denomination));
            let mut pool = new_pool(SharesWithFees::new(denomination), config)?;
            let mut ledger = funded_ledger(amount, params.deposits)?;

            let notes = deposit_all(&mut pool, &mut ledger, params.deposits, amount, on_step)?;

            if params.fees_growth != 0 {
                let growth = U256::from(params.fees_growth);
                let income = SharesWithFees::growth_funding(pool.total_shares(), growth)?;
                ledger.mint(FEE_PAYER, income)?;
                ledger.approve(FEE_PAYER, POOL_ADDRESS, income);
                pool.add_fees_growth(&mut ledger, FEE_PAYER, growth)
                    .context("fee growth failed")?;
                on_step(&format!("fee index +{growth} ({income} income)"));
                info!(%growth, %income, "applied fee growth");
            }

            let withdrawals = withdraw_all(&mut pool, &mut ledger, &notes, fee, on_step)?;

            info!(deposits = notes.len(), withdrawals, "shares simulation finished");
            Ok(report(&pool, &ledger, config.variant, notes.len(), withdrawals))
        }
    }
}
