use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;
use std::collections::BTreeMap;

use crate::{
    constants::{MAX_COLLATERAL_ASSETS, MAX_TRACKED_ACCOUNTS},
    error::EngineError,
    state::AssetRegistry,
};

/// Persistent ledger state: who deposited which collateral, and how much
/// debt is issued against it.
///
/// The engine owns this exclusively; balances are only reachable through
/// the credit/debit primitives below and the engine operations built on
/// them.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct LedgerState {
    /// Account discriminator
    pub discriminator: [u8; 8],

    /// Is initialized
    pub is_initialized: bool,

    /// Authority that initialized the ledger
    pub authority: Pubkey,

    /// Accepted assets and their price feeds, fixed at initialization
    pub registry: AssetRegistry,

    /// account -> asset -> token-native amount
    pub collateral: BTreeMap<Pubkey, BTreeMap<Pubkey, u128>>,

    /// account -> unit-of-account debt (18-decimal fixed point)
    pub debt_issued: BTreeMap<Pubkey, u128>,

    /// Mirror of the debt asset supply issued through this ledger
    pub total_debt_supply: u128,
}

impl LedgerState {
    pub const DISCRIMINATOR: [u8; 8] = *b"COLLEDGR";

    pub const LEN: usize = 8 + // discriminator
        1 + // is_initialized
        32 + // authority
        4 + MAX_COLLATERAL_ASSETS * 32 + // registry assets vec
        4 + MAX_COLLATERAL_ASSETS * 64 + // registry asset -> feed map
        4 + MAX_TRACKED_ACCOUNTS * (32 + 4 + MAX_COLLATERAL_ASSETS * 48) + // collateral
        4 + MAX_TRACKED_ACCOUNTS * 48 + // debt_issued
        16 + // total_debt_supply
        128; // padding for growth

    pub fn new(authority: Pubkey, registry: AssetRegistry) -> Self {
        Self {
            discriminator: Self::DISCRIMINATOR,
            is_initialized: true,
            authority,
            registry,
            collateral: BTreeMap::new(),
            debt_issued: BTreeMap::new(),
            total_debt_supply: 0,
        }
    }

    /// Validate discriminator and initialization flag after a load.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.discriminator != Self::DISCRIMINATOR {
            return Err(EngineError::AccountNotInitialized);
        }
        if !self.is_initialized {
            return Err(EngineError::AccountNotInitialized);
        }
        Ok(())
    }

    pub fn collateral_balance(&self, account: &Pubkey, asset: &Pubkey) -> u128 {
        self.collateral
            .get(account)
            .and_then(|per_asset| per_asset.get(asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn debt_of(&self, account: &Pubkey) -> u128 {
        self.debt_issued.get(account).copied().unwrap_or(0)
    }

    /// Infallible credit; also used to undo a debit on a failure path.
    /// Saturating because a u128 token balance cannot overflow in practice.
    pub(crate) fn credit_collateral(&mut self, account: &Pubkey, asset: &Pubkey, amount: u128) {
        let balance = self
            .collateral
            .entry(*account)
            .or_default()
            .entry(*asset)
            .or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub(crate) fn debit_collateral(
        &mut self,
        account: &Pubkey,
        asset: &Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        let balance = self
            .collateral
            .get_mut(account)
            .and_then(|per_asset| per_asset.get_mut(asset))
            .ok_or(EngineError::InsufficientBalance)?;
        *balance = balance
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientBalance)?;
        Ok(())
    }

    /// Infallible credit; also used to undo a debit on a failure path.
    pub(crate) fn credit_debt(&mut self, account: &Pubkey, amount: u128) {
        let debt = self.debt_issued.entry(*account).or_insert(0);
        *debt = debt.saturating_add(amount);
    }

    pub(crate) fn debit_debt(&mut self, account: &Pubkey, amount: u128) -> Result<(), EngineError> {
        let debt = self
            .debt_issued
            .get_mut(account)
            .ok_or(EngineError::InsufficientBalance)?;
        *debt = debt
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientBalance)?;
        Ok(())
    }

    /// Undo helper for a debt credit taken back on a failure path.
    pub(crate) fn rollback_debt(&mut self, account: &Pubkey, amount: u128) {
        if let Some(debt) = self.debt_issued.get_mut(account) {
            *debt = debt.saturating_sub(amount);
        }
    }
}
