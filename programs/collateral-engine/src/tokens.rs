//! Collaborator contracts at the engine boundary.
//!
//! Implementations report success as a boolean, matching the external
//! token interfaces; the engine maps `false` to `TransferFailed` or
//! `MintFailed` and rolls back its own ledger mutation.

use solana_program::pubkey::Pubkey;

/// Custody of the accepted collateral assets.
pub trait CollateralBank {
    /// Move `amount` of `asset` from `from` into custody.
    fn transfer_in(&mut self, asset: &Pubkey, from: &Pubkey, amount: u128) -> bool;

    /// Move `amount` of `asset` out of custody to `to`.
    fn transfer_out(&mut self, asset: &Pubkey, to: &Pubkey, amount: u128) -> bool;
}

/// The single debt asset whose supply this ledger backs.
pub trait DebtToken {
    /// Mint `amount` to `to`.
    fn mint(&mut self, to: &Pubkey, amount: u128) -> bool;

    /// Pull `amount` from `payer` into custody ahead of a burn.
    fn transfer_from(&mut self, payer: &Pubkey, amount: u128) -> bool;

    /// Burn `amount` held in custody.
    fn burn(&mut self, amount: u128);
}
