use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

/// Observable ledger events for indexers and tests.
///
/// Events are appended only after an operation has fully succeeded; a
/// rolled-back operation leaves no trace in the log.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    CollateralDeposited {
        account: Pubkey,
        asset: Pubkey,
        amount: u128,
    },
    /// Covers both self-redemption (`from == to`) and liquidation seizure
    /// (`from` is the debtor, `to` the liquidator).
    CollateralRedeemed {
        asset: Pubkey,
        from: Pubkey,
        to: Pubkey,
        amount: u128,
    },
}
