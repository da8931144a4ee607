//! Price feed integration with a staleness guard.
//!
//! The ledger never reads a feed directly: every valuation goes through
//! [`OracleAdapter`], which rejects rounds older than
//! [`PRICE_STALENESS_TIMEOUT`] so a dead feed fails the whole enclosing
//! operation instead of silently pricing with outdated data.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::{
    constants::{ADDITIONAL_FEED_PRECISION, PRECISION, PRICE_STALENESS_TIMEOUT},
    error::EngineError,
    math,
};

/// A single round reported by a price feed.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRound {
    pub round_id: u64,
    /// 8-decimal unit-of-account price of one whole token.
    pub price: i64,
    pub started_at: i64,
    pub updated_at: i64,
    pub answered_in_round: u64,
}

/// Source of price rounds, keyed by feed id.
///
/// The on-chain implementation reads [`PriceFeedAccount`] data; tests use an
/// in-memory map.
pub trait PriceSource {
    fn latest_round_data(&self, feed: &Pubkey) -> Result<PriceRound, EngineError>;
}

/// Borsh layout of an on-chain price feed account.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct PriceFeedAccount {
    pub discriminator: [u8; 8],
    pub is_initialized: bool,
    pub round: PriceRound,
}

impl PriceFeedAccount {
    pub const DISCRIMINATOR: [u8; 8] = *b"PRICEFD\0";

    pub const LEN: usize = 8 + // discriminator
        1 + // is_initialized
        8 + // round_id
        8 + // price
        8 + // started_at
        8 + // updated_at
        8; // answered_in_round
}

/// Converts between token-native amounts and unit-of-account value at the
/// latest fresh price.
pub struct OracleAdapter<'a, P: PriceSource> {
    source: &'a P,
    now: i64,
}

impl<'a, P: PriceSource> OracleAdapter<'a, P> {
    pub fn new(source: &'a P, now: i64) -> Self {
        Self { source, now }
    }

    /// Latest price scaled to 18 decimals, or an error if the round is
    /// stale or non-positive.
    fn fresh_scaled_price(&self, feed: &Pubkey) -> Result<u128, EngineError> {
        let round = self.source.latest_round_data(feed)?;
        if self.now.saturating_sub(round.updated_at) > PRICE_STALENESS_TIMEOUT {
            return Err(EngineError::StalePrice);
        }
        if round.price <= 0 {
            return Err(EngineError::InvalidPrice);
        }
        (round.price as u128)
            .checked_mul(ADDITIONAL_FEED_PRECISION)
            .ok_or(EngineError::ArithmeticOverflow)
    }

    /// Unit-of-account value of `amount` native units of the asset behind
    /// `feed`. Truncating.
    pub fn usd_value(&self, feed: &Pubkey, amount: u128) -> Result<u128, EngineError> {
        let price = self.fresh_scaled_price(feed)?;
        math::mul_div(price, amount, PRECISION)
    }

    /// Native token amount worth `usd_amount`. Truncating, so round trips
    /// through [`Self::usd_value`] may lose up to one native unit.
    pub fn token_amount_from_usd(
        &self,
        feed: &Pubkey,
        usd_amount: u128,
    ) -> Result<u128, EngineError> {
        let price = self.fresh_scaled_price(feed)?;
        math::mul_div(usd_amount, PRECISION, price)
    }
}
