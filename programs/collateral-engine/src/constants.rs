//! Protocol constants.
//!
//! All amounts and the unit of account use 18-decimal fixed point; price
//! feeds report 8-decimal prices and are scaled up by
//! `ADDITIONAL_FEED_PRECISION` before any valuation math.

/// 18-decimal fixed point unit (1.0).
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Price feeds report 8 decimals.
pub const FEED_PRECISION: u128 = 100_000_000;

/// Scales an 8-decimal feed price up to the 18-decimal convention.
pub const ADDITIONAL_FEED_PRECISION: u128 = 10_000_000_000;

/// Collateral counts at 50% of its priced value when computing health.
pub const LIQUIDATION_THRESHOLD: u128 = 50;
pub const LIQUIDATION_PRECISION: u128 = 100;

/// Liquidators receive a 10% collateral surcharge on the covered debt.
pub const LIQUIDATION_BONUS: u128 = 10;

/// Accounts with a health factor below 1.0 are liquidatable.
pub const MIN_HEALTH_FACTOR: u128 = PRECISION;

/// Price rounds older than 3 hours are rejected.
pub const PRICE_STALENESS_TIMEOUT: i64 = 3 * 60 * 60;

/// Registry size cap, bounds the ledger account allocation.
pub const MAX_COLLATERAL_ASSETS: usize = 16;

/// Tracked accounts cap used for ledger account sizing.
pub const MAX_TRACKED_ACCOUNTS: usize = 256;
