use std::collections::BTreeMap;

use borsh::BorshDeserialize;
use solana_program::pubkey::Pubkey;
use solana_program_test::*;
use solana_sdk::{
    signature::{Keypair, Signer},
    system_instruction,
    transaction::Transaction,
};

use collateral_engine::{
    constants::{MIN_HEALTH_FACTOR, PRECISION, PRICE_STALENESS_TIMEOUT},
    engine::CollateralEngine,
    error::EngineError,
    events::LedgerEvent,
    instructions,
    oracle::{PriceRound, PriceSource},
    state::{AssetRegistry, LedgerState},
    tokens::{CollateralBank, DebtToken},
};

const NOW: i64 = 1_700_000_000;
const PRICE_2000: i64 = 2_000_0000_0000; // $2000, 8 decimals
const PRICE_1800: i64 = 1_800_0000_0000;
const PRICE_900: i64 = 900_0000_0000;

// ----------------------------------------------------------------------
// Mock collaborators
// ----------------------------------------------------------------------

#[derive(Default)]
struct MockBank {
    /// (asset, holder) -> external balance
    balances: BTreeMap<(Pubkey, Pubkey), u128>,
    /// asset -> amount held in custody
    custody: BTreeMap<Pubkey, u128>,
    fail_transfers: bool,
}

impl MockBank {
    fn fund(&mut self, asset: Pubkey, holder: Pubkey, amount: u128) {
        *self.balances.entry((asset, holder)).or_insert(0) += amount;
    }

    fn balance(&self, asset: &Pubkey, holder: &Pubkey) -> u128 {
        self.balances.get(&(*asset, *holder)).copied().unwrap_or(0)
    }

    fn custody_of(&self, asset: &Pubkey) -> u128 {
        self.custody.get(asset).copied().unwrap_or(0)
    }
}

impl CollateralBank for MockBank {
    fn transfer_in(&mut self, asset: &Pubkey, from: &Pubkey, amount: u128) -> bool {
        if self.fail_transfers {
            return false;
        }
        let balance = self.balances.entry((*asset, *from)).or_insert(0);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        *self.custody.entry(*asset).or_insert(0) += amount;
        true
    }

    fn transfer_out(&mut self, asset: &Pubkey, to: &Pubkey, amount: u128) -> bool {
        if self.fail_transfers {
            return false;
        }
        let held = self.custody.entry(*asset).or_insert(0);
        if *held < amount {
            return false;
        }
        *held -= amount;
        *self.balances.entry((*asset, *to)).or_insert(0) += amount;
        true
    }
}

#[derive(Default)]
struct MockDebtToken {
    balances: BTreeMap<Pubkey, u128>,
    custody: u128,
    supply: u128,
    fail_mint: bool,
    fail_transfer: bool,
}

impl MockDebtToken {
    fn balance(&self, holder: &Pubkey) -> u128 {
        self.balances.get(holder).copied().unwrap_or(0)
    }
}

impl DebtToken for MockDebtToken {
    fn mint(&mut self, to: &Pubkey, amount: u128) -> bool {
        if self.fail_mint {
            return false;
        }
        *self.balances.entry(*to).or_insert(0) += amount;
        self.supply += amount;
        true
    }

    fn transfer_from(&mut self, payer: &Pubkey, amount: u128) -> bool {
        if self.fail_transfer {
            return false;
        }
        let balance = self.balances.entry(*payer).or_insert(0);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        self.custody += amount;
        true
    }

    fn burn(&mut self, amount: u128) {
        self.custody = self.custody.saturating_sub(amount);
        self.supply = self.supply.saturating_sub(amount);
    }
}

struct Feeds(BTreeMap<Pubkey, PriceRound>);

impl Feeds {
    fn set_price(&mut self, feed: Pubkey, price: i64, updated_at: i64) {
        let round_id = self.0.get(&feed).map(|r| r.round_id + 1).unwrap_or(1);
        self.0.insert(
            feed,
            PriceRound {
                round_id,
                price,
                started_at: updated_at,
                updated_at,
                answered_in_round: round_id,
            },
        );
    }
}

impl PriceSource for Feeds {
    fn latest_round_data(&self, feed: &Pubkey) -> Result<PriceRound, EngineError> {
        self.0
            .get(feed)
            .copied()
            .ok_or(EngineError::AccountNotInitialized)
    }
}

// ----------------------------------------------------------------------
// Test harness
// ----------------------------------------------------------------------

struct World {
    engine: CollateralEngine,
    bank: MockBank,
    debt: MockDebtToken,
    feeds: Feeds,
    asset: Pubkey,
    feed: Pubkey,
}

fn world() -> World {
    let asset = Pubkey::new_unique();
    let feed = Pubkey::new_unique();
    let registry = AssetRegistry::new(vec![asset], vec![feed]).unwrap();
    let state = LedgerState::new(Pubkey::new_unique(), registry);

    let mut feeds = Feeds(BTreeMap::new());
    feeds.set_price(feed, PRICE_2000, NOW);

    World {
        engine: CollateralEngine::new(state),
        bank: MockBank::default(),
        debt: MockDebtToken::default(),
        feeds,
        asset,
        feed,
    }
}

/// Funds `account` with `units` whole tokens and deposits them all.
fn fund_and_deposit(w: &mut World, account: Pubkey, units: u128) {
    let amount = units * PRECISION;
    w.bank.fund(w.asset, account, amount);
    w.engine
        .deposit_collateral(&mut w.bank, account, w.asset, amount)
        .unwrap();
}

// ----------------------------------------------------------------------
// Deposit / redeem
// ----------------------------------------------------------------------

#[test]
fn test_zero_amounts_rejected() {
    let mut w = world();
    let account = Pubkey::new_unique();

    assert_eq!(
        w.engine
            .deposit_collateral(&mut w.bank, account, w.asset, 0),
        Err(EngineError::InvalidArgument)
    );
    assert_eq!(
        w.engine
            .redeem_collateral(&mut w.bank, &w.feeds, NOW, account, w.asset, 0),
        Err(EngineError::InvalidArgument)
    );
    assert_eq!(
        w.engine.mint_debt(&mut w.debt, &w.feeds, NOW, account, 0),
        Err(EngineError::InvalidArgument)
    );
    assert_eq!(
        w.engine.burn_debt(&mut w.debt, 0, account, account),
        Err(EngineError::InvalidArgument)
    );
    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            account,
            w.asset,
            Pubkey::new_unique(),
            0
        ),
        Err(EngineError::InvalidArgument)
    );
}

#[test]
fn test_deposit_unregistered_asset_rejected() {
    let mut w = world();
    let account = Pubkey::new_unique();
    let stranger = Pubkey::new_unique();
    w.bank.fund(stranger, account, PRECISION);

    assert_eq!(
        w.engine
            .deposit_collateral(&mut w.bank, account, stranger, PRECISION),
        Err(EngineError::NotAllowedAsset)
    );
}

#[test]
fn test_deposit_credits_balance_and_emits_event() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);

    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
    assert_eq!(w.bank.custody_of(&w.asset), 10 * PRECISION);
    assert_eq!(w.bank.balance(&w.asset, &account), 0);
    assert_eq!(
        w.engine.take_events(),
        vec![LedgerEvent::CollateralDeposited {
            account,
            asset: w.asset,
            amount: 10 * PRECISION,
        }]
    );
}

#[test]
fn test_failed_deposit_transfer_leaves_no_trace() {
    let mut w = world();
    let account = Pubkey::new_unique();
    // Nothing funded, so custody cannot confirm the transfer.
    assert_eq!(
        w.engine
            .deposit_collateral(&mut w.bank, account, w.asset, PRECISION),
        Err(EngineError::TransferFailed)
    );
    assert_eq!(w.engine.collateral_balance(&account, &w.asset), 0);
    assert!(w.engine.take_events().is_empty());
}

#[test]
fn test_redeem_returns_collateral_when_healthy() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 8_000 * PRECISION)
        .unwrap();

    // 9 units at $2000 = $18000, adjusted $9000, against $8000 debt.
    w.engine
        .redeem_collateral(&mut w.bank, &w.feeds, NOW, account, w.asset, PRECISION)
        .unwrap();

    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        9 * PRECISION
    );
    assert_eq!(w.bank.balance(&w.asset, &account), PRECISION);
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account).unwrap(),
        1_125_000_000_000_000_000
    );
}

#[test]
fn test_redeem_breaking_health_factor_rolls_back() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 8_000 * PRECISION)
        .unwrap();
    w.engine.take_events();

    // 7 units left would be $14000, adjusted $7000, under $8000 debt.
    assert_eq!(
        w.engine
            .redeem_collateral(&mut w.bank, &w.feeds, NOW, account, w.asset, 3 * PRECISION),
        Err(EngineError::HealthFactorBroken(875_000_000_000_000_000))
    );

    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
    assert_eq!(w.bank.custody_of(&w.asset), 10 * PRECISION);
    assert!(w.engine.take_events().is_empty());
}

#[test]
fn test_redeem_more_than_deposited_fails() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);

    assert_eq!(
        w.engine
            .redeem_collateral(&mut w.bank, &w.feeds, NOW, account, w.asset, 11 * PRECISION),
        Err(EngineError::InsufficientBalance)
    );
    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
}

// ----------------------------------------------------------------------
// Mint / burn
// ----------------------------------------------------------------------

#[test]
fn test_mint_to_exact_health_boundary() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);

    // $20000 of collateral supports exactly $10000 of debt.
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 10_000 * PRECISION)
        .unwrap();
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account).unwrap(),
        MIN_HEALTH_FACTOR
    );
    assert_eq!(w.debt.balance(&account), 10_000 * PRECISION);
    assert_eq!(w.engine.total_debt_supply(), 10_000 * PRECISION);
}

#[test]
fn test_mint_one_wei_past_boundary_rolls_back() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);

    assert_eq!(
        w.engine
            .mint_debt(&mut w.debt, &w.feeds, NOW, account, 10_000 * PRECISION + 1),
        Err(EngineError::HealthFactorBroken(999_999_999_999_999_999))
    );
    assert_eq!(w.engine.debt_issued(&account), 0);
    assert_eq!(w.engine.total_debt_supply(), 0);
    assert_eq!(w.debt.balance(&account), 0);
}

#[test]
fn test_mint_failure_rolls_back_issued_debt() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.debt.fail_mint = true;

    assert_eq!(
        w.engine
            .mint_debt(&mut w.debt, &w.feeds, NOW, account, 1_000 * PRECISION),
        Err(EngineError::MintFailed)
    );
    assert_eq!(w.engine.debt_issued(&account), 0);
    assert_eq!(w.engine.total_debt_supply(), 0);
}

#[test]
fn test_mint_without_collateral_fails() {
    let mut w = world();
    let account = Pubkey::new_unique();

    assert_eq!(
        w.engine.mint_debt(&mut w.debt, &w.feeds, NOW, account, 1),
        Err(EngineError::HealthFactorBroken(0))
    );
}

#[test]
fn test_burn_retires_only_the_named_debtors_debt() {
    let mut w = world();
    let debtor = Pubkey::new_unique();
    let payer = Pubkey::new_unique();
    fund_and_deposit(&mut w, debtor, 10);
    fund_and_deposit(&mut w, payer, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, debtor, 4_000 * PRECISION)
        .unwrap();
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, payer, 3_000 * PRECISION)
        .unwrap();

    // A third party retires part of the debtor's position.
    w.engine
        .burn_debt(&mut w.debt, 1_000 * PRECISION, debtor, payer)
        .unwrap();

    assert_eq!(w.engine.debt_issued(&debtor), 3_000 * PRECISION);
    assert_eq!(w.engine.debt_issued(&payer), 3_000 * PRECISION);
    assert_eq!(w.debt.balance(&payer), 2_000 * PRECISION);
    assert_eq!(w.debt.balance(&debtor), 4_000 * PRECISION);
    assert_eq!(w.engine.total_debt_supply(), 6_000 * PRECISION);
    assert_eq!(w.debt.supply, 6_000 * PRECISION);
}

#[test]
fn test_burn_more_than_issued_fails() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 1_000 * PRECISION)
        .unwrap();

    assert_eq!(
        w.engine
            .burn_debt(&mut w.debt, 1_000 * PRECISION + 1, account, account),
        Err(EngineError::InsufficientBalance)
    );
    assert_eq!(w.engine.debt_issued(&account), 1_000 * PRECISION);
}

#[test]
fn test_burn_rolls_back_when_funding_pull_fails() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 1_000 * PRECISION)
        .unwrap();
    w.debt.fail_transfer = true;

    assert_eq!(
        w.engine
            .burn_debt(&mut w.debt, 500 * PRECISION, account, account),
        Err(EngineError::TransferFailed)
    );
    assert_eq!(w.engine.debt_issued(&account), 1_000 * PRECISION);
    assert_eq!(w.engine.total_debt_supply(), 1_000 * PRECISION);
    assert_eq!(w.debt.balance(&account), 1_000 * PRECISION);
}

// ----------------------------------------------------------------------
// Price staleness
// ----------------------------------------------------------------------

#[test]
fn test_stale_price_fails_valuing_operations() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 1_000 * PRECISION)
        .unwrap();

    w.feeds
        .set_price(w.feed, PRICE_2000, NOW - PRICE_STALENESS_TIMEOUT - 1);

    assert_eq!(
        w.engine
            .mint_debt(&mut w.debt, &w.feeds, NOW, account, PRECISION),
        Err(EngineError::StalePrice)
    );
    assert_eq!(w.engine.debt_issued(&account), 1_000 * PRECISION);
    assert_eq!(
        w.engine
            .redeem_collateral(&mut w.bank, &w.feeds, NOW, account, w.asset, PRECISION),
        Err(EngineError::StalePrice)
    );
    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
    assert_eq!(
        w.engine.usd_value(&w.feeds, NOW, &w.asset, PRECISION),
        Err(EngineError::StalePrice)
    );
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account),
        Err(EngineError::StalePrice)
    );
}

#[test]
fn test_price_exactly_at_staleness_boundary_accepted() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);

    w.feeds
        .set_price(w.feed, PRICE_2000, NOW - PRICE_STALENESS_TIMEOUT);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, PRECISION)
        .unwrap();
}

// ----------------------------------------------------------------------
// Health factor and valuation queries
// ----------------------------------------------------------------------

#[test]
fn test_health_factor_without_debt_is_max() {
    let mut w = world();
    let account = Pubkey::new_unique();
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account).unwrap(),
        u128::MAX
    );

    fund_and_deposit(&mut w, account, 10);
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account).unwrap(),
        u128::MAX
    );
}

#[test]
fn test_health_factor_formula() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 8_000 * PRECISION)
        .unwrap();

    // $20000 collateral, adjusted $10000, over $8000 debt.
    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &account).unwrap(),
        1_250_000_000_000_000_000
    );
    assert_eq!(
        w.engine
            .account_information(&w.feeds, NOW, &account)
            .unwrap(),
        (8_000 * PRECISION, 20_000 * PRECISION)
    );
}

#[test]
fn test_calculate_health_factor_is_pure() {
    assert_eq!(
        CollateralEngine::calculate_health_factor(0, 123).unwrap(),
        u128::MAX
    );
    assert_eq!(
        CollateralEngine::calculate_health_factor(8_000 * PRECISION, 20_000 * PRECISION).unwrap(),
        1_250_000_000_000_000_000
    );
}

// ----------------------------------------------------------------------
// Liquidation
// ----------------------------------------------------------------------

/// Debtor at 10 units / $10000 debt, liquidator at 10 units / $5000 debt,
/// then the price drops from $2000 to $1800 so only the debtor breaks.
fn liquidation_world() -> (World, Pubkey, Pubkey) {
    let mut w = world();
    let debtor = Pubkey::new_unique();
    let liquidator = Pubkey::new_unique();
    fund_and_deposit(&mut w, debtor, 10);
    fund_and_deposit(&mut w, liquidator, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, debtor, 10_000 * PRECISION)
        .unwrap();
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, liquidator, 5_000 * PRECISION)
        .unwrap();
    w.engine.take_events();

    w.feeds.set_price(w.feed, PRICE_1800, NOW);
    (w, debtor, liquidator)
}

#[test]
fn test_liquidating_healthy_debtor_rejected() {
    let mut w = world();
    let debtor = Pubkey::new_unique();
    let liquidator = Pubkey::new_unique();
    fund_and_deposit(&mut w, debtor, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, debtor, 8_000 * PRECISION)
        .unwrap();

    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            1_000 * PRECISION
        ),
        Err(EngineError::HealthFactorOk)
    );
}

#[test]
fn test_liquidation_pays_bonus_and_improves_debtor() {
    let (mut w, debtor, liquidator) = liquidation_world();

    assert_eq!(
        w.engine.health_factor(&w.feeds, NOW, &debtor).unwrap(),
        900_000_000_000_000_000
    );

    w.engine
        .liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            5_000 * PRECISION,
        )
        .unwrap();

    // $5000 at $1800 is 2.777... units, plus the 10% bonus.
    let base = 2_777_777_777_777_777_777u128;
    let bonus = 277_777_777_777_777_777u128;
    let seized = base + bonus;

    assert_eq!(w.bank.balance(&w.asset, &liquidator), seized);
    assert_eq!(
        w.engine.collateral_balance(&debtor, &w.asset),
        10 * PRECISION - seized
    );
    assert_eq!(w.engine.debt_issued(&debtor), 5_000 * PRECISION);
    assert_eq!(w.debt.balance(&liquidator), 0);
    assert_eq!(w.engine.total_debt_supply(), 10_000 * PRECISION);
    assert_eq!(w.debt.supply, 10_000 * PRECISION);

    let ending = w.engine.health_factor(&w.feeds, NOW, &debtor).unwrap();
    assert!(ending > 900_000_000_000_000_000);

    assert_eq!(
        w.engine.take_events(),
        vec![LedgerEvent::CollateralRedeemed {
            asset: w.asset,
            from: debtor,
            to: liquidator,
            amount: seized,
        }]
    );
}

#[test]
fn test_liquidation_covering_more_than_collateral_fails() {
    let (mut w, debtor, liquidator) = liquidation_world();
    w.feeds.set_price(w.feed, PRICE_900, NOW);

    // $10000 at $900 plus bonus is over 12 units against 10 deposited.
    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            10_000 * PRECISION
        ),
        Err(EngineError::InsufficientBalance)
    );
    assert_eq!(
        w.engine.collateral_balance(&debtor, &w.asset),
        10 * PRECISION
    );
    assert_eq!(w.engine.debt_issued(&debtor), 10_000 * PRECISION);
}

#[test]
fn test_liquidation_dust_cover_must_improve() {
    let (mut w, debtor, liquidator) = liquidation_world();

    // One wei of covered debt seizes nothing and leaves the health factor
    // at the same floor.
    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            1
        ),
        Err(EngineError::HealthFactorNotImproved)
    );
    assert_eq!(w.engine.debt_issued(&debtor), 10_000 * PRECISION);
    assert_eq!(
        w.engine.collateral_balance(&debtor, &w.asset),
        10 * PRECISION
    );
    assert!(w.engine.take_events().is_empty());
}

#[test]
fn test_insolvent_liquidator_rejected() {
    let mut w = world();
    let debtor = Pubkey::new_unique();
    let liquidator = Pubkey::new_unique();
    fund_and_deposit(&mut w, debtor, 10);
    fund_and_deposit(&mut w, liquidator, 10);
    // Both max out, so both break when the price drops.
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, debtor, 10_000 * PRECISION)
        .unwrap();
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, liquidator, 10_000 * PRECISION)
        .unwrap();
    w.feeds.set_price(w.feed, PRICE_1800, NOW);

    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            5_000 * PRECISION
        ),
        Err(EngineError::HealthFactorBroken(900_000_000_000_000_000))
    );
    assert_eq!(w.engine.debt_issued(&debtor), 10_000 * PRECISION);
    assert_eq!(
        w.engine.collateral_balance(&debtor, &w.asset),
        10 * PRECISION
    );
}

#[test]
fn test_liquidation_rolls_back_when_debt_pull_fails() {
    let (mut w, debtor, liquidator) = liquidation_world();
    // The liquidator has only 5000 of debt asset; covering more than that
    // passes the post-conditions but fails the funding pull.
    w.debt.fail_transfer = true;

    assert_eq!(
        w.engine.liquidate(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            liquidator,
            w.asset,
            debtor,
            5_000 * PRECISION
        ),
        Err(EngineError::TransferFailed)
    );
    assert_eq!(w.engine.debt_issued(&debtor), 10_000 * PRECISION);
    assert_eq!(
        w.engine.collateral_balance(&debtor, &w.asset),
        10 * PRECISION
    );
    assert_eq!(w.engine.total_debt_supply(), 15_000 * PRECISION);
}

// ----------------------------------------------------------------------
// Compositions
// ----------------------------------------------------------------------

#[test]
fn test_deposit_and_mint_in_one_operation() {
    let mut w = world();
    let account = Pubkey::new_unique();
    w.bank.fund(w.asset, account, 10 * PRECISION);

    w.engine
        .deposit_collateral_and_mint_debt(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            account,
            w.asset,
            10 * PRECISION,
            8_000 * PRECISION,
        )
        .unwrap();

    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
    assert_eq!(w.engine.debt_issued(&account), 8_000 * PRECISION);
    assert_eq!(w.debt.balance(&account), 8_000 * PRECISION);
}

#[test]
fn test_deposit_and_mint_unwinds_deposit_on_mint_failure() {
    let mut w = world();
    let account = Pubkey::new_unique();
    w.bank.fund(w.asset, account, 10 * PRECISION);

    assert_eq!(
        w.engine.deposit_collateral_and_mint_debt(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            account,
            w.asset,
            10 * PRECISION,
            10_001 * PRECISION,
        ),
        Err(EngineError::HealthFactorBroken(999_900_009_999_000_099))
    );

    // The deposit leg is unwound, custody and ledger both.
    assert_eq!(w.engine.collateral_balance(&account, &w.asset), 0);
    assert_eq!(w.bank.custody_of(&w.asset), 0);
    assert_eq!(w.bank.balance(&w.asset, &account), 10 * PRECISION);
    assert_eq!(w.engine.debt_issued(&account), 0);
    assert!(w.engine.take_events().is_empty());
}

#[test]
fn test_redeem_and_burn_in_one_operation() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 8_000 * PRECISION)
        .unwrap();

    w.engine
        .redeem_collateral_and_burn_debt(
            &mut w.bank,
            &mut w.debt,
            &w.feeds,
            NOW,
            account,
            w.asset,
            10 * PRECISION,
            8_000 * PRECISION,
        )
        .unwrap();

    assert_eq!(w.engine.collateral_balance(&account, &w.asset), 0);
    assert_eq!(w.engine.debt_issued(&account), 0);
    assert_eq!(w.engine.total_debt_supply(), 0);
    assert_eq!(w.debt.supply, 0);
    assert_eq!(w.bank.balance(&w.asset, &account), 10 * PRECISION);
}

#[test]
fn test_redeem_and_burn_unwinds_burn_on_redeem_failure() {
    let mut w = world();
    let account = Pubkey::new_unique();
    fund_and_deposit(&mut w, account, 10);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, account, 8_000 * PRECISION)
        .unwrap();

    // Burning $1000 still leaves $7000 of debt, which 5 remaining units
    // cannot support.
    let result = w.engine.redeem_collateral_and_burn_debt(
        &mut w.bank,
        &mut w.debt,
        &w.feeds,
        NOW,
        account,
        w.asset,
        5 * PRECISION,
        1_000 * PRECISION,
    );
    assert!(matches!(result, Err(EngineError::HealthFactorBroken(_))));

    assert_eq!(w.engine.debt_issued(&account), 8_000 * PRECISION);
    assert_eq!(w.engine.total_debt_supply(), 8_000 * PRECISION);
    assert_eq!(w.debt.balance(&account), 8_000 * PRECISION);
    assert_eq!(w.debt.supply, 8_000 * PRECISION);
    assert_eq!(
        w.engine.collateral_balance(&account, &w.asset),
        10 * PRECISION
    );
}

// ----------------------------------------------------------------------
// Global solvency
// ----------------------------------------------------------------------

#[test]
fn test_ledger_and_token_books_stay_in_sync() {
    let mut w = world();
    let alice = Pubkey::new_unique();
    let bob = Pubkey::new_unique();

    fund_and_deposit(&mut w, alice, 10);
    fund_and_deposit(&mut w, bob, 4);
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, alice, 7_000 * PRECISION)
        .unwrap();
    w.engine
        .mint_debt(&mut w.debt, &w.feeds, NOW, bob, 2_500 * PRECISION)
        .unwrap();
    w.engine
        .burn_debt(&mut w.debt, 1_500 * PRECISION, alice, alice)
        .unwrap();
    w.engine
        .redeem_collateral(&mut w.bank, &w.feeds, NOW, bob, w.asset, PRECISION)
        .unwrap();

    let issued = w.engine.debt_issued(&alice) + w.engine.debt_issued(&bob);
    assert_eq!(issued, 8_000 * PRECISION);
    assert_eq!(w.engine.total_debt_supply(), issued);
    assert_eq!(w.debt.supply, issued);

    let ledger_collateral = w.engine.collateral_balance(&alice, &w.asset)
        + w.engine.collateral_balance(&bob, &w.asset);
    assert_eq!(ledger_collateral, w.bank.custody_of(&w.asset));

    // Global solvency: priced collateral covers the issued supply.
    let priced = w
        .engine
        .account_collateral_value(&w.feeds, NOW, &alice)
        .unwrap()
        + w.engine
            .account_collateral_value(&w.feeds, NOW, &bob)
            .unwrap();
    assert!(priced >= w.engine.total_debt_supply());
}

// ----------------------------------------------------------------------
// On-chain initialization
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_initialize_engine_on_chain() {
    let program_id = collateral_engine::id();
    let program_test = ProgramTest::new(
        "collateral_engine",
        program_id,
        processor!(collateral_engine::processor::process_instruction),
    );

    let (mut banks_client, payer, recent_blockhash) = program_test.start().await;

    let ledger = Keypair::new();
    let rent = banks_client.get_rent().await.unwrap();
    let create_ix = system_instruction::create_account(
        &payer.pubkey(),
        &ledger.pubkey(),
        rent.minimum_balance(LedgerState::LEN),
        LedgerState::LEN as u64,
        &program_id,
    );

    let asset = Pubkey::new_unique();
    let feed = Pubkey::new_unique();
    let init_ix = instructions::initialize_engine(
        &program_id,
        &payer.pubkey(),
        &ledger.pubkey(),
        vec![asset],
        vec![feed],
    );

    let mut transaction =
        Transaction::new_with_payer(&[create_ix, init_ix], Some(&payer.pubkey()));
    transaction.sign(&[&payer, &ledger], recent_blockhash);
    banks_client.process_transaction(transaction).await.unwrap();

    let account = banks_client
        .get_account(ledger.pubkey())
        .await
        .unwrap()
        .unwrap();
    let mut data: &[u8] = &account.data;
    let state = LedgerState::deserialize(&mut data).unwrap();
    state.validate().unwrap();
    assert_eq!(state.authority, payer.pubkey());
    assert_eq!(state.registry.assets(), &[asset]);
    assert_eq!(state.registry.feed(&asset).unwrap(), &feed);
    assert_eq!(state.total_debt_supply, 0);

    // A second initialization of the same ledger is rejected.
    let reinit_ix = instructions::initialize_engine(
        &program_id,
        &payer.pubkey(),
        &ledger.pubkey(),
        vec![asset],
        vec![feed],
    );
    let recent_blockhash = banks_client
        .get_new_latest_blockhash(&recent_blockhash)
        .await
        .unwrap();
    let mut transaction = Transaction::new_with_payer(&[reinit_ix], Some(&payer.pubkey()));
    transaction.sign(&[&payer], recent_blockhash);
    assert!(banks_client.process_transaction(transaction).await.is_err());
}
