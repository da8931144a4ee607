//! The overcollateralized-debt accounting engine.
//!
//! Every mutating operation funnels through the health-factor check and
//! runs inside the reentrancy guard. Ledger mutations are applied first
//! and rolled back explicitly on any failure; collaborator calls are
//! sequenced after all ledger validation so a collaborator failure leaves
//! no net ledger mutation behind.

use solana_program::pubkey::Pubkey;

use crate::{
    constants::{
        LIQUIDATION_BONUS, LIQUIDATION_PRECISION, LIQUIDATION_THRESHOLD, MIN_HEALTH_FACTOR,
        PRECISION, PRICE_STALENESS_TIMEOUT,
    },
    error::EngineError,
    events::LedgerEvent,
    math,
    oracle::{OracleAdapter, PriceSource},
    state::LedgerState,
    tokens::{CollateralBank, DebtToken},
};

/// Main engine over the persistent ledger state.
pub struct CollateralEngine {
    state: LedgerState,
    entered: bool,
    events: Vec<LedgerEvent>,
}

impl CollateralEngine {
    pub fn new(state: LedgerState) -> Self {
        Self {
            state,
            entered: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    /// Drains the events recorded by successful operations.
    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    /// Deposit `amount` of `asset` for `caller`. The balance is credited
    /// only once custody confirms the transfer.
    pub fn deposit_collateral<B: CollateralBank>(
        &mut self,
        bank: &mut B,
        caller: Pubkey,
        asset: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| engine.deposit_collateral_inner(bank, caller, asset, amount))
    }

    /// Redeem `amount` of `asset` back to `caller`. The caller's health
    /// factor is re-validated after the debit; a broken invariant undoes
    /// the whole operation.
    pub fn redeem_collateral<B: CollateralBank, P: PriceSource>(
        &mut self,
        bank: &mut B,
        prices: &P,
        now: i64,
        caller: Pubkey,
        asset: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| {
            engine.redeem_collateral_inner(bank, prices, now, caller, asset, amount)
        })
    }

    /// Issue `amount` of debt to `caller`, then mint the debt asset.
    pub fn mint_debt<D: DebtToken, P: PriceSource>(
        &mut self,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        caller: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| engine.mint_debt_inner(debt_token, prices, now, caller, amount))
    }

    /// Retire `amount` of `on_behalf_of`'s issued debt, funded by pulling
    /// the debt asset from `payer` and burning it.
    pub fn burn_debt<D: DebtToken>(
        &mut self,
        debt_token: &mut D,
        amount: u128,
        on_behalf_of: Pubkey,
        payer: Pubkey,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| engine.burn_debt_inner(debt_token, amount, on_behalf_of, payer))
    }

    /// Deposit-then-mint convenience composition. Depositing first keeps
    /// the health factor from transiently dipping during the mint.
    pub fn deposit_collateral_and_mint_debt<B: CollateralBank, D: DebtToken, P: PriceSource>(
        &mut self,
        bank: &mut B,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        caller: Pubkey,
        asset: Pubkey,
        collateral_amount: u128,
        mint_amount: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| {
            engine.deposit_collateral_inner(bank, caller, asset, collateral_amount)?;
            if let Err(err) = engine.mint_debt_inner(debt_token, prices, now, caller, mint_amount) {
                // Unwind the deposit so the composition stays atomic.
                let _ = engine
                    .state
                    .debit_collateral(&caller, &asset, collateral_amount);
                let _ = bank.transfer_out(&asset, &caller, collateral_amount);
                return Err(err);
            }
            Ok(())
        })
    }

    /// Burn-then-redeem convenience composition, in that order so the
    /// health factor never transiently worsens.
    pub fn redeem_collateral_and_burn_debt<B: CollateralBank, D: DebtToken, P: PriceSource>(
        &mut self,
        bank: &mut B,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        caller: Pubkey,
        asset: Pubkey,
        collateral_amount: u128,
        burn_amount: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| {
            engine.burn_debt_inner(debt_token, burn_amount, caller, caller)?;
            if let Err(err) =
                engine.redeem_collateral_inner(bank, prices, now, caller, asset, collateral_amount)
            {
                // Unwind the burn: re-issue the debt and mint it back.
                engine.state.credit_debt(&caller, burn_amount);
                engine.state.total_debt_supply =
                    engine.state.total_debt_supply.saturating_add(burn_amount);
                let _ = debt_token.mint(&caller, burn_amount);
                return Err(err);
            }
            Ok(())
        })
    }

    /// Liquidate an under-collateralized `debtor`: seize collateral worth
    /// `debt_to_cover` plus the liquidation bonus, and retire that much of
    /// the debtor's debt at the liquidator's expense.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate<B: CollateralBank, D: DebtToken, P: PriceSource>(
        &mut self,
        bank: &mut B,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        liquidator: Pubkey,
        asset: Pubkey,
        debtor: Pubkey,
        debt_to_cover: u128,
    ) -> Result<(), EngineError> {
        self.non_reentrant(|engine| {
            engine.liquidate_inner(
                bank,
                debt_token,
                prices,
                now,
                liquidator,
                asset,
                debtor,
                debt_to_cover,
            )
        })
    }

    // ------------------------------------------------------------------
    // Queries (read-only; never mutate)
    // ------------------------------------------------------------------

    pub fn collateral_balance(&self, account: &Pubkey, asset: &Pubkey) -> u128 {
        self.state.collateral_balance(account, asset)
    }

    pub fn debt_issued(&self, account: &Pubkey) -> u128 {
        self.state.debt_of(account)
    }

    pub fn total_debt_supply(&self) -> u128 {
        self.state.total_debt_supply
    }

    // Configuration getters, part of the read-only surface.

    pub fn min_health_factor(&self) -> u128 {
        MIN_HEALTH_FACTOR
    }

    pub fn liquidation_threshold(&self) -> u128 {
        LIQUIDATION_THRESHOLD
    }

    pub fn liquidation_bonus(&self) -> u128 {
        LIQUIDATION_BONUS
    }

    pub fn precision(&self) -> u128 {
        PRECISION
    }

    pub fn price_staleness_timeout(&self) -> i64 {
        PRICE_STALENESS_TIMEOUT
    }

    pub fn collateral_assets(&self) -> &[Pubkey] {
        self.state.registry.assets()
    }

    pub fn price_feed(&self, asset: &Pubkey) -> Result<&Pubkey, EngineError> {
        self.state.registry.feed(asset)
    }

    /// Total unit-of-account value of everything `account` has deposited.
    pub fn account_collateral_value<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        account: &Pubkey,
    ) -> Result<u128, EngineError> {
        let adapter = OracleAdapter::new(prices, now);
        let mut total: u128 = 0;

        if let Some(per_asset) = self.state.collateral.get(account) {
            for (asset, amount) in per_asset {
                if *amount == 0 {
                    continue;
                }
                let feed = self.state.registry.feed(asset)?;
                let value = adapter.usd_value(feed, *amount)?;
                total = total
                    .checked_add(value)
                    .ok_or(EngineError::ArithmeticOverflow)?;
            }
        }

        Ok(total)
    }

    /// Issued debt and total collateral value for `account`.
    pub fn account_information<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        account: &Pubkey,
    ) -> Result<(u128, u128), EngineError> {
        let debt = self.state.debt_of(account);
        let collateral_value = self.account_collateral_value(prices, now, account)?;
        Ok((debt, collateral_value))
    }

    /// Health factor of `account` at the latest fresh prices. `u128::MAX`
    /// when no debt is issued.
    pub fn health_factor<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        account: &Pubkey,
    ) -> Result<u128, EngineError> {
        let debt = self.state.debt_of(account);
        if debt == 0 {
            return Ok(u128::MAX);
        }
        let collateral_value = self.account_collateral_value(prices, now, account)?;
        Self::calculate_health_factor(debt, collateral_value)
    }

    /// Pure health-factor formula over a debt/collateral-value pair.
    pub fn calculate_health_factor(
        debt: u128,
        collateral_value_usd: u128,
    ) -> Result<u128, EngineError> {
        if debt == 0 {
            return Ok(u128::MAX);
        }
        let adjusted = math::mul_div(
            collateral_value_usd,
            LIQUIDATION_THRESHOLD,
            LIQUIDATION_PRECISION,
        )?;
        math::mul_div(adjusted, PRECISION, debt)
    }

    /// Unit-of-account value of `amount` native units of `asset`.
    pub fn usd_value<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        asset: &Pubkey,
        amount: u128,
    ) -> Result<u128, EngineError> {
        let feed = self.state.registry.feed(asset)?;
        OracleAdapter::new(prices, now).usd_value(feed, amount)
    }

    /// Native amount of `asset` worth `usd_amount`.
    pub fn token_amount_from_usd<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        asset: &Pubkey,
        usd_amount: u128,
    ) -> Result<u128, EngineError> {
        let feed = self.state.registry.feed(asset)?;
        OracleAdapter::new(prices, now).token_amount_from_usd(feed, usd_amount)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn non_reentrant<T, F>(&mut self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        if self.entered {
            return Err(EngineError::ReentrantCall);
        }
        self.entered = true;
        let events_mark = self.events.len();
        let result = op(self);
        if result.is_err() {
            // Failed operations must not be observable, events included.
            self.events.truncate(events_mark);
        }
        self.entered = false;
        result
    }

    fn require_positive(amount: u128) -> Result<(), EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidArgument);
        }
        Ok(())
    }

    /// Fails with `HealthFactorBroken` carrying the offending value.
    fn require_healthy<P: PriceSource>(
        &self,
        prices: &P,
        now: i64,
        account: &Pubkey,
    ) -> Result<(), EngineError> {
        let hf = self.health_factor(prices, now, account)?;
        if hf < MIN_HEALTH_FACTOR {
            return Err(EngineError::HealthFactorBroken(hf));
        }
        Ok(())
    }

    fn deposit_collateral_inner<B: CollateralBank>(
        &mut self,
        bank: &mut B,
        caller: Pubkey,
        asset: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        if !self.state.registry.contains(&asset) {
            return Err(EngineError::NotAllowedAsset);
        }

        // Credit only once custody confirms the transfer.
        if !bank.transfer_in(&asset, &caller, amount) {
            return Err(EngineError::TransferFailed);
        }
        self.state.credit_collateral(&caller, &asset, amount);

        self.events.push(LedgerEvent::CollateralDeposited {
            account: caller,
            asset,
            amount,
        });
        Ok(())
    }

    fn redeem_collateral_inner<B: CollateralBank, P: PriceSource>(
        &mut self,
        bank: &mut B,
        prices: &P,
        now: i64,
        caller: Pubkey,
        asset: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.state.debit_collateral(&caller, &asset, amount)?;

        if let Err(err) = self.require_healthy(prices, now, &caller) {
            self.state.credit_collateral(&caller, &asset, amount);
            return Err(err);
        }
        if !bank.transfer_out(&asset, &caller, amount) {
            self.state.credit_collateral(&caller, &asset, amount);
            return Err(EngineError::TransferFailed);
        }

        self.events.push(LedgerEvent::CollateralRedeemed {
            asset,
            from: caller,
            to: caller,
            amount,
        });
        Ok(())
    }

    fn mint_debt_inner<D: DebtToken, P: PriceSource>(
        &mut self,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        caller: Pubkey,
        amount: u128,
    ) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.state.credit_debt(&caller, amount);

        if let Err(err) = self.require_healthy(prices, now, &caller) {
            self.state.rollback_debt(&caller, amount);
            return Err(err);
        }
        if !debt_token.mint(&caller, amount) {
            self.state.rollback_debt(&caller, amount);
            return Err(EngineError::MintFailed);
        }

        self.state.total_debt_supply = self.state.total_debt_supply.saturating_add(amount);
        Ok(())
    }

    /// Retires `on_behalf_of`'s ledger debt only; the payer merely funds
    /// the burn. No post-burn health check is needed: retiring debt can
    /// only raise a health factor.
    fn burn_debt_inner<D: DebtToken>(
        &mut self,
        debt_token: &mut D,
        amount: u128,
        on_behalf_of: Pubkey,
        payer: Pubkey,
    ) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.state.debit_debt(&on_behalf_of, amount)?;

        if !debt_token.transfer_from(&payer, amount) {
            self.state.credit_debt(&on_behalf_of, amount);
            return Err(EngineError::TransferFailed);
        }
        debt_token.burn(amount);

        self.state.total_debt_supply = self.state.total_debt_supply.saturating_sub(amount);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn liquidate_inner<B: CollateralBank, D: DebtToken, P: PriceSource>(
        &mut self,
        bank: &mut B,
        debt_token: &mut D,
        prices: &P,
        now: i64,
        liquidator: Pubkey,
        asset: Pubkey,
        debtor: Pubkey,
        debt_to_cover: u128,
    ) -> Result<(), EngineError> {
        Self::require_positive(debt_to_cover)?;

        let starting_health_factor = self.health_factor(prices, now, &debtor)?;
        if starting_health_factor >= MIN_HEALTH_FACTOR {
            return Err(EngineError::HealthFactorOk);
        }

        // Seizure amount: covered debt converted to the asset, plus bonus.
        let feed = *self.state.registry.feed(&asset)?;
        let adapter = OracleAdapter::new(prices, now);
        let base_amount = adapter.token_amount_from_usd(&feed, debt_to_cover)?;
        let bonus = math::mul_div(base_amount, LIQUIDATION_BONUS, LIQUIDATION_PRECISION)?;
        let total_seized = base_amount
            .checked_add(bonus)
            .ok_or(EngineError::ArithmeticOverflow)?;

        // Ledger mutations first; collateral and debt assets only move
        // once both post-conditions hold.
        self.state.debit_collateral(&debtor, &asset, total_seized)?;
        if let Err(err) = self.state.debit_debt(&debtor, debt_to_cover) {
            self.state.credit_collateral(&debtor, &asset, total_seized);
            return Err(err);
        }

        let post_conditions = self
            .health_factor(prices, now, &debtor)
            .and_then(|ending_health_factor| {
                if ending_health_factor <= starting_health_factor {
                    return Err(EngineError::HealthFactorNotImproved);
                }
                // Liquidating must not leave the liquidator insolvent.
                self.require_healthy(prices, now, &liquidator)
            });
        if let Err(err) = post_conditions {
            self.state.credit_collateral(&debtor, &asset, total_seized);
            self.state.credit_debt(&debtor, debt_to_cover);
            return Err(err);
        }

        // Seized collateral to the liquidator, then the covered debt
        // pulled from the liquidator and burned.
        if !bank.transfer_out(&asset, &liquidator, total_seized) {
            self.state.credit_collateral(&debtor, &asset, total_seized);
            self.state.credit_debt(&debtor, debt_to_cover);
            return Err(EngineError::TransferFailed);
        }
        if !debt_token.transfer_from(&liquidator, debt_to_cover) {
            self.state.credit_collateral(&debtor, &asset, total_seized);
            self.state.credit_debt(&debtor, debt_to_cover);
            return Err(EngineError::TransferFailed);
        }
        debt_token.burn(debt_to_cover);
        self.state.total_debt_supply = self.state.total_debt_supply.saturating_sub(debt_to_cover);

        self.events.push(LedgerEvent::CollateralRedeemed {
            asset,
            from: debtor,
            to: liquidator,
            amount: total_seized,
        });
        Ok(())
    }
}
