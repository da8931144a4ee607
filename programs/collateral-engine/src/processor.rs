use solana_program::{
    account_info::{next_account_info, AccountInfo},
    entrypoint::ProgramResult,
    msg,
    program::{invoke, invoke_signed},
    program_error::ProgramError,
    pubkey::Pubkey,
    sysvar::{clock::Clock, rent::Rent, Sysvar},
};
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    engine::CollateralEngine,
    error::EngineError,
    instructions::EngineInstruction,
    oracle::{PriceFeedAccount, PriceRound, PriceSource},
    state::{AssetRegistry, LedgerState},
    tokens::{CollateralBank, DebtToken},
};

/// Seed prefix of the vault authority PDA, derived per ledger account.
pub const VAULT_AUTHORITY_SEED: &[u8] = b"vault_authority";

pub fn process_instruction(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    instruction_data: &[u8],
) -> ProgramResult {
    let instruction = EngineInstruction::unpack(instruction_data)?;

    match instruction {
        EngineInstruction::InitializeEngine {
            collateral_assets,
            price_feeds,
        } => {
            msg!("Instruction: InitializeEngine");
            process_initialize_engine(program_id, accounts, collateral_assets, price_feeds)
        }

        EngineInstruction::DepositCollateral { asset, amount } => {
            msg!("Instruction: DepositCollateral");
            process_deposit_collateral(accounts, asset, amount)
        }

        EngineInstruction::RedeemCollateral { asset, amount } => {
            msg!("Instruction: RedeemCollateral");
            process_redeem_collateral(program_id, accounts, asset, amount)
        }

        EngineInstruction::MintDebt { amount } => {
            msg!("Instruction: MintDebt");
            process_mint_debt(program_id, accounts, amount)
        }

        EngineInstruction::BurnDebt { amount } => {
            msg!("Instruction: BurnDebt");
            process_burn_debt(program_id, accounts, amount)
        }

        EngineInstruction::DepositCollateralAndMintDebt {
            asset,
            collateral_amount,
            mint_amount,
        } => {
            msg!("Instruction: DepositCollateralAndMintDebt");
            process_deposit_and_mint(program_id, accounts, asset, collateral_amount, mint_amount)
        }

        EngineInstruction::RedeemCollateralAndBurnDebt {
            asset,
            collateral_amount,
            burn_amount,
        } => {
            msg!("Instruction: RedeemCollateralAndBurnDebt");
            process_redeem_and_burn(program_id, accounts, asset, collateral_amount, burn_amount)
        }

        EngineInstruction::Liquidate {
            asset,
            debtor,
            debt_to_cover,
        } => {
            msg!("Instruction: Liquidate");
            process_liquidate(program_id, accounts, asset, debtor, debt_to_cover)
        }
    }
}

fn process_initialize_engine(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    collateral_assets: Vec<Pubkey>,
    price_feeds: Vec<Pubkey>,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let authority_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let rent_info = next_account_info(account_info_iter)?;

    if !authority_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    // The ledger account is too large for a CPI allocation, so it is
    // created client-side and handed over already owned by this program.
    if ledger_info.owner != program_id {
        return Err(ProgramError::IncorrectProgramId);
    }
    if ledger_info.data_len() < LedgerState::LEN {
        return Err(ProgramError::AccountDataTooSmall);
    }
    let rent = &Rent::from_account_info(rent_info)?;
    if !rent.is_exempt(ledger_info.lamports(), ledger_info.data_len()) {
        return Err(ProgramError::AccountNotRentExempt);
    }
    if ledger_info.data.borrow()[..8] == LedgerState::DISCRIMINATOR {
        return Err(EngineError::AccountAlreadyInitialized.into());
    }

    let registry = AssetRegistry::new(collateral_assets, price_feeds)?;
    let state = LedgerState::new(*authority_info.key, registry);
    save_ledger(&state, ledger_info)?;

    msg!(
        "Ledger initialized with {} collateral assets",
        state.registry.assets().len()
    );
    Ok(())
}

fn process_deposit_collateral(
    accounts: &[AccountInfo],
    asset: Pubkey,
    amount: u128,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let depositor_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let depositor_token_info = next_account_info(account_info_iter)?;
    let vault_token_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;

    if !depositor_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }

    let mut bank = SplCollateralBank {
        token_program: token_program_info,
        user: depositor_info,
        user_token: depositor_token_info,
        vault_token: vault_token_info,
        vault_authority: None,
        ledger_key: *ledger_info.key,
        bump: 0,
    };

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.deposit_collateral(&mut bank, *depositor_info.key, asset, amount)?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_redeem_collateral(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    asset: Pubkey,
    amount: u128,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let redeemer_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let vault_token_info = next_account_info(account_info_iter)?;
    let redeemer_token_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;
    let feed_infos = account_info_iter.as_slice();

    if !redeemer_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut bank = SplCollateralBank {
        token_program: token_program_info,
        user: redeemer_info,
        user_token: redeemer_token_info,
        vault_token: vault_token_info,
        vault_authority: Some(vault_authority_info),
        ledger_key: *ledger_info.key,
        bump,
    };
    let prices = AccountPriceSource { feeds: feed_infos };
    let now = Clock::get()?.unix_timestamp;

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.redeem_collateral(&mut bank, &prices, now, *redeemer_info.key, asset, amount)?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_mint_debt(program_id: &Pubkey, accounts: &[AccountInfo], amount: u128) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let minter_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let mint_info = next_account_info(account_info_iter)?;
    let minter_token_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;
    let feed_infos = account_info_iter.as_slice();

    if !minter_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut debt_token = SplDebtToken {
        token_program: token_program_info,
        mint: mint_info,
        payer: minter_info,
        payer_token: minter_token_info,
        custody_token: None,
        vault_authority: vault_authority_info,
        ledger_key: *ledger_info.key,
        bump,
    };
    let prices = AccountPriceSource { feeds: feed_infos };
    let now = Clock::get()?.unix_timestamp;

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.mint_debt(&mut debt_token, &prices, now, *minter_info.key, amount)?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_burn_debt(program_id: &Pubkey, accounts: &[AccountInfo], amount: u128) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let payer_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let payer_token_info = next_account_info(account_info_iter)?;
    let custody_token_info = next_account_info(account_info_iter)?;
    let mint_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;

    if !payer_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut debt_token = SplDebtToken {
        token_program: token_program_info,
        mint: mint_info,
        payer: payer_info,
        payer_token: payer_token_info,
        custody_token: Some(custody_token_info),
        vault_authority: vault_authority_info,
        ledger_key: *ledger_info.key,
        bump,
    };

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.burn_debt(&mut debt_token, amount, *payer_info.key, *payer_info.key)?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_deposit_and_mint(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    asset: Pubkey,
    collateral_amount: u128,
    mint_amount: u128,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let caller_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let caller_collateral_info = next_account_info(account_info_iter)?;
    let vault_token_info = next_account_info(account_info_iter)?;
    let mint_info = next_account_info(account_info_iter)?;
    let caller_debt_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;
    let feed_infos = account_info_iter.as_slice();

    if !caller_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut bank = SplCollateralBank {
        token_program: token_program_info,
        user: caller_info,
        user_token: caller_collateral_info,
        vault_token: vault_token_info,
        vault_authority: Some(vault_authority_info),
        ledger_key: *ledger_info.key,
        bump,
    };
    let mut debt_token = SplDebtToken {
        token_program: token_program_info,
        mint: mint_info,
        payer: caller_info,
        payer_token: caller_debt_info,
        custody_token: None,
        vault_authority: vault_authority_info,
        ledger_key: *ledger_info.key,
        bump,
    };
    let prices = AccountPriceSource { feeds: feed_infos };
    let now = Clock::get()?.unix_timestamp;

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.deposit_collateral_and_mint_debt(
        &mut bank,
        &mut debt_token,
        &prices,
        now,
        *caller_info.key,
        asset,
        collateral_amount,
        mint_amount,
    )?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_redeem_and_burn(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    asset: Pubkey,
    collateral_amount: u128,
    burn_amount: u128,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let caller_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let vault_token_info = next_account_info(account_info_iter)?;
    let caller_collateral_info = next_account_info(account_info_iter)?;
    let caller_debt_info = next_account_info(account_info_iter)?;
    let custody_token_info = next_account_info(account_info_iter)?;
    let mint_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;
    let feed_infos = account_info_iter.as_slice();

    if !caller_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut bank = SplCollateralBank {
        token_program: token_program_info,
        user: caller_info,
        user_token: caller_collateral_info,
        vault_token: vault_token_info,
        vault_authority: Some(vault_authority_info),
        ledger_key: *ledger_info.key,
        bump,
    };
    let mut debt_token = SplDebtToken {
        token_program: token_program_info,
        mint: mint_info,
        payer: caller_info,
        payer_token: caller_debt_info,
        custody_token: Some(custody_token_info),
        vault_authority: vault_authority_info,
        ledger_key: *ledger_info.key,
        bump,
    };
    let prices = AccountPriceSource { feeds: feed_infos };
    let now = Clock::get()?.unix_timestamp;

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.redeem_collateral_and_burn_debt(
        &mut bank,
        &mut debt_token,
        &prices,
        now,
        *caller_info.key,
        asset,
        collateral_amount,
        burn_amount,
    )?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

fn process_liquidate(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    asset: Pubkey,
    debtor: Pubkey,
    debt_to_cover: u128,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let liquidator_info = next_account_info(account_info_iter)?;
    let ledger_info = next_account_info(account_info_iter)?;
    let vault_token_info = next_account_info(account_info_iter)?;
    let liquidator_collateral_info = next_account_info(account_info_iter)?;
    let liquidator_debt_info = next_account_info(account_info_iter)?;
    let custody_token_info = next_account_info(account_info_iter)?;
    let mint_info = next_account_info(account_info_iter)?;
    let vault_authority_info = next_account_info(account_info_iter)?;
    let token_program_info = next_account_info(account_info_iter)?;
    let feed_infos = account_info_iter.as_slice();

    if !liquidator_info.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    let bump = check_vault_authority(program_id, ledger_info.key, vault_authority_info)?;

    let mut bank = SplCollateralBank {
        token_program: token_program_info,
        user: liquidator_info,
        user_token: liquidator_collateral_info,
        vault_token: vault_token_info,
        vault_authority: Some(vault_authority_info),
        ledger_key: *ledger_info.key,
        bump,
    };
    let mut debt_token = SplDebtToken {
        token_program: token_program_info,
        mint: mint_info,
        payer: liquidator_info,
        payer_token: liquidator_debt_info,
        custody_token: Some(custody_token_info),
        vault_authority: vault_authority_info,
        ledger_key: *ledger_info.key,
        bump,
    };
    let prices = AccountPriceSource { feeds: feed_infos };
    let now = Clock::get()?.unix_timestamp;

    let mut engine = CollateralEngine::new(load_ledger(ledger_info)?);
    engine.liquidate(
        &mut bank,
        &mut debt_token,
        &prices,
        now,
        *liquidator_info.key,
        asset,
        debtor,
        debt_to_cover,
    )?;
    log_events(&mut engine);
    save_ledger(&engine.into_state(), ledger_info)
}

// ----------------------------------------------------------------------
// Account helpers
// ----------------------------------------------------------------------

/// Loads the ledger, tolerating trailing padding in the account data.
fn load_ledger(ledger_info: &AccountInfo) -> Result<LedgerState, ProgramError> {
    let data = ledger_info.data.borrow();
    let mut slice: &[u8] = &data;
    let state =
        LedgerState::deserialize(&mut slice).map_err(|_| ProgramError::InvalidAccountData)?;
    state.validate()?;
    Ok(state)
}

fn save_ledger(state: &LedgerState, ledger_info: &AccountInfo) -> ProgramResult {
    state.serialize(&mut &mut ledger_info.data.borrow_mut()[..])?;
    Ok(())
}

/// Verifies the vault authority PDA and returns its bump seed.
fn check_vault_authority(
    program_id: &Pubkey,
    ledger_key: &Pubkey,
    vault_authority_info: &AccountInfo,
) -> Result<u8, ProgramError> {
    let (expected, bump) =
        Pubkey::find_program_address(&[VAULT_AUTHORITY_SEED, ledger_key.as_ref()], program_id);
    if expected != *vault_authority_info.key {
        return Err(ProgramError::InvalidSeeds);
    }
    Ok(bump)
}

fn log_events(engine: &mut CollateralEngine) {
    for event in engine.take_events() {
        msg!("Event: {:?}", event);
    }
}

// ----------------------------------------------------------------------
// Collaborators backed by SPL token CPIs
// ----------------------------------------------------------------------

/// Collateral custody backed by per-asset vault token accounts. Transfers
/// out are signed by the vault authority PDA.
struct SplCollateralBank<'a, 'info> {
    token_program: &'a AccountInfo<'info>,
    user: &'a AccountInfo<'info>,
    user_token: &'a AccountInfo<'info>,
    vault_token: &'a AccountInfo<'info>,
    vault_authority: Option<&'a AccountInfo<'info>>,
    ledger_key: Pubkey,
    bump: u8,
}

impl CollateralBank for SplCollateralBank<'_, '_> {
    fn transfer_in(&mut self, _asset: &Pubkey, _from: &Pubkey, amount: u128) -> bool {
        let Ok(amount) = u64::try_from(amount) else {
            return false;
        };
        let Ok(instruction) = spl_token::instruction::transfer(
            self.token_program.key,
            self.user_token.key,
            self.vault_token.key,
            self.user.key,
            &[],
            amount,
        ) else {
            return false;
        };
        invoke(
            &instruction,
            &[
                self.user_token.clone(),
                self.vault_token.clone(),
                self.user.clone(),
                self.token_program.clone(),
            ],
        )
        .is_ok()
    }

    fn transfer_out(&mut self, _asset: &Pubkey, _to: &Pubkey, amount: u128) -> bool {
        let Some(vault_authority) = self.vault_authority else {
            return false;
        };
        let Ok(amount) = u64::try_from(amount) else {
            return false;
        };
        let Ok(instruction) = spl_token::instruction::transfer(
            self.token_program.key,
            self.vault_token.key,
            self.user_token.key,
            vault_authority.key,
            &[],
            amount,
        ) else {
            return false;
        };
        let bump = [self.bump];
        let seeds: &[&[u8]] = &[VAULT_AUTHORITY_SEED, self.ledger_key.as_ref(), &bump];
        invoke_signed(
            &instruction,
            &[
                self.vault_token.clone(),
                self.user_token.clone(),
                vault_authority.clone(),
                self.token_program.clone(),
            ],
            &[seeds],
        )
        .is_ok()
    }
}

/// Debt asset backed by an SPL mint whose authority is the vault PDA.
/// Burns pull the asset into custody first, then burn from custody.
struct SplDebtToken<'a, 'info> {
    token_program: &'a AccountInfo<'info>,
    mint: &'a AccountInfo<'info>,
    payer: &'a AccountInfo<'info>,
    payer_token: &'a AccountInfo<'info>,
    custody_token: Option<&'a AccountInfo<'info>>,
    vault_authority: &'a AccountInfo<'info>,
    ledger_key: Pubkey,
    bump: u8,
}

impl SplDebtToken<'_, '_> {
    fn signer_bump(&self) -> [u8; 1] {
        [self.bump]
    }
}

impl DebtToken for SplDebtToken<'_, '_> {
    fn mint(&mut self, _to: &Pubkey, amount: u128) -> bool {
        let Ok(amount) = u64::try_from(amount) else {
            return false;
        };
        let Ok(instruction) = spl_token::instruction::mint_to(
            self.token_program.key,
            self.mint.key,
            self.payer_token.key,
            self.vault_authority.key,
            &[],
            amount,
        ) else {
            return false;
        };
        let bump = self.signer_bump();
        let seeds: &[&[u8]] = &[VAULT_AUTHORITY_SEED, self.ledger_key.as_ref(), &bump];
        invoke_signed(
            &instruction,
            &[
                self.mint.clone(),
                self.payer_token.clone(),
                self.vault_authority.clone(),
                self.token_program.clone(),
            ],
            &[seeds],
        )
        .is_ok()
    }

    fn transfer_from(&mut self, _payer: &Pubkey, amount: u128) -> bool {
        let Some(custody_token) = self.custody_token else {
            return false;
        };
        let Ok(amount) = u64::try_from(amount) else {
            return false;
        };
        let Ok(instruction) = spl_token::instruction::transfer(
            self.token_program.key,
            self.payer_token.key,
            custody_token.key,
            self.payer.key,
            &[],
            amount,
        ) else {
            return false;
        };
        invoke(
            &instruction,
            &[
                self.payer_token.clone(),
                custody_token.clone(),
                self.payer.clone(),
                self.token_program.clone(),
            ],
        )
        .is_ok()
    }

    fn burn(&mut self, amount: u128) {
        let Some(custody_token) = self.custody_token else {
            msg!("Burn skipped: no custody account");
            return;
        };
        let Ok(amount) = u64::try_from(amount) else {
            msg!("Burn skipped: amount exceeds token range");
            return;
        };
        let Ok(instruction) = spl_token::instruction::burn(
            self.token_program.key,
            custody_token.key,
            self.mint.key,
            self.vault_authority.key,
            &[],
            amount,
        ) else {
            msg!("Burn instruction construction failed");
            return;
        };
        let bump = self.signer_bump();
        let seeds: &[&[u8]] = &[VAULT_AUTHORITY_SEED, self.ledger_key.as_ref(), &bump];
        if invoke_signed(
            &instruction,
            &[
                custody_token.clone(),
                self.mint.clone(),
                self.vault_authority.clone(),
                self.token_program.clone(),
            ],
            &[seeds],
        )
        .is_err()
        {
            msg!("Debt asset burn failed");
        }
    }
}

/// Price source backed by the feed accounts passed with the instruction.
struct AccountPriceSource<'a, 'info> {
    feeds: &'a [AccountInfo<'info>],
}

impl PriceSource for AccountPriceSource<'_, '_> {
    fn latest_round_data(&self, feed: &Pubkey) -> Result<PriceRound, EngineError> {
        let info = self
            .feeds
            .iter()
            .find(|info| info.key == feed)
            .ok_or(EngineError::AccountNotInitialized)?;

        let data = info.data.borrow();
        let mut slice: &[u8] = &data;
        let account = PriceFeedAccount::deserialize(&mut slice)
            .map_err(|_| EngineError::AccountNotInitialized)?;
        if account.discriminator != PriceFeedAccount::DISCRIMINATOR || !account.is_initialized {
            return Err(EngineError::AccountNotInitialized);
        }
        Ok(account.round)
    }
}
