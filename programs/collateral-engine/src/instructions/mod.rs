use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{
    instruction::{AccountMeta, Instruction},
    program_error::ProgramError,
    pubkey::Pubkey,
};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub enum EngineInstruction {
    /// Initialize the ledger with its fixed collateral registry
    /// Accounts:
    /// 0. `[signer]` Authority
    /// 1. `[writable]` Ledger account (pre-allocated, owned by this program)
    /// 2. `[]` Rent sysvar
    InitializeEngine {
        collateral_assets: Vec<Pubkey>,
        price_feeds: Vec<Pubkey>,
    },

    /// Deposit collateral for the caller
    /// Accounts:
    /// 0. `[signer]` Depositor
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Depositor collateral token account
    /// 3. `[writable]` Vault collateral token account
    /// 4. `[]` Token program
    DepositCollateral { asset: Pubkey, amount: u128 },

    /// Redeem collateral back to the caller
    /// Accounts:
    /// 0. `[signer]` Redeemer
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Vault collateral token account
    /// 3. `[writable]` Redeemer collateral token account
    /// 4. `[]` Vault authority PDA
    /// 5. `[]` Token program
    /// 6.. `[]` Price feed accounts for the redeemer's deposited assets
    RedeemCollateral { asset: Pubkey, amount: u128 },

    /// Issue debt against the caller's collateral
    /// Accounts:
    /// 0. `[signer]` Minter
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Debt asset mint
    /// 3. `[writable]` Minter debt token account
    /// 4. `[]` Vault authority PDA (mint authority)
    /// 5. `[]` Token program
    /// 6.. `[]` Price feed accounts for the minter's deposited assets
    MintDebt { amount: u128 },

    /// Retire the caller's own debt
    /// Accounts:
    /// 0. `[signer]` Payer (also the debtor)
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Payer debt token account
    /// 3. `[writable]` Custody debt token account
    /// 4. `[writable]` Debt asset mint
    /// 5. `[]` Vault authority PDA
    /// 6. `[]` Token program
    BurnDebt { amount: u128 },

    /// Deposit collateral and mint debt in one call
    /// Accounts:
    /// 0. `[signer]` Caller
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Caller collateral token account
    /// 3. `[writable]` Vault collateral token account
    /// 4. `[writable]` Debt asset mint
    /// 5. `[writable]` Caller debt token account
    /// 6. `[]` Vault authority PDA
    /// 7. `[]` Token program
    /// 8.. `[]` Price feed accounts for the caller's deposited assets
    DepositCollateralAndMintDebt {
        asset: Pubkey,
        collateral_amount: u128,
        mint_amount: u128,
    },

    /// Burn debt and redeem collateral in one call
    /// Accounts:
    /// 0. `[signer]` Caller
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Vault collateral token account
    /// 3. `[writable]` Caller collateral token account
    /// 4. `[writable]` Caller debt token account
    /// 5. `[writable]` Custody debt token account
    /// 6. `[writable]` Debt asset mint
    /// 7. `[]` Vault authority PDA
    /// 8. `[]` Token program
    /// 9.. `[]` Price feed accounts for the caller's deposited assets
    RedeemCollateralAndBurnDebt {
        asset: Pubkey,
        collateral_amount: u128,
        burn_amount: u128,
    },

    /// Liquidate an under-collateralized debtor
    /// Accounts:
    /// 0. `[signer]` Liquidator
    /// 1. `[writable]` Ledger account
    /// 2. `[writable]` Vault collateral token account (seized asset)
    /// 3. `[writable]` Liquidator collateral token account
    /// 4. `[writable]` Liquidator debt token account
    /// 5. `[writable]` Custody debt token account
    /// 6. `[writable]` Debt asset mint
    /// 7. `[]` Vault authority PDA
    /// 8. `[]` Token program
    /// 9.. `[]` Price feed accounts for debtor and liquidator assets
    Liquidate {
        asset: Pubkey,
        debtor: Pubkey,
        debt_to_cover: u128,
    },
}

impl EngineInstruction {
    pub fn unpack(input: &[u8]) -> Result<Self, ProgramError> {
        let (&variant, rest) = input
            .split_first()
            .ok_or(ProgramError::InvalidInstructionData)?;

        Ok(match variant {
            0 => {
                let payload = InitializeEnginePayload::try_from_slice(rest)?;
                Self::InitializeEngine {
                    collateral_assets: payload.collateral_assets,
                    price_feeds: payload.price_feeds,
                }
            }
            1 => {
                let payload = CollateralAmountPayload::try_from_slice(rest)?;
                Self::DepositCollateral {
                    asset: payload.asset,
                    amount: payload.amount,
                }
            }
            2 => {
                let payload = CollateralAmountPayload::try_from_slice(rest)?;
                Self::RedeemCollateral {
                    asset: payload.asset,
                    amount: payload.amount,
                }
            }
            3 => {
                let payload = DebtAmountPayload::try_from_slice(rest)?;
                Self::MintDebt {
                    amount: payload.amount,
                }
            }
            4 => {
                let payload = DebtAmountPayload::try_from_slice(rest)?;
                Self::BurnDebt {
                    amount: payload.amount,
                }
            }
            5 => {
                let payload = CombinedPayload::try_from_slice(rest)?;
                Self::DepositCollateralAndMintDebt {
                    asset: payload.asset,
                    collateral_amount: payload.collateral_amount,
                    mint_amount: payload.debt_amount,
                }
            }
            6 => {
                let payload = CombinedPayload::try_from_slice(rest)?;
                Self::RedeemCollateralAndBurnDebt {
                    asset: payload.asset,
                    collateral_amount: payload.collateral_amount,
                    burn_amount: payload.debt_amount,
                }
            }
            7 => {
                let payload = LiquidatePayload::try_from_slice(rest)?;
                Self::Liquidate {
                    asset: payload.asset,
                    debtor: payload.debtor,
                    debt_to_cover: payload.debt_to_cover,
                }
            }
            _ => return Err(ProgramError::InvalidInstructionData),
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut data = Vec::new();
        match self {
            Self::InitializeEngine {
                collateral_assets,
                price_feeds,
            } => {
                data.push(0);
                let payload = InitializeEnginePayload {
                    collateral_assets: collateral_assets.clone(),
                    price_feeds: price_feeds.clone(),
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
            Self::DepositCollateral { asset, amount } => {
                data.push(1);
                let payload = CollateralAmountPayload {
                    asset: *asset,
                    amount: *amount,
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
            Self::RedeemCollateral { asset, amount } => {
                data.push(2);
                let payload = CollateralAmountPayload {
                    asset: *asset,
                    amount: *amount,
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
            Self::MintDebt { amount } => {
                data.push(3);
                data.extend(borsh::to_vec(&DebtAmountPayload { amount: *amount }).unwrap());
            }
            Self::BurnDebt { amount } => {
                data.push(4);
                data.extend(borsh::to_vec(&DebtAmountPayload { amount: *amount }).unwrap());
            }
            Self::DepositCollateralAndMintDebt {
                asset,
                collateral_amount,
                mint_amount,
            } => {
                data.push(5);
                let payload = CombinedPayload {
                    asset: *asset,
                    collateral_amount: *collateral_amount,
                    debt_amount: *mint_amount,
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
            Self::RedeemCollateralAndBurnDebt {
                asset,
                collateral_amount,
                burn_amount,
            } => {
                data.push(6);
                let payload = CombinedPayload {
                    asset: *asset,
                    collateral_amount: *collateral_amount,
                    debt_amount: *burn_amount,
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
            Self::Liquidate {
                asset,
                debtor,
                debt_to_cover,
            } => {
                data.push(7);
                let payload = LiquidatePayload {
                    asset: *asset,
                    debtor: *debtor,
                    debt_to_cover: *debt_to_cover,
                };
                data.extend(borsh::to_vec(&payload).unwrap());
            }
        }
        data
    }
}

// Payload structs for the variant data
#[derive(BorshSerialize, BorshDeserialize)]
struct InitializeEnginePayload {
    collateral_assets: Vec<Pubkey>,
    price_feeds: Vec<Pubkey>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CollateralAmountPayload {
    asset: Pubkey,
    amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct DebtAmountPayload {
    amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CombinedPayload {
    asset: Pubkey,
    collateral_amount: u128,
    debt_amount: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct LiquidatePayload {
    asset: Pubkey,
    debtor: Pubkey,
    debt_to_cover: u128,
}

// Helper functions to create instructions
pub fn initialize_engine(
    program_id: &Pubkey,
    authority: &Pubkey,
    ledger_account: &Pubkey,
    collateral_assets: Vec<Pubkey>,
    price_feeds: Vec<Pubkey>,
) -> Instruction {
    let accounts = vec![
        AccountMeta::new(*authority, true),
        AccountMeta::new(*ledger_account, false),
        AccountMeta::new_readonly(solana_program::sysvar::rent::id(), false),
    ];

    let data = EngineInstruction::InitializeEngine {
        collateral_assets,
        price_feeds,
    };

    Instruction {
        program_id: *program_id,
        accounts,
        data: data.pack(),
    }
}

pub fn deposit_collateral(
    program_id: &Pubkey,
    depositor: &Pubkey,
    ledger_account: &Pubkey,
    depositor_token_account: &Pubkey,
    vault_token_account: &Pubkey,
    asset: Pubkey,
    amount: u128,
) -> Instruction {
    let accounts = vec![
        AccountMeta::new(*depositor, true),
        AccountMeta::new(*ledger_account, false),
        AccountMeta::new(*depositor_token_account, false),
        AccountMeta::new(*vault_token_account, false),
        AccountMeta::new_readonly(spl_token::id(), false),
    ];

    Instruction {
        program_id: *program_id,
        accounts,
        data: EngineInstruction::DepositCollateral { asset, amount }.pack(),
    }
}
