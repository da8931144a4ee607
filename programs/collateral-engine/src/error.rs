use solana_program::program_error::ProgramError;
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Amount or configuration argument is invalid")]
    InvalidArgument,

    #[error("Asset type is not in the accepted registry")]
    NotAllowedAsset,

    #[error("Balance too low for requested amount")]
    InsufficientBalance,

    #[error("Collateral or debt asset transfer failed")]
    TransferFailed,

    #[error("Debt asset mint failed")]
    MintFailed,

    #[error("Health factor {0} is below the minimum")]
    HealthFactorBroken(u128),

    #[error("Debtor health factor is not below the minimum")]
    HealthFactorOk,

    #[error("Liquidation did not improve the debtor health factor")]
    HealthFactorNotImproved,

    #[error("Price feed data is stale")]
    StalePrice,

    #[error("Price feed returned a non-positive price")]
    InvalidPrice,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Reentrant call into a mutating operation")]
    ReentrantCall,

    #[error("Account not initialized")]
    AccountNotInitialized,

    #[error("Account already initialized")]
    AccountAlreadyInitialized,
}

impl EngineError {
    /// Stable code carried through `ProgramError::Custom`, so callers can
    /// assert on the failure kind across the program boundary.
    pub fn code(&self) -> u32 {
        match self {
            EngineError::InvalidArgument => 0,
            EngineError::NotAllowedAsset => 1,
            EngineError::InsufficientBalance => 2,
            EngineError::TransferFailed => 3,
            EngineError::MintFailed => 4,
            EngineError::HealthFactorBroken(_) => 5,
            EngineError::HealthFactorOk => 6,
            EngineError::HealthFactorNotImproved => 7,
            EngineError::StalePrice => 8,
            EngineError::InvalidPrice => 9,
            EngineError::ArithmeticOverflow => 10,
            EngineError::DivisionByZero => 11,
            EngineError::ReentrantCall => 12,
            EngineError::AccountNotInitialized => 13,
            EngineError::AccountAlreadyInitialized => 14,
        }
    }
}

impl From<EngineError> for ProgramError {
    fn from(e: EngineError) -> Self {
        ProgramError::Custom(e.code())
    }
}
