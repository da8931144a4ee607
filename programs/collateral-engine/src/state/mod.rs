pub mod ledger;
pub mod registry;

pub use ledger::LedgerState;
pub use registry::AssetRegistry;
