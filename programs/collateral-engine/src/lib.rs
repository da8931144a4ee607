// Overcollateralized debt accounting engine
// Native Solana implementation - NO ANCHOR

pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod instructions;
pub mod math;
pub mod oracle;
pub mod processor;
pub mod state;
pub mod tokens;

use processor::process_instruction;

// Declare program ID
solana_program::declare_id!("Co11atera1Engine111111111111111111111111111");

#[cfg(not(feature = "no-entrypoint"))]
solana_program::entrypoint!(process_instruction);
