pub mod block;
pub mod ledger;
pub mod pow;

pub use block::Block;
pub use ledger::Ledger;

/// Default proof-of-work difficulty (leading zero bits).
pub const DEFAULT_DIFFICULTY: u32 = 16;

/// Fixed block subsidy in base units.
pub const MINER_REWARD: u64 = 10;
