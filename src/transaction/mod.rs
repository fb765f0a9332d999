pub mod model;
pub mod utxo;

pub use model::Transaction;
pub use utxo::{Unspent, UnspentSet};
