//! Fixtures shared by the unit tests: funded ledgers, signed transfers and
//! blocks solved at a low difficulty.

use std::sync::atomic::AtomicBool;

use crate::blockchain::{Block, Ledger, pow};
use crate::transaction::Transaction;
use crate::wallet::Wallet;

pub const TEST_DIFFICULTY: u32 = 8;

/// Ledger whose genesis allocates `value` to each wallet.
pub fn funded_ledger(allocations: &[(&Wallet, u64)]) -> Ledger {
    let alloc: Vec<(String, u64)> = allocations
        .iter()
        .map(|(w, v)| (w.address().to_string(), *v))
        .collect();
    Ledger::new(Block::genesis(&alloc, TEST_DIFFICULTY), TEST_DIFFICULTY)
}

/// Hash of the genesis allocation paid to `owner`.
pub fn genesis_output(ledger: &Ledger, owner: &Wallet) -> String {
    ledger.blocks()[0]
        .transactions
        .iter()
        .find(|t| t.receiver == owner.address())
        .map(|t| t.hash.clone())
        .expect("wallet has a genesis allocation")
}

pub fn solve_for(tip_hash: &str) -> u64 {
    pow::solve(tip_hash, TEST_DIFFICULTY, 0, &AtomicBool::new(false)).expect("nonce exists")
}

pub fn transfer(from: &Wallet, inputs: Vec<String>, value: u64, to: &str) -> Transaction {
    let mut tx = Transaction::new(inputs, value, from.address().to_string(), to.to_string());
    tx.sign(from);
    tx
}

/// Candidate block for `ledger`'s tip with a solved nonce.
pub fn candidate(ledger: &Ledger, miner: &Wallet, txs: Vec<Transaction>) -> Block {
    let tip = ledger.tip_hash().to_string();
    let nonce = solve_for(&tip);
    Block::new(txs, miner.address().to_string(), tip, nonce, TEST_DIFFICULTY)
}

/// Mine on `ledger` and return the sealed block.
pub fn mine(ledger: &mut Ledger, miner: &Wallet, txs: Vec<Transaction>) -> Block {
    let block = candidate(ledger, miner, txs);
    ledger.update(block).expect("locally mined block").clone()
}

/// A block as another node sharing `ledger`'s history would produce it.
pub fn mined_elsewhere(ledger: &Ledger, miner: &Wallet, txs: Vec<Transaction>) -> Block {
    let mut other = ledger.clone();
    mine(&mut other, miner, txs)
}
