use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use super::{Block, MINER_REWARD, pow};
use crate::error::{NodeError, Rejection};
use crate::transaction::{Transaction, UnspentSet};

/// The accepted block sequence, indexed by height (`blocks[0]` is genesis).
/// Single-writer: every mutation goes through `update`, `add`, `add_root`
/// or `add_buffer`, and a rejected call leaves the ledger untouched.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    unspent: UnspentSet,
    difficulty: u32,
}

impl Ledger {
    /// Start a chain from an already placed genesis block.
    pub fn new(genesis: Block, difficulty: u32) -> Self {
        let blocks = vec![genesis];
        let unspent = Self::index(&blocks);
        Self {
            blocks,
            unspent,
            difficulty,
        }
    }

    /// Rebuild a ledger by replaying `blocks` through the remote acceptance rules.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Result<Self, NodeError> {
        let mut iter = blocks.into_iter();
        let genesis = iter
            .next()
            .ok_or_else(|| NodeError::CorruptLedger("no genesis block".into()))?;
        let genesis_ok = genesis.block_number == Some(0)
            && genesis.prev_hash == "0"
            && genesis.transactions.iter().all(|t| t.hash == t.compute_hash())
            && genesis.hash == genesis.compute_hash();
        if !genesis_ok {
            return Err(NodeError::CorruptLedger("genesis block does not hash".into()));
        }

        let mut ledger = Self::new(genesis, difficulty);
        for block in iter {
            let number = block.number();
            ledger
                .add(block)
                .map_err(|e| NodeError::CorruptLedger(format!("block {number}: {e}")))?;
        }
        Ok(ledger)
    }

    pub fn save(&self, path: &Path) -> Result<(), NodeError> {
        let json = serde_json::to_string(&self.blocks)?;
        fs::write(path, json)?;
        info!("saved {} blocks to {}", self.blocks.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path, difficulty: u32) -> Result<Self, NodeError> {
        let raw = fs::read_to_string(path)?;
        let blocks: Vec<Block> = serde_json::from_str(&raw)?;
        let ledger = Self::from_blocks(blocks, difficulty)?;
        info!(
            "loaded ledger from {} at height {} ({} unspent outputs)",
            path.display(),
            ledger.height(),
            ledger.unspent.len()
        );
        Ok(ledger)
    }

    /// Re-verify linkage, numbering, hashes, proof-of-work and transactions.
    pub fn validate_chain(&self) -> Result<(), NodeError> {
        Self::from_blocks(self.blocks.clone(), self.difficulty).map(|_| ())
    }

    pub fn height(&self) -> u64 {
        (self.blocks.len() - 1) as u64
    }

    pub fn tip(&self) -> &Block {
        self.blocks
            .last()
            .expect("ledger always holds the genesis block")
    }

    pub fn tip_hash(&self) -> &str {
        &self.tip().hash
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        usize::try_from(number).ok().and_then(|n| self.blocks.get(n))
    }

    pub fn find_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash == hash)
    }

    /// The block immediately after the one with `hash`.
    pub fn next_block(&self, hash: &str) -> Option<&Block> {
        let pos = self.blocks.iter().position(|b| b.hash == hash)?;
        self.blocks.get(pos + 1)
    }

    pub fn unspent(&self) -> &UnspentSet {
        &self.unspent
    }

    /// Whether a transaction with this hash is confirmed in the current chain.
    #[cfg(test)]
    pub fn is_confirmed(&self, hash: &str) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .any(|t| t.hash == hash)
    }

    /// Received minus spent, over confirmed transactions only. A transaction
    /// counts as spent by `address` when `address` received one of its inputs.
    pub fn balance(&self, address: &str) -> u64 {
        let confirmed: HashMap<&str, &Transaction> = self
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .map(|t| (t.hash.as_str(), t))
            .collect();

        let received = confirmed
            .values()
            .filter(|t| t.receiver == address)
            .fold(0u64, |acc, t| acc.saturating_add(t.value));
        let spent = confirmed
            .values()
            .flat_map(|t| t.inputs.iter())
            .filter_map(|input| confirmed.get(input.as_str()))
            .filter(|prev| prev.receiver == address)
            .fold(0u64, |acc, prev| acc.saturating_add(prev.value));

        received.saturating_sub(spent)
    }

    /// Seal a locally mined block: keep only transactions still valid,
    /// append the reward, place and hash it, then extend the chain.
    pub fn update(&mut self, mut block: Block) -> Result<&Block, Rejection> {
        self.check_difficulty(&block)?;
        if block.prev_hash != self.tip_hash() {
            return Err(Rejection::WrongPrevHash {
                expected: self.tip_hash().to_string(),
                actual: block.prev_hash,
            });
        }
        if !pow::verify(self.tip_hash(), block.nonce, self.difficulty) {
            return Err(Rejection::ProofOfWork);
        }

        let candidates = std::mem::take(&mut block.transactions);
        let offered = candidates.len();
        block.transactions = self.filter_valid(candidates);
        if block.transactions.len() < offered {
            debug!(
                "dropped {} invalid pending transactions",
                offered - block.transactions.len()
            );
        }
        block
            .transactions
            .push(Transaction::reward(&block.processor, MINER_REWARD));

        let number = self.height() + 1;
        block.assign_placement(number, 0);
        block.hash = block.compute_hash();
        info!(
            "created block {} ({} txs) hash={}",
            number,
            block.transactions.len(),
            block.hash
        );
        self.append(block);
        Ok(self.tip())
    }

    /// Accept a remote block claiming to extend the tip.
    pub fn add(&mut self, mut block: Block) -> Result<(), Rejection> {
        if block.prev_hash != self.tip_hash() {
            return Err(Rejection::WrongPrevHash {
                expected: self.tip_hash().to_string(),
                actual: block.prev_hash,
            });
        }
        let expected = self.height() + 1;
        if block.block_number != Some(expected) {
            return Err(Rejection::WrongBlockNumber {
                expected,
                actual: block.block_number,
            });
        }
        self.check_difficulty(&block)?;
        if !pow::verify(self.tip_hash(), block.nonce, self.difficulty) {
            return Err(Rejection::ProofOfWork);
        }

        let mut reward = block.transactions.pop().ok_or(Rejection::MissingReward)?;
        self.validate_transactions(&mut block.transactions)?;
        check_reward(&block, &reward)?;
        reward.input_value = 0;
        block.transactions.push(reward);
        seal_and_compare(&mut block, expected)?;

        info!("added block {} hash={}", expected, block.hash);
        self.append(block);
        Ok(())
    }

    /// A competing sibling of an occupied height: its parent is in the
    /// current chain but it is not the block we hold at that height.
    pub fn is_root(&self, block: &Block) -> bool {
        let Some(number) = block.block_number else {
            return false;
        };
        if number == 0 || number > self.height() {
            return false;
        }
        match (self.block(number - 1), self.block(number)) {
            (Some(parent), Some(held)) => block.prev_hash == parent.hash && block.hash != held.hash,
            _ => false,
        }
    }

    /// Replace the chain from `block`'s height onward with `block`.
    /// Returns the orphaned blocks; on rejection the chain is restored intact.
    pub fn add_root(&mut self, mut block: Block) -> Result<Vec<Block>, Rejection> {
        let number = block.block_number.ok_or(Rejection::WrongBlockNumber {
            expected: 1,
            actual: None,
        })?;
        if number == 0 {
            return Err(Rejection::GenesisReplacement);
        }
        if !self.is_root(&block) {
            return Err(Rejection::NotRoot);
        }
        self.check_difficulty(&block)?;
        let fork_hash = &self.blocks[number as usize - 1].hash;
        if !pow::verify(fork_hash, block.nonce, self.difficulty) {
            return Err(Rejection::ProofOfWork);
        }
        let mut reward = block.transactions.pop().ok_or(Rejection::MissingReward)?;
        check_reward(&block, &reward)?;
        reward.input_value = 0;

        // Checkpoint, then truncate speculatively.
        let saved_unspent = self.unspent.clone();
        let suffix = self.blocks.split_off(number as usize);
        self.unspent = Self::index(&self.blocks);
        debug!(
            "rewound {} blocks to fork point {}",
            suffix.len(),
            number - 1
        );

        let outcome = self
            .validate_transactions(&mut block.transactions)
            .and_then(|()| {
                block.transactions.push(reward);
                seal_and_compare(&mut block, number)
            });

        match outcome {
            Ok(()) => {
                info!(
                    "reorganized at {}: new tip {}, orphaned {} blocks",
                    number,
                    block.hash,
                    suffix.len()
                );
                self.append(block);
                Ok(suffix)
            }
            Err(e) => {
                self.blocks.extend(suffix);
                self.unspent = saved_unspent;
                warn!("root block {} rejected, chain restored: {}", number, e);
                Err(e)
            }
        }
    }

    /// Replay a newest-first buffer of backfilled blocks. The replay runs on a
    /// scratch copy and is committed only if every block is accepted.
    pub fn add_buffer(&mut self, buffer: &[Block]) -> Result<Vec<Block>, Rejection> {
        let newest = buffer.first().ok_or(Rejection::EmptyBuffer)?;
        let oldest = buffer.last().ok_or(Rejection::EmptyBuffer)?;
        if newest.block_number.is_none_or(|n| n <= self.height()) {
            return Err(Rejection::StaleBuffer {
                height: self.height(),
            });
        }

        let mut scratch = self.clone();
        let mut replay = buffer.iter().rev().cloned();
        let mut orphaned = Vec::new();

        if oldest.prev_hash == scratch.tip_hash() {
            debug!("buffer of {} attaches at the tip", buffer.len());
        } else if scratch.is_root(oldest) {
            if let Some(root) = replay.next() {
                orphaned = scratch.add_root(root)?;
            }
        } else {
            return Err(Rejection::DetachedBuffer);
        }

        for block in replay {
            scratch.add(block)?;
        }

        *self = scratch;
        info!(
            "applied block buffer, now at height {}",
            self.height()
        );
        Ok(orphaned)
    }

    /// Validate `tx` on its own against confirmed state without touching the
    /// ledger. Returns the resolved input value.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<u64, Rejection> {
        let mut checked = tx.clone();
        self.validate_transaction(&mut checked, &mut HashSet::new())?;
        Ok(checked.input_value)
    }

    fn check_difficulty(&self, block: &Block) -> Result<(), Rejection> {
        if block.difficulty != self.difficulty {
            return Err(Rejection::WrongDifficulty {
                expected: self.difficulty,
                actual: block.difficulty,
            });
        }
        Ok(())
    }

    /// Validate one transaction against confirmed state plus the inputs
    /// already consumed earlier in the same block.
    fn validate_transaction(
        &self,
        tx: &mut Transaction,
        consumed: &mut HashSet<String>,
    ) -> Result<(), Rejection> {
        if tx.inputs.is_empty() {
            return Err(Rejection::NoInputs);
        }
        if tx.value == 0 {
            return Err(Rejection::NonPositiveValue);
        }

        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if !seen.insert(input.as_str()) {
                return Err(Rejection::DuplicateInput(input.clone()));
            }
            if consumed.contains(input) {
                return Err(Rejection::DoubleSpend(input.clone()));
            }
            let prev = self
                .unspent
                .get(input)
                .ok_or_else(|| Rejection::UnknownOrSpentInput(input.clone()))?;
            if prev.owner != tx.sender {
                return Err(Rejection::ForeignInput(input.clone()));
            }
        }

        if !tx.verify_signature() {
            return Err(Rejection::BadSignature);
        }

        let have = tx.resolve_input_value(&self.unspent)?;
        if have < tx.value {
            return Err(Rejection::InsufficientInput {
                have,
                need: tx.value,
            });
        }

        tx.input_value = have;
        consumed.extend(tx.inputs.iter().cloned());
        Ok(())
    }

    fn validate_transactions(&self, txs: &mut [Transaction]) -> Result<(), Rejection> {
        let mut consumed = HashSet::new();
        for tx in txs.iter_mut() {
            self.validate_transaction(tx, &mut consumed)?;
        }
        Ok(())
    }

    fn filter_valid(&self, txs: Vec<Transaction>) -> Vec<Transaction> {
        let mut consumed = HashSet::new();
        txs.into_iter()
            .filter_map(|mut tx| match self.validate_transaction(&mut tx, &mut consumed) {
                Ok(()) => Some(tx),
                Err(e) => {
                    debug!("skipping pending transaction: {e}");
                    None
                }
            })
            .collect()
    }

    fn append(&mut self, block: Block) {
        for tx in &block.transactions {
            self.unspent.apply(tx);
        }
        self.blocks.push(block);
    }

    fn index(blocks: &[Block]) -> UnspentSet {
        let mut unspent = UnspentSet::new();
        for tx in blocks.iter().flat_map(|b| b.transactions.iter()) {
            unspent.apply(tx);
        }
        unspent
    }
}

/// The reward must be a zero-input subsidy of exactly `MINER_REWARD`
/// paid by and to the block's processor.
fn check_reward(block: &Block, reward: &Transaction) -> Result<(), Rejection> {
    if !reward.inputs.is_empty() {
        return Err(Rejection::BadReward("reward must not spend inputs"));
    }
    if reward.value != MINER_REWARD {
        return Err(Rejection::BadReward("reward value differs from subsidy"));
    }
    if reward.sender != block.processor || reward.receiver != block.processor {
        return Err(Rejection::BadReward("reward must pay the block processor"));
    }
    Ok(())
}

/// Re-stamp placement, recompute the hash and require it to equal the claim.
fn seal_and_compare(block: &mut Block, number: u64) -> Result<(), Rejection> {
    let claimed = std::mem::take(&mut block.hash);
    block.assign_placement(number, 0);
    let computed = block.compute_hash();
    if computed != claimed {
        return Err(Rejection::HashMismatch { claimed, computed });
    }
    block.hash = computed;
    Ok(())
}
