use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::transaction::Transaction;

/// A batch of transactions linked to its predecessor by hash.
/// By convention the last transaction of a placed block is the miner reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BlockRecord", from = "BlockRecord")]
pub struct Block {
    pub timestamp: i64, // Unix timestamp (UTC)
    pub transactions: Vec<Transaction>,
    /// Miner public key, credited by the reward transaction.
    pub processor: String,
    /// Chain height; `None` until the ledger places the block.
    pub block_number: Option<u64>,
    pub prev_hash: String,
    pub nonce: u64,
    pub difficulty: u32,
    pub hash: String,
}

/// Wire layout: `[[timestamp, processor, prev_hash, hash, block_number, nonce, difficulty], [tx..]]`.
#[derive(Serialize, Deserialize)]
struct BlockRecord((i64, String, String, String, i64, u64, u32), Vec<Transaction>);

impl From<Block> for BlockRecord {
    fn from(b: Block) -> Self {
        let number = b
            .block_number
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1);
        BlockRecord(
            (b.timestamp, b.processor, b.prev_hash, b.hash, number, b.nonce, b.difficulty),
            b.transactions,
        )
    }
}

impl From<BlockRecord> for Block {
    fn from(r: BlockRecord) -> Self {
        let (timestamp, processor, prev_hash, hash, number, nonce, difficulty) = r.0;
        Self {
            timestamp,
            transactions: r.1,
            processor,
            block_number: u64::try_from(number).ok(),
            prev_hash,
            nonce,
            difficulty,
            hash,
        }
    }
}

impl Block {
    /// Deterministic first block. Allocations become zero-input transactions
    /// so that nodes sharing them agree on the genesis hash.
    pub fn genesis(allocations: &[(String, u64)], difficulty: u32) -> Self {
        let transactions = allocations
            .iter()
            .map(|(receiver, value)| Transaction::new(Vec::new(), *value, String::new(), receiver.clone()))
            .collect();
        let mut block = Self {
            timestamp: 0,
            transactions,
            processor: String::new(),
            block_number: None,
            prev_hash: String::from("0"),
            nonce: 0,
            difficulty,
            hash: String::new(),
        };
        block.assign_placement(0, 0);
        block.hash = block.compute_hash();
        block
    }

    /// Create an unplaced block whose nonce was solved against `prev_hash`.
    pub fn new(
        transactions: Vec<Transaction>,
        processor: String,
        prev_hash: String,
        nonce: u64,
        difficulty: u32,
    ) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            transactions,
            processor,
            block_number: None,
            prev_hash,
            nonce,
            difficulty,
            hash: String::new(),
        }
    }

    /// SHA-256 over timestamp, processor, number, prev_hash, nonce, difficulty
    /// and every transaction hash, concatenated in that order.
    pub fn compute_hash(&self) -> String {
        let number = self
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| String::from("-1"));
        let mut preimage = format!(
            "{}{}{}{}{}{}",
            self.timestamp, self.processor, number, self.prev_hash, self.nonce, self.difficulty
        );
        for tx in &self.transactions {
            preimage.push_str(&tx.hash);
        }
        let mut hasher = Sha256::new();
        hasher.update(preimage.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Set the block number and stamp every transaction with it and an
    /// increasing sequence number, in list order.
    pub fn assign_placement(&mut self, block_number: u64, starting_sequence: u64) {
        self.block_number = Some(block_number);
        for (seq, tx) in (starting_sequence..).zip(self.transactions.iter_mut()) {
            tx.place(block_number, seq);
        }
    }

    /// Number of a block that is known to be placed (remote or chain blocks).
    pub fn number(&self) -> u64 {
        self.block_number.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::Block;
    use crate::transaction::Transaction;

    fn placed_block() -> Block {
        let txs = vec![
            Transaction::new(vec!["a".into()], 1, "s".into(), "r".into()),
            Transaction::new(vec!["b".into()], 2, "s".into(), "r".into()),
            Transaction::reward("m", 10),
        ];
        let mut b = Block::new(txs, "m".into(), "prev".into(), 42, 8);
        b.assign_placement(1, 0);
        b.hash = b.compute_hash();
        b
    }

    #[test]
    fn genesis_is_deterministic() {
        let alloc = vec![("alice".to_string(), 100)];
        let a = Block::genesis(&alloc, 8);
        let b = Block::genesis(&alloc, 8);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash, a.compute_hash());
        assert_eq!(a.block_number, Some(0));
        assert_ne!(a.hash, Block::genesis(&[], 8).hash);
    }

    #[test]
    fn placement_stamps_in_list_order() {
        let b = placed_block();
        let stamps: Vec<_> = b.transactions.iter().map(|t| (t.block, t.number)).collect();
        assert_eq!(stamps, [(Some(1), Some(0)), (Some(1), Some(1)), (Some(1), Some(2))]);
        assert!(b.transactions.iter().all(|t| t.hash == t.compute_hash()));
    }

    #[test]
    fn hash_is_deterministic_and_order_sensitive() {
        let b = placed_block();
        assert_eq!(b.hash, b.compute_hash());

        let mut swapped = b.clone();
        swapped.transactions.swap(0, 1);
        assert_ne!(swapped.compute_hash(), b.hash);
    }

    #[test]
    fn every_header_field_is_covered() {
        let b = placed_block();
        let mutations: Vec<fn(&mut Block)> = vec![
            |b| b.timestamp += 1,
            |b| b.processor.push('x'),
            |b| b.block_number = Some(2),
            |b| b.prev_hash.push('x'),
            |b| b.nonce += 1,
            |b| b.difficulty += 1,
            |b| b.transactions[0].hash.push('x'),
        ];
        for mutate in mutations {
            let mut m = b.clone();
            mutate(&mut m);
            assert_ne!(m.compute_hash(), b.hash);
        }
    }

    #[test]
    fn unplaced_block_wire_number_is_negative() {
        let b = Block::new(Vec::new(), "m".into(), "p".into(), 1, 8);
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json[0][4], serde_json::json!(-1));
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back.block_number, None);
        assert_eq!(back, b);
    }
}
