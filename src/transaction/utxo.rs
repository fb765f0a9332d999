use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::model::Transaction;

/// A confirmed transaction that has not been consumed as an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    /// Receiver of the transaction, the only key allowed to spend it.
    pub owner: String,
    pub value: u64,
    pub block: u64,
    pub number: u64,
}

/// Spendable transactions keyed by hash.
/// Derived from the block sequence; never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentSet {
    map: HashMap<String, Unspent>,
}

impl UnspentSet {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, hash: String, entry: Unspent) {
        self.map.insert(hash, entry);
    }

    /// Spend (remove) a transaction. Returns the entry if it was unspent.
    pub fn spend(&mut self, hash: &str) -> Option<Unspent> {
        self.map.remove(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&Unspent> {
        self.map.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.map.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Apply a placed transaction: consume its inputs, add it as spendable.
    pub fn apply(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            self.spend(input);
        }
        if let (Some(block), Some(number)) = (tx.block, tx.number) {
            self.insert(
                tx.hash.clone(),
                Unspent {
                    owner: tx.receiver.clone(),
                    value: tx.value,
                    block,
                    number,
                },
            );
        }
    }

    /// Unspent entries owned by `owner`, oldest first.
    pub fn owned_by(&self, owner: &str) -> Vec<(&str, &Unspent)> {
        let mut owned: Vec<_> = self
            .map
            .iter()
            .filter(|(_, u)| u.owner == owner)
            .map(|(h, u)| (h.as_str(), u))
            .collect();
        owned.sort_by_key(|(_, u)| (u.block, u.number));
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_spends_inputs_and_adds_output() {
        let mut set = UnspentSet::new();
        let mut funding = Transaction::reward("alice", 10);
        funding.place(0, 0);
        set.apply(&funding);
        assert!(set.contains(&funding.hash));

        let mut spend = Transaction::new(vec![funding.hash.clone()], 4, "alice".into(), "bob".into());
        spend.place(1, 0);
        set.apply(&spend);

        assert!(!set.contains(&funding.hash));
        assert_eq!(set.get(&spend.hash).map(|u| u.owner.as_str()), Some("bob"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unplaced_transactions_are_not_spendable() {
        let mut set = UnspentSet::new();
        set.apply(&Transaction::reward("alice", 10));
        assert!(set.is_empty());
    }

    #[test]
    fn owned_by_is_chain_ordered() {
        let mut set = UnspentSet::new();
        for (h, block, number) in [("c", 2, 0), ("a", 1, 1), ("b", 1, 0)] {
            set.insert(h.into(), Unspent { owner: "o".into(), value: 1, block, number });
        }
        set.insert("z".into(), Unspent { owner: "other".into(), value: 1, block: 0, number: 0 });
        let order: Vec<_> = set.owned_by("o").into_iter().map(|(h, _)| h).collect();
        assert_eq!(order, ["b", "a", "c"]);
    }
}
