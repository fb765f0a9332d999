pub mod runtime;

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;

use crate::blockchain::{Block, Ledger};
use crate::error::Rejection;
use crate::network::{ChainSync, Envelope, Outbound, PeerMessage, Recipient, SyncOutcome};
use crate::transaction::Transaction;
use crate::wallet::Wallet;

pub use runtime::NodeHandle;

/// Side effects requested by a handler, carried out by the runtime.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    /// The tip moved: cancel any running nonce search and start over.
    pub restart_mining: bool,
}

impl Effects {
    fn send(mut self, to: Recipient, message: PeerMessage) -> Self {
        self.outbound.push(Outbound::new(to, message));
        self
    }

    fn tip_moved(mut self) -> Self {
        self.restart_mining = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub height: u64,
    pub tip_hash: String,
    pub difficulty: u32,
    pub address: String,
    pub pending: usize,
    pub buffered: usize,
}

/// Everything the event loop owns: ledger, pending pool, backfill buffer
/// and the local wallet. Handlers are synchronous and return `Effects`.
#[derive(Debug)]
pub struct Node {
    ledger: Ledger,
    pending: Vec<Transaction>,
    sync: ChainSync,
    wallet: Wallet,
}

impl Node {
    pub fn new(ledger: Ledger, wallet: Wallet) -> Self {
        Self {
            ledger,
            pending: Vec::new(),
            sync: ChainSync::new(),
            wallet,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn address(&self) -> &str {
        self.wallet.address()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.ledger.balance(address)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            height: self.ledger.height(),
            tip_hash: self.ledger.tip_hash().to_string(),
            difficulty: self.ledger.difficulty(),
            address: self.wallet.address().to_string(),
            pending: self.pending().len(),
            buffered: self.sync.len(),
        }
    }

    /// Ask peers for whatever follows our tip.
    pub fn bootstrap(&self) -> Effects {
        Effects::default().send(
            Recipient::All,
            PeerMessage::ReturnNextBlock(self.ledger.tip_hash().to_string()),
        )
    }

    /// Route one peer message to its handler.
    pub fn handle_peer(&mut self, envelope: Envelope) -> Effects {
        let Envelope { origin, message } = envelope;
        debug!("received {} from {}", message.command(), origin);
        match message {
            PeerMessage::NewBlock(block) => self.on_new_block(block, origin),
            PeerMessage::GetBlock(block) => self.on_get_block(block, origin),
            PeerMessage::ReturnBlock(hash) => match self.ledger.find_block(&hash) {
                Some(block) => Effects::default()
                    .send(Recipient::Peer(origin), PeerMessage::GetBlock(block.clone())),
                None => {
                    debug!("no block {hash} to return");
                    Effects::default()
                }
            },
            PeerMessage::ReturnNextBlock(hash) => match self.ledger.next_block(&hash) {
                Some(block) => Effects::default()
                    .send(Recipient::Peer(origin), PeerMessage::GetBlock(block.clone())),
                None => Effects::default(),
            },
            PeerMessage::Transaction(tx) => match self.submit_transaction(tx, Some(origin)) {
                Ok(effects) => effects,
                Err(e) => {
                    warn!("rejected relayed transaction: {e}");
                    Effects::default()
                }
            },
            PeerMessage::Ping => Effects::default().send(Recipient::Peer(origin), PeerMessage::Pong),
            PeerMessage::Pong => Effects::default(),
        }
    }

    /// A nonce search finished. Results for an obsolete tip are discarded.
    pub fn on_nonce_found(&mut self, tip_hash: &str, nonce: u64) -> Effects {
        if tip_hash != self.ledger.tip_hash() {
            debug!("discarding nonce for stale tip {tip_hash}");
            return Effects::default();
        }
        let candidate = Block::new(
            self.pending.clone(),
            self.wallet.address().to_string(),
            tip_hash.to_string(),
            nonce,
            self.ledger.difficulty(),
        );
        match self.ledger.update(candidate) {
            Ok(block) => {
                let block = block.clone();
                self.prune_pending(std::slice::from_ref(&block));
                Effects::default()
                    .send(Recipient::All, PeerMessage::NewBlock(block))
                    .tip_moved()
            }
            Err(e) => {
                warn!("local block rejected: {e}");
                Effects::default().tip_moved()
            }
        }
    }

    /// Admit a signed transaction to the pending pool and relay it.
    pub fn submit_transaction(
        &mut self,
        tx: Transaction,
        origin: Option<String>,
    ) -> Result<Effects, Rejection> {
        self.ledger.check_transaction(&tx)?;
        let id = tx.content_id();
        if self.pending.iter().any(|p| p.content_id() == id) {
            return Ok(Effects::default());
        }
        // first seen wins: a conflicting spend never enters the pool
        let reserved: HashSet<&str> = self
            .pending
            .iter()
            .flat_map(|t| t.inputs.iter().map(String::as_str))
            .collect();
        if let Some(taken) = tx.inputs.iter().find(|i| reserved.contains(i.as_str())) {
            return Err(Rejection::DoubleSpend(taken.clone()));
        }

        debug!("pending pool accepted transaction {id}");
        self.pending.push(tx.clone());
        let to = match origin {
            Some(origin) => Recipient::AllExcept(origin),
            None => Recipient::All,
        };
        Ok(Effects::default().send(to, PeerMessage::Transaction(tx)))
    }

    /// Pay `value` to `receiver` from this node's unspent outputs, oldest first.
    pub fn send(&mut self, value: u64, receiver: &str) -> Result<(Transaction, Effects), Rejection> {
        if value == 0 {
            return Err(Rejection::NonPositiveValue);
        }
        let reserved: HashSet<&str> = self
            .pending
            .iter()
            .flat_map(|t| t.inputs.iter().map(String::as_str))
            .collect();

        let mut inputs = Vec::new();
        let mut total = 0u64;
        for (hash, unspent) in self.ledger.unspent().owned_by(self.wallet.address()) {
            if reserved.contains(hash) {
                continue;
            }
            inputs.push(hash.to_string());
            total = total.saturating_add(unspent.value);
            if total >= value {
                break;
            }
        }
        if total < value {
            return Err(Rejection::InsufficientInput {
                have: total,
                need: value,
            });
        }

        let mut tx = Transaction::new(
            inputs,
            value,
            self.wallet.address().to_string(),
            receiver.to_string(),
        );
        tx.sign(&self.wallet);
        let effects = self.submit_transaction(tx.clone(), None)?;
        info!("queued payment of {value} to {receiver}");
        Ok((tx, effects))
    }

    fn on_new_block(&mut self, block: Block, origin: String) -> Effects {
        let number = block.number();
        match self.sync.on_new_block(&mut self.ledger, block) {
            SyncOutcome::Extended(block) => {
                info!("accepted block {number} from {origin}");
                self.prune_pending(std::slice::from_ref(&block));
                Effects::default()
                    .send(Recipient::AllExcept(origin), PeerMessage::NewBlock(block))
                    .tip_moved()
            }
            other => self.after_sync(other, origin),
        }
    }

    fn on_get_block(&mut self, block: Block, origin: String) -> Effects {
        match self.sync.on_ancestor(&mut self.ledger, block) {
            SyncOutcome::Extended(block) => {
                self.prune_pending(std::slice::from_ref(&block));
                // keep catching up from the same peer
                Effects::default()
                    .send(
                        Recipient::Peer(origin),
                        PeerMessage::ReturnNextBlock(block.hash.clone()),
                    )
                    .tip_moved()
            }
            other => self.after_sync(other, origin),
        }
    }

    fn after_sync(&mut self, outcome: SyncOutcome, origin: String) -> Effects {
        match outcome {
            SyncOutcome::Extended(_) | SyncOutcome::Queued => Effects::default(),
            SyncOutcome::NeedAncestor(hash) => {
                Effects::default().send(Recipient::All, PeerMessage::ReturnBlock(hash))
            }
            SyncOutcome::Applied { applied, orphaned } => {
                info!(
                    "block buffer from {origin} applied, now at height {}",
                    self.ledger.height()
                );
                self.prune_pending(&applied);
                self.requeue_orphaned(&orphaned);
                Effects::default().tip_moved()
            }
            SyncOutcome::Ignored(reason) => {
                debug!("ignored block from {origin}: {reason}");
                Effects::default()
            }
            SyncOutcome::Rejected(e) => {
                warn!("rejected block from {origin}: {e}");
                Effects::default()
            }
        }
    }

    /// Drop the pending transactions now confirmed in `blocks`, and any whose
    /// inputs the new chain has spent.
    fn prune_pending(&mut self, blocks: &[Block]) {
        let included: HashSet<String> = blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .map(Transaction::content_id)
            .collect();
        let before = self.pending.len();
        let unspent = self.ledger.unspent();
        self.pending.retain(|t| {
            !included.contains(&t.content_id()) && t.inputs.iter().all(|i| unspent.contains(i))
        });
        if before != self.pending.len() {
            debug!(
                "pending pool pruned: {} -> {}",
                before,
                self.pending.len()
            );
        }
    }

    /// Transactions from orphaned blocks go back to the pool unless the
    /// winning chain already confirmed them.
    fn requeue_orphaned(&mut self, orphaned: &[Block]) {
        let confirmed: HashSet<String> = self
            .ledger
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter())
            .map(Transaction::content_id)
            .collect();
        for tx in orphaned.iter().flat_map(|b| b.transactions.iter()) {
            if tx.is_reward_shaped() || confirmed.contains(&tx.content_id()) {
                continue;
            }
            let mut unplaced = tx.clone();
            unplaced.block = None;
            unplaced.number = None;
            unplaced.input_value = 0;
            unplaced.hash = String::new();
            if self.submit_transaction(unplaced, None).is_err() {
                debug!("orphaned transaction no longer valid");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::MINER_REWARD;
    use crate::testing::{funded_ledger, genesis_output, mine, mined_elsewhere, solve_for, transfer};

    fn envelope(origin: &str, message: PeerMessage) -> Envelope {
        Envelope {
            origin: origin.into(),
            message,
        }
    }

    #[test]
    fn mined_nonce_seals_pending_and_broadcasts() {
        let alice = Wallet::generate();
        let me = Wallet::generate();
        let ledger = funded_ledger(&[(&alice, 20)]);
        let input = genesis_output(&ledger, &alice);
        let mut node = Node::new(ledger, me.clone());

        let tx = transfer(&alice, vec![input], 5, "x");
        let effects = node.submit_transaction(tx, Some("http://p".into())).unwrap();
        assert_eq!(effects.outbound[0].to, Recipient::AllExcept("http://p".into()));
        assert_eq!(node.pending().len(), 1);

        let tip = node.ledger().tip_hash().to_string();
        let effects = node.on_nonce_found(&tip, solve_for(&tip));
        assert!(effects.restart_mining);
        assert!(matches!(
            effects.outbound.as_slice(),
            [Outbound { to: Recipient::All, message: PeerMessage::NewBlock(_) }]
        ));
        assert_eq!(node.ledger().height(), 1);
        assert!(node.pending().is_empty());
        assert_eq!(node.balance("x"), 5);
        assert_eq!(node.balance(me.address()), MINER_REWARD);
    }

    #[test]
    fn stale_nonce_is_discarded() {
        let me = Wallet::generate();
        let other = Wallet::generate();
        let mut ledger = funded_ledger(&[]);
        let old_tip = ledger.tip_hash().to_string();
        let nonce = solve_for(&old_tip);
        mine(&mut ledger, &other, Vec::new());
        let mut node = Node::new(ledger, me);

        assert_eq!(node.on_nonce_found(&old_tip, nonce), Effects::default());
        assert_eq!(node.ledger().height(), 1);
    }

    #[test]
    fn remote_block_prunes_only_included_transactions() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let miner = Wallet::generate();
        let ledger = funded_ledger(&[(&alice, 20), (&bob, 20)]);
        let a_in = genesis_output(&ledger, &alice);
        let b_in = genesis_output(&ledger, &bob);
        let mut node = Node::new(ledger.clone(), Wallet::generate());

        let from_alice = transfer(&alice, vec![a_in], 5, "x");
        let from_bob = transfer(&bob, vec![b_in], 6, "y");
        node.submit_transaction(from_alice.clone(), None).unwrap();
        node.submit_transaction(from_bob.clone(), None).unwrap();

        let block = mined_elsewhere(&ledger, &miner, vec![from_alice]);
        let effects = node.handle_peer(envelope("http://p", PeerMessage::NewBlock(block)));
        assert!(effects.restart_mining);
        assert_eq!(
            effects.outbound[0].to,
            Recipient::AllExcept("http://p".into())
        );
        assert_eq!(node.pending(), &[from_bob]);
    }

    #[test]
    fn detached_block_requests_ancestor_then_adopts_fork() {
        let miner_a = Wallet::generate();
        let miner_b = Wallet::generate();
        let base = funded_ledger(&[]);
        let mut local = base.clone();
        let orphan = mine(&mut local, &miner_a, Vec::new());
        let mut remote = base;
        for _ in 0..2 {
            mine(&mut remote, &miner_b, Vec::new());
        }
        let blocks = remote.blocks().to_vec();
        let mut node = Node::new(local, Wallet::generate());

        let effects = node.handle_peer(envelope("http://p", PeerMessage::NewBlock(blocks[2].clone())));
        assert_eq!(
            effects.outbound,
            vec![Outbound::new(Recipient::All, PeerMessage::ReturnBlock(blocks[1].hash.clone()))]
        );
        assert_eq!(node.status().buffered, 1);

        let effects = node.handle_peer(envelope("http://p", PeerMessage::GetBlock(blocks[1].clone())));
        assert!(effects.restart_mining);
        assert_eq!(node.ledger().tip_hash(), remote.tip_hash());
        assert_eq!(node.status().buffered, 0);
        assert!(!node.ledger().is_confirmed(&orphan.hash));
    }

    #[test]
    fn orphaned_transactions_return_to_pool() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let miner_a = Wallet::generate();
        let miner_b = Wallet::generate();
        let base = funded_ledger(&[(&alice, 20), (&bob, 20)]);
        let a_in = genesis_output(&base, &alice);
        let b_in = genesis_output(&base, &bob);

        let mut local = base.clone();
        let paid = transfer(&alice, vec![a_in], 5, "x");
        mine(&mut local, &miner_a, vec![paid.clone(), transfer(&bob, vec![b_in.clone()], 3, "z")]);
        let mut remote = base;
        mine(&mut remote, &miner_b, vec![transfer(&bob, vec![b_in], 4, "w")]);
        mine(&mut remote, &miner_b, Vec::new());
        let blocks = remote.blocks().to_vec();
        let mut node = Node::new(local, Wallet::generate());

        node.handle_peer(envelope("http://p", PeerMessage::NewBlock(blocks[2].clone())));
        node.handle_peer(envelope("http://p", PeerMessage::GetBlock(blocks[1].clone())));

        assert_eq!(node.ledger().height(), 2);
        // bob's input was re-spent by the winning chain; alice's payment survives
        assert_eq!(node.pending().len(), 1);
        assert_eq!(node.pending()[0].content_id(), paid.content_id());
        assert!(node.pending()[0].verify_signature());
    }

    #[test]
    fn serves_blocks_and_pongs() {
        let miner = Wallet::generate();
        let mut ledger = funded_ledger(&[]);
        let genesis_hash = ledger.tip_hash().to_string();
        let b1 = mine(&mut ledger, &miner, Vec::new());
        let mut node = Node::new(ledger, Wallet::generate());

        let reply = node.handle_peer(envelope("http://p", PeerMessage::ReturnBlock(b1.hash.clone())));
        assert_eq!(
            reply.outbound,
            vec![Outbound::new(Recipient::Peer("http://p".into()), PeerMessage::GetBlock(b1.clone()))]
        );
        let reply = node.handle_peer(envelope("http://p", PeerMessage::ReturnNextBlock(genesis_hash)));
        assert_eq!(reply.outbound[0].message, PeerMessage::GetBlock(b1));
        let reply = node.handle_peer(envelope("http://p", PeerMessage::ReturnBlock("missing".into())));
        assert!(reply.outbound.is_empty());
        let reply = node.handle_peer(envelope("http://p", PeerMessage::Ping));
        assert_eq!(reply.outbound[0].message, PeerMessage::Pong);
    }

    #[test]
    fn forward_catch_up_requests_next_block() {
        let miner = Wallet::generate();
        let mut remote = funded_ledger(&[]);
        let local = remote.clone();
        let b1 = mine(&mut remote, &miner, Vec::new());
        let mut node = Node::new(local, Wallet::generate());

        let effects = node.handle_peer(envelope("http://p", PeerMessage::GetBlock(b1.clone())));
        assert_eq!(node.ledger().height(), 1);
        assert_eq!(
            effects.outbound,
            vec![Outbound::new(Recipient::Peer("http://p".into()), PeerMessage::ReturnNextBlock(b1.hash))]
        );
    }

    #[test]
    fn send_selects_inputs_and_rejects_overdraft() {
        let me = Wallet::generate();
        let ledger = funded_ledger(&[(&me, 7), (&me, 9)]);
        let mut node = Node::new(ledger, me.clone());

        assert_eq!(node.send(0, "x").unwrap_err(), Rejection::NonPositiveValue);
        let (tx, effects) = node.send(10, "x").unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert!(tx.verify_signature());
        assert_eq!(effects.outbound[0].to, Recipient::All);

        // both outputs are reserved by the pending payment
        assert_eq!(
            node.send(1, "y").unwrap_err(),
            Rejection::InsufficientInput { have: 0, need: 1 }
        );
    }

    #[test]
    fn foreign_spend_cannot_lock_our_outputs() {
        let me = Wallet::generate();
        let mallory = Wallet::generate();
        let ledger = funded_ledger(&[(&me, 10)]);
        let mine_out = genesis_output(&ledger, &me);
        let mut node = Node::new(ledger, me.clone());

        let hostile = transfer(&mallory, vec![mine_out.clone()], 1, mallory.address());
        let effects = node.handle_peer(envelope("http://p", PeerMessage::Transaction(hostile)));
        assert!(effects.outbound.is_empty());
        assert!(node.pending().is_empty());

        let (tx, _) = node.send(5, "x").unwrap();
        assert_eq!(tx.inputs, vec![mine_out]);
    }

    #[test]
    fn conflicting_spends_are_refused_by_the_pool() {
        let alice = Wallet::generate();
        let ledger = funded_ledger(&[(&alice, 20)]);
        let input = genesis_output(&ledger, &alice);
        let mut node = Node::new(ledger, Wallet::generate());

        node.submit_transaction(transfer(&alice, vec![input.clone()], 5, "x"), None)
            .unwrap();
        assert_eq!(
            node.submit_transaction(transfer(&alice, vec![input.clone()], 6, "y"), None),
            Err(Rejection::DoubleSpend(input))
        );
        assert_eq!(node.pending().len(), 1);
    }

    #[test]
    fn block_spending_pending_inputs_evicts_them() {
        let alice = Wallet::generate();
        let miner = Wallet::generate();
        let ledger = funded_ledger(&[(&alice, 20)]);
        let input = genesis_output(&ledger, &alice);
        let mut node = Node::new(ledger.clone(), Wallet::generate());

        node.submit_transaction(transfer(&alice, vec![input.clone()], 5, "x"), None)
            .unwrap();
        let rival = transfer(&alice, vec![input], 7, "y");
        let block = mined_elsewhere(&ledger, &miner, vec![rival]);
        node.handle_peer(envelope("http://p", PeerMessage::NewBlock(block)));

        assert_eq!(node.ledger().height(), 1);
        assert!(node.pending().is_empty());
        assert_eq!(node.status().pending, 0);
    }

    #[test]
    fn pool_rejects_unsigned_and_ignores_duplicates() {
        let alice = Wallet::generate();
        let ledger = funded_ledger(&[(&alice, 20)]);
        let input = genesis_output(&ledger, &alice);
        let mut node = Node::new(ledger, Wallet::generate());

        let mut unsigned = transfer(&alice, vec![input.clone()], 5, "x");
        unsigned.signature.clear();
        assert_eq!(node.submit_transaction(unsigned, None), Err(Rejection::BadSignature));

        let tx = transfer(&alice, vec![input], 5, "x");
        assert!(!node.submit_transaction(tx.clone(), None).unwrap().outbound.is_empty());
        assert!(node.submit_transaction(tx, None).unwrap().outbound.is_empty());
        assert_eq!(node.pending().len(), 1);

        let unknown = transfer(&alice, vec!["nope".into()], 1, "x");
        assert!(matches!(
            node.submit_transaction(unknown, None),
            Err(Rejection::UnknownOrSpentInput(_))
        ));
    }
}
