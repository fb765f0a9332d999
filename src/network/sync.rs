use log::debug;
use std::collections::VecDeque;

use crate::blockchain::{Block, Ledger};
use crate::error::Rejection;

/// Longest backfill we are willing to hold before giving up on a peer's chain.
pub const MAX_BUFFERED_BLOCKS: usize = 512;

/// What the synchronizer did with an incoming block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The block extended the tip directly.
    Extended(Block),
    /// The block was buffered; its parent with this hash must be fetched.
    NeedAncestor(String),
    /// The block was buffered at the newest end; the backfill continues.
    Queued,
    /// A buffer replay succeeded.
    Applied {
        applied: Vec<Block>,
        orphaned: Vec<Block>,
    },
    Ignored(&'static str),
    Rejected(Rejection),
}

/// Backfill state: blocks whose ancestry is not yet known locally,
/// held newest first (front) to oldest (back).
#[derive(Debug, Default)]
pub struct ChainSync {
    buffer: VecDeque<Block>,
}

impl ChainSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// A block announced as new by a peer.
    pub fn on_new_block(&mut self, ledger: &mut Ledger, block: Block) -> SyncOutcome {
        self.drop_stale(ledger);
        if block.prev_hash == ledger.tip_hash() {
            return self.extend(ledger, block);
        }
        if block.block_number.is_none_or(|n| n <= ledger.height()) {
            return SyncOutcome::Ignored("block does not advance the chain");
        }

        match self.buffer.front() {
            Some(newest) if newest.hash == block.prev_hash => {
                self.buffer.push_front(block);
                if self.buffer.len() > MAX_BUFFERED_BLOCKS {
                    self.buffer.clear();
                    return SyncOutcome::Ignored("backfill exceeded buffer limit");
                }
                SyncOutcome::Queued
            }
            Some(newest) if newest.number() >= block.number() => {
                SyncOutcome::Ignored("backfill already in progress for a longer chain")
            }
            _ => {
                if !self.buffer.is_empty() {
                    debug!(
                        "abandoning backfill of {} blocks for higher block {}",
                        self.buffer.len(),
                        block.number()
                    );
                    self.buffer.clear();
                }
                let parent = block.prev_hash.clone();
                debug!(
                    "block {} does not attach, requesting parent {}",
                    block.number(),
                    parent
                );
                self.buffer.push_front(block);
                SyncOutcome::NeedAncestor(parent)
            }
        }
    }

    /// A block delivered in answer to an ancestor or successor request.
    pub fn on_ancestor(&mut self, ledger: &mut Ledger, block: Block) -> SyncOutcome {
        self.drop_stale(ledger);
        let is_missing_ancestor = self
            .buffer
            .back()
            .is_some_and(|oldest| oldest.prev_hash == block.hash);
        if !is_missing_ancestor {
            // Forward catch-up: accept a direct successor of the tip.
            if block.prev_hash == ledger.tip_hash() {
                return self.extend(ledger, block);
            }
            return SyncOutcome::Ignored("block is not the missing ancestor");
        }

        let attaches = block.prev_hash == ledger.tip_hash() || ledger.is_root(&block);
        self.buffer.push_back(block);

        if attaches {
            let buffered: Vec<Block> = self.buffer.drain(..).collect();
            return match ledger.add_buffer(&buffered) {
                Ok(orphaned) => SyncOutcome::Applied {
                    applied: buffered,
                    orphaned,
                },
                Err(e) => SyncOutcome::Rejected(e),
            };
        }

        if self.buffer.len() > MAX_BUFFERED_BLOCKS {
            self.buffer.clear();
            return SyncOutcome::Ignored("backfill exceeded buffer limit");
        }

        let parent = self
            .buffer
            .back()
            .map(|b| b.prev_hash.clone())
            .unwrap_or_default();
        SyncOutcome::NeedAncestor(parent)
    }

    fn extend(&mut self, ledger: &mut Ledger, block: Block) -> SyncOutcome {
        match ledger.add(block.clone()) {
            Ok(()) => {
                self.drop_stale(ledger);
                SyncOutcome::Extended(block)
            }
            Err(e) => SyncOutcome::Rejected(e),
        }
    }

    /// A backfill the tip has caught up with can no longer win.
    fn drop_stale(&mut self, ledger: &Ledger) {
        if self
            .buffer
            .front()
            .is_some_and(|newest| newest.number() <= ledger.height())
        {
            debug!(
                "dropping {} buffered blocks overtaken at height {}",
                self.buffer.len(),
                ledger.height()
            );
            self.buffer.clear();
        }
    }
}
