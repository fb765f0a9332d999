use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::utxo::UnspentSet;
use crate::error::Rejection;
use crate::wallet::{Wallet, verify_signature_hex};

/// A signed transfer of `value` from `sender` to `receiver`, spending the
/// whole value of every input transaction it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TransactionRecord", from = "TransactionRecord")]
pub struct Transaction {
    /// Hashes of the confirmed transactions being spent.
    pub inputs: Vec<String>,
    pub value: u64,
    pub sender: String,
    pub receiver: String,
    /// Containing block, set on placement.
    pub block: Option<u64>,
    /// Sequence number within the containing block, set on placement.
    pub number: Option<u64>,
    /// Sum of the resolved inputs, filled in during validation.
    pub input_value: u64,
    pub hash: String,
    /// Hex DER ECDSA signature; empty for reward transactions.
    pub signature: String,
}

/// Wire layout: `[inputs, value, sender, receiver, block, number, input_value, hash, signature]`.
#[derive(Serialize, Deserialize)]
struct TransactionRecord(
    Vec<String>,
    u64,
    String,
    String,
    i64,
    i64,
    u64,
    String,
    String,
);

fn placement_to_wire(p: Option<u64>) -> i64 {
    p.and_then(|v| i64::try_from(v).ok()).unwrap_or(-1)
}

fn placement_from_wire(p: i64) -> Option<u64> {
    u64::try_from(p).ok()
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        TransactionRecord(
            tx.inputs,
            tx.value,
            tx.sender,
            tx.receiver,
            placement_to_wire(tx.block),
            placement_to_wire(tx.number),
            tx.input_value,
            tx.hash,
            tx.signature,
        )
    }
}

impl From<TransactionRecord> for Transaction {
    fn from(r: TransactionRecord) -> Self {
        Self {
            inputs: r.0,
            value: r.1,
            sender: r.2,
            receiver: r.3,
            block: placement_from_wire(r.4),
            number: placement_from_wire(r.5),
            input_value: r.6,
            hash: r.7,
            signature: r.8,
        }
    }
}

impl Transaction {
    /// Build an unsigned, unplaced transfer.
    pub fn new(inputs: Vec<String>, value: u64, sender: String, receiver: String) -> Self {
        Self {
            inputs,
            value,
            sender,
            receiver,
            block: None,
            number: None,
            input_value: 0,
            hash: String::new(),
            signature: String::new(),
        }
    }

    /// Zero-input subsidy paying `processor`; authorized by block inclusion.
    pub fn reward(processor: &str, value: u64) -> Self {
        Self::new(Vec::new(), value, processor.to_string(), processor.to_string())
    }

    pub fn is_reward_shaped(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Canonical signing payload: `[inputs, value, sender, receiver]` as JSON.
    /// Placement and hash are excluded so a wallet can sign before inclusion.
    pub fn signing_payload(&self) -> Vec<u8> {
        let payload = serde_json::json!([
            self.inputs,
            self.value.to_string(),
            self.sender,
            self.receiver
        ]);
        payload.to_string().into_bytes()
    }

    /// SHA-256 of the signing payload.
    pub fn sighash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_payload());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }

    pub fn sign(&mut self, wallet: &Wallet) {
        self.signature = wallet.sign(self.sighash());
    }

    /// True iff `signature` was produced by the sender's key over the signing payload.
    pub fn verify_signature(&self) -> bool {
        verify_signature_hex(&self.sender, &self.signature, self.sighash()).unwrap_or(false)
    }

    /// Identity of a pending transaction, stable across placement.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_payload());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Content hash over every field except `hash` and the derived `input_value`.
    pub fn compute_hash(&self) -> String {
        let inputs = serde_json::Value::from(self.inputs.clone()).to_string();
        let preimage = format!(
            "{}{}{}{}{}{}{}",
            inputs,
            self.value,
            self.sender,
            self.receiver,
            placement_to_wire(self.block),
            placement_to_wire(self.number),
            self.signature
        );
        let mut hasher = Sha256::new();
        hasher.update(preimage.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Stamp block/sequence and cache the resulting hash.
    pub fn place(&mut self, block: u64, number: u64) {
        self.block = Some(block);
        self.number = Some(number);
        self.hash = self.compute_hash();
    }

    /// Sum the values of all referenced inputs in the unspent set.
    pub fn resolve_input_value(&self, unspent: &UnspentSet) -> Result<u64, Rejection> {
        self.inputs.iter().try_fold(0u64, |acc, input| {
            let entry = unspent
                .get(input)
                .ok_or_else(|| Rejection::UnknownOrSpentInput(input.clone()))?;
            Ok(acc.saturating_add(entry.value))
        })
    }
}
