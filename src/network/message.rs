use serde::{Deserialize, Serialize};

use crate::blockchain::Block;
use crate::transaction::Transaction;

/// Every message kind a peer may send. Routing is an exhaustive `match`
/// in `Node::handle_peer`; anything else fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "camelCase")]
pub enum PeerMessage {
    /// A freshly accepted block, relayed across the network.
    NewBlock(Block),
    /// A block sent in answer to `ReturnBlock` / `ReturnNextBlock`.
    GetBlock(Block),
    /// Ask for the block with this hash.
    ReturnBlock(String),
    /// Ask for the successor of the block with this hash.
    ReturnNextBlock(String),
    Transaction(Transaction),
    Ping,
    Pong,
}

impl PeerMessage {
    pub fn command(&self) -> &'static str {
        match self {
            PeerMessage::NewBlock(_) => "newBlock",
            PeerMessage::GetBlock(_) => "getBlock",
            PeerMessage::ReturnBlock(_) => "returnBlock",
            PeerMessage::ReturnNextBlock(_) => "returnNextBlock",
            PeerMessage::Transaction(_) => "transaction",
            PeerMessage::Ping => "ping",
            PeerMessage::Pong => "pong",
        }
    }
}

/// A message plus the base URL of the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub message: PeerMessage,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Who an outbound message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    All,
    AllExcept(String),
    Peer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: PeerMessage,
}

impl Outbound {
    pub fn new(to: Recipient, message: PeerMessage) -> Self {
        Self { to, message }
    }
}
