use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

use super::{Effects, Node, NodeStatus};
use crate::blockchain::{Block, pow};
use crate::error::{NodeError, Rejection};
use crate::network::{Envelope, PeerClient};
use crate::transaction::Transaction;

const COMMAND_QUEUE: usize = 1024;

/// Requests serialized through the event loop. Reads reply on a oneshot.
#[derive(Debug)]
pub enum Command {
    Peer(Envelope),
    NonceFound { tip_hash: String, nonce: u64 },
    Status(oneshot::Sender<NodeStatus>),
    Chain(oneshot::Sender<Vec<Block>>),
    Validate(oneshot::Sender<Result<(), NodeError>>),
    Balance {
        address: String,
        reply: oneshot::Sender<u64>,
    },
    Send {
        value: u64,
        receiver: String,
        reply: oneshot::Sender<Result<Transaction, Rejection>>,
    },
    Save(oneshot::Sender<Result<PathBuf, NodeError>>),
}

/// Cloneable front door to the event loop, held by the HTTP handlers.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<Command>,
}

pub fn channel() -> (NodeHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    (NodeHandle { tx }, rx)
}

impl NodeHandle {
    pub fn sender(&self) -> mpsc::Sender<Command> {
        self.tx.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn deliver(&self, envelope: Envelope) -> Result<(), NodeError> {
        self.tx
            .send(Command::Peer(envelope))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        self.request(Command::Status).await
    }

    pub async fn chain(&self) -> Result<Vec<Block>, NodeError> {
        self.request(Command::Chain).await
    }

    pub async fn validate(&self) -> Result<Result<(), NodeError>, NodeError> {
        self.request(Command::Validate).await
    }

    pub async fn balance(&self, address: String) -> Result<u64, NodeError> {
        self.request(|reply| Command::Balance { address, reply })
            .await
    }

    pub async fn send(
        &self,
        value: u64,
        receiver: String,
    ) -> Result<Result<Transaction, Rejection>, NodeError> {
        self.request(|reply| Command::Send {
            value,
            receiver,
            reply,
        })
        .await
    }

    pub async fn save(&self) -> Result<Result<PathBuf, NodeError>, NodeError> {
        self.request(Command::Save).await
    }
}

/// Runs the nonce search on the blocking pool. Restarting cancels the
/// previous search; its result, if any, arrives tagged with a stale tip.
pub struct PowWorker {
    commands: mpsc::Sender<Command>,
    cancel: Arc<AtomicBool>,
}

impl PowWorker {
    pub fn new(commands: mpsc::Sender<Command>) -> Self {
        Self {
            commands,
            cancel: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn restart(&mut self, tip_hash: String, difficulty: u32) {
        self.stop();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Arc::clone(&cancel);
        let commands = self.commands.clone();

        tokio::task::spawn_blocking(move || {
            let start: u64 = rand::random();
            debug!("mining on {tip_hash} at difficulty {difficulty}");
            if let Some(nonce) = pow::solve(&tip_hash, difficulty, start, &cancel) {
                if commands
                    .blocking_send(Command::NonceFound { tip_hash, nonce })
                    .is_err()
                {
                    debug!("event loop gone, dropping nonce");
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// The single task that owns the `Node`.
pub struct Runtime {
    node: Node,
    commands: mpsc::Receiver<Command>,
    peers: PeerClient,
    miner: Option<PowWorker>,
    ledger_path: PathBuf,
}

impl Runtime {
    pub fn new(
        node: Node,
        commands: mpsc::Receiver<Command>,
        peers: PeerClient,
        miner: Option<PowWorker>,
        ledger_path: PathBuf,
    ) -> Self {
        Self {
            node,
            commands,
            peers,
            miner,
            ledger_path,
        }
    }

    pub async fn run(mut self) {
        info!(
            "node {} running at height {} with {} peers",
            self.node.address(),
            self.node.ledger().height(),
            self.peers.peers().len()
        );
        let bootstrap = self.node.bootstrap();
        self.apply(bootstrap);
        self.restart_mining();

        while let Some(command) = self.commands.recv().await {
            let effects = self.handle(command);
            self.apply(effects);
        }

        if let Some(miner) = &self.miner {
            miner.stop();
        }
        info!("node event loop stopped");
    }

    fn handle(&mut self, command: Command) -> Effects {
        match command {
            Command::Peer(envelope) => self.node.handle_peer(envelope),
            Command::NonceFound { tip_hash, nonce } => self.node.on_nonce_found(&tip_hash, nonce),
            Command::Status(reply) => {
                let _ = reply.send(self.node.status());
                Effects::default()
            }
            Command::Chain(reply) => {
                let _ = reply.send(self.node.ledger().blocks().to_vec());
                Effects::default()
            }
            Command::Validate(reply) => {
                let _ = reply.send(self.node.ledger().validate_chain());
                Effects::default()
            }
            Command::Balance { address, reply } => {
                let _ = reply.send(self.node.balance(&address));
                Effects::default()
            }
            Command::Send {
                value,
                receiver,
                reply,
            } => match self.node.send(value, &receiver) {
                Ok((tx, effects)) => {
                    let _ = reply.send(Ok(tx));
                    effects
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Effects::default()
                }
            },
            Command::Save(reply) => {
                let result = self
                    .node
                    .ledger()
                    .save(&self.ledger_path)
                    .map(|()| self.ledger_path.clone());
                if let Err(e) = &result {
                    error!("failed to save ledger: {e}");
                }
                let _ = reply.send(result);
                Effects::default()
            }
        }
    }

    fn apply(&mut self, effects: Effects) {
        if effects.restart_mining {
            self.restart_mining();
        }
        if !effects.outbound.is_empty() {
            self.peers.dispatch(effects.outbound);
        }
    }

    fn restart_mining(&mut self) {
        let tip = self.node.ledger().tip_hash().to_string();
        let difficulty = self.node.ledger().difficulty();
        if let Some(miner) = self.miner.as_mut() {
            miner.restart(tip, difficulty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PeerMessage;
    use crate::testing::{funded_ledger, mine};
    use crate::wallet::Wallet;

    fn spawn_node(node: Node, path: PathBuf) -> NodeHandle {
        let (handle, rx) = channel();
        let peers = PeerClient::new(Vec::new(), "http://127.0.0.1:0".into());
        tokio::spawn(Runtime::new(node, rx, peers, None, path).run());
        handle
    }

    #[tokio::test]
    async fn handle_round_trips_through_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let me = Wallet::generate();
        let ledger = funded_ledger(&[(&me, 12)]);
        let handle = spawn_node(Node::new(ledger, me.clone()), path.clone());

        let status = handle.status().await.unwrap();
        assert_eq!(status.height, 0);
        assert_eq!(status.address, me.address());
        assert_eq!(handle.balance(me.address().to_string()).await.unwrap(), 12);

        let tx = handle.send(5, "x".into()).await.unwrap().unwrap();
        assert_eq!(tx.value, 5);
        assert_eq!(handle.status().await.unwrap().pending, 1);
        assert!(matches!(
            handle.send(100, "x".into()).await.unwrap(),
            Err(Rejection::InsufficientInput { .. })
        ));

        assert!(handle.validate().await.unwrap().is_ok());
        assert_eq!(handle.save().await.unwrap().unwrap(), path);
        assert!(path.exists());
        assert_eq!(handle.chain().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn peer_blocks_and_nonces_flow_through_the_loop() {
        let miner = Wallet::generate();
        let mut remote = funded_ledger(&[]);
        let local = remote.clone();
        let b1 = mine(&mut remote, &miner, Vec::new());
        let handle = spawn_node(Node::new(local, Wallet::generate()), PathBuf::from("unused"));

        handle
            .deliver(Envelope {
                origin: "http://peer:1".into(),
                message: PeerMessage::NewBlock(b1.clone()),
            })
            .await
            .unwrap();
        // a nonce for the replaced tip is discarded
        handle
            .sender()
            .send(Command::NonceFound {
                tip_hash: "stale".into(),
                nonce: 0,
            })
            .await
            .unwrap();

        let status = handle.status().await.unwrap();
        assert_eq!(status.height, 1);
        assert_eq!(status.tip_hash, b1.hash);
    }
}
