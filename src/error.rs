use thiserror::Error;

/// Why a transaction or block was refused. Rejections never mutate the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("signature does not verify against sender key")]
    BadSignature,
    #[error("transaction must spend at least one input")]
    NoInputs,
    #[error("transaction value must be positive")]
    NonPositiveValue,
    #[error("input {0} is listed more than once")]
    DuplicateInput(String),
    #[error("input {0} is unknown or already spent")]
    UnknownOrSpentInput(String),
    #[error("input {0} is spent twice within one block")]
    DoubleSpend(String),
    #[error("input {0} is not owned by the sender")]
    ForeignInput(String),
    #[error("inputs total {have} is less than value {need}")]
    InsufficientInput { have: u64, need: u64 },
    #[error("block does not extend the tip (expected prev {expected}, got {actual})")]
    WrongPrevHash { expected: String, actual: String },
    #[error("wrong block number (expected {expected}, got {actual:?})")]
    WrongBlockNumber { expected: u64, actual: Option<u64> },
    #[error("block targets difficulty {actual}, ledger requires {expected}")]
    WrongDifficulty { expected: u32, actual: u32 },
    #[error("nonce does not satisfy proof-of-work")]
    ProofOfWork,
    #[error("block carries no reward transaction")]
    MissingReward,
    #[error("reward transaction is malformed: {0}")]
    BadReward(&'static str),
    #[error("claimed hash {claimed} does not match recomputed {computed}")]
    HashMismatch { claimed: String, computed: String },
    #[error("block is not a fork point of the current chain")]
    NotRoot,
    #[error("genesis block cannot be replaced")]
    GenesisReplacement,
    #[error("buffer does not advance past height {height}")]
    StaleBuffer { height: u64 },
    #[error("buffer is empty")]
    EmptyBuffer,
    #[error("buffer does not attach to the tip or a fork point")]
    DetachedBuffer,
}

/// Operator-facing failures: persisted state, configuration and keys.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persisted ledger is inconsistent: {0}")]
    CorruptLedger(String),
    #[error("invalid configuration {key}: {reason}")]
    Config { key: &'static str, reason: String },
    #[error("invalid key: {0}")]
    Key(&'static str),
    #[error("node event loop has stopped")]
    Stopped,
}
