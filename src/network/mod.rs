pub mod message;
pub mod peers;
pub mod sync;

pub use message::{Envelope, Outbound, PeerMessage, Recipient};
pub use peers::PeerClient;
pub use sync::{ChainSync, SyncOutcome};
