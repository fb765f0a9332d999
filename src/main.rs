mod api;
mod blockchain;
mod config;
mod error;
mod network;
mod node;
mod transaction;
mod wallet;

#[cfg(test)]
mod testing;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info, warn};
use std::io;

use api::AppState;
use blockchain::{Block, Ledger};
use config::NodeConfig;
use error::NodeError;
use network::PeerClient;
use node::Node;
use node::runtime::{PowWorker, Runtime, channel};
use wallet::Wallet;

fn load_or_create_ledger(cfg: &NodeConfig) -> Result<Ledger, NodeError> {
    if cfg.ledger_path.exists() {
        return Ledger::load(&cfg.ledger_path, cfg.difficulty);
    }
    info!(
        "no ledger at {}, starting from genesis with {} allocations",
        cfg.ledger_path.display(),
        cfg.genesis.len()
    );
    Ok(Ledger::new(Block::genesis(&cfg.genesis, cfg.difficulty), cfg.difficulty))
}

fn load_wallet(cfg: &NodeConfig) -> Result<Wallet, NodeError> {
    match &cfg.secret_key {
        Some(secret) => Wallet::from_secret_hex(secret),
        None => {
            let wallet = Wallet::generate();
            warn!(
                "NODE_SECRET_KEY not set, using ephemeral address {}",
                wallet.address()
            );
            Ok(wallet)
        }
    }
}

fn fatal(e: NodeError) -> io::Error {
    error!("{e}");
    io::Error::other(e)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let cfg = NodeConfig::from_env().map_err(fatal)?;
    let ledger = load_or_create_ledger(&cfg).map_err(fatal)?;
    let wallet = load_wallet(&cfg).map_err(fatal)?;

    println!(
        "⛓️ Starting node at http://{}:{} (difficulty {}, {} peers)",
        cfg.host,
        cfg.port,
        cfg.difficulty,
        cfg.peers.len()
    );

    let (handle, commands) = channel();
    let miner = cfg.mining.then(|| PowWorker::new(handle.sender()));
    let peers = PeerClient::new(cfg.peers.clone(), cfg.public_url.clone());
    let runtime = Runtime::new(
        Node::new(ledger, wallet),
        commands,
        peers,
        miner,
        cfg.ledger_path.clone(),
    );
    tokio::spawn(runtime.run());

    let state = web::Data::new(AppState { node: handle });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((cfg.host.as_str(), cfg.port))?
    .run()
    .await
}
