use actix_web::HttpResponse;
use log::error;
use serde::{Deserialize, Serialize};

use crate::blockchain::Block;
use crate::error::NodeError;
use crate::node::NodeHandle;

/// Shared application state: a handle onto the node's event loop.
pub struct AppState {
    pub node: NodeHandle,
}

/// The event loop could not answer; nothing else can go wrong on the handle.
pub fn unavailable(e: NodeError) -> HttpResponse {
    error!("API - node unavailable: {e}");
    HttpResponse::ServiceUnavailable().body(e.to_string())
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct ChainResponse {
    pub length: usize,
    pub difficulty: u32,
    pub chain: Vec<Block>,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub height: u64,
    pub difficulty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct SaveResponse {
    pub path: String,
}

/* ---------- Wallet / TX API Models ---------- */

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Serialize)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Deserialize)]
pub struct SendRequest {
    pub value: u64,
    pub receiver: String,
}

#[derive(Serialize)]
pub struct SendResponse {
    pub id: String,
    pub inputs: Vec<String>,
    pub value: u64,
    pub receiver: String,
}
