use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};

use super::models::{AppState, ChainResponse, SaveResponse, ValidateResponse, unavailable};

/// Height, tip, difficulty and queue sizes.
#[get("/status/")]
pub async fn get_status(state: web::Data<AppState>) -> impl Responder {
    match state.node.status().await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => unavailable(e),
    }
}

/// Get the full blockchain.
#[get("/chain/")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let (chain, status) = match (state.node.chain().await, state.node.status().await) {
        (Ok(chain), Ok(status)) => (chain, status),
        (Err(e), _) | (_, Err(e)) => return unavailable(e),
    };
    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        difficulty: status.difficulty,
        chain,
    })
}

/// Re-verify the whole chain from genesis.
#[get("/validate/")]
pub async fn validate_chain(state: web::Data<AppState>) -> impl Responder {
    let (outcome, status) = match (state.node.validate().await, state.node.status().await) {
        (Ok(outcome), Ok(status)) => (outcome, status),
        (Err(e), _) | (_, Err(e)) => return unavailable(e),
    };
    if let Err(e) = &outcome {
        warn!("API - chain failed validation: {e}");
    }
    HttpResponse::Ok().json(ValidateResponse {
        valid: outcome.is_ok(),
        height: status.height,
        difficulty: status.difficulty,
        error: outcome.err().map(|e| e.to_string()),
    })
}

/// Persist the chain to the configured ledger file.
#[post("/save/")]
pub async fn save_chain(state: web::Data<AppState>) -> impl Responder {
    match state.node.save().await {
        Ok(Ok(path)) => {
            info!("API - ledger saved to {}", path.display());
            HttpResponse::Ok().json(SaveResponse {
                path: path.display().to_string(),
            })
        }
        Ok(Err(e)) => HttpResponse::InternalServerError().body(e.to_string()),
        Err(e) => unavailable(e),
    }
}
