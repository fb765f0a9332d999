use actix_web::{HttpResponse, Responder, post, web};
use log::{debug, info, warn};

use super::models::{AppState, SendRequest, SendResponse, unavailable};
use crate::wallet::pubkey_to_address_hex;

/// Pay from this node's wallet: coin selection, signing and broadcast
/// happen inside the node.
#[post("/send/")]
pub async fn post_send(state: web::Data<AppState>, body: web::Json<SendRequest>) -> impl Responder {
    let SendRequest { value, receiver } = body.into_inner();
    debug!("POST /send/ - value={value} receiver={receiver}");

    let receiver = match pubkey_to_address_hex(receiver.trim()) {
        Ok(addr) => addr,
        Err(e) => {
            warn!("POST /send/ - rejected receiver: {e}");
            return HttpResponse::BadRequest().body(format!("invalid receiver: {e}"));
        }
    };

    match state.node.send(value, receiver).await {
        Ok(Ok(tx)) => {
            info!("POST /send/ - queued {} to {}", tx.value, tx.receiver);
            HttpResponse::Ok().json(SendResponse {
                id: tx.content_id(),
                inputs: tx.inputs,
                value: tx.value,
                receiver: tx.receiver,
            })
        }
        Ok(Err(rejection)) => {
            warn!("POST /send/ - rejected: {rejection}");
            HttpResponse::BadRequest().body(rejection.to_string())
        }
        Err(e) => unavailable(e),
    }
}
