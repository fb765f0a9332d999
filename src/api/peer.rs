use actix_web::{HttpResponse, Responder, post, web};
use log::{debug, warn};

use super::models::{AppState, unavailable};
use crate::network::Envelope;

/// Inbound peer traffic. The envelope is decoded here and handed to the
/// event loop; the reply, if any, goes back over a separate request.
#[post("/peer/")]
pub async fn post_peer(state: web::Data<AppState>, body: web::Bytes) -> impl Responder {
    let envelope = match Envelope::decode(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("POST /peer/ - undecodable message ({} bytes): {e}", body.len());
            return HttpResponse::BadRequest().body(format!("invalid peer message: {e}"));
        }
    };
    debug!(
        "POST /peer/ - {} from {}",
        envelope.message.command(),
        envelope.origin
    );

    match state.node.deliver(envelope).await {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e) => unavailable(e),
    }
}
