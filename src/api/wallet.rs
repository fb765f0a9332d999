use actix_web::{HttpResponse, Responder, post};
use serde::Serialize;

use crate::wallet::generate_keypair_hex;

#[derive(Serialize)]
struct NewWalletResponse {
    private_key: String,
    address: String,
}

/// Fresh keypair for a client wallet. The node keeps no copy.
#[post("/wallet/new/")]
pub async fn create_wallet() -> impl Responder {
    let (sk, address) = generate_keypair_hex();
    HttpResponse::Ok().json(NewWalletResponse {
        private_key: sk,
        address,
    })
}
