use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AddressResponse, AppState, BalanceResponse, unavailable};

/// Confirmed balance: everything received minus everything spent.
#[get("/balance/{address}/")]
pub async fn get_balance(state: web::Data<AppState>, path: web::Path<(String,)>) -> impl Responder {
    let address = path.into_inner().0;
    match state.node.balance(address.clone()).await {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse { address, balance }),
        Err(e) => unavailable(e),
    }
}

#[get("/address/")]
pub async fn get_address(state: web::Data<AppState>) -> impl Responder {
    match state.node.status().await {
        Ok(status) => HttpResponse::Ok().json(AddressResponse {
            address: status.address,
        }),
        Err(e) => unavailable(e),
    }
}
