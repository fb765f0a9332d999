mod balance;
mod chain;
mod health;
pub mod models;
mod peer;
mod tx;
mod wallet;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chain::get_status)
            .service(chain::get_chain)
            .service(chain::validate_chain)
            .service(chain::save_chain)
            .service(balance::get_balance)
            .service(balance::get_address)
            .service(tx::post_send)
            .service(wallet::create_wallet)
            .service(peer::post_peer),
    );
}
