pub mod config;
pub mod stream;

pub use config::*;
pub use stream::*;

use crate::health;
use actix_web::web;

/// Registers every route. Shared by the binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(stream::index))
        .route("/offer", web::post().to(stream::offer))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(config::get_config)),
        )
        .route("/health", web::get().to(health::health_check));
}
