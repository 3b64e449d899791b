pub mod config;
pub mod db;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

pub use crate::config::Config;
pub use crate::error::{ServerError, ServerResult};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/seeds/:user_id", get(routes::get_seeds))
        .route("/seeds/:user_id/revealed", get(routes::revealed_seeds))
        .route("/seeds/client", post(routes::set_client_seed))
        .route("/seeds/rotate", post(routes::rotate))
        .route("/bet", post(routes::place_bet))
        .route("/bet/:bet_id", get(routes::get_bet))
        .route("/bet/:bet_id/verify", get(routes::verify_bet))
        .route("/bets/:user_id", get(routes::bet_history))
        .route("/verify", post(routes::verify))
        .route("/balance/:user_id", get(routes::balance))
        .route("/admin/credit", post(routes::admin_credit))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
