//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Two websocket endpoints share one Axum router: the GM command interface
//! and the receive-only player display. Both run over the same `AppState`.

pub mod gm;
pub mod player;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/gm/ws", get(gm::handle_ws))
        .route("/api/player/ws", get(player::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
