use axum::{routing::any, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router. The battle protocol lives entirely on the
/// WebSocket endpoint at the root path.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(ws_handler::ws_upgrade))
        .with_state(state)
}
