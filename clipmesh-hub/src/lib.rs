//! Library surface for the hub binary, split out so integration tests
//! can drive a real hub without shelling out to the built binary.

pub mod handler;
pub mod state;

use axum::routing::get;
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use state::HubState;

/// Builds the hub's axum router: a single `/ws` upgrade endpoint bound
/// to `state`.
pub fn router(state: HubState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}
