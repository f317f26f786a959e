pub mod http;
pub mod listeners;
pub mod session;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;

/// The admin HTTP surface (spec §6): `/pub`, `/stat`, and — only when auth is
/// enabled — `/ch`. Always bound separately from the subscriber transport,
/// on `config.admin_addr`.
pub fn build_admin_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/pub", post(http::publish::publish))
        .route("/stat", get(http::stats::stat));

    let router = if state.config.auth {
        router.route("/ch", get(http::ch::add_token))
    } else {
        router
    };

    router.with_state(state)
}

/// The public subscriber surface used only when `config.protocol` is
/// WebSocket (spec §4.9); the TCP variant runs its own accept loop in
/// [`listeners::tcp`] instead of an axum router.
pub fn build_subscribe_router(state: AppState) -> Router {
    Router::new()
        .route("/sub", get(listeners::ws::sub_handler))
        .with_state(state)
}
