//! Media storage gateway: uploads routed to an object store or a
//! transcoder, then indexed under per-tenant tags.

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;

/// The full HTTP surface over `state`.
pub fn app(state: AppState) -> Router {
    routes::routes::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
