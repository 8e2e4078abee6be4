//! HTTP application wiring (Axum router + engine wiring).
//!
//! - `services.rs`: store, transport and engine construction
//! - `routes.rs`: HTTP handlers
//! - `dto.rs`: request DTOs and their mapping to definitions
//! - `errors.rs`: consistent error responses

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use txweave_engine::Engine;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(engine: Engine) -> Router {
    let api = Router::new()
        .route("/submit", post(routes::submit))
        .route("/prepare", post(routes::prepare))
        .route("/submit_prepared/:gid", post(routes::submit_prepared))
        .route("/query/:gid", get(routes::query))
        .route("/transactions", get(routes::list))
        .route("/new_gid", get(routes::new_gid));

    Router::new()
        .route("/health", get(routes::health))
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(Extension(engine)))
}
