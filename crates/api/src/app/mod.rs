//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and orchestrator construction
//! - `routes/`: HTTP handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use tollgate_infra::AuthOrchestrator;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around a shared orchestrator.
pub fn build_app(orchestrator: Arc<AuthOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/login", post(routes::auth::login))
        .route("/validate", get(routes::auth::validate).post(routes::auth::validate))
        .route("/refresh", post(routes::auth::refresh))
        .route("/revoke", post(routes::auth::revoke))
        .route("/logout", post(routes::auth::logout))
        .layer(ServiceBuilder::new().layer(Extension(orchestrator)))
}
