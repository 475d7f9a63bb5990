//! Router construction for the sqlgate server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use sqlgate_core::{QueryGateway, SessionService};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::handlers::session::SessionSettings;
use crate::middleware::bearer::bearer_auth;

/// Build the full axum router with all routes and middleware.
pub fn build_router(
    sessions: Arc<SessionService>,
    gateway: Arc<QueryGateway>,
    settings: SessionSettings,
) -> Router {
    // Routes that require a bearer session
    let protected = Router::new()
        .route("/v1/logout", post(handlers::session::logout))
        .route("/v1/logout_all", post(handlers::session::logout_all))
        .route("/v1/query", post(handlers::query::query))
        .route("/v1/exec", post(handlers::query::exec))
        .layer(axum_mw::from_fn(bearer_auth))
        .layer(Extension(gateway));

    // Public routes (no auth)
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/register", post(handlers::session::register))
        .route("/v1/login", post(handlers::session::login));

    public
        .merge(protected)
        .layer(Extension(settings))
        .layer(Extension(sessions))
        .layer(TraceLayer::new_for_http())
}
