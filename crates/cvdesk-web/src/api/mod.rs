mod auth_handlers;
pub mod downloads;

use axum::http::{header, Method};
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::security_headers;
use crate::state::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new().route("/auth/login", post(auth_handlers::login))
}

pub fn order_router() -> Router<AppState> {
    Router::new()
        .route(
            "/orders/{id}/download-link",
            post(downloads::create_download_link),
        )
        .route("/orders/{id}/download", get(downloads::download))
}

/// Full application router with the shared middleware stack.
pub fn app(state: AppState, hsts: bool) -> Router {
    // CORS: same-origin only by default (no cross-origin requests allowed)
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let base_router = Router::new().nest("/api", auth_router().merge(order_router()));

    if hsts {
        base_router
            .layer(from_fn(security_headers::security_headers_with_hsts))
            .layer(RequestBodyLimitLayer::new(64 * 1024))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    } else {
        base_router
            .layer(from_fn(security_headers::security_headers))
            .layer(RequestBodyLimitLayer::new(64 * 1024))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
