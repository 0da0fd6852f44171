pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Environment;
use crate::services::{IdentityStore, SessionService};

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub service_version: String,
    pub environment: Environment,
    pub sessions: SessionService,
    pub store: Arc<dyn IdentityStore>,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    Router::new()
        .route("/health", get(health_check))
        .route("/signup", post(handlers::signup))
        .route(
            "/signup/confirm",
            get(handlers::confirm_signup_link).post(handlers::confirm_signup),
        )
        .route("/login", post(handlers::login))
        .route("/token/refresh", post(handlers::refresh))
        .route(
            "/sessions",
            get(handlers::list_sessions).delete(handlers::revoke_current_session),
        )
        .route("/sessions/:public_session_id", delete(handlers::revoke_session))
        .route("/password-reset", post(handlers::request_password_reset))
        .route(
            "/password-reset/confirm",
            get(handlers::confirm_password_reset_link).post(handlers::confirm_password_reset),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

/// Service health check across both stores.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable("store unavailable".to_string())
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "environment": format!("{:?}", state.environment),
        "checks": {
            "main": "up",
            "ephemeral": "up"
        }
    })))
}
