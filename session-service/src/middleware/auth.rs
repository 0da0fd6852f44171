use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use service_core::error::AppError;

use crate::services::{AccessContext, ServiceError};
use crate::AppState;

/// Caller authenticated by an `Authorization: Bearer <access token>` header.
#[derive(Debug, Clone)]
pub struct AccessSession(pub AccessContext);

#[axum::async_trait]
impl FromRequestParts<AppState> for AccessSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ServiceError::InvalidToken)?;

        let ctx = state.sessions.authenticate(token)?;
        Ok(AccessSession(ctx))
    }
}
