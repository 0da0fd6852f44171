use service_core::{
    axum::{
        extract::{ConnectInfo, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use std::net::SocketAddr;

use super::remote_addr;
use crate::{
    dtos::{
        auth::{ConfirmRequest, PasswordResetRequest},
        MessageResponse,
    },
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

/// Request a password reset link
pub async fn request_password_reset(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let addr = remote_addr(connect_info);
    state
        .sessions
        .reset_request(&req.email, &addr)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, ip = %addr, "Password reset request rejected");
            e
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "A password reset link has been sent to your email.".to_string(),
        }),
    ))
}

/// Confirm password reset with the mailed key
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.sessions.reset_confirm(&req.key).await?;
    Ok((StatusCode::OK, Json(MessageResponse { message })))
}

/// Reset link opened straight from the mail.
pub async fn confirm_password_reset_link(
    State(state): State<AppState>,
    ValidatedQuery(req): ValidatedQuery<ConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.sessions.reset_confirm(&req.key).await?;
    Ok((StatusCode::OK, Json(MessageResponse { message })))
}
