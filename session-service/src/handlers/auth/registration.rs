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
        auth::{ConfirmRequest, SignupRequest, SignupResponse},
        MessageResponse,
    },
    services::SignupInput,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

/// Start a signup: reserve the invite and mail a confirmation link.
pub async fn signup(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requested = state
        .sessions
        .signup_request(SignupInput {
            email: req.email,
            language: req.language,
            invite_code: req.invite_code,
            remote_addr: remote_addr(connect_info),
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignupResponse {
            email: requested.email,
            invite_reserved: requested.invite_reserved,
            message: "A confirmation link has been sent to your email.".to_string(),
        }),
    ))
}

/// Complete a signup from the mailed confirmation key.
pub async fn confirm_signup(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.sessions.signup_confirm(&req.key).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

/// Same as [`confirm_signup`], for the link in the confirmation mail.
pub async fn confirm_signup_link(
    State(state): State<AppState>,
    ValidatedQuery(req): ValidatedQuery<ConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.sessions.signup_confirm(&req.key).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}
