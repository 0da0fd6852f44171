use service_core::{
    axum::{
        extract::{ConnectInfo, Path, State},
        http::{header, HeaderMap, StatusCode},
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use std::net::SocketAddr;

use super::remote_addr;
use crate::{
    dtos::session::{LoginRequest, RefreshRequest, SessionListResponse},
    middleware::AccessSession,
    services::LoginInput,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email and password
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|ua| ua.chars().take(512).collect::<String>());

    let res = state
        .sessions
        .login(LoginInput {
            email: req.email,
            password: Password::new(req.password),
            client_id: req.client_id,
            device: req.device.into_device(user_agent),
            remote_addr: remote_addr(connect_info),
        })
        .await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Exchange a refresh token for a new token pair
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.sessions.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Live sessions of the caller
pub async fn list_sessions(
    State(state): State<AppState>,
    AccessSession(ctx): AccessSession,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions.list_sessions(&ctx).await?;
    Ok((StatusCode::OK, Json(SessionListResponse { sessions })))
}

/// Sign out the session the request was made with
pub async fn revoke_current_session(
    State(state): State<AppState>,
    AccessSession(ctx): AccessSession,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.revoke(&ctx, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sign out another session of the caller
pub async fn revoke_session(
    State(state): State<AppState>,
    AccessSession(ctx): AccessSession,
    Path(public_session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .revoke(&ctx, Some(&public_session_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
