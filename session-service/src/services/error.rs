use service_core::error::AppError;
use thiserror::Error;

use super::notifier::NotifyError;

/// Request field that failed validation before any store work started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadParam {
    Email,
    InviteCode,
    Language,
    ConfirmationKey,
    ClientId,
    Password,
}

impl BadParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadParam::Email => "email",
            BadParam::InviteCode => "invite_code",
            BadParam::Language => "language",
            BadParam::ConfirmationKey => "confirmation_key",
            BadParam::ClientId => "client_id",
            BadParam::Password => "password",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BadParam::Email => "bad_param_email",
            BadParam::InviteCode => "bad_param_invite_code",
            BadParam::Language => "bad_param_language",
            BadParam::ConfirmationKey => "bad_param_confirmation_key",
            BadParam::ClientId => "bad_param_client_id",
            BadParam::Password => "bad_param_password",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    InternalString(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Invalid parameter: {}", .0.as_str())]
    BadParam(BadParam),

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Invite code not found")]
    InviteNotFound,

    #[error("Invite code has no redemptions left")]
    InviteHasEnded,

    #[error("Confirmation not found")]
    ConfirmationNotFound,

    #[error("Already confirmed")]
    AlreadyConfirmed,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password reset already requested")]
    ResetAlreadyRequested,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Bad refresh token")]
    BadRefreshToken,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Payload decryption failed")]
    DecryptFailed,
}

impl ServiceError {
    /// Stable machine-readable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Database(_) => "database",
            ServiceError::InternalString(_) | ServiceError::Internal(_) => "internal",
            ServiceError::Notify(_) => "notify",
            ServiceError::BadParam(param) => param.code(),
            ServiceError::UserAlreadyExists => "user_already_exists",
            ServiceError::InviteNotFound => "invite_not_found",
            ServiceError::InviteHasEnded => "invite_has_ended",
            ServiceError::ConfirmationNotFound => "confirmation_not_found",
            ServiceError::AlreadyConfirmed => "already_confirmed",
            ServiceError::UserNotFound => "user_not_found",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::ResetAlreadyRequested => "reset_already_requested",
            ServiceError::InvalidToken => "invalid_token",
            ServiceError::BadRefreshToken => "bad_refresh_token",
            ServiceError::SessionNotFound => "session_not_found",
            ServiceError::DecryptFailed => "decrypt_failed",
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InternalString(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::DecryptFailed => {
                AppError::InternalError(anyhow::anyhow!("Payload decryption failed"))
            }
            ServiceError::Notify(e) => AppError::ServiceUnavailable(e.to_string()),
            ServiceError::BadParam(_) => AppError::BadRequest(anyhow::anyhow!(code)),
            ServiceError::InvalidToken
            | ServiceError::BadRefreshToken
            | ServiceError::InvalidCredentials => AppError::Unauthorized(anyhow::anyhow!(code)),
            ServiceError::InviteNotFound
            | ServiceError::ConfirmationNotFound
            | ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!(code)),
            ServiceError::UserAlreadyExists
            | ServiceError::AlreadyConfirmed
            | ServiceError::ResetAlreadyRequested
            | ServiceError::SessionNotFound => AppError::Conflict(anyhow::anyhow!(code)),
            ServiceError::InviteHasEnded => AppError::Gone(anyhow::anyhow!(code)),
        }
    }
}
