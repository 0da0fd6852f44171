use serde::{Deserialize, Serialize};
use validator::Validate;

/// Field checks that produce stable `bad_param_*` codes live in the service
/// layer; these bounds only reject oversized bodies.
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(max = 1024, message = "email is too long"))]
    pub email: String,

    #[validate(length(max = 16, message = "language is too long"))]
    pub language: String,

    #[validate(length(max = 1024, message = "invite_code is too long"))]
    pub invite_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub email: String,
    pub invite_reserved: bool,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmRequest {
    #[validate(length(max = 256, message = "key is too long"))]
    pub key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(length(max = 1024, message = "email is too long"))]
    pub email: String,
}
