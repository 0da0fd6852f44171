use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidateEmail};

use crate::models::Language;
use crate::services::error::{BadParam, ServiceError};
use crate::utils::random::is_confirmation_key;

pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Query-string twin of [`ValidatedJson`], for links opened from mail.
pub struct ValidatedQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Query parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedQuery(value))
    }
}

pub const EMAIL_MIN_LENGTH: usize = 3;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const INVITE_CODE_MAX_LENGTH: usize = 64;
pub const CLIENT_ID_MAX_LENGTH: usize = 64;

pub fn validate_email(email: &str) -> Result<(), ServiceError> {
    let len = email.chars().count();
    if !(EMAIL_MIN_LENGTH..=EMAIL_MAX_LENGTH).contains(&len) || !email.to_string().validate_email()
    {
        return Err(ServiceError::BadParam(BadParam::Email));
    }
    Ok(())
}

/// `[A-Za-z0-9_-]{1,64}`
pub fn validate_invite_code(code: &str) -> Result<(), ServiceError> {
    let ok = !code.is_empty()
        && code.len() <= INVITE_CODE_MAX_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !ok {
        return Err(ServiceError::BadParam(BadParam::InviteCode));
    }
    Ok(())
}

pub fn parse_language(language: &str) -> Result<Language, ServiceError> {
    language
        .parse()
        .map_err(|_| ServiceError::BadParam(BadParam::Language))
}

pub fn validate_confirmation_key(key: &str) -> Result<(), ServiceError> {
    if !is_confirmation_key(key) {
        return Err(ServiceError::BadParam(BadParam::ConfirmationKey));
    }
    Ok(())
}

pub fn validate_client_id(client_id: &str) -> Result<(), ServiceError> {
    if client_id.trim().is_empty() || client_id.len() > CLIENT_ID_MAX_LENGTH {
        return Err(ServiceError::BadParam(BadParam::ClientId));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_param(result: Result<(), ServiceError>) -> Option<BadParam> {
        match result {
            Err(ServiceError::BadParam(p)) => Some(p),
            _ => None,
        }
    }

    #[test]
    fn test_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert_eq!(bad_param(validate_email("not-an-email")), Some(BadParam::Email));
        assert_eq!(bad_param(validate_email("@")), Some(BadParam::Email));
        let long = format!("{}@x.com", "a".repeat(250));
        assert_eq!(bad_param(validate_email(&long)), Some(BadParam::Email));
    }

    #[test]
    fn test_invite_code() {
        assert!(validate_invite_code("INV1").is_ok());
        assert!(validate_invite_code("a_b-C9").is_ok());
        assert!(validate_invite_code(&"x".repeat(64)).is_ok());
        assert_eq!(
            bad_param(validate_invite_code(&"x".repeat(65))),
            Some(BadParam::InviteCode)
        );
        assert_eq!(bad_param(validate_invite_code("")), Some(BadParam::InviteCode));
        assert_eq!(
            bad_param(validate_invite_code("has space")),
            Some(BadParam::InviteCode)
        );
    }

    #[test]
    fn test_language_and_key() {
        assert_eq!(parse_language("en").unwrap(), Language::En);
        assert!(matches!(
            parse_language("klingon"),
            Err(ServiceError::BadParam(BadParam::Language))
        ));
        assert_eq!(
            bad_param(validate_confirmation_key("short")),
            Some(BadParam::ConfirmationKey)
        );
        assert!(validate_confirmation_key(&"A".repeat(32)).is_ok());
    }

    #[test]
    fn test_client_id() {
        assert!(validate_client_id("web").is_ok());
        assert_eq!(bad_param(validate_client_id(" ")), Some(BadParam::ClientId));
    }
}
