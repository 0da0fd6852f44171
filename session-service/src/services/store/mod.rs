//! Identity store: users, invite codes, confirmations and sessions.
//!
//! Records live in two independently committed databases. *Main* holds
//! users, invite codes, issued invites, sessions and devices. *Ephemeral*
//! holds pending confirmations and invite reservations. Multi-store
//! operations lock Main first, then Ephemeral, and commit in the same order.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ServiceError;
use crate::models::{Language, NewSession, PendingConfirmation, Session, SessionRecord, User};
use crate::utils::validation::{
    parse_language, validate_confirmation_key, validate_email, validate_invite_code,
};

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;

/// Confirmations expired for longer than this are hard-deleted by the sweep.
pub fn confirmation_retention() -> chrono::Duration {
    chrono::Duration::days(1)
}

/// Signup step 1 input.
#[derive(Debug, Clone)]
pub struct SignupConfirmationRequest {
    pub email: String,
    pub language: String,
    pub invite_code: Option<String>,
    pub confirmation_key: String,
    pub remote_addr: String,
    pub invite_required: bool,
}

impl SignupConfirmationRequest {
    /// Field checks that run before any transaction is opened.
    pub fn validate(&self) -> Result<Language, ServiceError> {
        validate_email(&self.email)?;
        if let Some(code) = &self.invite_code {
            validate_invite_code(code)?;
        }
        let language = parse_language(&self.language)?;
        validate_confirmation_key(&self.confirmation_key)?;
        Ok(language)
    }
}

#[derive(Debug, Clone)]
pub struct SignupReservation {
    pub confirmation: PendingConfirmation,
    /// False when no code was given, or the code was exhausted and invites
    /// are optional.
    pub invite_reserved: bool,
}

/// Password reset step 1 input.
#[derive(Debug, Clone)]
pub struct ResetConfirmationRequest {
    pub email: String,
    pub confirmation_key: String,
    pub remote_addr: String,
}

impl ResetConfirmationRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        validate_email(&self.email)?;
        validate_confirmation_key(&self.confirmation_key)
    }
}

#[derive(Debug, Clone)]
pub struct ResetReservation {
    pub user: User,
    pub confirmation: PendingConfirmation,
}

#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub user: User,
    pub revoked_sessions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations whose confirmation expired, was consumed or vanished.
    pub released_reservations: u64,
    /// Confirmations hard-deleted after the retention period.
    pub purged_confirmations: u64,
    /// Live confirmations closed because Main already holds their user
    /// (left behind by a partial commit).
    pub repaired_confirmations: u64,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Signup step 1: reserve an invite (when one applies) and record a
    /// new-user confirmation.
    async fn create_signup_confirmation(
        &self,
        request: &SignupConfirmationRequest,
    ) -> Result<SignupReservation, ServiceError>;

    /// Signup step 2: consume the confirmation, create the user, convert the
    /// reservation into a permanent redemption.
    async fn confirm_signup(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<User, ServiceError>;

    async fn create_reset_confirmation(
        &self,
        request: &ResetConfirmationRequest,
    ) -> Result<ResetReservation, ServiceError>;

    /// Consume a reset confirmation, replace the password and revoke every
    /// live session of the user.
    async fn confirm_reset(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<ResetOutcome, ServiceError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    async fn insert_session(&self, session: &NewSession) -> Result<Session, ServiceError>;

    /// Live session and live user for a refresh-token hash.
    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<(User, Session)>, ServiceError>;

    /// Whether a live session of a live user still holds this public id.
    async fn session_is_live(&self, public_session_id: &str) -> Result<bool, ServiceError>;

    /// Replace the hash only where `old_hash` is still current.
    /// `SessionNotFound` when nothing matched.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), ServiceError>;

    /// Soft-delete. Returns whether a live session was revoked.
    async fn revoke_session(
        &self,
        user_id: i64,
        public_session_id: &str,
    ) -> Result<bool, ServiceError>;

    /// Live sessions created or rotated at or after `since`, newest first.
    async fn list_sessions(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, ServiceError>;

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::error::BadParam;

    fn request() -> SignupConfirmationRequest {
        SignupConfirmationRequest {
            email: "a@x.com".to_string(),
            language: "en".to_string(),
            invite_code: Some("INV1".to_string()),
            confirmation_key: "a".repeat(32),
            remote_addr: "127.0.0.1".to_string(),
            invite_required: true,
        }
    }

    fn bad_param(request: &SignupConfirmationRequest) -> Option<BadParam> {
        match request.validate() {
            Err(ServiceError::BadParam(p)) => Some(p),
            _ => None,
        }
    }

    #[test]
    fn test_signup_request_validation_order() {
        assert_eq!(request().validate().unwrap(), Language::En);

        let mut r = request();
        r.email = "nope".to_string();
        r.invite_code = Some("bad code".to_string());
        assert_eq!(bad_param(&r), Some(BadParam::Email));

        let mut r = request();
        r.invite_code = Some("bad code".to_string());
        assert_eq!(bad_param(&r), Some(BadParam::InviteCode));

        let mut r = request();
        r.language = "xx".to_string();
        assert_eq!(bad_param(&r), Some(BadParam::Language));

        let mut r = request();
        r.confirmation_key = "short".to_string();
        assert_eq!(bad_param(&r), Some(BadParam::ConfirmationKey));
    }
}
