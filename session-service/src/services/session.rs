use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::cipher::PayloadCiphers;
use super::error::{BadParam, ServiceError};
use super::notifier::{Notification, Notifier};
use super::store::{IdentityStore, ResetConfirmationRequest, SignupConfirmationRequest};
use super::templates;
use super::token::{Purpose, TokenCodec};
use crate::models::{Device, Identity, NewSession, Session, SessionView};
use crate::utils::validation::{validate_client_id, validate_confirmation_key, validate_email};
use crate::utils::{
    generate_confirmation_key, generate_public_session_id, hash_password, verify_password_or_dummy,
    Password,
};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub invite_required: bool,
    /// Base for links in confirmation mails.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub email: String,
    pub language: String,
    pub invite_code: Option<String>,
    pub remote_addr: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequested {
    pub email: String,
    pub invite_reserved: bool,
}

#[derive(Debug)]
pub struct LoginInput {
    pub email: String,
    pub password: Password,
    pub client_id: String,
    pub device: Device,
    pub remote_addr: String,
}

/// Token pair handed out by login and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenTriple {
    pub public_session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Caller identity recovered from a verified access token.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub identity: Identity,
    pub public_session_id: String,
}

/// Signup, login, token rotation, session management and password reset.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn IdentityStore>,
    tokens: TokenCodec,
    ciphers: PayloadCiphers,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SessionSettings>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        tokens: TokenCodec,
        ciphers: PayloadCiphers,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            tokens,
            ciphers,
            notifier,
            settings: Arc::new(settings),
        }
    }

    /// Signup step 1: reserve the invite and mail a confirmation link.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn signup_request(&self, input: SignupInput) -> Result<SignupRequested, ServiceError> {
        let request = SignupConfirmationRequest {
            email: input.email,
            language: input.language,
            invite_code: input.invite_code,
            confirmation_key: generate_confirmation_key(),
            remote_addr: input.remote_addr,
            invite_required: self.settings.invite_required,
        };

        request.validate()?;

        // Queue slot is taken before the reservation commits.
        let slot = self.notifier.reserve()?;
        let reservation = self.store.create_signup_confirmation(&request).await?;

        slot.send(templates::signup_confirmation(
            &request.email,
            &self.settings.public_base_url,
            &request.confirmation_key,
        ));

        info!(
            confirmation_id = reservation.confirmation.confirmation_id,
            invite_reserved = reservation.invite_reserved,
            "Signup confirmation created"
        );

        Ok(SignupRequested {
            email: request.email,
            invite_reserved: reservation.invite_reserved,
        })
    }

    /// Signup step 2: create the user with a generated password and mail it.
    #[instrument(skip_all)]
    pub async fn signup_confirm(&self, confirmation_key: &str) -> Result<String, ServiceError> {
        validate_confirmation_key(confirmation_key)?;

        let password = Password::generate();
        let password_hash = hash_password(&password)?;

        let user = self
            .store
            .confirm_signup(confirmation_key, password_hash.as_str())
            .await?;

        self.notify_best_effort(templates::signup_completed(&user.email, password.expose()));

        info!(user_id = user.user_id, email = %user.email, "Signup confirmed");
        Ok(format!(
            "The account for {} is ready. Your password has been sent by email.",
            user.email
        ))
    }

    #[instrument(skip(self, input), fields(email = %input.email, client_id = %input.client_id))]
    pub async fn login(&self, input: LoginInput) -> Result<TokenTriple, ServiceError> {
        validate_email(&input.email)?;
        validate_client_id(&input.client_id)?;
        if input.password.expose().is_empty() {
            return Err(ServiceError::BadParam(BadParam::Password));
        }

        let user = self.store.find_user_by_email(&input.email).await?;
        let matched = verify_password_or_dummy(
            &input.password,
            user.as_ref().map(|u| u.password_hash.as_str()),
        )?;

        let user = match user {
            Some(user) if matched => user,
            Some(user) => {
                warn!(user_id = user.user_id, "Login rejected: password mismatch");
                return Err(ServiceError::InvalidCredentials);
            }
            None => return Err(ServiceError::InvalidCredentials),
        };

        let public_session_id = generate_public_session_id();
        let triple = self.mint_pair(&user.identity(), &public_session_id)?;

        self.store
            .insert_session(&NewSession {
                user_id: user.user_id,
                client_id: input.client_id,
                public_session_id: public_session_id.clone(),
                refresh_token_hash: Session::hash_token(&triple.refresh_token),
                remote_addr: input.remote_addr.clone(),
                device: input.device.clone(),
            })
            .await?;

        self.notify_best_effort(templates::new_sign_in(
            &user.email,
            &input.device,
            &input.remote_addr,
            Utc::now(),
        ));

        info!(
            user_id = user.user_id,
            public_session_id = %public_session_id,
            "Login succeeded"
        );
        Ok(triple)
    }

    /// Rotate a refresh token. Each refresh token mints at most one new pair.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenTriple, ServiceError> {
        let claims = self
            .tokens
            .verify_purpose(refresh_token, Purpose::Refresh)
            .map_err(|_| ServiceError::BadRefreshToken)?;

        let old_hash = Session::hash_token(refresh_token);
        let Some((user, session)) = self.store.find_session_by_refresh_hash(&old_hash).await?
        else {
            // A live session under the token's id means this token was
            // already rotated away.
            if self.store.session_is_live(&claims.session_id).await? {
                warn!(public_session_id = %claims.session_id, "Refresh token replayed");
                return Err(ServiceError::SessionNotFound);
            }
            return Err(ServiceError::UserNotFound);
        };

        if session.public_session_id != claims.session_id {
            return Err(ServiceError::BadRefreshToken);
        }

        let sealed = self
            .ciphers
            .for_purpose(Purpose::Refresh)
            .open_identity(&claims.payload)?;
        if sealed.id != user.user_id {
            return Err(ServiceError::BadRefreshToken);
        }

        let triple = self.mint_pair(&user.identity(), &session.public_session_id)?;

        if let Err(e) = self
            .store
            .rotate_refresh_token(&old_hash, &Session::hash_token(&triple.refresh_token))
            .await
        {
            if matches!(e, ServiceError::SessionNotFound) {
                warn!(
                    user_id = user.user_id,
                    public_session_id = %session.public_session_id,
                    "Refresh token already spent"
                );
            }
            return Err(e);
        }

        info!(
            user_id = user.user_id,
            public_session_id = %session.public_session_id,
            "Tokens refreshed"
        );
        Ok(triple)
    }

    /// Verify an access token and open its sealed identity.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessContext, ServiceError> {
        let claims = self.tokens.verify_purpose(access_token, Purpose::Access)?;
        let identity = self
            .ciphers
            .for_purpose(Purpose::Access)
            .open_identity(&claims.payload)?;

        Ok(AccessContext {
            identity,
            public_session_id: claims.session_id,
        })
    }

    /// Revoke `public_session_id`, or the caller's own session. Idempotent.
    #[instrument(skip(self, ctx), fields(user_id = ctx.identity.id))]
    pub async fn revoke(
        &self,
        ctx: &AccessContext,
        public_session_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        let target = public_session_id.unwrap_or(&ctx.public_session_id);
        let revoked = self.store.revoke_session(ctx.identity.id, target).await?;

        info!(public_session_id = %target, revoked, "Session revoke requested");
        Ok(())
    }

    /// Live sessions active within the refresh-token lifetime.
    pub async fn list_sessions(&self, ctx: &AccessContext) -> Result<Vec<SessionView>, ServiceError> {
        let since = Utc::now() - self.tokens.lifetime(Purpose::Refresh);
        let records = self.store.list_sessions(ctx.identity.id, since).await?;

        Ok(records
            .into_iter()
            .map(|r| SessionView::from_record(r, &ctx.public_session_id))
            .collect())
    }

    /// Reset step 1: mail a reset link to an existing user.
    #[instrument(skip(self, remote_addr), fields(email = %email))]
    pub async fn reset_request(&self, email: &str, remote_addr: &str) -> Result<(), ServiceError> {
        let request = ResetConfirmationRequest {
            email: email.to_string(),
            confirmation_key: generate_confirmation_key(),
            remote_addr: remote_addr.to_string(),
        };

        request.validate()?;

        let slot = self.notifier.reserve()?;
        let reservation = self.store.create_reset_confirmation(&request).await?;

        slot.send(templates::reset_confirmation(
            &reservation.user.email,
            &self.settings.public_base_url,
            &request.confirmation_key,
        ));

        info!(user_id = reservation.user.user_id, "Password reset requested");
        Ok(())
    }

    /// Reset step 2: replace the password, sign out everywhere, mail the new
    /// password.
    #[instrument(skip_all)]
    pub async fn reset_confirm(&self, confirmation_key: &str) -> Result<String, ServiceError> {
        validate_confirmation_key(confirmation_key)?;

        let password = Password::generate();
        let password_hash = hash_password(&password)?;

        let outcome = self
            .store
            .confirm_reset(confirmation_key, password_hash.as_str())
            .await?;

        self.notify_best_effort(templates::reset_completed(
            &outcome.user.email,
            password.expose(),
        ));

        info!(
            user_id = outcome.user.user_id,
            revoked_sessions = outcome.revoked_sessions,
            "Password reset confirmed"
        );
        Ok(format!(
            "The password for {} has been reset. The new password has been sent by email.",
            outcome.user.email
        ))
    }

    /// Seal the identity once per purpose and mint both tokens under one
    /// public session id.
    fn mint_pair(
        &self,
        identity: &Identity,
        public_session_id: &str,
    ) -> Result<TokenTriple, ServiceError> {
        let access_payload = self
            .ciphers
            .for_purpose(Purpose::Access)
            .seal_identity(identity)?;
        let refresh_payload = self
            .ciphers
            .for_purpose(Purpose::Refresh)
            .seal_identity(identity)?;

        Ok(TokenTriple {
            public_session_id: public_session_id.to_string(),
            access_token: self
                .tokens
                .mint(public_session_id, Purpose::Access, &access_payload, None)?,
            refresh_token: self
                .tokens
                .mint(public_session_id, Purpose::Refresh, &refresh_payload, None)?,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.lifetime(Purpose::Access).num_seconds(),
        })
    }

    fn notify_best_effort(&self, notification: Notification) {
        let subject = notification.subject.clone();
        if let Err(e) = self.notifier.enqueue(notification) {
            tracing::error!(error = %e, subject = %subject, "Failed to enqueue notification");
        }
    }
}
