//! In-process identity store for tests and local runs.
//!
//! One mutex stands in for both databases' table locks, so every operation
//! is serialized the same way the Postgres store serializes them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    confirmation_retention, IdentityStore, ResetConfirmationRequest, ResetOutcome,
    ResetReservation, SignupConfirmationRequest, SignupReservation, SweepReport,
};
use crate::models::{
    ConfirmationKind, Device, InviteCode, InviteCodeIssued, InviteCodeReserved, Language,
    NewSession, PendingConfirmation, Session, SessionRecord, User,
};
use crate::services::error::ServiceError;

#[derive(Default)]
struct State {
    users: Vec<User>,
    invite_codes: Vec<InviteCode>,
    issued: Vec<InviteCodeIssued>,
    sessions: Vec<Session>,
    devices: HashMap<i64, Device>,
    confirmations: Vec<PendingConfirmation>,
    reserved: Vec<InviteCodeReserved>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_user(&self, email: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.email == email && !u.is_deleted())
    }

    fn live_confirmation(
        &self,
        email: &str,
        kind: ConfirmationKind,
        now: DateTime<Utc>,
    ) -> Option<&PendingConfirmation> {
        self.confirmations
            .iter()
            .find(|c| c.email == email && c.is_kind(kind) && c.is_live(now))
    }

    fn confirmation_by_key(
        &self,
        key: &str,
        kind: ConfirmationKind,
        now: DateTime<Utc>,
    ) -> Option<PendingConfirmation> {
        self.confirmations
            .iter()
            .find(|c| c.confirmation_key == key && c.is_kind(kind) && c.is_live(now))
            .cloned()
    }

    fn invite_usage(&self, invite_code_id: i64, now: DateTime<Utc>) -> i64 {
        let issued = self
            .issued
            .iter()
            .filter(|i| i.invite_code_id == invite_code_id)
            .count();
        let reserved = self
            .reserved
            .iter()
            .filter(|r| r.invite_code_id == invite_code_id)
            .filter(|r| {
                self.confirmations
                    .iter()
                    .any(|c| c.confirmation_id == r.confirmation_id && c.is_live(now))
            })
            .count();
        (issued + reserved) as i64
    }

    fn insert_confirmation(
        &mut self,
        kind: ConfirmationKind,
        email: &str,
        language: Language,
        key: &str,
        remote_addr: &str,
        now: DateTime<Utc>,
    ) -> PendingConfirmation {
        let confirmation = PendingConfirmation {
            confirmation_id: self.next_id(),
            kind: kind.as_str().to_string(),
            email: email.to_string(),
            language: language.as_str().to_string(),
            confirmation_key: key.to_string(),
            remote_addr: remote_addr.to_string(),
            expiry_utc: now + kind.ttl(),
            created_utc: now,
            deleted_utc: None,
        };
        self.confirmations.push(confirmation.clone());
        confirmation
    }

    fn consume_confirmation(&mut self, confirmation_id: i64, now: DateTime<Utc>) -> bool {
        match self
            .confirmations
            .iter_mut()
            .find(|c| c.confirmation_id == confirmation_id && c.is_live(now))
        {
            Some(c) => {
                c.deleted_utc = Some(now);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    state: Mutex<State>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ServiceError> {
        self.state
            .lock()
            .map_err(|e| ServiceError::InternalString(format!("Store mutex poisoned: {}", e)))
    }

    /// Insert a confirmed user directly.
    pub fn seed_user(&self, email: &str, password_hash: &str, language: Language) -> User {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let user = User {
            user_id: state.next_id(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            language: language.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };
        state.users.push(user.clone());
        user
    }

    /// Provision an invite code owned by `owner_user_id`.
    pub fn seed_invite_code(
        &self,
        owner_user_id: i64,
        code: &str,
        redemption_limit: i32,
        valid_for: Duration,
    ) -> InviteCode {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let invite = InviteCode {
            invite_code_id: state.next_id(),
            owner_user_id,
            code: code.to_string(),
            redemption_limit,
            expiry_utc: now + valid_for,
            created_utc: now,
        };
        state.invite_codes.push(invite.clone());
        invite
    }

    /// Issued plus live reserved redemptions for `code`.
    pub fn invite_usage(&self, code: &str) -> i64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .invite_codes
            .iter()
            .find(|c| c.code == code)
            .map(|c| state.invite_usage(c.invite_code_id, Utc::now()))
            .unwrap_or_default()
    }

    pub fn issued_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .issued
            .len()
    }

    pub fn reserved_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reserved
            .len()
    }

    pub fn confirmations(&self) -> Vec<PendingConfirmation> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .confirmations
            .clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sessions
            .clone()
    }

    /// Move a confirmation's expiry into the past.
    pub fn expire_confirmation(&self, confirmation_key: &str, expired_for: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let expiry = Utc::now() - expired_for;
        for c in state
            .confirmations
            .iter_mut()
            .filter(|c| c.confirmation_key == confirmation_key)
        {
            c.expiry_utc = expiry;
        }
    }

    /// Shift a session's timestamps back by `age`.
    pub fn backdate_session(&self, public_session_id: &str, age: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for s in state
            .sessions
            .iter_mut()
            .filter(|s| s.public_session_id == public_session_id)
        {
            s.created_utc -= age;
            s.updated_utc -= age;
        }
    }

    /// Soft-delete a user, as an administrator would.
    pub fn delete_user(&self, email: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        for u in state
            .users
            .iter_mut()
            .filter(|u| u.email == email && u.deleted_utc.is_none())
        {
            u.deleted_utc = Some(now);
        }
    }

    /// Leave Main committed and Ephemeral untouched, as a failed second
    /// commit of `confirm_signup` would.
    pub fn simulate_partial_signup_commit(&self, confirmation_key: &str, password_hash: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let Some(confirmation) = state
            .confirmations
            .iter()
            .find(|c| c.confirmation_key == confirmation_key)
            .cloned()
        else {
            return;
        };

        let user = User {
            user_id: state.next_id(),
            email: confirmation.email.clone(),
            password_hash: password_hash.to_string(),
            language: confirmation.language.clone(),
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };
        let reservation = state
            .reserved
            .iter()
            .find(|r| r.confirmation_id == confirmation.confirmation_id)
            .cloned();
        if let Some(r) = reservation {
            state.issued.push(InviteCodeIssued {
                invite_code_id: r.invite_code_id,
                user_id: user.user_id,
                created_utc: now,
            });
        }
        state.users.push(user);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create_signup_confirmation(
        &self,
        request: &SignupConfirmationRequest,
    ) -> Result<SignupReservation, ServiceError> {
        let language = request.validate()?;
        let now = Utc::now();
        let mut state = self.lock()?;

        let mut reserve_invite = None;
        if let Some(code) = &request.invite_code {
            let invite = state
                .invite_codes
                .iter()
                .find(|c| &c.code == code && !c.is_expired(now))
                .filter(|c| {
                    state
                        .users
                        .iter()
                        .any(|u| u.user_id == c.owner_user_id && !u.is_deleted())
                })
                .cloned()
                .ok_or(ServiceError::InviteNotFound)?;

            let used = state.invite_usage(invite.invite_code_id, now);
            if invite.is_exhausted(used) {
                if request.invite_required {
                    return Err(ServiceError::InviteHasEnded);
                }
            } else {
                reserve_invite = Some(invite.invite_code_id);
            }
        }

        if state.live_user(&request.email).is_some()
            || state
                .live_confirmation(&request.email, ConfirmationKind::NewUser, now)
                .is_some()
        {
            return Err(ServiceError::UserAlreadyExists);
        }

        let confirmation = state.insert_confirmation(
            ConfirmationKind::NewUser,
            &request.email,
            language,
            &request.confirmation_key,
            &request.remote_addr,
            now,
        );

        if let Some(invite_code_id) = reserve_invite {
            state.reserved.push(InviteCodeReserved {
                invite_code_id,
                email: request.email.clone(),
                confirmation_id: confirmation.confirmation_id,
                created_utc: now,
            });
        }

        Ok(SignupReservation {
            confirmation,
            invite_reserved: reserve_invite.is_some(),
        })
    }

    async fn confirm_signup(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<User, ServiceError> {
        crate::utils::validation::validate_confirmation_key(confirmation_key)?;
        let now = Utc::now();
        let mut state = self.lock()?;

        let confirmation = state
            .confirmation_by_key(confirmation_key, ConfirmationKind::NewUser, now)
            .ok_or(ServiceError::ConfirmationNotFound)?;

        if state.live_user(&confirmation.email).is_some() {
            return Err(ServiceError::AlreadyConfirmed);
        }

        if !state.consume_confirmation(confirmation.confirmation_id, now) {
            return Err(ServiceError::ConfirmationNotFound);
        }

        let reservation = state
            .reserved
            .iter()
            .position(|r| r.confirmation_id == confirmation.confirmation_id)
            .map(|idx| state.reserved.remove(idx));

        let user = User {
            user_id: state.next_id(),
            email: confirmation.email.clone(),
            password_hash: password_hash.to_string(),
            language: confirmation.language.clone(),
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };
        state.users.push(user.clone());

        if let Some(reservation) = reservation {
            state.issued.push(InviteCodeIssued {
                invite_code_id: reservation.invite_code_id,
                user_id: user.user_id,
                created_utc: now,
            });
        }

        Ok(user)
    }

    async fn create_reset_confirmation(
        &self,
        request: &ResetConfirmationRequest,
    ) -> Result<ResetReservation, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let mut state = self.lock()?;

        let user = state
            .live_user(&request.email)
            .cloned()
            .ok_or(ServiceError::UserNotFound)?;

        if state
            .live_confirmation(&request.email, ConfirmationKind::PasswordReset, now)
            .is_some()
        {
            return Err(ServiceError::ResetAlreadyRequested);
        }

        let confirmation = state.insert_confirmation(
            ConfirmationKind::PasswordReset,
            &user.email,
            user.parsed_language(),
            &request.confirmation_key,
            &request.remote_addr,
            now,
        );

        Ok(ResetReservation { user, confirmation })
    }

    async fn confirm_reset(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<ResetOutcome, ServiceError> {
        crate::utils::validation::validate_confirmation_key(confirmation_key)?;
        let now = Utc::now();
        let mut state = self.lock()?;

        let confirmation = state
            .confirmation_by_key(confirmation_key, ConfirmationKind::PasswordReset, now)
            .ok_or(ServiceError::ConfirmationNotFound)?;

        let user_id = state
            .live_user(&confirmation.email)
            .map(|u| u.user_id)
            .ok_or(ServiceError::UserNotFound)?;

        if !state.consume_confirmation(confirmation.confirmation_id, now) {
            return Err(ServiceError::ConfirmationNotFound);
        }

        let user = {
            let user = state
                .users
                .iter_mut()
                .find(|u| u.user_id == user_id)
                .ok_or(ServiceError::UserNotFound)?;
            user.password_hash = password_hash.to_string();
            user.updated_utc = now;
            user.clone()
        };

        let mut revoked_sessions = 0;
        for session in state
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.is_live())
        {
            session.deleted_utc = Some(now);
            revoked_sessions += 1;
        }

        Ok(ResetOutcome {
            user,
            revoked_sessions,
        })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.lock()?.live_user(email).cloned())
    }

    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, ServiceError> {
        let now = Utc::now();
        let mut state = self.lock()?;

        if state.sessions.iter().any(|s| {
            s.refresh_token_hash == new_session.refresh_token_hash
                || s.public_session_id == new_session.public_session_id
        }) {
            return Err(ServiceError::InternalString(
                "Duplicate session identifier".to_string(),
            ));
        }

        let session = Session {
            session_id: state.next_id(),
            user_id: new_session.user_id,
            client_id: new_session.client_id.clone(),
            public_session_id: new_session.public_session_id.clone(),
            refresh_token_hash: new_session.refresh_token_hash.clone(),
            remote_addr: new_session.remote_addr.clone(),
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };
        state
            .devices
            .insert(session.session_id, new_session.device.clone());
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<(User, Session)>, ServiceError> {
        let state = self.lock()?;
        let found = state
            .sessions
            .iter()
            .find(|s| s.refresh_token_hash == refresh_token_hash && s.is_live())
            .and_then(|s| {
                state
                    .users
                    .iter()
                    .find(|u| u.user_id == s.user_id && !u.is_deleted())
                    .map(|u| (u.clone(), s.clone()))
            });
        Ok(found)
    }

    async fn session_is_live(&self, public_session_id: &str) -> Result<bool, ServiceError> {
        let state = self.lock()?;
        Ok(state.sessions.iter().any(|s| {
            s.public_session_id == public_session_id
                && s.is_live()
                && state
                    .users
                    .iter()
                    .any(|u| u.user_id == s.user_id && !u.is_deleted())
        }))
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let mut state = self.lock()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.refresh_token_hash == old_hash && s.is_live())
            .ok_or(ServiceError::SessionNotFound)?;
        session.refresh_token_hash = new_hash.to_string();
        session.updated_utc = now;
        Ok(())
    }

    async fn revoke_session(
        &self,
        user_id: i64,
        public_session_id: &str,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let mut state = self.lock()?;
        let session = state.sessions.iter_mut().find(|s| {
            s.user_id == user_id && s.public_session_id == public_session_id && s.is_live()
        });
        Ok(match session {
            Some(s) => {
                s.deleted_utc = Some(now);
                true
            }
            None => false,
        })
    }

    async fn list_sessions(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, ServiceError> {
        let state = self.lock()?;
        let mut records: Vec<SessionRecord> = state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_live() && s.last_active_utc() >= since)
            .map(|s| SessionRecord {
                session: s.clone(),
                device: state.devices.get(&s.session_id).cloned().unwrap_or_default(),
            })
            .collect();
        records.sort_by(|a, b| {
            b.session
                .last_active_utc()
                .cmp(&a.session.last_active_utc())
        });
        Ok(records)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let mut state = self.lock()?;
        let mut report = SweepReport::default();

        let stranded: Vec<i64> = state
            .confirmations
            .iter()
            .filter(|c| c.is_kind(ConfirmationKind::NewUser) && c.is_live(now))
            .filter(|c| state.live_user(&c.email).is_some())
            .map(|c| c.confirmation_id)
            .collect();
        for id in &stranded {
            state.consume_confirmation(*id, now);
        }
        report.repaired_confirmations = stranded.len() as u64;

        let before = state.reserved.len();
        let live_ids: Vec<i64> = state
            .confirmations
            .iter()
            .filter(|c| c.is_live(now))
            .map(|c| c.confirmation_id)
            .collect();
        state
            .reserved
            .retain(|r| live_ids.contains(&r.confirmation_id));
        report.released_reservations = (before - state.reserved.len()) as u64;

        let cutoff = now - confirmation_retention();
        let before = state.confirmations.len();
        state.confirmations.retain(|c| c.expiry_utc > cutoff);
        report.purged_confirmations = (before - state.confirmations.len()) as u64;

        Ok(report)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.lock().map(|_| ())
    }
}
