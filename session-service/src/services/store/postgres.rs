//! PostgreSQL identity store over the Main and Ephemeral databases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};

use super::{
    confirmation_retention, IdentityStore, ResetConfirmationRequest, ResetOutcome,
    ResetReservation, SignupConfirmationRequest, SignupReservation, SweepReport,
};
use crate::models::{
    ConfirmationKind, InviteCode, NewSession, PendingConfirmation, Session, SessionRecord, User,
};
use crate::services::error::ServiceError;
use crate::utils::validation::validate_confirmation_key;

const USER_COLUMNS: &str =
    "user_id, email, password_hash, language, created_utc, updated_utc, deleted_utc";
const SESSION_COLUMNS: &str = "session_id, user_id, client_id, public_session_id, refresh_token_hash, remote_addr, created_utc, updated_utc, deleted_utc";
const CONFIRMATION_COLUMNS: &str = "confirmation_id, kind, email, language, confirmation_key, remote_addr, expiry_utc, created_utc, deleted_utc";

#[derive(Clone)]
pub struct PgIdentityStore {
    main: PgPool,
    ephemeral: PgPool,
}

impl PgIdentityStore {
    pub fn new(main: PgPool, ephemeral: PgPool) -> Self {
        Self { main, ephemeral }
    }

    pub fn main(&self) -> &PgPool {
        &self.main
    }

    pub fn ephemeral(&self) -> &PgPool {
        &self.ephemeral
    }

    /// Open one transaction per store and take the given table locks,
    /// Main first.
    async fn begin_pair(
        &self,
        main_lock: &str,
        ephemeral_lock: &str,
    ) -> Result<(Transaction<'static, Postgres>, Transaction<'static, Postgres>), ServiceError>
    {
        let mut main_tx = self.main.begin().await?;
        sqlx::query(main_lock).execute(&mut *main_tx).await?;

        let mut ephemeral_tx = self.ephemeral.begin().await?;
        sqlx::query(ephemeral_lock)
            .execute(&mut *ephemeral_tx)
            .await?;

        Ok((main_tx, ephemeral_tx))
    }
}

/// Commit Main, then Ephemeral. A failure of the second commit cannot be
/// undone and is logged for reconciliation.
async fn commit_pair(
    main_tx: Transaction<'static, Postgres>,
    ephemeral_tx: Transaction<'static, Postgres>,
    operation: &'static str,
    email: &str,
    confirmation_id: i64,
) -> Result<(), ServiceError> {
    main_tx.commit().await?;

    if let Err(e) = ephemeral_tx.commit().await {
        tracing::error!(
            partial_commit = true,
            operation = operation,
            email = %email,
            confirmation_id = confirmation_id,
            error = %e,
            "Main store committed but ephemeral store commit failed"
        );
        return Err(e.into());
    }

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

async fn live_user_exists(
    tx: &mut Transaction<'static, Postgres>,
    email: &str,
) -> Result<bool, ServiceError> {
    Ok(sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND deleted_utc IS NULL)",
    )
    .bind(email)
    .fetch_one(&mut **tx)
    .await?)
}

async fn live_confirmation_exists(
    tx: &mut Transaction<'static, Postgres>,
    email: &str,
    kind: ConfirmationKind,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    Ok(sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM pending_confirmations
            WHERE email = $1 AND kind = $2 AND deleted_utc IS NULL AND expiry_utc > $3
        )
        "#,
    )
    .bind(email)
    .bind(kind.as_str())
    .bind(now)
    .fetch_one(&mut **tx)
    .await?)
}

async fn insert_confirmation(
    tx: &mut Transaction<'static, Postgres>,
    kind: ConfirmationKind,
    email: &str,
    language: &str,
    confirmation_key: &str,
    remote_addr: &str,
    now: DateTime<Utc>,
) -> Result<PendingConfirmation, ServiceError> {
    let confirmation = sqlx::query_as::<_, PendingConfirmation>(&format!(
        r#"
        INSERT INTO pending_confirmations (kind, email, language, confirmation_key, remote_addr, expiry_utc, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {CONFIRMATION_COLUMNS}
        "#
    ))
    .bind(kind.as_str())
    .bind(email)
    .bind(language)
    .bind(confirmation_key)
    .bind(remote_addr)
    .bind(now + kind.ttl())
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(confirmation)
}

/// Look up a live confirmation by key and mark it consumed.
async fn consume_confirmation(
    tx: &mut Transaction<'static, Postgres>,
    confirmation_key: &str,
    kind: ConfirmationKind,
    now: DateTime<Utc>,
) -> Result<PendingConfirmation, ServiceError> {
    let confirmation = sqlx::query_as::<_, PendingConfirmation>(&format!(
        r#"
        SELECT {CONFIRMATION_COLUMNS} FROM pending_confirmations
        WHERE confirmation_key = $1 AND kind = $2 AND deleted_utc IS NULL AND expiry_utc > $3
        "#
    ))
    .bind(confirmation_key)
    .bind(kind.as_str())
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(ServiceError::ConfirmationNotFound)?;

    Ok(confirmation)
}

async fn mark_consumed(
    tx: &mut Transaction<'static, Postgres>,
    confirmation_id: i64,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = sqlx::query(
        r#"
        UPDATE pending_confirmations SET deleted_utc = $2
        WHERE confirmation_id = $1 AND deleted_utc IS NULL AND expiry_utc > $2
        "#,
    )
    .bind(confirmation_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::ConfirmationNotFound);
    }
    Ok(())
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn create_signup_confirmation(
        &self,
        request: &SignupConfirmationRequest,
    ) -> Result<SignupReservation, ServiceError> {
        let language = request.validate()?;
        let now = Utc::now();

        let (mut main_tx, mut ephemeral_tx) = self
            .begin_pair(
                "LOCK TABLE users, invite_code_issued IN SHARE ROW EXCLUSIVE MODE",
                "LOCK TABLE pending_confirmations, invite_code_reserved IN SHARE ROW EXCLUSIVE MODE",
            )
            .await?;

        let mut reserve_invite = None;
        if let Some(code) = &request.invite_code {
            let invite = sqlx::query_as::<_, InviteCode>(
                r#"
                SELECT ic.invite_code_id, ic.owner_user_id, ic.code, ic.redemption_limit, ic.expiry_utc, ic.created_utc
                FROM invite_codes ic
                JOIN users u ON u.user_id = ic.owner_user_id
                WHERE ic.code = $1 AND ic.expiry_utc > $2 AND u.deleted_utc IS NULL
                "#,
            )
            .bind(code)
            .bind(now)
            .fetch_optional(&mut *main_tx)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

            let issued = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM invite_code_issued WHERE invite_code_id = $1",
            )
            .bind(invite.invite_code_id)
            .fetch_one(&mut *main_tx)
            .await?;

            let reserved = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM invite_code_reserved r
                JOIN pending_confirmations c ON c.confirmation_id = r.confirmation_id
                WHERE r.invite_code_id = $1 AND c.deleted_utc IS NULL AND c.expiry_utc > $2
                "#,
            )
            .bind(invite.invite_code_id)
            .bind(now)
            .fetch_one(&mut *ephemeral_tx)
            .await?;

            if invite.is_exhausted(issued + reserved) {
                if request.invite_required {
                    return Err(ServiceError::InviteHasEnded);
                }
                info!(code = %invite.code, "Invite code exhausted, signing up without it");
            } else {
                reserve_invite = Some(invite.invite_code_id);
            }
        }

        if live_user_exists(&mut main_tx, &request.email).await?
            || live_confirmation_exists(
                &mut ephemeral_tx,
                &request.email,
                ConfirmationKind::NewUser,
                now,
            )
            .await?
        {
            return Err(ServiceError::UserAlreadyExists);
        }

        let confirmation = insert_confirmation(
            &mut ephemeral_tx,
            ConfirmationKind::NewUser,
            &request.email,
            language.as_str(),
            &request.confirmation_key,
            &request.remote_addr,
            now,
        )
        .await?;

        if let Some(invite_code_id) = reserve_invite {
            sqlx::query(
                r#"
                INSERT INTO invite_code_reserved (invite_code_id, email, confirmation_id, created_utc)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(invite_code_id)
            .bind(&request.email)
            .bind(confirmation.confirmation_id)
            .bind(now)
            .execute(&mut *ephemeral_tx)
            .await?;
        }

        commit_pair(
            main_tx,
            ephemeral_tx,
            "create_signup_confirmation",
            &request.email,
            confirmation.confirmation_id,
        )
        .await?;

        Ok(SignupReservation {
            confirmation,
            invite_reserved: reserve_invite.is_some(),
        })
    }

    #[instrument(skip_all)]
    async fn confirm_signup(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<User, ServiceError> {
        validate_confirmation_key(confirmation_key)?;
        let now = Utc::now();

        let (mut main_tx, mut ephemeral_tx) = self
            .begin_pair(
                "LOCK TABLE users, invite_code_issued IN SHARE ROW EXCLUSIVE MODE",
                "LOCK TABLE pending_confirmations, invite_code_reserved IN SHARE ROW EXCLUSIVE MODE",
            )
            .await?;

        let confirmation = consume_confirmation(
            &mut ephemeral_tx,
            confirmation_key,
            ConfirmationKind::NewUser,
            now,
        )
        .await?;

        if live_user_exists(&mut main_tx, &confirmation.email).await? {
            return Err(ServiceError::AlreadyConfirmed);
        }

        mark_consumed(&mut ephemeral_tx, confirmation.confirmation_id, now).await?;

        let reserved_invite = sqlx::query_scalar::<_, i64>(
            "DELETE FROM invite_code_reserved WHERE confirmation_id = $1 RETURNING invite_code_id",
        )
        .bind(confirmation.confirmation_id)
        .fetch_optional(&mut *ephemeral_tx)
        .await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, language, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&confirmation.email)
        .bind(password_hash)
        .bind(&confirmation.language)
        .bind(now)
        .fetch_one(&mut *main_tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::AlreadyConfirmed
            } else {
                e.into()
            }
        })?;

        if let Some(invite_code_id) = reserved_invite {
            sqlx::query(
                "INSERT INTO invite_code_issued (invite_code_id, user_id, created_utc) VALUES ($1, $2, $3)",
            )
            .bind(invite_code_id)
            .bind(user.user_id)
            .bind(now)
            .execute(&mut *main_tx)
            .await?;
        }

        commit_pair(
            main_tx,
            ephemeral_tx,
            "confirm_signup",
            &confirmation.email,
            confirmation.confirmation_id,
        )
        .await?;

        info!(user_id = user.user_id, "User created");
        Ok(user)
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn create_reset_confirmation(
        &self,
        request: &ResetConfirmationRequest,
    ) -> Result<ResetReservation, ServiceError> {
        request.validate()?;
        let now = Utc::now();

        let (mut main_tx, mut ephemeral_tx) = self
            .begin_pair(
                "LOCK TABLE users IN SHARE MODE",
                "LOCK TABLE pending_confirmations IN SHARE ROW EXCLUSIVE MODE",
            )
            .await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_utc IS NULL"
        ))
        .bind(&request.email)
        .fetch_optional(&mut *main_tx)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

        if live_confirmation_exists(
            &mut ephemeral_tx,
            &request.email,
            ConfirmationKind::PasswordReset,
            now,
        )
        .await?
        {
            return Err(ServiceError::ResetAlreadyRequested);
        }

        let confirmation = insert_confirmation(
            &mut ephemeral_tx,
            ConfirmationKind::PasswordReset,
            &user.email,
            user.parsed_language().as_str(),
            &request.confirmation_key,
            &request.remote_addr,
            now,
        )
        .await?;

        commit_pair(
            main_tx,
            ephemeral_tx,
            "create_reset_confirmation",
            &request.email,
            confirmation.confirmation_id,
        )
        .await?;

        Ok(ResetReservation { user, confirmation })
    }

    #[instrument(skip_all)]
    async fn confirm_reset(
        &self,
        confirmation_key: &str,
        password_hash: &str,
    ) -> Result<ResetOutcome, ServiceError> {
        validate_confirmation_key(confirmation_key)?;
        let now = Utc::now();

        let (mut main_tx, mut ephemeral_tx) = self
            .begin_pair(
                "LOCK TABLE users, sessions IN SHARE ROW EXCLUSIVE MODE",
                "LOCK TABLE pending_confirmations IN SHARE ROW EXCLUSIVE MODE",
            )
            .await?;

        let confirmation = consume_confirmation(
            &mut ephemeral_tx,
            confirmation_key,
            ConfirmationKind::PasswordReset,
            now,
        )
        .await?;

        let user_id = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM users WHERE email = $1 AND deleted_utc IS NULL",
        )
        .bind(&confirmation.email)
        .fetch_optional(&mut *main_tx)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

        mark_consumed(&mut ephemeral_tx, confirmation.confirmation_id, now).await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET password_hash = $2, updated_utc = $3
            WHERE user_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&mut *main_tx)
        .await?;

        let revoked_sessions = sqlx::query(
            "UPDATE sessions SET deleted_utc = $2 WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *main_tx)
        .await?
        .rows_affected();

        commit_pair(
            main_tx,
            ephemeral_tx,
            "confirm_reset",
            &confirmation.email,
            confirmation.confirmation_id,
        )
        .await?;

        info!(user_id, revoked_sessions, "Password reset");
        Ok(ResetOutcome {
            user,
            revoked_sessions,
        })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_utc IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.main)
        .await?)
    }

    #[instrument(skip(self, new_session), fields(user_id = new_session.user_id))]
    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, ServiceError> {
        let now = Utc::now();
        let mut tx = self.main.begin().await?;

        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (user_id, client_id, public_session_id, refresh_token_hash, remote_addr, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new_session.user_id)
        .bind(&new_session.client_id)
        .bind(&new_session.public_session_id)
        .bind(&new_session.refresh_token_hash)
        .bind(&new_session.remote_addr)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let device = &new_session.device;
        sqlx::query(
            r#"
            INSERT INTO devices (session_id, platform, viewport, language, timezone, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(&device.platform)
        .bind(&device.viewport)
        .bind(&device.language)
        .bind(&device.timezone)
        .bind(&device.user_agent)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<(User, Session)>, ServiceError> {
        let Some(session) = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1 AND deleted_utc IS NULL"
        ))
        .bind(refresh_token_hash)
        .fetch_optional(&self.main)
        .await?
        else {
            return Ok(None);
        };

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1 AND deleted_utc IS NULL"
        ))
        .bind(session.user_id)
        .fetch_optional(&self.main)
        .await?;

        Ok(user.map(|user| (user, session)))
    }

    async fn session_is_live(&self, public_session_id: &str) -> Result<bool, ServiceError> {
        let live: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sessions s
                JOIN users u ON u.user_id = s.user_id
                WHERE s.public_session_id = $1
                  AND s.deleted_utc IS NULL
                  AND u.deleted_utc IS NULL
            )
            "#,
        )
        .bind(public_session_id)
        .fetch_one(&self.main)
        .await?;
        Ok(live)
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET refresh_token_hash = $2, updated_utc = $3
            WHERE refresh_token_hash = $1 AND deleted_utc IS NULL
            "#,
        )
        .bind(old_hash)
        .bind(new_hash)
        .bind(Utc::now())
        .execute(&self.main)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::SessionNotFound);
        }
        Ok(())
    }

    async fn revoke_session(
        &self,
        user_id: i64,
        public_session_id: &str,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET deleted_utc = $3
            WHERE user_id = $1 AND public_session_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(user_id)
        .bind(public_session_id)
        .bind(Utc::now())
        .execute(&self.main)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, ServiceError> {
        Ok(sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT s.session_id, s.user_id, s.client_id, s.public_session_id, s.refresh_token_hash,
                   s.remote_addr, s.created_utc, s.updated_utc, s.deleted_utc,
                   d.platform, d.viewport, d.language, d.timezone, d.user_agent
            FROM sessions s
            JOIN devices d ON d.session_id = s.session_id
            WHERE s.user_id = $1
              AND s.deleted_utc IS NULL
              AND GREATEST(s.created_utc, s.updated_utc) >= $2
            ORDER BY GREATEST(s.created_utc, s.updated_utc) DESC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.main)
        .await?)
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        let pending: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT confirmation_id, email FROM pending_confirmations
            WHERE kind = $1 AND deleted_utc IS NULL AND expiry_utc > $2
            "#,
        )
        .bind(ConfirmationKind::NewUser.as_str())
        .bind(now)
        .fetch_all(&self.ephemeral)
        .await?;

        if !pending.is_empty() {
            let emails: Vec<String> = pending.iter().map(|(_, email)| email.clone()).collect();
            let confirmed: Vec<String> = sqlx::query_scalar(
                "SELECT email FROM users WHERE email = ANY($1) AND deleted_utc IS NULL",
            )
            .bind(&emails)
            .fetch_all(&self.main)
            .await?;

            let stranded: Vec<i64> = pending
                .iter()
                .filter(|(_, email)| confirmed.contains(email))
                .map(|(id, _)| *id)
                .collect();

            if !stranded.is_empty() {
                report.repaired_confirmations = sqlx::query(
                    r#"
                    UPDATE pending_confirmations SET deleted_utc = $2
                    WHERE confirmation_id = ANY($1) AND deleted_utc IS NULL
                    "#,
                )
                .bind(&stranded)
                .bind(now)
                .execute(&self.ephemeral)
                .await?
                .rows_affected();
            }
        }

        report.released_reservations = sqlx::query(
            r#"
            DELETE FROM invite_code_reserved r
            WHERE NOT EXISTS (
                SELECT 1 FROM pending_confirmations c
                WHERE c.confirmation_id = r.confirmation_id
                  AND c.deleted_utc IS NULL
                  AND c.expiry_utc > $1
            )
            "#,
        )
        .bind(now)
        .execute(&self.ephemeral)
        .await?
        .rows_affected();

        report.purged_confirmations =
            sqlx::query("DELETE FROM pending_confirmations WHERE expiry_utc <= $1")
                .bind(now - confirmation_retention())
                .execute(&self.ephemeral)
                .await?
                .rows_affected();

        Ok(report)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.main).await?;
        sqlx::query("SELECT 1").execute(&self.ephemeral).await?;
        Ok(())
    }
}
