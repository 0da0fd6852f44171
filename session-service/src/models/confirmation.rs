use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which flow a pending confirmation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    NewUser,
    PasswordReset,
}

impl ConfirmationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationKind::NewUser => "new_user",
            ConfirmationKind::PasswordReset => "password_reset",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            ConfirmationKind::NewUser => Duration::hours(24),
            ConfirmationKind::PasswordReset => Duration::minutes(15),
        }
    }
}

/// Row in the ephemeral store's `pending_confirmations` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub confirmation_id: i64,
    pub kind: String,
    pub email: String,
    pub language: String,
    pub confirmation_key: String,
    pub remote_addr: String,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl PendingConfirmation {
    /// Unexpired and not yet consumed.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.deleted_utc.is_none() && self.expiry_utc > now
    }

    pub fn is_kind(&self, kind: ConfirmationKind) -> bool {
        self.kind == kind.as_str()
    }
}
