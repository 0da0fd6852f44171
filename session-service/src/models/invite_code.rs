//! Invite codes and their issued/reserved redemption links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Pre-provisioned invite code owned by an existing user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InviteCode {
    pub invite_code_id: i64,
    pub owner_user_id: i64,
    pub code: String,
    pub redemption_limit: i32,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl InviteCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    /// Whether `used` redemptions leave no room for another one.
    pub fn is_exhausted(&self, used: i64) -> bool {
        used >= i64::from(self.redemption_limit)
    }
}

/// Permanent redemption written when a signup is confirmed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InviteCodeIssued {
    pub invite_code_id: i64,
    pub user_id: i64,
    pub created_utc: DateTime<Utc>,
}

/// Temporary claim held while the signup confirmation is pending.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InviteCodeReserved {
    pub invite_code_id: i64,
    pub email: String,
    pub confirmation_id: i64,
    pub created_utc: DateTime<Utc>,
}
