use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Login session. Only the SHA-256 of the current refresh token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: i64,
    pub user_id: i64,
    pub client_id: String,
    pub public_session_id: String,
    pub refresh_token_hash: String,
    pub remote_addr: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Session {
    /// Hash a refresh token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_live(&self) -> bool {
        self.deleted_utc.is_none()
    }

    /// Most recent of creation and last rotation.
    pub fn last_active_utc(&self) -> DateTime<Utc> {
        self.created_utc.max(self.updated_utc)
    }
}

/// Client device captured at login. Written once alongside the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub platform: String,
    pub viewport: String,
    pub language: String,
    pub timezone: String,
    pub user_agent: String,
}

/// Session joined with its device.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    #[sqlx(flatten)]
    pub session: Session,
    #[sqlx(flatten)]
    pub device: Device,
}

/// Input for creating a session at login.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub client_id: String,
    pub public_session_id: String,
    pub refresh_token_hash: String,
    pub remote_addr: String,
    pub device: Device,
}

/// Session as shown to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub public_session_id: String,
    pub client_id: String,
    pub remote_addr: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub device: Device,
    /// True for the session the request was authenticated with.
    pub current: bool,
}

impl SessionView {
    pub fn from_record(record: SessionRecord, current_public_session_id: &str) -> Self {
        let SessionRecord { session, device } = record;
        Self {
            current: session.public_session_id == current_public_session_id,
            public_session_id: session.public_session_id,
            client_id: session.client_id,
            remote_addr: session.remote_addr,
            created_utc: session.created_utc,
            updated_utc: session.updated_utc,
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hash_token() {
        let hash = Session::hash_token("token_abc");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, "token_abc");
        assert_eq!(hash, Session::hash_token("token_abc"));
        assert_ne!(hash, Session::hash_token("token_abd"));
    }

    #[test]
    fn test_view_marks_current_session() {
        let now = Utc::now();
        let record = SessionRecord {
            session: Session {
                session_id: 1,
                user_id: 1,
                client_id: "web".to_string(),
                public_session_id: "abc".to_string(),
                refresh_token_hash: Session::hash_token("t"),
                remote_addr: "10.0.0.1".to_string(),
                created_utc: now - Duration::hours(1),
                updated_utc: now,
                deleted_utc: None,
            },
            device: Device::default(),
        };

        assert_eq!(record.session.last_active_utc(), now);
        let view = SessionView::from_record(record.clone(), "abc");
        assert!(view.current);
        let view = SessionView::from_record(record, "other");
        assert!(!view.current);
    }
}
