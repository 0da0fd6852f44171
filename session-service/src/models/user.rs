//! User model - confirmed accounts in the main store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Languages a user can receive mail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ja,
    De,
    Fr,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ja => "ja",
            Language::De => "de",
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "ja" => Ok(Language::Ja),
            "de" => Ok(Language::De),
            "fr" => Ok(Language::Fr),
            "es" => Ok(Language::Es),
            _ => Err(format!("Invalid language: {}", s)),
        }
    }
}

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub password_hash: String,
    pub language: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    /// Stored language, falling back to English for rows written by older
    /// releases with a language this build no longer knows.
    pub fn parsed_language(&self) -> Language {
        self.language.parse().unwrap_or(Language::En)
    }

    /// Identity blob sealed into every token minted for this user.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.user_id,
            email: self.email.clone(),
            language: self.parsed_language(),
        }
    }
}

/// User identity carried inside tokens (never contains the password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub language: Language,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!("ja".parse::<Language>().unwrap(), Language::Ja);
        assert!("EN".parse::<Language>().is_err());
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn test_identity_omits_password() {
        let now = Utc::now();
        let user = User {
            user_id: 7,
            email: "a@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            language: "fr".to_string(),
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };

        let json = serde_json::to_string(&user.identity()).unwrap();
        assert_eq!(json, r#"{"id":7,"email":"a@x.com","language":"fr"}"#);
        assert!(!json.contains("argon2"));
    }
}
