//! Shared fixtures for session-service integration tests.
//!
//! Every test builds its own in-memory store and recording notifier.

#![allow(dead_code)]

use chrono::Duration;
use secrecy::SecretString;
use service_core::utils::HmacAlgorithm;
use session_service::{
    config::Environment,
    models::{Device, InviteCode, Language, User},
    services::{
        IdentityStore, LoginInput, MemoryIdentityStore, MockNotifier, PayloadCiphers,
        ServiceError, SessionService, SessionSettings, SignupInput, TokenCodec, TokenKey,
        TokenSettings, TokenTriple,
    },
    utils::Password,
    AppState,
};
use std::sync::Arc;

pub const ACCESS_SECRET: &str = "test-access-signing-secret";
pub const REFRESH_SECRET: &str = "test-refresh-signing-secret";
pub const ACCESS_PAYLOAD_SECRET: &str = "test-access-payload-secret";
pub const REFRESH_PAYLOAD_SECRET: &str = "test-refresh-payload-secret";
pub const ACCESS_LIFETIME_SECONDS: i64 = 900;
pub const REFRESH_LIFETIME_DAYS: i64 = 30;
pub const BASE_URL: &str = "https://accounts.example.test";
pub const OWNER_EMAIL: &str = "owner@example.com";
pub const REMOTE_ADDR: &str = "203.0.113.7";

pub fn token_settings() -> TokenSettings {
    TokenSettings {
        issuer: "session-service-test".to_string(),
        algorithm: HmacAlgorithm::Hs256,
        access: TokenKey {
            secret: SecretString::new(ACCESS_SECRET.to_string()),
            subject: "access".to_string(),
            lifetime: Duration::seconds(ACCESS_LIFETIME_SECONDS),
        },
        refresh: TokenKey {
            secret: SecretString::new(REFRESH_SECRET.to_string()),
            subject: "refresh".to_string(),
            lifetime: Duration::days(REFRESH_LIFETIME_DAYS),
        },
    }
}

pub fn payload_ciphers() -> PayloadCiphers {
    PayloadCiphers::new(
        &SecretString::new(ACCESS_PAYLOAD_SECRET.to_string()),
        &SecretString::new(REFRESH_PAYLOAD_SECRET.to_string()),
    )
}

pub struct TestContext {
    /// Owns every seeded invite code.
    pub owner: User,
    pub store: Arc<MemoryIdentityStore>,
    pub notifier: Arc<MockNotifier>,
    pub tokens: TokenCodec,
    pub ciphers: PayloadCiphers,
    pub service: SessionService,
}

impl TestContext {
    pub fn new() -> Self {
        Self::build(true, MockNotifier::new())
    }

    pub fn with_optional_invites() -> Self {
        Self::build(false, MockNotifier::new())
    }

    pub fn with_failing_notifier() -> Self {
        Self::build(true, MockNotifier::failing())
    }

    fn build(invite_required: bool, notifier: MockNotifier) -> Self {
        let store = Arc::new(MemoryIdentityStore::new());
        let owner = store.seed_user(OWNER_EMAIL, "not-a-real-hash", Language::En);
        let notifier = Arc::new(notifier);
        let tokens = TokenCodec::new(token_settings());
        let ciphers = payload_ciphers();

        let service = SessionService::new(
            store.clone() as Arc<dyn IdentityStore>,
            tokens.clone(),
            ciphers.clone(),
            notifier.clone(),
            SessionSettings {
                invite_required,
                public_base_url: BASE_URL.to_string(),
            },
        );

        Self {
            owner,
            store,
            notifier,
            tokens,
            ciphers,
            service,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            service_name: "session-service-test".to_string(),
            service_version: "test".to_string(),
            environment: Environment::Dev,
            sessions: self.service.clone(),
            store: self.store.clone(),
        }
    }

    pub fn seed_invite(&self, code: &str, limit: i32) -> InviteCode {
        self.store
            .seed_invite_code(self.owner.user_id, code, limit, Duration::days(7))
    }

    pub async fn signup(&self, email: &str, invite_code: Option<&str>) -> Result<(), ServiceError> {
        self.service
            .signup_request(SignupInput {
                email: email.to_string(),
                language: "en".to_string(),
                invite_code: invite_code.map(str::to_string),
                remote_addr: REMOTE_ADDR.to_string(),
            })
            .await
            .map(|_| ())
    }

    /// Key from the most recent confirmation link mailed to `email`.
    pub fn last_key_for(&self, email: &str) -> String {
        self.notifier
            .sent_to(email)
            .iter()
            .rev()
            .find_map(|n| key_from_body(&n.body))
            .expect("no confirmation link mailed")
    }

    /// Password from the most recent completion mail sent to `email`.
    pub fn last_password_for(&self, email: &str) -> String {
        self.notifier
            .sent_to(email)
            .iter()
            .rev()
            .find_map(|n| password_from_body(&n.body))
            .expect("no password mailed")
    }

    /// Full signup through an invite code; returns the mailed password.
    pub async fn register(&self, email: &str, invite_code: &str) -> String {
        self.signup(email, Some(invite_code)).await.unwrap();
        let key = self.last_key_for(email);
        self.service.signup_confirm(&key).await.unwrap();
        self.last_password_for(email)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenTriple, ServiceError> {
        self.service
            .login(LoginInput {
                email: email.to_string(),
                password: Password::new(password.to_string()),
                client_id: "web".to_string(),
                device: device(),
                remote_addr: REMOTE_ADDR.to_string(),
            })
            .await
    }

    /// Registered user with one live session.
    pub async fn logged_in(&self, email: &str) -> (String, TokenTriple) {
        let code = format!("INV-{}", email.replace(['@', '.'], "-"));
        self.seed_invite(&code, 1);
        let password = self.register(email, &code).await;
        let triple = self.login(email, &password).await.unwrap();
        (password, triple)
    }
}

pub fn device() -> Device {
    Device {
        platform: "macos".to_string(),
        viewport: "1440x900".to_string(),
        language: "en".to_string(),
        timezone: "Europe/Berlin".to_string(),
        user_agent: "Mozilla/5.0 (Test)".to_string(),
    }
}

pub fn key_from_body(body: &str) -> Option<String> {
    let start = body.find("?key=")? + "?key=".len();
    let key: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!key.is_empty()).then_some(key)
}

pub fn password_from_body(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.trim().strip_prefix("Password: "))
        .map(|p| p.trim().to_string())
}
