use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::utils::HmacAlgorithm;
use std::env;
use std::str::FromStr;

use crate::services::{PayloadCiphers, SessionSettings, TokenKey, TokenSettings};

/// Ten years. Keeps `chrono::Duration` arithmetic on lifetimes in range.
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug)]
pub struct SessionConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub main_database: DatabaseConfig,
    pub ephemeral_database: DatabaseConfig,
    pub token: TokenConfig,
    pub invite_required: bool,
    pub public_base_url: String,
    pub allowed_origins: Vec<String>,
    pub smtp: SmtpConfig,
    pub mail: MailConfig,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug)]
pub struct TokenConfig {
    pub issuer: String,
    pub algorithm: HmacAlgorithm,
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub access_payload_secret: SecretString,
    pub refresh_payload_secret: SecretString,
    pub access_lifetime_seconds: i64,
    pub refresh_lifetime_seconds: i64,
}

#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub queue_capacity: usize,
    pub max_retry_seconds: u64,
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = SessionConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("session-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            main_database: DatabaseConfig {
                url: get_env("MAIN_DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            ephemeral_database: DatabaseConfig {
                url: get_env("EPHEMERAL_DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            token: TokenConfig {
                issuer: get_env("TOKEN_ISSUER", Some("session-service"), is_prod)?,
                algorithm: get_env("TOKEN_ALGORITHM", Some("HS256"), is_prod)?
                    .parse()
                    .map_err(AppError::ConfigError)?,
                access_secret: SecretString::new(get_env("ACCESS_TOKEN_SECRET", None, is_prod)?),
                refresh_secret: SecretString::new(get_env("REFRESH_TOKEN_SECRET", None, is_prod)?),
                access_payload_secret: SecretString::new(get_env(
                    "ACCESS_PAYLOAD_SECRET",
                    None,
                    is_prod,
                )?),
                refresh_payload_secret: SecretString::new(get_env(
                    "REFRESH_PAYLOAD_SECRET",
                    None,
                    is_prod,
                )?),
                access_lifetime_seconds: parse_env("ACCESS_TOKEN_LIFETIME_SECONDS", "900", is_prod)?,
                refresh_lifetime_seconds: parse_env(
                    "REFRESH_TOKEN_LIFETIME_SECONDS",
                    "2592000",
                    is_prod,
                )?,
            },
            invite_required: parse_env("INVITE_REQUIRED", "true", is_prod)?,
            public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:8080"), is_prod)?,
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from: get_env("MAIL_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            mail: MailConfig {
                queue_capacity: parse_env("MAIL_QUEUE_CAPACITY", "256", is_prod)?,
                max_retry_seconds: parse_env("MAIL_MAX_RETRY_SECONDS", "300", is_prod)?,
            },
            sweep_interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", "300", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        for (key, seconds) in [
            ("ACCESS_TOKEN_LIFETIME_SECONDS", self.token.access_lifetime_seconds),
            ("REFRESH_TOKEN_LIFETIME_SECONDS", self.token.refresh_lifetime_seconds),
        ] {
            if !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&seconds) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be between 1 and {}",
                    key,
                    MAX_TOKEN_LIFETIME_SECONDS
                )));
            }
        }

        for (key, secret) in [
            ("ACCESS_TOKEN_SECRET", &self.token.access_secret),
            ("REFRESH_TOKEN_SECRET", &self.token.refresh_secret),
            ("ACCESS_PAYLOAD_SECRET", &self.token.access_payload_secret),
            ("REFRESH_PAYLOAD_SECRET", &self.token.refresh_payload_secret),
        ] {
            if secret.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must not be empty",
                    key
                )));
            }
        }

        if self.token.access_secret.expose_secret() == self.token.refresh_secret.expose_secret() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ"
            )));
        }

        if self.token.access_payload_secret.expose_secret()
            == self.token.refresh_payload_secret.expose_secret()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_PAYLOAD_SECRET and REFRESH_PAYLOAD_SECRET must differ"
            )));
        }

        if self.mail.queue_capacity == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAIL_QUEUE_CAPACITY must be positive"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.invite_required {
                tracing::warn!("INVITE_REQUIRED is off in production; signups are open");
            }
        }

        Ok(())
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            issuer: self.token.issuer.clone(),
            algorithm: self.token.algorithm,
            access: TokenKey {
                secret: duplicate(&self.token.access_secret),
                subject: "access".to_string(),
                lifetime: chrono::Duration::seconds(self.token.access_lifetime_seconds),
            },
            refresh: TokenKey {
                secret: duplicate(&self.token.refresh_secret),
                subject: "refresh".to_string(),
                lifetime: chrono::Duration::seconds(self.token.refresh_lifetime_seconds),
            },
        }
    }

    pub fn payload_ciphers(&self) -> PayloadCiphers {
        PayloadCiphers::new(
            &self.token.access_payload_secret,
            &self.token.refresh_payload_secret,
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            invite_required: self.invite_required,
            public_base_url: self.public_base_url.clone(),
        }
    }
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().clone())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
