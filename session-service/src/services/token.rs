use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::utils::{constant_time_eq, generate_signature, HmacAlgorithm};
use std::sync::Arc;

use super::error::ServiceError;

const TOKEN_TYPE: &str = "JWT";

/// Token role. Each purpose has its own secret, subject and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Access,
    Refresh,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Access => "access",
            Purpose::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    typ: String,
    alg: HmacAlgorithm,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    iss: String,
    sub: String,
    purpose: Purpose,
    sid: String,
    data: String,
    iat: i64,
}

/// Signing material for one purpose.
pub struct TokenKey {
    pub secret: SecretString,
    pub subject: String,
    pub lifetime: Duration,
}

pub struct TokenSettings {
    pub issuer: String,
    pub algorithm: HmacAlgorithm,
    pub access: TokenKey,
    pub refresh: TokenKey,
}

/// Verified token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub session_id: String,
    pub purpose: Purpose,
    /// Opaque bytes; sealed identity for tokens minted by the session service.
    pub payload: Vec<u8>,
    pub issued_at: i64,
}

/// Mints and verifies `base64url(header).base64url(payload).hex(hmac)` tokens.
#[derive(Clone)]
pub struct TokenCodec {
    inner: Arc<TokenSettings>,
}

impl TokenCodec {
    pub fn new(settings: TokenSettings) -> Self {
        tracing::info!(
            algorithm = %settings.algorithm,
            issuer = %settings.issuer,
            "Token codec initialized"
        );
        Self {
            inner: Arc::new(settings),
        }
    }

    fn key(&self, purpose: Purpose) -> &TokenKey {
        match purpose {
            Purpose::Access => &self.inner.access,
            Purpose::Refresh => &self.inner.refresh,
        }
    }

    pub fn lifetime(&self, purpose: Purpose) -> Duration {
        self.key(purpose).lifetime
    }

    /// Sign a token. `issued_at` defaults to now.
    pub fn mint(
        &self,
        session_id: &str,
        purpose: Purpose,
        payload: &[u8],
        issued_at: Option<i64>,
    ) -> Result<String, ServiceError> {
        let key = self.key(purpose);

        let header = Header {
            typ: TOKEN_TYPE.to_string(),
            alg: self.inner.algorithm,
        };
        let body = Payload {
            iss: self.inner.issuer.clone(),
            sub: key.subject.clone(),
            purpose,
            sid: session_id.to_string(),
            data: URL_SAFE_NO_PAD.encode(payload),
            iat: issued_at.unwrap_or_else(|| Utc::now().timestamp()),
        };

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| anyhow::anyhow!("Failed to encode token header: {}", e))?;
        let payload_json = serde_json::to_vec(&body)
            .map_err(|e| anyhow::anyhow!("Failed to encode token payload: {}", e))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json)
        );
        let signature = generate_signature(
            self.inner.algorithm,
            key.secret.expose_secret().as_bytes(),
            signing_input.as_bytes(),
        )?;

        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, ServiceError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify and require the given purpose.
    pub fn verify_purpose(&self, token: &str, purpose: Purpose) -> Result<TokenClaims, ServiceError> {
        let claims = self.verify(token)?;
        if claims.purpose != purpose {
            tracing::debug!(
                expected = purpose.as_str(),
                actual = claims.purpose.as_str(),
                "Token purpose mismatch"
            );
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    /// Re-mint from the decoded fields and compare signatures, then check the
    /// purpose's lifetime against `now`. Every failure is `InvalidToken`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, ServiceError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ServiceError::InvalidToken);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.typ != TOKEN_TYPE || header.alg != self.inner.algorithm {
            return Err(ServiceError::InvalidToken);
        }

        let body: Payload = decode_segment(payload_b64)?;
        let data = URL_SAFE_NO_PAD
            .decode(body.data.as_bytes())
            .map_err(|_| ServiceError::InvalidToken)?;

        let expected = self
            .mint(&body.sid, body.purpose, &data, Some(body.iat))
            .map_err(|_| ServiceError::InvalidToken)?;
        let expected_signature = expected.rsplit('.').next().unwrap_or_default();

        if !constant_time_eq(expected_signature.as_bytes(), signature.as_bytes()) {
            tracing::debug!("Token signature mismatch");
            return Err(ServiceError::InvalidToken);
        }

        let lifetime = self.lifetime(body.purpose).num_seconds();
        if now.timestamp() > body.iat.saturating_add(lifetime) {
            tracing::debug!(purpose = body.purpose.as_str(), "Token expired");
            return Err(ServiceError::InvalidToken);
        }

        Ok(TokenClaims {
            session_id: body.sid,
            purpose: body.purpose,
            payload: data,
            issued_at: body.iat,
        })
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, ServiceError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|_| ServiceError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| ServiceError::InvalidToken)
}
