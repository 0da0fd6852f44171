use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};

use super::random::generate_password;

/// Plaintext password. Redacted in `Debug` output.
#[derive(Debug)]
pub struct Password(SecretString);

impl Password {
    pub fn new(password: String) -> Self {
        Self(SecretString::new(password))
    }

    /// Fresh random password for a confirmed signup or a reset.
    pub fn generate() -> Self {
        Self::new(generate_password())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hash a password with Argon2id and a random salt embedded in the PHC string.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.expose().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(password: &Password, password_hash: &str) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.expose().as_bytes(), &parsed_hash)
        .is_ok())
}

/// Stand-in hash for accounts that do not exist, so an unknown email costs
/// the same Argon2 work as a wrong password.
static DUMMY_HASH: Lazy<Option<PasswordHashString>> =
    Lazy::new(|| hash_password(&Password::generate()).ok());

/// Verify against `password_hash`, or against the stand-in hash when there is
/// no account. `Ok(false)` whenever there is no account.
pub fn verify_password_or_dummy(
    password: &Password,
    password_hash: Option<&str>,
) -> Result<bool, anyhow::Error> {
    match password_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_ref() {
                let _ = verify_password(password, dummy.as_str());
            }
            Ok(false)
        }
    }
}
