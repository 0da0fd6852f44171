use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use super::error::ServiceError;
use super::token::Purpose;
use crate::models::Identity;

const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 keyed by SHA-256 of a configured secret.
/// Output is `nonce (12 bytes) || ciphertext`.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
    aad: &'static [u8],
}

impl PayloadCipher {
    pub fn new(secret: &SecretString, aad: &'static [u8]) -> Self {
        let digest = Sha256::digest(secret.expose_secret().as_bytes());
        let key = Key::from_slice(&digest);
        Self {
            cipher: ChaCha20Poly1305::new(key),
            aad,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: self.aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("Encryption failure: {}", e))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ServiceError> {
        if data.len() < NONCE_LEN {
            return Err(ServiceError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: self.aad,
                },
            )
            .map_err(|_| ServiceError::DecryptFailed)
    }

    pub fn seal_identity(&self, identity: &Identity) -> Result<Vec<u8>, ServiceError> {
        let json = serde_json::to_vec(identity)
            .map_err(|e| anyhow::anyhow!("Failed to encode identity: {}", e))?;
        self.encrypt(&json)
    }

    pub fn open_identity(&self, sealed: &[u8]) -> Result<Identity, ServiceError> {
        let json = self.decrypt(sealed)?;
        serde_json::from_slice(&json).map_err(|_| ServiceError::DecryptFailed)
    }
}

/// One cipher per token purpose.
#[derive(Clone)]
pub struct PayloadCiphers {
    access: PayloadCipher,
    refresh: PayloadCipher,
}

impl PayloadCiphers {
    pub fn new(access_secret: &SecretString, refresh_secret: &SecretString) -> Self {
        Self {
            access: PayloadCipher::new(access_secret, b"access"),
            refresh: PayloadCipher::new(refresh_secret, b"refresh"),
        }
    }

    pub fn for_purpose(&self, purpose: Purpose) -> &PayloadCipher {
        match purpose {
            Purpose::Access => &self.access,
            Purpose::Refresh => &self.refresh,
        }
    }
}
