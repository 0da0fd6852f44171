use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// MAC algorithm used to sign tokens. Serialized with its JOSE name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "HS512")]
    Hs512,
}

impl HmacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HmacAlgorithm::Hs256 => "HS256",
            HmacAlgorithm::Hs512 => "HS512",
        }
    }
}

impl fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HmacAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(HmacAlgorithm::Hs256),
            "HS512" => Ok(HmacAlgorithm::Hs512),
            other => Err(anyhow::anyhow!("Unsupported HMAC algorithm: {}", other)),
        }
    }
}

/// Hex-encoded HMAC of `message` under `secret`.
pub fn generate_signature(
    algorithm: HmacAlgorithm,
    secret: &[u8],
    message: &[u8],
) -> Result<String, anyhow::Error> {
    let bytes = match algorithm {
        HmacAlgorithm::Hs256 => {
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        HmacAlgorithm::Hs512 => {
            let mut mac = HmacSha512::new_from_slice(secret)
                .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    };

    Ok(hex::encode(bytes))
}

/// Length check first, then a constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation_and_verification() {
        let secret = b"my_secret_key";
        let message = b"eyJ0eXAiOiJKV1QifQ.eyJzaWQiOjF9";

        for algorithm in [HmacAlgorithm::Hs256, HmacAlgorithm::Hs512] {
            let signature = generate_signature(algorithm, secret, message).unwrap();
            let again = generate_signature(algorithm, secret, message).unwrap();
            assert!(constant_time_eq(signature.as_bytes(), again.as_bytes()));
        }
    }

    #[test]
    fn test_signature_lengths() {
        let sig256 = generate_signature(HmacAlgorithm::Hs256, b"k", b"m").unwrap();
        let sig512 = generate_signature(HmacAlgorithm::Hs512, b"k", b"m").unwrap();
        assert_eq!(sig256.len(), 64);
        assert_eq!(sig512.len(), 128);
    }

    #[test]
    fn test_invalid_signature() {
        let secret = b"my_secret_key";
        let message = b"header.payload";

        let signature = generate_signature(HmacAlgorithm::Hs256, secret, message).unwrap();
        let first = if signature.starts_with('a') { "b" } else { "a" };
        let invalid_signature = format!("{}{}", first, &signature[1..]);

        assert!(!constant_time_eq(signature.as_bytes(), invalid_signature.as_bytes()));
        assert!(!constant_time_eq(signature.as_bytes(), b""));
    }

    #[test]
    fn test_wrong_secret() {
        let one = generate_signature(HmacAlgorithm::Hs256, b"one", b"message").unwrap();
        let two = generate_signature(HmacAlgorithm::Hs256, b"two", b"message").unwrap();
        assert!(!constant_time_eq(one.as_bytes(), two.as_bytes()));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("HS256".parse::<HmacAlgorithm>().unwrap(), HmacAlgorithm::Hs256);
        assert_eq!("hs512".parse::<HmacAlgorithm>().unwrap(), HmacAlgorithm::Hs512);
        assert!("RS256".parse::<HmacAlgorithm>().is_err());
        assert_eq!(
            serde_json::to_string(&HmacAlgorithm::Hs512).unwrap(),
            "\"HS512\""
        );
    }
}
