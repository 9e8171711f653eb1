//! Authentication utilities for the Kalshi API.
//!
//! Kalshi signs requests with RSA-PSS over SHA-256. The message is
//! `timestamp_ms + METHOD + path`, where `path` carries the API prefix
//! and no query string.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;

pub const HEADER_ACCESS_KEY: &str = "KALSHI-ACCESS-KEY";
pub const HEADER_ACCESS_TIMESTAMP: &str = "KALSHI-ACCESS-TIMESTAMP";
pub const HEADER_ACCESS_SIGNATURE: &str = "KALSHI-ACCESS-SIGNATURE";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to read private key {path}: {source}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid private key (tried PKCS#8 and PKCS#1): {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// API credentials: key id plus the RSA signing key.
#[derive(Clone)]
pub struct ApiCredentials {
    key_id: String,
    signing_key: BlindedSigningKey<Sha256>,
}

impl ApiCredentials {
    /// Creates credentials from an already parsed key.
    pub fn new(key_id: String, private_key: RsaPrivateKey) -> Self {
        Self {
            key_id,
            signing_key: BlindedSigningKey::<Sha256>::new(private_key),
        }
    }

    /// Parses a PEM private key, PKCS#8 first, then PKCS#1.
    pub fn from_pem(key_id: String, pem: &str) -> Result<Self, AuthError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|pkcs8_err| {
                RsaPrivateKey::from_pkcs1_pem(pem)
                    .map_err(|pkcs1_err| format!("pkcs8: {pkcs8_err}; pkcs1: {pkcs1_err}"))
            })
            .map_err(AuthError::InvalidKey)?;
        Ok(Self::new(key_id, key))
    }

    /// Loads the PEM private key from disk.
    pub fn from_key_file(key_id: String, path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|source| AuthError::KeyRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(key_id, &pem)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signs `timestamp + METHOD + path` and returns the base64 signature.
    pub fn sign(&self, timestamp_ms: &str, method: &str, path: &str) -> Result<String, AuthError> {
        let message = format!("{}{}{}", timestamp_ms, method.to_uppercase(), path);
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut rand::thread_rng(), message.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Current timestamp in milliseconds, as sent in the timestamp header.
    pub fn timestamp() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    /// Returns the three authentication headers for a request.
    pub fn auth_headers(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp = Self::timestamp();
        let signature = self.sign(&timestamp, method, path)?;

        Ok(vec![
            (HEADER_ACCESS_KEY, self.key_id.clone()),
            (HEADER_ACCESS_TIMESTAMP, timestamp),
            (HEADER_ACCESS_SIGNATURE, signature),
        ])
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key_id", &"[REDACTED]")
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::pss::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = ApiCredentials::new("my-key-id".to_string(), test_key());
        let debug_str = format!("{:?}", creds);
        assert!(!debug_str.contains("my-key-id"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_signature_verifies() {
        let key = test_key();
        let verifying_key = VerifyingKey::<Sha256>::new(key.to_public_key());
        let creds = ApiCredentials::new("id".to_string(), key);

        let sig_b64 = creds.sign("1700000000000", "get", "/trade-api/v2/portfolio/balance").unwrap();
        let sig_bytes = BASE64.decode(sig_b64).unwrap();
        let signature = Signature::try_from(sig_bytes.as_slice()).unwrap();

        verifying_key
            .verify(b"1700000000000GET/trade-api/v2/portfolio/balance", &signature)
            .unwrap();
    }

    #[test]
    fn test_from_pem_pkcs8() {
        let key = test_key();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let creds = ApiCredentials::from_pem("id".to_string(), &pem).unwrap();
        assert_eq!(creds.key_id(), "id");
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let err = ApiCredentials::from_pem("id".to_string(), "not a key").unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey(_)));
    }

    #[test]
    fn test_auth_headers_shape() {
        let creds = ApiCredentials::new("id".to_string(), test_key());
        let headers = creds.auth_headers("GET", "/trade-api/ws/v2").unwrap();
        let names: Vec<&str> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec![HEADER_ACCESS_KEY, HEADER_ACCESS_TIMESTAMP, HEADER_ACCESS_SIGNATURE]);
        assert_eq!(headers[0].1, "id");
    }
}
