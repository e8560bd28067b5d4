//! HMAC-signed tokens for local file URLs.
//!
//! `LocalStore` cannot produce S3 signatures, so it hands out
//! `/files/{key}?token=...` URLs instead. The token binds the key, the HTTP
//! method and an expiry, and is signed with HMAC-SHA256.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// HTTP method a token allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenMethod {
    Get,
    Put,
}

impl TokenMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenMethod::Get => "GET",
            TokenMethod::Put => "PUT",
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToken {
    /// Object key
    pub key: String,
    pub method: TokenMethod,
    /// Expiry timestamp (Unix seconds)
    pub exp: u64,
    /// Content type the upload must carry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<String>,
}

impl FileToken {
    pub fn new(key: impl Into<String>, method: TokenMethod, expires_in: Duration) -> Self {
        Self {
            key: key.into(),
            method,
            exp: now_secs() + expires_in.as_secs(),
            ct: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.ct = Some(content_type.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        now_secs() >= self.exp
    }

    fn mac(secret: &str) -> StorageResult<HmacSha256> {
        HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| StorageError::ConfigError(format!("Invalid HMAC key: {}", e)))
    }

    /// `base64(json).base64(hmac)`
    pub fn sign(&self, secret: &str) -> StorageResult<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?);
        let mut mac = Self::mac(secret)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify a signed token.
    ///
    /// Returns `None` for a malformed, tampered or expired token. Errors only
    /// on an unusable secret.
    pub fn verify(signed: &str, secret: &str) -> StorageResult<Option<Self>> {
        let Some((payload, sig_encoded)) = signed.split_once('.') else {
            return Ok(None);
        };
        let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(sig_encoded) else {
            return Ok(None);
        };

        let mut mac = Self::mac(secret)?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&sig_bytes).is_err() {
            return Ok(None);
        }

        let token: Option<Self> = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        Ok(token.filter(|t| !t.is_expired()))
    }

    /// Verify and check the token was issued for this key and method.
    pub fn verify_for(
        signed: &str,
        secret: &str,
        key: &str,
        method: TokenMethod,
    ) -> StorageResult<bool> {
        Ok(Self::verify(signed, secret)?
            .map(|t| t.key == key && t.method == method)
            .unwrap_or(false))
    }
}
