//! Bucket configuration for R2 and B2.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use subx_models::StorageProvider;

use crate::error::{StorageError, StorageResult};

/// Region used when a B2 endpoint does not name one.
pub const B2_DEFAULT_REGION: &str = "us-west-004";

/// Default system bucket name.
pub const DEFAULT_BUCKET: &str = "subtranslate";

static B2_REGION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"s3\.([a-z0-9-]+)\.backblazeb2\.com").ok());

/// Region encoded in a B2 S3 endpoint (`s3.us-west-004.backblazeb2.com`).
pub fn b2_region(endpoint: &str) -> String {
    B2_REGION
        .as_ref()
        .and_then(|re| re.captures(endpoint))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| B2_DEFAULT_REGION.to_string())
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolved connection settings for one S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// S3 API endpoint URL
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// `auto` for R2, parsed from the endpoint for B2
    pub region: String,
    /// Public domain in front of the bucket, if any
    pub cdn_domain: Option<String>,
}

impl StorageConfig {
    /// R2 bucket. The endpoint wins over the account id.
    pub fn r2(
        account_id: Option<&str>,
        endpoint: Option<&str>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> StorageResult<Self> {
        let endpoint_url = match (non_empty(endpoint), non_empty(account_id)) {
            (Some(ep), _) => with_scheme(ep),
            (None, Some(account)) => format!("https://{}.r2.cloudflarestorage.com", account),
            (None, None) => {
                return Err(StorageError::config_error(
                    "R2 endpoint or account id is required",
                ))
            }
        };

        Ok(Self {
            provider: StorageProvider::R2,
            endpoint_url,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            bucket_name: bucket_name.into(),
            region: "auto".to_string(),
            cdn_domain: None,
        })
    }

    /// B2 bucket. The endpoint is required.
    pub fn b2(
        endpoint: Option<&str>,
        key_id: impl Into<String>,
        application_key: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> StorageResult<Self> {
        let endpoint = non_empty(endpoint).ok_or_else(|| {
            StorageError::config_error(
                "B2 S3 endpoint is required (e.g. s3.us-west-004.backblazeb2.com)",
            )
        })?;
        let endpoint_url = with_scheme(endpoint);

        Ok(Self {
            provider: StorageProvider::B2,
            region: b2_region(&endpoint_url),
            endpoint_url,
            access_key_id: key_id.into(),
            secret_access_key: application_key.into(),
            bucket_name: bucket_name.into(),
            cdn_domain: None,
        })
    }

    pub fn with_cdn_domain(mut self, domain: Option<String>) -> Self {
        self.cdn_domain = domain.filter(|d| !d.trim().is_empty());
        self
    }

    /// System R2 bucket from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let access_key_id = std::env::var("R2_ACCESS_KEY_ID")
            .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?;
        let secret_access_key = std::env::var("R2_SECRET_ACCESS_KEY")
            .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?;
        let bucket =
            std::env::var("R2_BUCKET_NAME").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());

        let config = Self::r2(
            std::env::var("R2_ACCOUNT_ID").ok().as_deref(),
            std::env::var("R2_ENDPOINT").ok().as_deref(),
            access_key_id,
            secret_access_key,
            bucket,
        )?;

        Ok(config.with_cdn_domain(std::env::var("R2_CDN_DOMAIN").ok()))
    }

    /// Public URL for a key when a CDN domain is configured.
    pub fn cdn_url(&self, key: &str) -> Option<String> {
        self.cdn_domain.as_ref().map(|domain| {
            let base = with_scheme(domain.trim_end_matches('/'));
            format!("{}/{}", base, key.trim_start_matches('/'))
        })
    }
}

/// A user's own bucket, as saved in their storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserBucketConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    pub r2_account_id: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,
    pub r2_bucket_name: Option<String>,
    pub r2_endpoint: Option<String>,
    pub b2_key_id: Option<String>,
    pub b2_app_key: Option<String>,
    pub b2_bucket_name: Option<String>,
    pub b2_endpoint: Option<String>,
}

impl UserBucketConfig {
    pub fn bucket_name(&self) -> Option<&str> {
        match self.provider {
            StorageProvider::R2 => non_empty(self.r2_bucket_name.as_deref()),
            StorageProvider::B2 => non_empty(self.b2_bucket_name.as_deref()),
        }
    }

    /// Resolve into connection settings for the selected provider.
    pub fn to_storage_config(&self) -> StorageResult<StorageConfig> {
        let bucket = self
            .bucket_name()
            .ok_or_else(|| StorageError::config_error("bucket name is not set"))?
            .to_string();

        match self.provider {
            StorageProvider::R2 => StorageConfig::r2(
                self.r2_account_id.as_deref(),
                self.r2_endpoint.as_deref(),
                self.r2_access_key.clone().unwrap_or_default(),
                self.r2_secret_key.clone().unwrap_or_default(),
                bucket,
            ),
            StorageProvider::B2 => StorageConfig::b2(
                self.b2_endpoint.as_deref(),
                self.b2_key_id.clone().unwrap_or_default(),
                self.b2_app_key.clone().unwrap_or_default(),
                bucket,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_b2_region() {
        assert_eq!(b2_region("https://s3.eu-central-003.backblazeb2.com"), "eu-central-003");
        assert_eq!(b2_region("https://example.com"), B2_DEFAULT_REGION);
    }

    #[test]
    fn test_r2_endpoint_resolution() {
        let from_account = StorageConfig::r2(Some("abc123"), None, "k", "s", "b").unwrap();
        assert_eq!(from_account.endpoint_url, "https://abc123.r2.cloudflarestorage.com");
        assert_eq!(from_account.region, "auto");

        let explicit =
            StorageConfig::r2(Some("abc123"), Some("https://custom.example"), "k", "s", "b")
                .unwrap();
        assert_eq!(explicit.endpoint_url, "https://custom.example");

        assert!(StorageConfig::r2(None, Some("  "), "k", "s", "b").is_err());
    }

    #[test]
    fn test_b2_requires_endpoint_and_adds_scheme() {
        assert!(StorageConfig::b2(None, "k", "s", "b").is_err());

        let config =
            StorageConfig::b2(Some("s3.us-east-005.backblazeb2.com"), "k", "s", "b").unwrap();
        assert_eq!(config.endpoint_url, "https://s3.us-east-005.backblazeb2.com");
        assert_eq!(config.region, "us-east-005");
        assert_eq!(config.provider, StorageProvider::B2);
    }

    #[test]
    fn test_user_bucket_config() {
        let user = UserBucketConfig {
            provider: StorageProvider::B2,
            b2_key_id: Some("kid".to_string()),
            b2_app_key: Some("app".to_string()),
            b2_bucket_name: Some("mine".to_string()),
            b2_endpoint: Some("s3.us-west-004.backblazeb2.com".to_string()),
            ..Default::default()
        };
        let config = user.to_storage_config().unwrap();
        assert_eq!(config.bucket_name, "mine");
        assert_eq!(config.access_key_id, "kid");

        let missing_bucket = UserBucketConfig::default();
        assert!(missing_bucket.to_storage_config().is_err());
    }

    #[test]
    fn test_cdn_url() {
        let config = StorageConfig::r2(Some("a"), None, "k", "s", "b")
            .unwrap()
            .with_cdn_domain(Some("cdn.example.com/".to_string()));
        assert_eq!(
            config.cdn_url("/users/u/p/export/out.mp4").as_deref(),
            Some("https://cdn.example.com/users/u/p/export/out.mp4")
        );

        let none = StorageConfig::r2(Some("a"), None, "k", "s", "b").unwrap();
        assert!(none.cdn_url("x").is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_bucket() {
        std::env::set_var("R2_ACCESS_KEY_ID", "id");
        std::env::set_var("R2_SECRET_ACCESS_KEY", "secret");
        std::env::set_var("R2_ACCOUNT_ID", "acct");
        std::env::remove_var("R2_ENDPOINT");
        std::env::remove_var("R2_BUCKET_NAME");
        std::env::remove_var("R2_CDN_DOMAIN");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.bucket_name, DEFAULT_BUCKET);
        assert_eq!(config.endpoint_url, "https://acct.r2.cloudflarestorage.com");
        assert!(config.cdn_domain.is_none());

        std::env::remove_var("R2_ACCESS_KEY_ID");
        std::env::remove_var("R2_SECRET_ACCESS_KEY");
        std::env::remove_var("R2_ACCOUNT_ID");
    }
}
