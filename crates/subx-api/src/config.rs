//! API configuration.

use std::time::Duration;

const MB: usize = 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max JSON request body size
    pub max_body_size: usize,
    /// Largest file a user may upload
    pub max_upload_bytes: u64,
    /// Lifetime of presigned upload and download URLs
    pub presign_expiry: Duration,
    /// HS256 secret used to verify Supabase access tokens
    pub jwt_secret: String,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * MB,
            max_upload_bytes: 2048 * MB as u64,
            presign_expiry: Duration::from_secs(3600),
            jwt_secret: String::new(),
            environment: "development".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            request_timeout: env_parse("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            max_upload_bytes: env_parse::<u64>("MAX_UPLOAD_SIZE_MB")
                .map(|mb| mb * MB as u64)
                .unwrap_or(defaults.max_upload_bytes),
            presign_expiry: env_parse("PRESIGN_EXPIRY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.presign_expiry),
            jwt_secret: std::env::var("SUPABASE_JWT_SECRET").unwrap_or_default(),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("API_PORT", "9100");
        std::env::set_var("CORS_ORIGINS", "https://app.example.com, https://admin.example.com,");
        std::env::set_var("MAX_UPLOAD_SIZE_MB", "100");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9100);
        assert_eq!(
            config.cors_origins,
            vec!["https://app.example.com", "https://admin.example.com"]
        );
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);

        std::env::remove_var("API_PORT");
        std::env::remove_var("CORS_ORIGINS");
        std::env::remove_var("MAX_UPLOAD_SIZE_MB");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        std::env::remove_var("API_PORT");
        let config = ApiConfig::from_env();
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_upload_bytes, 2048 * 1024 * 1024);
        assert!(!config.is_production());
    }
}
