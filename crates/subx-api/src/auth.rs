//! Supabase access token authentication.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use subx_db::ProfileRow;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Audience Supabase puts on tokens of signed-in users.
pub const SUPABASE_AUDIENCE: &str = "authenticated";

/// Query parameter browsers use to authenticate websocket upgrades.
const TOKEN_QUERY_PARAM: &str = "access_token";

/// Decoded Supabase access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// User ID
    pub sub: String,
    pub email: Option<String>,
    pub aud: String,
    pub exp: i64,
    pub role: Option<String>,
}

/// Verifies HS256 tokens signed with the project's JWT secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<SupabaseClaims, ApiError> {
        decode::<SupabaseClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub profile: ProfileRow,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.profile.role.as_deref() == Some("admin")
    }

    /// 403 unless the profile carries the admin role.
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin access required"))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(Authorization(bearer)) = parts.headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    parts.uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let claims = state.jwt.verify(&token)?;

        // A user who signed up moments ago may not have a profile row yet
        let profile = match state.store.get_profile(&claims.sub).await? {
            Some(profile) => profile,
            None => {
                debug!(user_id = %claims.sub, "No profile row, using free tier defaults");
                ProfileRow::new(claims.sub.clone(), claims.email.clone())
            }
        };

        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
            profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, aud: &str, exp: i64) -> String {
        let claims = SupabaseClaims {
            sub: "user-1".into(),
            email: Some("a@example.com".into()),
            aud: aud.into(),
            exp,
            role: Some("authenticated".into()),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn in_one_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_verify_accepts_valid_token() {
        let verifier = JwtVerifier::new("secret");
        let claims = verifier.verify(&token("secret", SUPABASE_AUDIENCE, in_one_hour())).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn test_verify_rejects_bad_tokens() {
        let verifier = JwtVerifier::new("secret");
        assert!(verifier.verify(&token("other", SUPABASE_AUDIENCE, in_one_hour())).is_err());
        assert!(verifier.verify(&token("secret", "anon", in_one_hour())).is_err());
        let expired = chrono::Utc::now().timestamp() - 3600;
        assert!(verifier.verify(&token("secret", SUPABASE_AUDIENCE, expired)).is_err());
        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_bearer_token_from_query() {
        let (parts, _) = axum::http::Request::builder()
            .uri("/ws/jobs/j1?access_token=abc.def")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_require_admin() {
        let mut user = AuthUser {
            id: "user-1".into(),
            email: None,
            profile: ProfileRow::new("user-1", None),
        };
        assert!(matches!(user.require_admin(), Err(ApiError::Forbidden(_))));

        user.profile.role = Some("admin".into());
        assert!(user.require_admin().is_ok());
    }
}
