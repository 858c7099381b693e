//! Bearer-token verification.
//!
//! Sheetflow never issues tokens. The identity provider signs HS256 JWTs
//! with a secret shared with this service; each token names the user
//! (`sub`), their [`Role`], and an expiry. Tokens with any other role are
//! rejected outright.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sheetflow_core::error::CoreError;
use sheetflow_core::types::DbId;

/// What a caller may do beyond managing their own conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// May refill any user's credits.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Admin => "admin",
        })
    }
}

/// Claims Sheetflow reads from an access token. Other claims are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: DbId,
    pub role: Role,
    /// Expiry, UTC Unix seconds.
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret shared with the identity provider.
    pub secret: String,
}

impl JwtConfig {
    /// Reads `JWT_SECRET`.
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");
        Self { secret }
    }
}

/// The token part of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, CoreError> {
    let header =
        header.ok_or_else(|| CoreError::Unauthorized("Missing Authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            CoreError::Unauthorized("Invalid Authorization format. Expected: Bearer <token>".into())
        })
}

/// Check signature and expiry, then return the claims.
pub fn verify_access_token(token: &str, config: &JwtConfig) -> Result<Claims, CoreError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        CoreError::Unauthorized("Invalid or expired token".into())
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &str = "shared-with-identity-provider";

    fn config() -> JwtConfig {
        JwtConfig {
            secret: SECRET.to_string(),
        }
    }

    fn mint(body: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &body,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_minutes(mins: i64) -> i64 {
        chrono::Utc::now().timestamp() + mins * 60
    }

    #[test]
    fn accepts_provider_token_and_ignores_extra_claims() {
        let token = mint(
            serde_json::json!({
                "sub": 42,
                "role": "admin",
                "exp": in_minutes(15),
                "iss": "accounts.sheetflow.app",
            }),
            SECRET,
        );
        let claims = verify_access_token(&token, &config()).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn rejects_expired_foreign_and_unknown_role_tokens() {
        let expired = mint(
            serde_json::json!({ "sub": 1, "role": "user", "exp": in_minutes(-10) }),
            SECRET,
        );
        let foreign = mint(
            serde_json::json!({ "sub": 1, "role": "user", "exp": in_minutes(15) }),
            "someone-else",
        );
        let superuser = mint(
            serde_json::json!({ "sub": 1, "role": "root", "exp": in_minutes(15) }),
            SECRET,
        );

        for token in [expired, foreign, superuser] {
            assert_matches!(
                verify_access_token(&token, &config()),
                Err(CoreError::Unauthorized(_))
            );
        }
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        for header in [None, Some("abc.def"), Some("Basic abc"), Some("Bearer  ")] {
            assert_matches!(bearer_token(header), Err(CoreError::Unauthorized(_)));
        }
    }
}
