//! HS256 access tokens

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::middleware::AuthError;

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// `owner` for a tenant root account, anything else for auditors
    pub role: String,
    /// Tenant the user belongs to; a root account is its own tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_hours: i64,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("expiry_hours", &self.expiry_hours)
            .finish_non_exhaustive()
    }
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a token for a user
    pub fn generate_token(
        &self,
        user_id: Uuid,
        role: &str,
        tenant: Option<Uuid>,
    ) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            role: role.to_string(),
            tenant,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(self.expiry_hours)).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token validation failed");
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_claims() {
        let manager = JwtManager::new("test-jwt-secret-key-for-testing-only", 24);
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let token = manager.generate_token(user, "auditor", Some(tenant)).unwrap();

        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, "auditor");
        assert_eq!(claims.tenant, Some(tenant));
    }

    #[test]
    fn test_foreign_and_expired_tokens_rejected() {
        let manager = JwtManager::new("test-jwt-secret-key-for-testing-only", 24);
        let other = JwtManager::new("another-secret-key-for-testing-only", 24);
        let token = other.generate_token(Uuid::new_v4(), "owner", None).unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));

        let expired = JwtManager::new("test-jwt-secret-key-for-testing-only", -2);
        let token = expired.generate_token(Uuid::new_v4(), "owner", None).unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));

        assert!(manager.validate_token("not-a-token").is_err());
    }
}
