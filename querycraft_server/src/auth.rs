//! Bearer tokens (HS256 JWT) and password hashing.

use crate::error::ApiError;
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use querycraft_core::UserId;
use querycraft_core::config::AuthConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: UserId,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
            ttl: cfg.token_ttl,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn issue(&self, user_id: UserId) -> Result<String, ApiError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            id: user_id,
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Not authorized, token failed".to_string()))
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| ApiError::Internal(format!("salt generation failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

/// False for a wrong password or an unparseable stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// One-time password handed back when an invite creates a new account.
pub fn generate_password() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(ttl_secs: u64) -> TokenIssuer {
        TokenIssuer::new(&AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn tokens_round_trip_user_id() {
        let issuer = issuer(3600);
        let user_id = UserId::new();
        let token = issuer.issue(user_id).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.id, user_id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn foreign_and_garbage_tokens_are_rejected() {
        let token = issuer(3600).issue(UserId::new()).unwrap();
        let other = TokenIssuer::new(&AuthConfig {
            jwt_secret: "other".to_string(),
            token_ttl: Duration::from_secs(3600),
        });
        assert!(other.verify(&token).is_err());
        assert!(issuer(3600).verify("not.a.jwt").is_err());
    }

    #[test]
    fn passwords_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "plaintext"));
    }
}
