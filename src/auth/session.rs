//! Session tokens
//!
//! A session is a signed HS256 token bound to one device: `sid` must match the
//! device row's current session and the device must still be active.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{config::SecurityConfig, error::AppError};

/// Claims of a session token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Session ID, stored on the bound device
    pub sid: String,

    /// Client device ID
    pub device_id: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

impl SessionClaims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthorized)
    }

    pub fn session_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sid).map_err(|_| AppError::Unauthorized)
    }
}

/// Issued session token
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub expires_in: u64,
}

/// Session token service
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: u64,
    remember_ttl_secs: u64,
}

impl SessionService {
    /// Create session service from config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        Self::new(
            config.session_secret.expose_secret(),
            config.session_ttl_secs,
            config.remember_session_ttl_secs,
        )
    }

    pub fn new(secret: &str, ttl_secs: u64, remember_ttl_secs: u64) -> Result<Self, AppError> {
        // HS256 needs at least 32 bytes of key material
        if secret.len() < 32 {
            return Err(AppError::Config("Session secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
            remember_ttl_secs,
        })
    }

    /// Issue a token for a user session on a device
    pub fn issue(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        device_id: &str,
        remember: bool,
    ) -> Result<IssuedSession, AppError> {
        let ttl = if remember {
            self.remember_ttl_secs
        } else {
            self.ttl_secs
        };
        let now = Utc::now();
        let expiration = now + Duration::seconds(ttl as i64);

        let claims = SessionClaims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            device_id: device_id.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode session token: {:?}", e);
            AppError::Internal(format!("Failed to encode session token: {}", e))
        })?;

        Ok(IssuedSession {
            token,
            expires_in: ttl,
        })
    }

    /// Validate and decode a session token
    pub fn validate(&self, token: &str) -> Result<SessionClaims, AppError> {
        Ok(
            decode::<SessionClaims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
                .map_err(|e| {
                    tracing::debug!("Session token validation failed: {:?}", e);
                    AppError::Unauthorized
                })?
                .claims,
        )
    }
}

/// Random 32-byte hex token, used for device tokens and CSRF tokens
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest; only this form of a device token is stored
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_key_32_characters_long!";

    fn service() -> SessionService {
        SessionService::new(SECRET, 900, 86_400).unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let service = service();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let issued = service.issue(user_id, session_id, "dev-1", false).unwrap();
        assert_eq!(issued.expires_in, 900);

        let claims = service.validate(&issued.token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.session_id().unwrap(), session_id);
        assert_eq!(claims.device_id, "dev-1");
    }

    #[test]
    fn test_remember_uses_long_ttl() {
        let issued = service()
            .issue(Uuid::new_v4(), Uuid::new_v4(), "dev-1", true)
            .unwrap();
        assert_eq!(issued.expires_in, 86_400);
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let other = SessionService::new("another_secret_key_32_characters_long", 900, 900).unwrap();
        let issued = other.issue(Uuid::new_v4(), Uuid::new_v4(), "d", false).unwrap();
        assert!(matches!(service().validate(&issued.token), Err(AppError::Unauthorized)));
        assert!(service().validate("invalid_token").is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(SessionService::new("short", 900, 900).is_err());
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }
}
