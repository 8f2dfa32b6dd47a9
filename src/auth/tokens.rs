/// JWT Token Generation and Validation
///
/// `TokenService` owns the signing keys for both token kinds. It is built
/// once from `JwtSettings` at startup and shared read-only.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// Why a token failed verification
///
/// Only `Expired` is recoverable, and only for access tokens.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("malformed token")]
    Malformed,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_seconds: i64,
}

impl SigningKeys {
    fn from_secret(secret: &str, expiry_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        }
    }
}

/// Issues and verifies access and refresh tokens
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
}

impl TokenService {
    pub fn new(config: &JwtSettings) -> Self {
        Self {
            access: SigningKeys::from_secret(&config.access_secret, config.access_token_expiry),
            refresh: SigningKeys::from_secret(&config.refresh_secret, config.refresh_token_expiry),
            issuer: config.issuer.clone(),
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Lifetime in seconds of tokens of this kind
    pub fn expiry_seconds(&self, kind: TokenKind) -> i64 {
        self.keys(kind).expiry_seconds
    }

    /// Sign a new token of `kind` for `user_id`
    ///
    /// # Errors
    /// Returns an internal error if signing fails
    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<String, AppError> {
        let keys = self.keys(kind);
        let claims = Claims::new(user_id, kind, keys.expiry_seconds, self.issuer.clone());

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AppError::Internal(format!("{} token generation failed: {}", kind.as_str(), e)))
    }

    /// Verify a token against the key for `kind`
    ///
    /// Signature is checked before expiry, so a forged token is reported as
    /// `InvalidSignature` even when its `exp` is in the past.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.keys(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })?;

        if claims.kind != kind {
            return Err(TokenError::Malformed);
        }

        Ok(claims)
    }
}
