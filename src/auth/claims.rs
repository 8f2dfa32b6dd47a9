/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. The `kind` claim ties a
/// token to the role it was issued for.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which of the two session tokens a claim bundle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
    /// Token role
    pub kind: TokenKind,
    /// Unique token ID, so two tokens minted in the same second differ
    pub jti: Uuid,
}

impl Claims {
    /// Create new claims expiring `expiry_seconds` from now
    pub fn new(user_id: Uuid, kind: TokenKind, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
            kind,
            jti: Uuid::new_v4(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.sub
    }

    /// Expiry as a timestamp, for revocation bookkeeping
    pub fn expires_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(self.exp, 0).unwrap_or_else(chrono::Utc::now)
    }
}
