/// Session refresh flow
///
/// Turns the access and refresh tokens carried by a request into one
/// `Verdict`. An expired access token is the only failure recovered
/// here: a valid, unrevoked refresh token for an existing user mints a
/// replacement. Every other failure is terminal.
///
/// The rejection reason is logged, never returned to the caller.

use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::store::CredentialStore;
use crate::auth::tokens::{TokenError, TokenService};
use crate::error::AppError;

const INVALID_TOKEN: &str = "invalid token";
const INVALID_REFRESH_TOKEN: &str = "invalid refresh token";

/// Tokens carried by one request
#[derive(Debug, Default, Clone)]
pub struct SessionTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Internal reason a session was rejected (logging only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredential,
    MalformedToken,
    InvalidSignature,
    ExpiredToken,
    UserNotFound,
    RevokedToken,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredential => "MISSING_CREDENTIAL",
            AuthFailure::MalformedToken => "MALFORMED_TOKEN",
            AuthFailure::InvalidSignature => "INVALID_SIGNATURE",
            AuthFailure::ExpiredToken => "EXPIRED_TOKEN",
            AuthFailure::UserNotFound => "USER_NOT_FOUND",
            AuthFailure::RevokedToken => "REVOKED_TOKEN",
        }
    }
}

impl From<TokenError> for AuthFailure {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthFailure::ExpiredToken,
            TokenError::InvalidSignature => AuthFailure::InvalidSignature,
            TokenError::Malformed => AuthFailure::MalformedToken,
        }
    }
}

/// Outcome of the refresh flow for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_authenticated: bool,
    pub user_id: Option<Uuid>,
    /// Replacement access token to hand back to the client
    pub new_access_token: Option<String>,
    /// Caller-facing error category
    pub error: Option<&'static str>,
    /// Logged reason; `None` when authenticated
    pub failure: Option<AuthFailure>,
}

impl Verdict {
    fn authenticated(user_id: Uuid) -> Self {
        Self {
            is_authenticated: true,
            user_id: Some(user_id),
            new_access_token: None,
            error: None,
            failure: None,
        }
    }

    fn refreshed(user_id: Uuid, new_access_token: String) -> Self {
        Self {
            new_access_token: Some(new_access_token),
            ..Self::authenticated(user_id)
        }
    }

    fn rejected(failure: AuthFailure, error: Option<&'static str>) -> Self {
        Self {
            is_authenticated: false,
            user_id: None,
            new_access_token: None,
            error,
            failure: Some(failure),
        }
    }

    pub fn new_access_token_issued(&self) -> bool {
        self.new_access_token.is_some()
    }
}

/// Resolve the session carried by `tokens`
///
/// # Errors
/// Only for unexpected failures (store unreachable, signing failure);
/// token problems become a rejected `Verdict`.
pub async fn verify_and_refresh(
    tokens: &SessionTokens,
    token_service: &TokenService,
    store: &dyn CredentialStore,
) -> Result<Verdict, AppError> {
    if let Some(access) = tokens.access.as_deref() {
        match token_service.verify(access, TokenKind::Access) {
            Ok(claims) => return Ok(Verdict::authenticated(claims.user_id())),
            Err(TokenError::Expired) => {
                tracing::debug!("Access token expired, attempting refresh");
            }
            Err(e) => {
                return Ok(Verdict::rejected(e.into(), Some(INVALID_TOKEN)));
            }
        }
    }

    let refresh = match tokens.refresh.as_deref() {
        Some(refresh) => refresh,
        None => return Ok(Verdict::rejected(AuthFailure::MissingCredential, None)),
    };

    let claims = match token_service.verify(refresh, TokenKind::Refresh) {
        Ok(claims) => claims,
        Err(e) => return Ok(Verdict::rejected(e.into(), Some(INVALID_REFRESH_TOKEN))),
    };

    if store.is_refresh_token_revoked(refresh).await? {
        tracing::warn!(user_id = %claims.user_id(), "Attempt to use revoked refresh token");
        return Ok(Verdict::rejected(
            AuthFailure::RevokedToken,
            Some(INVALID_REFRESH_TOKEN),
        ));
    }

    let user = match store.find_by_id(claims.user_id()).await? {
        Some(user) => user,
        None => {
            return Ok(Verdict::rejected(
                AuthFailure::UserNotFound,
                Some(INVALID_REFRESH_TOKEN),
            ))
        }
    };

    let access_token = token_service.issue(user.id, TokenKind::Access)?;

    tracing::info!(user_id = %user.id, "Access token refreshed");

    Ok(Verdict::refreshed(user.id, access_token))
}
