/// Authentication module
///
/// Token issuing/verification, the session refresh flow, password hashing,
/// session cookies and the credential store.

mod claims;
pub mod cookies;
mod password;
mod session;
mod store;
mod tokens;

pub use claims::{Claims, TokenKind};
pub use password::{hash_password, validate_password_strength, verify_against_dummy, verify_password};
pub use session::{verify_and_refresh, AuthFailure, SessionTokens, Verdict};
pub use store::{spawn_revocation_purge, CredentialStore, InMemoryCredentialStore, PgCredentialStore};
pub(crate) use store::USER_COLUMNS;
pub use tokens::{TokenError, TokenService};

/// Identity injected into request extensions by the access gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
}
