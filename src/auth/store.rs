/// Credential Store
///
/// Read/write access to user credential records and the refresh-token
/// revocation list. The session flow only needs `find_by_id` and
/// `is_refresh_token_revoked`; the auth routes and the purge task use
/// the rest.
///
/// Revoked refresh tokens are stored as SHA-256 hashes, never in plaintext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::models::{NewUser, User};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if the email is taken
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;

    /// Returns false when no such user existed
    async fn delete(&self, user_id: Uuid) -> Result<bool, AppError>;

    async fn revoke_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn is_refresh_token_revoked(&self, token: &str) -> Result<bool, AppError>;

    /// Drop revocation entries whose token has expired anyway
    ///
    /// Returns how many entries were removed.
    async fn purge_expired_revocations(&self) -> Result<u64, AppError>;
}

/// Purge expired revocations now and then every `every`, for the life of
/// the process. Failures are logged and retried on the next tick.
pub fn spawn_revocation_purge(store: Arc<dyn CredentialStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match store.purge_expired_revocations().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired refresh token revocations"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired revocations"),
            }
        }
    })
}

/// Hash a refresh token using SHA-256
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) const USER_COLUMNS: &str = "id, email, firstname, lastname, age, city, level, experience, \
                            is_admin, password_hash, created_at, updated_at";

/// Postgres-backed store
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, firstname, lastname, age, city, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(user.age)
        .bind(&user.city)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_refresh_tokens (token_hash, user_id, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(hash_token(token))
        .bind(user_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_refresh_token_revoked(&self, token: &str) -> Result<bool, AppError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM revoked_refresh_tokens WHERE token_hash = $1)",
        )
        .bind(hash_token(token))
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn purge_expired_revocations(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM revoked_refresh_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory store for tests and database-less local runs
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
    /// Token hash to the token's own expiry
    revoked: RwLock<HashMap<String, DateTime<Utc>>>,
    lookups: AtomicUsize,
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("credential store lock poisoned".to_string())
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_by_id` calls served so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.values().any(|u| u.email == user.email) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Resource already exists".to_string(),
            )
            .into());
        }

        let user = user.into_user(Uuid::new_v4());
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool, AppError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.remove(&user_id).is_some())
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        _user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut revoked = self.revoked.write().map_err(poisoned)?;
        revoked.entry(hash_token(token)).or_insert(expires_at);
        Ok(())
    }

    async fn is_refresh_token_revoked(&self, token: &str) -> Result<bool, AppError> {
        let revoked = self.revoked.read().map_err(poisoned)?;
        Ok(revoked.contains_key(&hash_token(token)))
    }

    async fn purge_expired_revocations(&self) -> Result<u64, AppError> {
        let mut revoked = self.revoked.write().map_err(poisoned)?;
        let before = revoked.len();
        let now = Utc::now();
        revoked.retain(|_, expires_at| *expires_at >= now);
        Ok((before - revoked.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            firstname: "Alice".to_string(),
            lastname: "Martin".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            age: None,
            city: None,
        }
    }

    #[test]
    fn test_token_hashing() {
        let hash1 = hash_token("some.refresh.token");
        let hash2 = hash_token("some.refresh.token");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, "some.refresh.token");
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token("other.refresh.token"));
    }

    #[tokio::test]
    async fn test_in_memory_insert_and_find() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert(new_user("alice@example.com")).await.unwrap();

        let by_id = store.find_by_id(user.id).await.unwrap().unwrap();
        let by_email = store.find_by_email("alice@example.com").await.unwrap().unwrap();

        assert_eq!(by_id.id, user.id);
        assert_eq!(by_email.id, user.id);
        assert_eq!(store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_email() {
        let store = InMemoryCredentialStore::new();
        store.insert(new_user("alice@example.com")).await.unwrap();

        let result = store.insert(new_user("alice@example.com")).await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_delete() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert(new_user("alice@example.com")).await.unwrap();

        assert!(store.delete(user.id).await.unwrap());
        assert!(!store.delete(user.id).await.unwrap());
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_revocation() {
        let store = InMemoryCredentialStore::new();

        assert!(!store.is_refresh_token_revoked("token-a").await.unwrap());
        store
            .revoke_refresh_token("token-a", Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        assert!(store.is_refresh_token_revoked("token-a").await.unwrap());
        assert!(!store.is_refresh_token_revoked("token-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_purge_keeps_live_revocations() {
        let store = InMemoryCredentialStore::new();
        let user_id = Uuid::new_v4();
        store
            .revoke_refresh_token("stale", user_id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        store
            .revoke_refresh_token("live", user_id, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.purge_expired_revocations().await.unwrap(), 1);
        assert!(!store.is_refresh_token_revoked("stale").await.unwrap());
        assert!(store.is_refresh_token_revoked("live").await.unwrap());
        assert_eq!(store.purge_expired_revocations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_task_runs_repeatedly() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let handle = spawn_revocation_purge(store.clone(), Duration::from_millis(20));

        // Revoked after the first tick, so only a later run can remove it
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .revoke_refresh_token("stale", Uuid::new_v4(), Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(store.is_refresh_token_revoked("stale").await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(!store.is_refresh_token_revoked("stale").await.unwrap());
    }
}
