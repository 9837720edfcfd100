use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{RefreshTokenRecord, User, UserCredentials};

/// Repository Trait
///
/// The persistence contract consumed by the token service, the router's admin check
/// and the auth handlers. Implementations must make `rotate_refresh_token` atomic:
/// two concurrent rotations of the same token id may not both succeed.
///
/// **Send + Sync + async_trait** so the trait object can be shared across tokio tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>, ApiError>;
    /// Fails with `ApiError::Conflict` when the email is already registered.
    async fn create_user(&self, email: &str, password_hash: &str, role: &str)
    -> Result<User, ApiError>;

    // --- Refresh Tokens ---
    async fn store_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), ApiError>;
    /// Deletes an active token (logout). Returns false if the id was unknown or
    /// already rotated; rotated records stay until they expire so reuse is detectable.
    async fn invalidate_refresh_token(&self, id: Uuid) -> Result<bool, ApiError>;
    async fn lookup_refresh_token(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, ApiError>;
    /// Invalidates `old_id` and stores `replacement` as one transaction.
    /// Returns false, storing nothing, if `old_id` is not an active token.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, ApiError>;
    /// Deletes every record, active or rotated, whose `expires_at` is not after `now`.
    /// Returns the number of records removed.
    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, ApiError>;
}

/// RepositoryState
///
/// The shared handle injected into `AppState` and the token service.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// `Repository` backed by a PostgreSQL connection pool owned by the process bootstrap.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ensure_schema
    ///
    /// Creates the two tables this service needs if they are missing.
    /// Local development convenience; production schemas are managed outside the service.
    pub async fn ensure_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'user',
                password_hash TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS refresh_tokens (
                id UUID PRIMARY KEY,
                subject UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                issued_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked_at TIMESTAMPTZ
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS refresh_tokens_expires_at_idx ON refresh_tokens (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("database schema verified");
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>("SELECT id, email, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>, ApiError> {
        let credentials = sqlx::query_as::<_, UserCredentials>(
            "SELECT id, email, role, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, ApiError> {
        let result = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, email, role, password_hash)
               VALUES ($1, $2, $3, $4)
               RETURNING id, email, role"#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(role)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                ApiError::Conflict(format!("A user with email '{}' already exists", email)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), ApiError> {
        sqlx::query(
            r#"INSERT INTO refresh_tokens (id, subject, issued_at, expires_at, revoked_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(record.id)
        .bind(record.subject)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate_refresh_token(&self, id: Uuid) -> Result<bool, ApiError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE id = $1 AND revoked_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lookup_refresh_token(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, ApiError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"SELECT id, subject, issued_at, expires_at, revoked_at
               FROM refresh_tokens WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// rotate_refresh_token
    ///
    /// The conditional UPDATE takes the row lock, so of two racing rotations only one
    /// sees `rows_affected == 1`; the loser rolls back without inserting.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, ApiError> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(old_id)
        .bind(replacement.issued_at)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO refresh_tokens (id, subject, issued_at, expires_at, revoked_at)
               VALUES ($1, $2, $3, $4, NULL)"#,
        )
        .bind(replacement.id)
        .bind(replacement.subject)
        .bind(replacement.issued_at)
        .bind(replacement.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// InMemoryRepository
///
/// A process-local `Repository` used by the test suite and by local runs without a
/// `DATABASE_URL`. Each operation holds the lock for its whole body, which makes
/// rotation atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    users: Mutex<HashMap<Uuid, UserCredentials>>,
    refresh_tokens: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user directly. Intended for tests and local fixtures.
    pub fn insert_user(&self, user: User, password_hash: impl Into<String>) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(
                user.id,
                UserCredentials {
                    user,
                    password_hash: password_hash.into(),
                },
            );
        }
    }

    fn users(&self) -> Result<MutexGuard<'_, HashMap<Uuid, UserCredentials>>, ApiError> {
        self.users
            .lock()
            .map_err(|_| ApiError::Database("user table lock poisoned".to_string()))
    }

    fn tokens(&self) -> Result<MutexGuard<'_, HashMap<Uuid, RefreshTokenRecord>>, ApiError> {
        self.refresh_tokens
            .lock()
            .map_err(|_| ApiError::Database("refresh token table lock poisoned".to_string()))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        Ok(self.users()?.get(&id).map(|c| c.user.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>, ApiError> {
        Ok(self
            .users()?
            .values()
            .find(|c| c.user.email == email)
            .cloned())
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, ApiError> {
        let mut users = self.users()?;
        if users.values().any(|c| c.user.email == email) {
            return Err(ApiError::Conflict(format!(
                "A user with email '{}' already exists",
                email
            )));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
        };
        users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(user)
    }

    async fn store_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), ApiError> {
        self.tokens()?.insert(record.id, record);
        Ok(())
    }

    async fn invalidate_refresh_token(&self, id: Uuid) -> Result<bool, ApiError> {
        let mut tokens = self.tokens()?;
        match tokens.get(&id) {
            Some(record) if record.is_active() => {
                tokens.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lookup_refresh_token(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, ApiError> {
        Ok(self.tokens()?.get(&id).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, ApiError> {
        let mut tokens = self.tokens()?;
        match tokens.get_mut(&old_id) {
            Some(record) if record.is_active() => {
                record.revoked_at = Some(replacement.issued_at);
            }
            _ => return Ok(false),
        }
        tokens.insert(replacement.id, replacement);
        Ok(true)
    }

    async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let mut tokens = self.tokens()?;
        let before = tokens.len();
        tokens.retain(|_, record| record.expires_at > now);
        Ok((before - tokens.len()) as u64)
    }
}
