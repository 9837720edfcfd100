use chrono::{Duration, Utc};
use gatekeeper_api::{
    ApiError,
    models::RefreshTokenRecord,
    repository::{InMemoryRepository, PostgresRepository, Repository},
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

// --- Test Context and Setup ---

/// Holds the pool for the Postgres-backed tests. Those are `#[ignore]`d by default;
/// run them with `DATABASE_URL` set and `--ignored`.
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        PostgresRepository::new(pool.clone())
            .ensure_schema()
            .await
            .expect("Failed to create schema.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

fn record_for(subject: Uuid) -> RefreshTokenRecord {
    let issued_at = Utc::now();
    RefreshTokenRecord {
        id: Uuid::new_v4(),
        subject,
        issued_at,
        expires_at: issued_at + Duration::days(30),
        revoked_at: None,
    }
}

/// Shared contract checks, run against both implementations.
async fn check_rotation_contract(repo: &dyn Repository, subject: Uuid) {
    let original = record_for(subject);
    repo.store_refresh_token(original.clone()).await.unwrap();

    let first = record_for(subject);
    assert!(repo.rotate_refresh_token(original.id, first.clone()).await.unwrap());

    let old = repo.lookup_refresh_token(original.id).await.unwrap().unwrap();
    assert!(!old.is_active());
    let new = repo.lookup_refresh_token(first.id).await.unwrap().unwrap();
    assert!(new.is_active());

    // Rotating the old id again must not store anything.
    let second = record_for(subject);
    assert!(!repo.rotate_refresh_token(original.id, second.clone()).await.unwrap());
    assert!(repo.lookup_refresh_token(second.id).await.unwrap().is_none());

    // Invalidation deletes active records and leaves rotated ones in place.
    assert!(repo.invalidate_refresh_token(first.id).await.unwrap());
    assert!(repo.lookup_refresh_token(first.id).await.unwrap().is_none());
    assert!(!repo.invalidate_refresh_token(first.id).await.unwrap());
    assert!(!repo.invalidate_refresh_token(original.id).await.unwrap());
    assert!(repo.lookup_refresh_token(original.id).await.unwrap().is_some());
    assert!(!repo.invalidate_refresh_token(Uuid::new_v4()).await.unwrap());
}

async fn check_purge_contract(repo: &dyn Repository, subject: Uuid) {
    let now = Utc::now();
    let mut expired = record_for(subject);
    expired.expires_at = now - Duration::seconds(1);
    let live = record_for(subject);
    repo.store_refresh_token(expired.clone()).await.unwrap();
    repo.store_refresh_token(live.clone()).await.unwrap();

    assert!(repo.purge_expired_refresh_tokens(now).await.unwrap() >= 1);
    assert!(repo.lookup_refresh_token(expired.id).await.unwrap().is_none());
    assert!(repo.lookup_refresh_token(live.id).await.unwrap().is_some());
}

// --- In-Memory Repository ---

#[tokio::test]
async fn test_in_memory_rotation_contract() {
    let repo = InMemoryRepository::new();
    let user = repo
        .create_user("rotation@test.com", "hash", "user")
        .await
        .unwrap();
    check_rotation_contract(&repo, user.id).await;
}

#[tokio::test]
async fn test_in_memory_purge_contract() {
    let repo = InMemoryRepository::new();
    check_purge_contract(&repo, Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_in_memory_users() {
    let repo = InMemoryRepository::new();
    let user = repo.create_user("a@test.com", "hash-a", "admin").await.unwrap();

    assert!(repo.get_user(user.id).await.unwrap().unwrap().is_admin());
    let credentials = repo.find_user_by_email("a@test.com").await.unwrap().unwrap();
    assert_eq!(credentials.password_hash, "hash-a");
    assert!(repo.find_user_by_email("b@test.com").await.unwrap().is_none());

    let duplicate = repo.create_user("a@test.com", "hash", "user").await;
    assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
}

#[tokio::test]
async fn test_in_memory_concurrent_rotation_single_winner() {
    let repo = Arc::new(InMemoryRepository::new());
    let original = record_for(Uuid::new_v4());
    repo.store_refresh_token(original.clone()).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let repo = repo.clone();
            let (old_id, subject) = (original.id, original.subject);
            tokio::spawn(async move {
                repo.rotate_refresh_token(old_id, record_for(subject))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

// --- Postgres Repository ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_rotation_contract() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let email = format!("rotation-{}@test.com", Uuid::new_v4());
    let user = repo.create_user(&email, "hash", "user").await.unwrap();

    check_rotation_contract(&repo, user.id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_purge_contract() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let email = format!("purge-{}@test.com", Uuid::new_v4());
    let user = repo.create_user(&email, "hash", "user").await.unwrap();

    check_purge_contract(&repo, user.id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_duplicate_email_is_conflict() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let email = format!("dup-{}@test.com", Uuid::new_v4());

    let user = repo.create_user(&email, "hash", "user").await.unwrap();
    assert_eq!(repo.get_user(user.id).await.unwrap().unwrap().email, email);

    let duplicate = repo.create_user(&email, "hash", "user").await;
    assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
}
