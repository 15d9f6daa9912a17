use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("nickname already taken")]
    DuplicateNickname,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for user records. Injected into the auth service so
/// tests can substitute an in-memory fake.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn create(
        &self,
        email: &str,
        nickname: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;

    async fn update_refresh_token_hash(&self, id: i64, hash: &str) -> Result<(), StoreError>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, nickname, password_hash, refresh_token_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, nickname, password_hash, refresh_token_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(
        &self,
        email: &str,
        nickname: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, nickname, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, nickname, password_hash, refresh_token_hash, created_at
            "#,
        )
        .bind(email)
        .bind(nickname)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            // Two registrations can race past the service-level lookup; the
            // unique constraints are authoritative.
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    if db_err.constraint() == Some("users_email_key") {
                        return StoreError::DuplicateEmail;
                    }
                    if db_err.constraint() == Some("users_nickname_key") {
                        return StoreError::DuplicateNickname;
                    }
                }
            }
            StoreError::Database(e)
        })?;
        Ok(user)
    }

    async fn update_refresh_token_hash(&self, id: i64, hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
