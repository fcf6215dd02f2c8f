use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, email, password_hash, level, full_name, profile_image, \
     is_verified, last_login_at, created_at, updated_at, deleted_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email is already taken by a live account")]
    UniqueViolation,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation,
            _ => StoreError::Database(err),
        }
    }
}

/// Entry point to the `users` relation. Every read and write goes through a
/// transaction handle obtained from [`UserStore::begin`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError>;
}

/// An open transaction over `users`.
///
/// Dropping the handle without calling [`UserTx::commit`] rolls back every
/// write made through it.
#[async_trait]
pub trait UserTx: Send {
    /// First live (not soft-deleted) user with exactly this email.
    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;

    /// Insert a user and return the persisted row.
    async fn create(&mut self, user: NewUser) -> Result<User, StoreError>;

    /// Stamp `last_login_at` with the current time.
    async fn update_last_login(&mut self, user_id: Uuid) -> Result<User, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUserTx { tx }))
    }
}

pub struct PgUserTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UserTx for PgUserTx {
    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(user)
    }

    async fn create(&mut self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash, level, full_name, profile_image, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.level)
            .bind(&user.full_name)
            .bind(&user.profile_image)
            .bind(user.is_verified)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(created)
    }

    async fn update_last_login(&mut self, user_id: Uuid) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET last_login_at = now(), updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_a_plain_database_error() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn store_error_messages_do_not_mention_sql() {
        assert_eq!(
            StoreError::UniqueViolation.to_string(),
            "email is already taken by a live account"
        );
        assert_eq!(StoreError::NotFound.to_string(), "user not found");
    }
}
