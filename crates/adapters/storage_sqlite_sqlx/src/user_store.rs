//! `SQLite` implementation of [`UserStore`].
//!
//! Users are stored as one JSON document per row; only the id, the unique
//! username and the write version are columns. Updates only apply on top of
//! the version they were read at.

use sqlx::SqlitePool;

use keyward_app::ports::UserStore;
use keyward_domain::error::{ConflictError, KeywardError, NotFoundError};
use keyward_domain::user::User;

use crate::error::StorageError;

fn decode_user(data: &str, version: i64) -> Result<User, KeywardError> {
    let mut user: User = serde_json::from_str(data).map_err(StorageError::from)?;
    user.version = u64::try_from(version).unwrap_or_default();
    Ok(user)
}

/// `SQLite`-backed user store.
#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    /// Store users in the `users` table of `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, query: &'static str, value: &str) -> Result<Option<User>, KeywardError> {
        let row: Option<(String, i64)> = sqlx::query_as(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.map(|(data, version)| decode_user(&data, version))
            .transpose()
    }
}

impl UserStore for SqliteUserStore {
    async fn create(&self, user: User) -> Result<User, KeywardError> {
        let data = serde_json::to_string(&user).map_err(StorageError::from)?;
        sqlx::query("INSERT INTO users (id, username, data) VALUES (?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<User>, KeywardError> {
        self.fetch("SELECT data, version FROM users WHERE id = ?", id).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, KeywardError> {
        self.fetch("SELECT data, version FROM users WHERE username = ?", username)
            .await
    }

    async fn update(&self, mut user: User) -> Result<User, KeywardError> {
        let data = serde_json::to_string(&user).map_err(StorageError::from)?;
        let version = i64::try_from(user.version).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE users SET username = ?, data = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(&user.username)
        .bind(&data)
        .bind(&user.id)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        if result.rows_affected() > 0 {
            user.version += 1;
            return Ok(user);
        }
        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM users WHERE id = ?")
            .bind(&user.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let entity = "User";
        let id = user.id;
        Err(match exists {
            Some(_) => ConflictError { entity, id }.into(),
            None => NotFoundError { entity, id }.into(),
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, KeywardError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_page(&self, after: Option<&str>, limit: usize) -> Result<Vec<User>, KeywardError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT data, version FROM users WHERE id > ? ORDER BY id LIMIT ?")
                .bind(after.unwrap_or_default())
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?;
        rows.into_iter()
            .map(|(data, version)| decode_user(&data, version))
            .collect()
    }
}
