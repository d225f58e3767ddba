//! `SQLite` implementation of [`LeaseStore`].
//!
//! Acquisition is a single upsert whose update only applies to an expired
//! row, so two nodes racing for the same key cannot both succeed.

use std::str::FromStr;

use sqlx::SqlitePool;

use keyward_app::ports::LeaseStore;
use keyward_domain::error::KeywardError;
use keyward_domain::id::LeaseToken;
use keyward_domain::lease::Lease;
use keyward_domain::time::Timestamp;

use crate::codec::{from_millis, to_millis};
use crate::error::{StorageError, decode_err};

/// Lease table shared by every node connected to the same database.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    /// Keep leases in the `leases` table of `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete every lease that expired before `now`. Returns how many rows
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rows cannot be deleted.
    pub async fn prune_expired(&self, now: Timestamp) -> Result<u64, KeywardError> {
        let result = sqlx::query("DELETE FROM leases WHERE expires_at < ?")
            .bind(to_millis(now))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}

impl LeaseStore for SqliteLeaseStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Result<Option<Lease>, KeywardError> {
        let token = LeaseToken::new();
        let result = sqlx::query(
            "INSERT INTO leases (key, holder_id, token, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET holder_id = excluded.holder_id, token = excluded.token, expires_at = excluded.expires_at \
             WHERE leases.expires_at <= ?",
        )
        .bind(key)
        .bind(holder_id)
        .bind(token.to_string())
        .bind(to_millis(expires_at))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(Lease {
            key: key.to_string(),
            holder_id: holder_id.to_string(),
            token,
            expires_at,
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool, KeywardError> {
        let result = sqlx::query("DELETE FROM leases WHERE key = ? AND token = ?")
            .bind(&lease.key)
            .bind(lease.token.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn current(&self, key: &str, now: Timestamp) -> Result<Option<Lease>, KeywardError> {
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT holder_id, token, expires_at FROM leases WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let Some((holder_id, token, expires_at)) = row else {
            return Ok(None);
        };
        let token = LeaseToken::from_str(&token)
            .map_err(decode_err)
            .map_err(StorageError::from)?;
        let expires_at = from_millis(expires_at).map_err(StorageError::from)?;
        Ok(Some(Lease {
            key: key.to_string(),
            holder_id,
            token,
            expires_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keyward_domain::time::{add_duration, now};

    use super::*;
    use crate::pool::Config;

    const TTL: Duration = Duration::from_secs(30);

    async fn setup() -> SqliteLeaseStore {
        let db = Config::new("sqlite::memory:").build().await.unwrap();
        SqliteLeaseStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn should_grant_lease_to_a_single_holder() {
        let store = setup().await;
        let at = now();

        let first = store
            .try_acquire("job", "node-1", at, add_duration(at, TTL))
            .await
            .unwrap();
        let second = store
            .try_acquire("job", "node-2", at, add_duration(at, TTL))
            .await
            .unwrap();

        assert_eq!(first.unwrap().holder_id, "node-1");
        assert!(second.is_none());
        assert_eq!(
            store.current("job", at).await.unwrap().unwrap().holder_id,
            "node-1"
        );
    }

    #[tokio::test]
    async fn should_take_over_expired_lease() {
        let store = setup().await;
        let at = now();
        let stale = store
            .try_acquire("job", "node-1", at, add_duration(at, TTL))
            .await
            .unwrap()
            .unwrap();

        let later = add_duration(at, TTL);
        let fresh = store
            .try_acquire("job", "node-2", later, add_duration(later, TTL))
            .await
            .unwrap()
            .unwrap();

        assert_ne!(stale.token, fresh.token);
        assert!(!store.release(&stale).await.unwrap());
        assert!(store.release(&fresh).await.unwrap());
        assert!(store.current("job", later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_allow_reacquire_after_release() {
        let store = setup().await;
        let at = now();
        let lease = store
            .try_acquire("job", "node-1", at, add_duration(at, TTL))
            .await
            .unwrap()
            .unwrap();
        store.release(&lease).await.unwrap();

        let again = store
            .try_acquire("job", "node-2", at, add_duration(at, TTL))
            .await
            .unwrap();

        assert!(again.is_some());
    }

    #[tokio::test]
    async fn should_prune_only_expired_leases() {
        let store = setup().await;
        let at = now();
        store
            .try_acquire("stale", "node-1", at, add_duration(at, Duration::from_secs(1)))
            .await
            .unwrap();
        store
            .try_acquire("live", "node-1", at, add_duration(at, TTL))
            .await
            .unwrap();

        let later = add_duration(at, Duration::from_secs(5));
        let removed = store.prune_expired(later).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(
            store.current("live", later).await.unwrap().unwrap().holder_id,
            "node-1"
        );
        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leases")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
