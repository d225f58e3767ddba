//! Cluster notification channel backed by a shared `SQLite` table.
//!
//! Senders append messages; every node polls for rows newer than the last
//! one it saw and forwards them to its [`InProcessClusterBus`]. Rows older
//! than the retention window and expired leases are pruned while polling.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use keyward_app::cluster_bus::InProcessClusterBus;
use keyward_app::ports::ClusterNotifier;
use keyward_domain::cluster::ClusterMessage;
use keyward_domain::error::KeywardError;
use keyward_domain::time::{Timestamp, now};

use crate::codec::to_millis;
use crate::error::StorageError;
use crate::lease_store::SqliteLeaseStore;

/// Appends [`ClusterMessage`]s to the shared table.
#[derive(Clone)]
pub struct SqliteClusterNotifier {
    pool: SqlitePool,
}

impl SqliteClusterNotifier {
    /// Append messages to the `cluster_messages` table of `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ClusterNotifier for SqliteClusterNotifier {
    async fn notify(&self, message: ClusterMessage) -> Result<(), KeywardError> {
        let payload = serde_json::to_string(&message.event).map_err(StorageError::from)?;
        sqlx::query("INSERT INTO cluster_messages (origin, payload, created_at) VALUES (?, ?, ?)")
            .bind(&message.origin)
            .bind(&payload)
            .bind(to_millis(now()))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

/// Reads the shared table from a cursor.
pub struct ClusterPoller {
    pool: SqlitePool,
    last_seq: i64,
}

impl ClusterPoller {
    /// Start after the newest stored message: earlier changes are already
    /// reflected in the configuration this node loads at startup.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table cannot be read.
    pub async fn start(pool: SqlitePool) -> Result<Self, KeywardError> {
        let (last_seq,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM cluster_messages")
                .fetch_one(&pool)
                .await
                .map_err(StorageError::from)?;
        Ok(Self { pool, last_seq })
    }

    /// Messages appended since the previous call, oldest first.
    ///
    /// Rows that cannot be decoded are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table cannot be read.
    pub async fn poll(&mut self) -> Result<Vec<ClusterMessage>, KeywardError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT seq, origin, payload FROM cluster_messages WHERE seq > ? ORDER BY seq",
        )
        .bind(self.last_seq)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let mut messages = Vec::with_capacity(rows.len());
        for (seq, origin, payload) in rows {
            self.last_seq = seq;
            match serde_json::from_str(&payload) {
                Ok(event) => messages.push(ClusterMessage { origin, event }),
                Err(err) => tracing::warn!(seq, error = %err, "skipping undecodable cluster message"),
            }
        }
        Ok(messages)
    }

    /// Delete messages created before `before`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rows cannot be deleted.
    pub async fn prune(&self, before: Timestamp) -> Result<u64, KeywardError> {
        let result = sqlx::query("DELETE FROM cluster_messages WHERE created_at < ?")
            .bind(to_millis(before))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}

/// Forward every polled message to `bus` every `interval`, pruning rows
/// older than `retention` and expired leases, until the returned task is
/// aborted.
pub fn spawn_poller(
    mut poller: ClusterPoller,
    bus: InProcessClusterBus,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    let leases = SqliteLeaseStore::new(poller.pool.clone());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match poller.poll().await {
                Ok(messages) => {
                    for message in messages {
                        bus.forward(message);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to poll cluster messages"),
            }
            let cutoff = now() - chrono::TimeDelta::from_std(retention).unwrap_or_default();
            if let Err(err) = poller.prune(cutoff).await {
                tracing::warn!(error = %err, "failed to prune cluster messages");
            }
            match leases.prune_expired(now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "pruned expired leases"),
                Err(err) => tracing::warn!(error = %err, "failed to prune expired leases"),
            }
        }
    })
}
