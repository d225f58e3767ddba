//! `SQLite` implementation of [`ScheduledStepStore`].

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use keyward_app::ports::ScheduledStepStore;
use keyward_domain::error::KeywardError;
use keyward_domain::id::{AutomationId, StepId};
use keyward_domain::schedule::ScheduledStep;
use keyward_domain::time::Timestamp;

use crate::codec::{from_millis, to_millis};
use crate::error::{StorageError, decode_err};

struct Wrapper(ScheduledStep);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let automation_id: String = row.try_get("automation_id")?;
        let step_id: String = row.try_get("step_id")?;
        Ok(Self(ScheduledStep {
            key: row.try_get("key")?,
            automation_id: AutomationId::from_str(&automation_id).map_err(decode_err)?,
            step_id: StepId::from_str(&step_id).map_err(decode_err)?,
            resource_id: row.try_get("resource_id")?,
            triggered_at: from_millis(row.try_get("triggered_at")?)?,
            due_at: from_millis(row.try_get("due_at")?)?,
        }))
    }
}

fn unwrap_all(rows: Vec<Wrapper>) -> Vec<ScheduledStep> {
    rows.into_iter().map(|w| w.0).collect()
}

/// `SQLite`-backed store of pending delayed steps.
#[derive(Clone)]
pub struct SqliteScheduledStepStore {
    pool: SqlitePool,
}

impl SqliteScheduledStepStore {
    /// Persist steps and activation records in `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ScheduledStepStore for SqliteScheduledStepStore {
    async fn upsert(&self, step: ScheduledStep) -> Result<ScheduledStep, KeywardError> {
        sqlx::query(
            "INSERT INTO scheduled_steps (key, automation_id, step_id, resource_id, triggered_at, due_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET triggered_at = excluded.triggered_at, due_at = excluded.due_at",
        )
        .bind(&step.key)
        .bind(step.automation_id.to_string())
        .bind(step.step_id.to_string())
        .bind(&step.resource_id)
        .bind(to_millis(step.triggered_at))
        .bind(to_millis(step.due_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(step)
    }

    async fn get(&self, key: &str) -> Result<Option<ScheduledStep>, KeywardError> {
        let row: Option<Wrapper> = sqlx::query_as("SELECT * FROM scheduled_steps WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(|w| w.0))
    }

    async fn delete(&self, key: &str) -> Result<bool, KeywardError> {
        let result = sqlx::query("DELETE FROM scheduled_steps WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_due(&self, now: Timestamp) -> Result<Vec<ScheduledStep>, KeywardError> {
        let rows: Vec<Wrapper> = sqlx::query_as(
            "SELECT * FROM scheduled_steps WHERE due_at <= ? ORDER BY due_at, key",
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(unwrap_all(rows))
    }

    async fn get_all(&self) -> Result<Vec<ScheduledStep>, KeywardError> {
        let rows: Vec<Wrapper> = sqlx::query_as("SELECT * FROM scheduled_steps ORDER BY due_at, key")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(unwrap_all(rows))
    }

    async fn get_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> Result<Vec<ScheduledStep>, KeywardError> {
        let rows: Vec<Wrapper> = sqlx::query_as(
            "SELECT * FROM scheduled_steps WHERE automation_id = ? ORDER BY due_at, key",
        )
        .bind(automation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(unwrap_all(rows))
    }

    async fn delete_by_automation(&self, automation_id: AutomationId) -> Result<u64, KeywardError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let result = sqlx::query("DELETE FROM scheduled_steps WHERE automation_id = ?")
            .bind(automation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        sqlx::query("DELETE FROM automation_activations WHERE automation_id = ?")
            .bind(automation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    async fn mark_activated(
        &self,
        automation_id: AutomationId,
        resource_id: &str,
        at: Timestamp,
    ) -> Result<bool, KeywardError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO automation_activations (automation_id, resource_id, activated_at) VALUES (?, ?, ?)",
        )
        .bind(automation_id.to_string())
        .bind(resource_id)
        .bind(to_millis(at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keyward_domain::time::{add_duration, now};

    use super::*;
    use crate::pool::Config;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    async fn setup() -> SqliteScheduledStepStore {
        let db = Config::new("sqlite::memory:").build().await.unwrap();
        SqliteScheduledStepStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn should_replace_pending_step_with_same_key() {
        let store = setup().await;
        let automation_id = AutomationId::new();
        let step_id = StepId::new();
        let first = ScheduledStep::new(automation_id, step_id, "u-1", now(), DAY);
        let retriggered =
            ScheduledStep::new(automation_id, step_id, "u-1", add_duration(now(), DAY), DAY);
        assert_eq!(first.key, retriggered.key);

        store.upsert(first).await.unwrap();
        store.upsert(retriggered.clone()).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].due_at.timestamp_millis(), retriggered.due_at.timestamp_millis());
    }

    #[tokio::test]
    async fn should_return_only_due_steps_oldest_first() {
        let store = setup().await;
        let automation_id = AutomationId::new();
        let at = now();
        let late = ScheduledStep::new(automation_id, StepId::new(), "u-1", at, DAY);
        let soon = ScheduledStep::new(automation_id, StepId::new(), "u-2", at, Duration::from_secs(60));
        let early = ScheduledStep::new(automation_id, StepId::new(), "u-3", at, Duration::ZERO);
        for step in [late, soon.clone(), early.clone()] {
            store.upsert(step).await.unwrap();
        }

        let due = store
            .get_due(add_duration(at, Duration::from_secs(120)))
            .await
            .unwrap();

        let keys: Vec<String> = due.into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![early.key, soon.key]);
    }

    #[tokio::test]
    async fn should_delete_steps_of_one_automation() {
        let store = setup().await;
        let kept = AutomationId::new();
        let dropped = AutomationId::new();
        store
            .upsert(ScheduledStep::new(kept, StepId::new(), "u-1", now(), DAY))
            .await
            .unwrap();
        for resource in ["u-1", "u-2"] {
            store
                .upsert(ScheduledStep::new(dropped, StepId::new(), resource, now(), DAY))
                .await
                .unwrap();
        }

        assert_eq!(store.delete_by_automation(dropped).await.unwrap(), 2);
        assert!(store.get_by_automation(dropped).await.unwrap().is_empty());
        assert_eq!(store.get_by_automation(kept).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_mark_activation_once_until_automation_is_deleted() {
        let store = setup().await;
        let automation_id = AutomationId::new();

        assert!(store.mark_activated(automation_id, "u-1", now()).await.unwrap());
        assert!(!store.mark_activated(automation_id, "u-1", now()).await.unwrap());
        assert!(store.mark_activated(automation_id, "u-2", now()).await.unwrap());
        assert!(store.mark_activated(AutomationId::new(), "u-1", now()).await.unwrap());

        store.delete_by_automation(automation_id).await.unwrap();
        assert!(store.mark_activated(automation_id, "u-1", now()).await.unwrap());
    }

    #[tokio::test]
    async fn should_report_whether_a_step_was_deleted() {
        let store = setup().await;
        let step = ScheduledStep::new(AutomationId::new(), StepId::new(), "u-1", now(), DAY);
        store.upsert(step.clone()).await.unwrap();

        assert!(store.delete(&step.key).await.unwrap());
        assert!(!store.delete(&step.key).await.unwrap());
        assert!(store.get(&step.key).await.unwrap().is_none());
    }
}
