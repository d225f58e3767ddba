//! `SQLite` implementation of [`AutomationRepository`].

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use keyward_app::ports::AutomationRepository;
use keyward_domain::automation::{
    AutomationDefinition, ConditionExpr, ScheduleSpec, StepDefinition, TriggerSpec,
};
use keyward_domain::error::KeywardError;
use keyward_domain::id::AutomationId;

use crate::error::{StorageError, decode_err};

struct Wrapper(AutomationDefinition);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<AutomationDefinition> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let enabled: bool = row.try_get("enabled")?;
        let trigger_json: String = row.try_get("trigger_spec")?;
        let steps_json: String = row.try_get("steps")?;
        let conditions_json: Option<String> = row.try_get("conditions")?;
        let schedule_json: Option<String> = row.try_get("schedule")?;

        let id = AutomationId::from_str(&id).map_err(decode_err)?;
        let trigger: TriggerSpec = serde_json::from_str(&trigger_json).map_err(decode_err)?;
        let steps: Vec<StepDefinition> = serde_json::from_str(&steps_json).map_err(decode_err)?;
        let conditions: Option<ConditionExpr> = conditions_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(decode_err)?;
        let schedule: Option<ScheduleSpec> = schedule_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(decode_err)?;

        Ok(Self(AutomationDefinition {
            id,
            name,
            enabled,
            trigger,
            conditions,
            schedule,
            steps,
        }))
    }
}

/// JSON columns of the optional parts of an automation.
fn optional_columns(
    automation: &AutomationDefinition,
) -> Result<(Option<String>, Option<String>), StorageError> {
    let conditions = automation
        .conditions
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let schedule = automation
        .schedule
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok((conditions, schedule))
}

/// `SQLite`-backed automation repository.
#[derive(Clone)]
pub struct SqliteAutomationRepository {
    pool: SqlitePool,
}

impl SqliteAutomationRepository {
    /// Create a new repository backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AutomationRepository for SqliteAutomationRepository {
    async fn create(
        &self,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition, KeywardError> {
        let trigger_json =
            serde_json::to_string(&automation.trigger).map_err(StorageError::from)?;
        let steps_json = serde_json::to_string(&automation.steps).map_err(StorageError::from)?;
        let (conditions_json, schedule_json) = optional_columns(&automation)?;

        sqlx::query(
            "INSERT INTO automations (id, name, enabled, trigger_spec, steps, conditions, schedule) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(automation.id.to_string())
        .bind(&automation.name)
        .bind(automation.enabled)
        .bind(&trigger_json)
        .bind(&steps_json)
        .bind(&conditions_json)
        .bind(&schedule_json)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(automation)
    }

    async fn get_by_id(
        &self,
        id: AutomationId,
    ) -> Result<Option<AutomationDefinition>, KeywardError> {
        let row: Option<Wrapper> = sqlx::query_as("SELECT * FROM automations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn get_all(&self) -> Result<Vec<AutomationDefinition>, KeywardError> {
        let rows: Vec<Wrapper> = sqlx::query_as("SELECT * FROM automations ORDER BY name, id")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn get_enabled(&self) -> Result<Vec<AutomationDefinition>, KeywardError> {
        let rows: Vec<Wrapper> =
            sqlx::query_as("SELECT * FROM automations WHERE enabled = 1 ORDER BY name, id")
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn update(
        &self,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition, KeywardError> {
        let trigger_json =
            serde_json::to_string(&automation.trigger).map_err(StorageError::from)?;
        let steps_json = serde_json::to_string(&automation.steps).map_err(StorageError::from)?;
        let (conditions_json, schedule_json) = optional_columns(&automation)?;

        sqlx::query(
            "UPDATE automations SET name = ?, enabled = ?, trigger_spec = ?, steps = ?, conditions = ?, schedule = ? WHERE id = ?",
        )
        .bind(&automation.name)
        .bind(automation.enabled)
        .bind(&trigger_json)
        .bind(&steps_json)
        .bind(&conditions_json)
        .bind(&schedule_json)
        .bind(automation.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(automation)
    }

    async fn delete(&self, id: AutomationId) -> Result<(), KeywardError> {
        sqlx::query("DELETE FROM automations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
