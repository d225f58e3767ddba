//! `SQLite` implementation of [`SyncProviderRepository`].

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use keyward_app::ports::SyncProviderRepository;
use keyward_domain::error::KeywardError;
use keyward_domain::id::SyncProviderId;
use keyward_domain::sync::{SyncMode, SyncProviderConfig};

use crate::codec::{from_secs, to_secs};
use crate::error::{StorageError, decode_err};

struct Wrapper(SyncProviderConfig);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        Ok(Self(SyncProviderConfig {
            id: SyncProviderId::from_str(&id).map_err(decode_err)?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            enabled: row.try_get("enabled")?,
            import_enabled: row.try_get("import_enabled")?,
            full_sync_period: from_secs(row.try_get("full_sync_period")?),
            incremental_sync_period: from_secs(row.try_get("incremental_sync_period")?),
            last_full_sync: row.try_get("last_full_sync")?,
            last_incremental_sync: row.try_get("last_incremental_sync")?,
        }))
    }
}

/// `SQLite`-backed sync provider repository.
#[derive(Clone)]
pub struct SqliteSyncProviderRepository {
    pool: SqlitePool,
}

impl SqliteSyncProviderRepository {
    /// Persist providers in the `sync_providers` table of `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SyncProviderRepository for SqliteSyncProviderRepository {
    async fn create(&self, provider: SyncProviderConfig) -> Result<SyncProviderConfig, KeywardError> {
        sqlx::query(
            "INSERT INTO sync_providers (id, name, kind, enabled, import_enabled, full_sync_period, incremental_sync_period, last_full_sync, last_incremental_sync) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(provider.id.to_string())
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(provider.enabled)
        .bind(provider.import_enabled)
        .bind(to_secs(provider.full_sync_period))
        .bind(to_secs(provider.incremental_sync_period))
        .bind(provider.last_full_sync)
        .bind(provider.last_incremental_sync)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(provider)
    }

    async fn get_by_id(&self, id: SyncProviderId) -> Result<Option<SyncProviderConfig>, KeywardError> {
        let row: Option<Wrapper> = sqlx::query_as("SELECT * FROM sync_providers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(|w| w.0))
    }

    async fn get_all(&self) -> Result<Vec<SyncProviderConfig>, KeywardError> {
        let rows: Vec<Wrapper> = sqlx::query_as("SELECT * FROM sync_providers ORDER BY name, id")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn update(&self, provider: SyncProviderConfig) -> Result<SyncProviderConfig, KeywardError> {
        sqlx::query(
            "UPDATE sync_providers SET name = ?, kind = ?, enabled = ?, import_enabled = ?, full_sync_period = ?, incremental_sync_period = ?, last_full_sync = ?, last_incremental_sync = ? WHERE id = ?",
        )
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(provider.enabled)
        .bind(provider.import_enabled)
        .bind(to_secs(provider.full_sync_period))
        .bind(to_secs(provider.incremental_sync_period))
        .bind(provider.last_full_sync)
        .bind(provider.last_incremental_sync)
        .bind(provider.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(provider)
    }

    async fn delete(&self, id: SyncProviderId) -> Result<(), KeywardError> {
        sqlx::query("DELETE FROM sync_providers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn update_last_sync(
        &self,
        id: SyncProviderId,
        mode: SyncMode,
        at: i64,
    ) -> Result<(), KeywardError> {
        let query = match mode {
            SyncMode::Full => "UPDATE sync_providers SET last_full_sync = ? WHERE id = ?",
            SyncMode::Incremental => {
                "UPDATE sync_providers SET last_incremental_sync = ? WHERE id = ?"
            }
        };
        sqlx::query(query)
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
