use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::sqlite_warehouse::{lock, open_connection};
use crate::app::ports::ConfigStorePort;
use crate::constants::SYNC_CONFIGS_TABLE;
use crate::domain::SyncConfig;
use crate::error::{Result, SyncError};

/// Sync configs persisted in the local warehouse database.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(open_connection(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id              TEXT PRIMARY KEY,
                catalog         TEXT NOT NULL,
                schema_name     TEXT NOT NULL,
                file_name       TEXT NOT NULL,
                documents_table TEXT NOT NULL,
                target_table    TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );
            "#,
            SYNC_CONFIGS_TABLE
        ))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConfig> {
    Ok(SyncConfig {
        id: row.get(0)?,
        catalog: row.get(1)?,
        schema: row.get(2)?,
        file_name: row.get(3)?,
        documents_table: row.get(4)?,
        target_table: row.get(5)?,
    })
}

const SELECT_COLUMNS: &str = "id, catalog, schema_name, file_name, documents_table, target_table";

#[async_trait]
impl ConfigStorePort for SqliteConfigStore {
    async fn list(&self) -> Result<Vec<SyncConfig>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY id",
            SELECT_COLUMNS, SYNC_CONFIGS_TABLE
        ))?;
        let configs = stmt
            .query_map([], row_to_config)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    async fn create(&self, config: &SyncConfig) -> Result<()> {
        config.validate()?;
        let conn = lock(&self.conn)?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (id, catalog, schema_name, file_name, documents_table, target_table, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                SYNC_CONFIGS_TABLE
            ),
            params![
                config.id,
                config.catalog,
                config.schema,
                config.file_name,
                config.documents_table,
                config.target_table,
                Utc::now().to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {
                info!("Created sync config {}", config.id);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(SyncError::AlreadyExists(format!("sync config '{}'", config.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<SyncConfig>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE id = ?1",
            SELECT_COLUMNS, SYNC_CONFIGS_TABLE
        ))?;
        let mut rows = stmt.query(params![id])?;
        let config = match rows.next()? {
            Some(row) => Some(row_to_config(row)?),
            None => None,
        };
        Ok(config)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", SYNC_CONFIGS_TABLE),
            params![id],
        )?;
        if removed > 0 {
            info!("Deleted sync config {}", id);
        }
        Ok(removed > 0)
    }
}
