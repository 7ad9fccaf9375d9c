use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{next_version, CommitReceipt, LifecycleStore, StoreError, StoreResult, Transaction, Write};
use crate::config::DatabaseConfig;
use crate::model::{
    Asset, AssetFilter, AssetType, AuditEntry, AuditQuery, Workflow, WorkflowFilter,
};

/// SQLite-backed store. The pending-per-asset guard is a partial unique
/// index, so it holds even against writers that bypass this type.
pub struct SqliteStore {
    pool: SqlitePool,
    acquire_timeout: Duration,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn timestamp_key(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn decode<T: DeserializeOwned>(row: &SqliteRow) -> StoreResult<T> {
    let body: String = row.try_get("body").map_err(backend)?;
    Ok(serde_json::from_str(&body)?)
}

async fn current_version(
    conn: &mut SqliteConnection,
    sql: &'static str,
    id: &str,
) -> Option<u64> {
    sqlx::query(sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .ok()
        .flatten()
        .and_then(|row| row.try_get::<i64, _>("version").ok())
        .map(|v| v as u64)
}

impl SqliteStore {
    /// Open (creating if needed) the database and run embedded migrations.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        if !Sqlite::database_exists(&config.url).await.map_err(backend)? {
            info!("Creating database at {}", config.url);
            Sqlite::create_database(&config.url).await.map_err(backend)?;
        }

        let acquire_timeout = Duration::from_millis(config.acquire_timeout_ms);
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(backend)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(acquire_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(backend)?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
            info!("Database migrations completed");
        }

        Ok(Self {
            pool,
            acquire_timeout,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn shutdown(&self) {
        info!("Closing lifecycle database pool");
        self.pool.close().await;
    }

    fn map_err(&self, err: sqlx::Error) -> StoreError {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout {
                duration_ms: self.acquire_timeout.as_millis() as u64,
            },
            other => backend(other),
        }
    }

    async fn write_asset(
        &self,
        conn: &mut SqliteConnection,
        mut asset: Asset,
        expected_version: Option<u64>,
    ) -> StoreResult<Asset> {
        asset.version = next_version(expected_version);
        let body = serde_json::to_string(&asset)?;

        let result = match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO assets (id, asset_type, status, department, location, active_workflow_id, version, body)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                )
                .bind(&asset.id)
                .bind(asset.asset_type.as_str())
                .bind(asset.status.as_str())
                .bind(&asset.department)
                .bind(&asset.location)
                .bind(asset.active_workflow_id.as_deref())
                .bind(asset.version as i64)
                .bind(&body)
                .execute(&mut *conn)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE assets
                    SET asset_type = ?1, status = ?2, department = ?3, location = ?4,
                        active_workflow_id = ?5, version = ?6, body = ?7
                    WHERE id = ?8 AND version = ?9
                    "#,
                )
                .bind(asset.asset_type.as_str())
                .bind(asset.status.as_str())
                .bind(&asset.department)
                .bind(&asset.location)
                .bind(asset.active_workflow_id.as_deref())
                .bind(asset.version as i64)
                .bind(&body)
                .bind(&asset.id)
                .bind(expected as i64)
                .execute(&mut *conn)
                .await
            }
        };

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(asset),
            Ok(_) => Err(self.asset_conflict(conn, &asset.id, expected_version).await),
            Err(e) if is_unique_violation(&e) => {
                Err(self.asset_conflict(conn, &asset.id, expected_version).await)
            }
            Err(e) => Err(self.map_err(e)),
        }
    }

    async fn asset_conflict(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expected: Option<u64>,
    ) -> StoreError {
        StoreError::Conflict {
            entity: "asset",
            id: id.to_string(),
            expected,
            found: current_version(conn, "SELECT version FROM assets WHERE id = ?1", id).await,
        }
    }

    async fn write_workflow(
        &self,
        conn: &mut SqliteConnection,
        mut workflow: Workflow,
        expected_version: Option<u64>,
    ) -> StoreResult<Workflow> {
        workflow.version = next_version(expected_version);
        let body = serde_json::to_string(&workflow)?;

        let result = match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO workflows (id, asset_id, kind, status, requester_id, priority, created_at, version, body)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(&workflow.id)
                .bind(&workflow.asset_id)
                .bind(workflow.kind().as_str())
                .bind(workflow.status.as_str())
                .bind(&workflow.requester_id)
                .bind(workflow.priority.value() as i64)
                .bind(timestamp_key(&workflow.created_at))
                .bind(workflow.version as i64)
                .bind(&body)
                .execute(&mut *conn)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET status = ?1, priority = ?2, version = ?3, body = ?4
                    WHERE id = ?5 AND version = ?6
                    "#,
                )
                .bind(workflow.status.as_str())
                .bind(workflow.priority.value() as i64)
                .bind(workflow.version as i64)
                .bind(&body)
                .bind(&workflow.id)
                .bind(expected as i64)
                .execute(&mut *conn)
                .await
            }
        };

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(workflow),
            Ok(_) => Err(self.workflow_conflict(conn, &workflow.id, expected_version).await),
            Err(e) if is_unique_violation(&e) => {
                if !e.to_string().contains("workflows.asset_id") {
                    return Err(self.workflow_conflict(conn, &workflow.id, expected_version).await);
                }
                let blocking = sqlx::query(
                    "SELECT id FROM workflows WHERE asset_id = ?1 AND status = 'pending'",
                )
                .bind(&workflow.asset_id)
                .fetch_optional(&mut *conn)
                .await
                .ok()
                .flatten()
                .and_then(|row| row.try_get::<String, _>("id").ok());
                Err(StoreError::UniqueViolation {
                    asset_id: workflow.asset_id,
                    workflow_id: blocking,
                })
            }
            Err(e) => Err(self.map_err(e)),
        }
    }

    async fn workflow_conflict(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expected: Option<u64>,
    ) -> StoreError {
        StoreError::Conflict {
            entity: "workflow",
            id: id.to_string(),
            expected,
            found: current_version(conn, "SELECT version FROM workflows WHERE id = ?1", id).await,
        }
    }

    async fn append_audit(
        &self,
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
    ) -> StoreResult<bool> {
        let body = serde_json::to_string(entry)?;
        let done = sqlx::query(
            r#"
            INSERT OR IGNORE INTO audit_entries (id, timestamp, actor_id, action, resource_type, resource_id, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(timestamp_key(&entry.timestamp))
        .bind(&entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(&body)
        .execute(&mut *conn)
        .await
        .map_err(|e| self.map_err(e))?;
        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl LifecycleStore for SqliteStore {
    async fn get_asset(&self, id: &str) -> StoreResult<Option<Asset>> {
        let row = sqlx::query("SELECT body FROM assets WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_workflow(&self, id: &str) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query("SELECT body FROM workflows WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        row.as_ref().map(decode).transpose()
    }

    async fn put_asset(&self, asset: Asset, expected_version: Option<u64>) -> StoreResult<Asset> {
        let mut tx = self.pool.begin().await.map_err(|e| self.map_err(e))?;
        let stored = self.write_asset(&mut tx, asset, expected_version).await?;
        tx.commit().await.map_err(|e| self.map_err(e))?;
        Ok(stored)
    }

    async fn query_pending_by_asset(&self, asset_id: &str) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT body FROM workflows WHERE asset_id = ?1 AND status = 'pending'",
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(e))?;
        rows.iter().map(decode).collect()
    }

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT body FROM assets WHERE 1 = 1");
        if let Some(asset_type) = &filter.asset_type {
            query.push(" AND asset_type = ").push_bind(asset_type.as_str().to_string());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY id");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        let assets: Vec<Asset> = rows.iter().map(decode).collect::<StoreResult<_>>()?;
        Ok(assets.into_iter().filter(|a| filter.matches(a)).collect())
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT body FROM workflows WHERE 1 = 1");
        if let Some(asset_id) = &filter.asset_id {
            query.push(" AND asset_id = ").push_bind(asset_id.clone());
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(requester_id) = &filter.requester_id {
            query.push(" AND requester_id = ").push_bind(requester_id.clone());
        }
        if let Some(priority) = filter.priority {
            query.push(" AND priority = ").push_bind(priority.value() as i64);
        }
        query.push(" ORDER BY created_at");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        rows.iter().map(decode).collect()
    }

    async fn count_assets_by_type(&self, asset_type: &AssetType) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM assets WHERE asset_type = ?1")
            .bind(asset_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        let n: i64 = row.try_get("n").map_err(backend)?;
        Ok(n as u64)
    }

    async fn audit_entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        let mut sql = QueryBuilder::<Sqlite>::new("SELECT body FROM audit_entries WHERE 1 = 1");
        if let Some(resource_type) = query.resource_type {
            sql.push(" AND resource_type = ").push_bind(resource_type.as_str());
        }
        if let Some(resource_id) = &query.resource_id {
            sql.push(" AND resource_id = ").push_bind(resource_id.clone());
        }
        if let Some(actor_id) = &query.actor_id {
            sql.push(" AND actor_id = ").push_bind(actor_id.clone());
        }
        if let Some(action) = query.action {
            sql.push(" AND action = ").push_bind(action.as_str());
        }
        sql.push(" ORDER BY timestamp DESC, rowid DESC LIMIT ")
            .push_bind(query.effective_limit() as i64);

        let rows = sql
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        rows.iter().map(decode).collect()
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        let mut db_tx = self.pool.begin().await.map_err(|e| self.map_err(e))?;
        let mut receipt = CommitReceipt::default();

        for write in tx.into_writes() {
            match write {
                Write::PutAsset {
                    asset,
                    expected_version,
                } => {
                    let stored = self.write_asset(&mut db_tx, asset, expected_version).await?;
                    receipt.assets.push(stored);
                }
                Write::PutWorkflow {
                    workflow,
                    expected_version,
                } => {
                    let stored = self
                        .write_workflow(&mut db_tx, workflow, expected_version)
                        .await?;
                    receipt.workflows.push(stored);
                }
                Write::AppendAudit(entry) => {
                    if self.append_audit(&mut db_tx, &entry).await? {
                        receipt.audit.push(entry);
                    } else {
                        debug!(entry_id = %entry.id, "Duplicate audit entry ignored");
                    }
                }
            }
        }

        db_tx.commit().await.map_err(|e| self.map_err(e))?;
        Ok(receipt)
    }
}
