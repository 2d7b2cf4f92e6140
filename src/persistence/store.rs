//! SQLite-based run history store

use crate::core::{RunStatus, TriggerKind};
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT id, workflow, trigger, status, started_at, completed_at,
           total_instances, succeeded, failed, skipped, cancelled, artifact_count
    FROM runs
"#;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Connect with a sqlx connection URL (e.g. `sqlite::memory:`)
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open (or create) `runs.db` inside a data directory
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("runs.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to open run history database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow TEXT NOT NULL,
                trigger TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_instances INTEGER NOT NULL DEFAULT 0,
                succeeded INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0,
                artifact_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_workflow ON runs(workflow);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        let trigger: String = row.get("trigger");
        let status: String = row.get("status");

        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow: row.get("workflow"),
            trigger: TriggerKind::parse(&trigger)
                .ok_or_else(|| anyhow!("Unknown trigger '{}' in history", trigger))?,
            status: RunStatus::parse(&status)
                .ok_or_else(|| anyhow!("Unknown run status '{}' in history", status))?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            total_instances: row.get::<i64, _>("total_instances") as usize,
            succeeded: row.get::<i64, _>("succeeded") as usize,
            failed: row.get::<i64, _>("failed") as usize,
            skipped: row.get::<i64, _>("skipped") as usize,
            cancelled: row.get::<i64, _>("cancelled") as usize,
            artifact_count: row.get::<i64, _>("artifact_count") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow, trigger, status, started_at, completed_at,
             total_instances, succeeded, failed, skipped, cancelled, artifact_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.workflow)
        .bind(run.trigger.as_str())
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_instances as i64)
        .bind(run.succeeded as i64)
        .bind(run.failed as i64)
        .bind(run.skipped as i64)
        .bind(run.cancelled as i64)
        .bind(run.artifact_count as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE workflow = ?1 ORDER BY started_at DESC",
            SELECT_RUNS
        ))
        .bind(workflow)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!(
            "{} WHERE workflow = ?1 ORDER BY started_at DESC LIMIT 1",
            SELECT_RUNS
        ))
        .bind(workflow)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete run")?;

        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT workflow FROM runs ORDER BY workflow ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list workflows")?;

        Ok(rows.iter().map(|row| row.get("workflow")).collect())
    }
}
