use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use ci_insight_core::{
    config::DbConfig,
    models::{AnalysisRecord, AnalysisStatus, NewAnalysisRecord},
};
use sqlx::{Pool, Row, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqliteRow};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::AnalysisStore;

/// SQLite-backed store. `id` comes from an AUTOINCREMENT primary key.
#[derive(Clone)]
pub struct SqliteStore {
    pub pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn from_pool(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn append(&self, record: NewAnalysisRecord) -> Result<AnalysisRecord> {
        let created_at = OffsetDateTime::now_utc();
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO analyses
                (repo_id, repo_full_name, github_run_id, status, conclusion, suggestion, raw_log,
                 created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(record.repo_id as i64)
        .bind(&record.repo_full_name)
        .bind(record.github_run_id as i64)
        .bind(record.status.as_str())
        .bind(&record.conclusion)
        .bind(&record.suggestion)
        .bind(&record.raw_log)
        .bind(created_at.format(&Rfc3339)?)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert analysis")?
        .try_get("id")?;
        Ok(record.into_record(id as u64, created_at))
    }

    async fn query_by_repo(&self, repo_id: u64) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, repo_full_name, github_run_id, status, conclusion, suggestion,
                raw_log, created_at
            FROM analyses
            WHERE repo_id = ?
            ORDER BY id
            "#,
        )
        .bind(repo_id as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch analyses for repository {repo_id}"))?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<AnalysisRecord> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(AnalysisRecord {
        id: row.try_get::<i64, _>("id")? as u64,
        repo_id: row.try_get::<i64, _>("repo_id")? as u64,
        repo_full_name: row.try_get("repo_full_name")?,
        github_run_id: row.try_get::<i64, _>("github_run_id")? as u64,
        status: status.parse().map_err(|_| anyhow!("Unknown analysis status {status}"))?,
        conclusion: row.try_get("conclusion")?,
        suggestion: row.try_get("suggestion")?,
        raw_log: row.try_get("raw_log")?,
        created_at: OffsetDateTime::parse(&created_at, &Rfc3339)
            .with_context(|| format!("Invalid timestamp {created_at}"))?,
    })
}
