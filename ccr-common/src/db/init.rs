//! Database initialization
//!
//! Creates the SQLite file on first run and brings the schema up to date.
//! Every `CREATE` is idempotent so this runs on each startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout before a write reports "database is locked"
pub const BUSY_TIMEOUT_MS: u64 = 250;

/// Upper bound on waiting for a pooled connection
pub const ACQUIRE_TIMEOUT_SECS: u64 = 10;

const MAX_CONNECTIONS: u32 = 10;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Per-connection pragmas go on the connect options so every pooled
    // connection gets them, not just the first one.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_classifications_table(pool).await?;
    create_standard_sets_table(pool).await?;
    create_standards_table(pool).await?;
    create_standard_classifications_table(pool).await?;
    create_code_reviews_table(pool).await?;
    create_code_review_standard_sets_table(pool).await?;
    create_compliance_reports_table(pool).await?;
    Ok(())
}

async fn create_classifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Standard sets carry their own ingest lifecycle
///
/// `active_ingest_id` names the ingest attempt whose `standards` rows are
/// visible. Rows from any other attempt are staged or stale.
async fn create_standard_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS standard_sets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            repository_url TEXT NOT NULL,
            custom_prompt TEXT,
            ingest_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (ingest_status IN ('pending', 'in_progress', 'completed', 'failed')),
            active_ingest_id TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_standards_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS standards (
            id TEXT PRIMARY KEY,
            standard_set_id TEXT NOT NULL REFERENCES standard_sets(id) ON DELETE CASCADE,
            ingest_id TEXT NOT NULL,
            text TEXT NOT NULL,
            repository_path TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_standards_set_ingest ON standards(standard_set_id, ingest_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Classifications are referenced, never owned: deleting a referenced
/// classification is refused.
async fn create_standard_classifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS standard_classifications (
            standard_id TEXT NOT NULL REFERENCES standards(id) ON DELETE CASCADE,
            classification_id TEXT NOT NULL REFERENCES classifications(id) ON DELETE RESTRICT,
            PRIMARY KEY (standard_id, classification_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_standard_classifications_class ON standard_classifications(classification_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_code_reviews_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_reviews (
            id TEXT PRIMARY KEY,
            repository_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'started'
                CHECK (status IN ('started', 'in_progress', 'completed', 'failed')),
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_code_reviews_status ON code_reviews(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Snapshot of the sets a review was requested against
///
/// No foreign key to `standard_sets`: the snapshot outlives set deletion.
async fn create_code_review_standard_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_review_standard_sets (
            code_review_id TEXT NOT NULL REFERENCES code_reviews(id) ON DELETE CASCADE,
            standard_set_id TEXT NOT NULL,
            standard_set_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (code_review_id, standard_set_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// A report can only reference a set listed on its review
async fn create_compliance_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compliance_reports (
            id TEXT PRIMARY KEY,
            code_review_id TEXT NOT NULL REFERENCES code_reviews(id) ON DELETE CASCADE,
            standard_set_id TEXT NOT NULL,
            standard_set_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            report_text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (code_review_id, standard_set_id)
                REFERENCES code_review_standard_sets(code_review_id, standard_set_id)
                ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
