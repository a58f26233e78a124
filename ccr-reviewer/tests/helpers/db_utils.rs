//! Database and fixture-repository utilities

use anyhow::Result;
use ccr_reviewer::db;
use ccr_reviewer::models::Classification;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Create a temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool); TempDir must be kept alive for the test.
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_ccr.db");
    let pool = ccr_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Count staged and visible rows for a set, whatever ingest wrote them
pub async fn count_all_rows(pool: &SqlitePool, standard_set_id: Uuid) -> u64 {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM standards WHERE standard_set_id = ?")
        .bind(standard_set_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap();
    count as u64
}

/// Insert the given classification names
pub async fn seed_classifications(pool: &SqlitePool, names: &[&str]) -> Vec<Classification> {
    let mut created = Vec::new();
    for name in names {
        created.push(db::classifications::create_classification(pool, name).await.unwrap());
    }
    created
}

/// Write `files` (relative path, content) under `dir`
pub fn write_repo(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    for (relative, content) in files {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
    dir.to_path_buf()
}
