//! Standard persistence and the staged-ingest protocol
//!
//! An ingest attempt writes its standards under a fresh `ingest_id`. Readers
//! only see rows whose `ingest_id` equals the set's `active_ingest_id`, so
//! staged rows are invisible until `commit_ingest` flips the pointer (and
//! drops the previous attempt's rows) in one transaction. A failed attempt
//! calls `discard_ingest`.

use ccr_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{now_rfc3339, parse_timestamp, parse_uuid};
use crate::models::{NewStandard, Standard};

/// Visible standards join: `st` is standards, `ss` its set
const VISIBLE_STANDARDS: &str = "SELECT st.id, st.text, st.repository_path, st.standard_set_id, \
     st.created_at, st.updated_at \
     FROM standards st \
     JOIN standard_sets ss ON ss.id = st.standard_set_id AND st.ingest_id = ss.active_ingest_id \
     WHERE st.standard_set_id = ";

/// Stage one standard (and its classification links) under `ingest_id`
pub async fn insert_staged_standard(
    pool: &SqlitePool,
    standard_set_id: Uuid,
    ingest_id: Uuid,
    new_standard: &NewStandard,
) -> Result<Standard> {
    let now = chrono::Utc::now();
    let standard = Standard {
        id: Uuid::new_v4(),
        text: new_standard.text.clone(),
        repository_path: new_standard.repository_path.clone(),
        standard_set_id,
        classification_ids: new_standard.classification_ids.clone(),
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO standards (id, standard_set_id, ingest_id, text, repository_path, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(standard.id.to_string())
    .bind(standard_set_id.to_string())
    .bind(ingest_id.to_string())
    .bind(&standard.text)
    .bind(&standard.repository_path)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for classification_id in &standard.classification_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO standard_classifications (standard_id, classification_id) VALUES (?, ?)",
        )
        .bind(standard.id.to_string())
        .bind(classification_id.to_string())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(standard)
}

/// Make `ingest_id` the visible attempt for the set
///
/// In one transaction: deletes the previously active attempt's rows, points
/// `active_ingest_id` at the new attempt and marks the set `completed`.
/// Returns the number of standards now visible.
pub async fn commit_ingest(pool: &SqlitePool, standard_set_id: Uuid, ingest_id: Uuid) -> Result<u64> {
    let set_id = standard_set_id.to_string();
    let new_ingest = ingest_id.to_string();

    let mut tx = pool.begin().await?;

    let previous: Option<Option<String>> =
        sqlx::query_scalar("SELECT active_ingest_id FROM standard_sets WHERE id = ?")
            .bind(&set_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(previous) = previous else {
        return Err(Error::NotFound(format!("Standard set {}", standard_set_id)));
    };

    if let Some(previous) = previous.filter(|p| *p != new_ingest) {
        let removed = sqlx::query("DELETE FROM standards WHERE standard_set_id = ? AND ingest_id = ?")
            .bind(&set_id)
            .bind(&previous)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tracing::debug!(standard_set_id = %standard_set_id, removed, "Removed previous ingest's standards");
    }

    sqlx::query(
        "UPDATE standard_sets SET active_ingest_id = ?, ingest_status = 'completed', error_message = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(&new_ingest)
    .bind(now_rfc3339())
    .bind(&set_id)
    .execute(&mut *tx)
    .await?;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM standards WHERE standard_set_id = ? AND ingest_id = ?")
            .bind(&set_id)
            .bind(&new_ingest)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;
    Ok(count as u64)
}

/// Delete every row staged by a failed attempt
pub async fn discard_ingest(pool: &SqlitePool, standard_set_id: Uuid, ingest_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM standards WHERE standard_set_id = ? AND ingest_id = ?")
        .bind(standard_set_id.to_string())
        .bind(ingest_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Standards currently visible for a set, ordered by repository path
pub async fn list_standards(pool: &SqlitePool, standard_set_id: Uuid) -> Result<Vec<Standard>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(VISIBLE_STANDARDS);
    builder.push_bind(standard_set_id.to_string());
    builder.push(" ORDER BY st.repository_path, st.id");

    let rows = builder.build().fetch_all(pool).await?;
    hydrate(pool, &rows).await
}

/// Visible standards of a set that apply to a codebase with `classification_ids`
///
/// A standard applies when it shares at least one classification with the
/// codebase or has none at all (universal).
pub async fn select_applicable_standards(
    pool: &SqlitePool,
    standard_set_id: Uuid,
    classification_ids: &[Uuid],
) -> Result<Vec<Standard>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(VISIBLE_STANDARDS);
    builder.push_bind(standard_set_id.to_string());
    builder.push(
        " AND (NOT EXISTS (SELECT 1 FROM standard_classifications sc WHERE sc.standard_id = st.id)",
    );

    if !classification_ids.is_empty() {
        builder.push(
            " OR EXISTS (SELECT 1 FROM standard_classifications sc WHERE sc.standard_id = st.id AND sc.classification_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in classification_ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated("))");
    }

    builder.push(") ORDER BY st.repository_path, st.id");

    let rows = builder.build().fetch_all(pool).await?;
    hydrate(pool, &rows).await
}

/// Delete staged rows no set points at (left by a crashed process)
///
/// Only safe while no ingest is running, i.e. at startup.
pub async fn sweep_orphaned_staged_rows(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM standards
        WHERE ingest_id IS NOT (
            SELECT ss.active_ingest_id FROM standard_sets ss WHERE ss.id = standards.standard_set_id
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn hydrate(pool: &SqlitePool, rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Standard>> {
    let mut standards: Vec<Standard> = rows.iter().map(row_to_standard).collect::<Result<_>>()?;
    if standards.is_empty() {
        return Ok(standards);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT standard_id, classification_id FROM standard_classifications WHERE standard_id IN (",
    );
    let mut separated = builder.separated(", ");
    for standard in &standards {
        separated.push_bind(standard.id.to_string());
    }
    separated.push_unseparated(") ORDER BY classification_id");

    let links = builder.build().fetch_all(pool).await?;
    let mut by_standard: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for link in &links {
        let standard_id: String = link.get("standard_id");
        let classification_id: String = link.get("classification_id");
        by_standard
            .entry(parse_uuid(&standard_id, "standard_classifications.standard_id")?)
            .or_default()
            .push(parse_uuid(&classification_id, "standard_classifications.classification_id")?);
    }

    for standard in &mut standards {
        if let Some(ids) = by_standard.remove(&standard.id) {
            standard.classification_ids = ids;
        }
    }
    Ok(standards)
}

fn row_to_standard(row: &sqlx::sqlite::SqliteRow) -> Result<Standard> {
    let id: String = row.get("id");
    let set_id: String = row.get("standard_set_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Standard {
        id: parse_uuid(&id, "standards.id")?,
        text: row.get("text"),
        repository_path: row.get("repository_path"),
        standard_set_id: parse_uuid(&set_id, "standards.standard_set_id")?,
        classification_ids: Vec::new(),
        created_at: parse_timestamp(&created_at, "standards.created_at")?,
        updated_at: parse_timestamp(&updated_at, "standards.updated_at")?,
    })
}
