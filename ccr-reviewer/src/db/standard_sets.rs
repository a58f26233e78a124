//! Standard set persistence

use ccr_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{now_rfc3339, parse_timestamp, parse_uuid};
use crate::models::{IngestStatus, StandardSet, StandardSetCreate};
use crate::utils::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SELECT_COLUMNS: &str = "SELECT id, name, repository_url, custom_prompt, ingest_status, \
     active_ingest_id, error_message, created_at, updated_at FROM standard_sets";

/// Create a standard set, or re-register an existing one by name
///
/// An existing set keeps its id and its currently visible standards; its URL
/// and prompt are replaced and its status reset to `pending`. The standards
/// themselves are swapped only when the next ingest commits.
pub async fn upsert_standard_set(pool: &SqlitePool, request: &StandardSetCreate) -> Result<StandardSet> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Standard set name must not be empty".to_string()));
    }
    let repository_url = request.repository_url.trim();
    if repository_url.is_empty() {
        return Err(Error::InvalidInput("repository_url must not be empty".to_string()));
    }

    let now = now_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO standard_sets (
            id, name, repository_url, custom_prompt, ingest_status,
            active_ingest_id, error_message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, 'pending', NULL, NULL, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            repository_url = excluded.repository_url,
            custom_prompt = excluded.custom_prompt,
            ingest_status = 'pending',
            error_message = NULL,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(repository_url)
    .bind(request.custom_prompt.as_deref())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    find_standard_set_by_name(pool, name)
        .await?
        .ok_or_else(|| Error::Internal(format!("Standard set '{}' vanished after upsert", name)))
}

pub async fn get_standard_set(pool: &SqlitePool, id: Uuid) -> Result<Option<StandardSet>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_standard_set).transpose()
}

pub async fn find_standard_set_by_name(pool: &SqlitePool, name: &str) -> Result<Option<StandardSet>> {
    let row = sqlx::query(&format!("{} WHERE name = ?", SELECT_COLUMNS))
        .bind(name)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_standard_set).transpose()
}

/// All standard sets, ordered by name
pub async fn list_standard_sets(pool: &SqlitePool) -> Result<Vec<StandardSet>> {
    let rows = sqlx::query(&format!("{} ORDER BY name", SELECT_COLUMNS))
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_standard_set).collect()
}

/// Fetch the sets with the given ids, in the order requested
///
/// Fails with `NotFound` naming every id that does not exist.
pub async fn get_standard_sets_by_ids(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<StandardSet>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(pool).await?;
    let found: Vec<StandardSet> = rows.iter().map(row_to_standard_set).collect::<Result<_>>()?;

    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.iter().any(|s| s.id == **id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::NotFound(format!("Standard set(s) {}", missing.join(", "))));
    }

    let mut ordered = Vec::with_capacity(ids.len());
    for id in ids {
        if ordered.iter().any(|s: &StandardSet| s.id == *id) {
            continue;
        }
        if let Some(set) = found.iter().find(|s| s.id == *id) {
            ordered.push(set.clone());
        }
    }
    Ok(ordered)
}

/// Delete a set and, by cascade, all of its standards
pub async fn delete_standard_set(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM standard_sets WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Standard set {}", id)));
    }

    tracing::info!(standard_set_id = %id, "Standard set deleted");
    Ok(())
}

/// Record ingest progress; `error_message` is cleared unless given
pub async fn set_ingest_status(
    pool: &SqlitePool,
    id: Uuid,
    status: IngestStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let id_str = id.to_string();
    let status_str = status.as_str();

    let rows = retry_on_lock("set_ingest_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE standard_sets SET ingest_status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status_str)
        .bind(error_message)
        .bind(now_rfc3339())
        .bind(&id_str)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    if rows == 0 {
        return Err(Error::NotFound(format!("Standard set {}", id)));
    }
    Ok(())
}

/// Fail ingests left `in_progress` by a previous process
pub async fn sweep_interrupted_ingests(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE standard_sets SET ingest_status = 'failed', error_message = ?, updated_at = ?
         WHERE ingest_status IN ('pending', 'in_progress')",
    )
    .bind("Ingest interrupted by service restart")
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn row_to_standard_set(row: &sqlx::sqlite::SqliteRow) -> Result<StandardSet> {
    let id: String = row.get("id");
    let status: String = row.get("ingest_status");
    let active_ingest_id: Option<String> = row.get("active_ingest_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(StandardSet {
        id: parse_uuid(&id, "standard_sets.id")?,
        name: row.get("name"),
        repository_url: row.get("repository_url"),
        custom_prompt: row.get("custom_prompt"),
        ingest_status: status.parse().map_err(Error::Internal)?,
        error_message: row.get("error_message"),
        active_ingest_id: active_ingest_id
            .as_deref()
            .map(|s| parse_uuid(s, "standard_sets.active_ingest_id"))
            .transpose()?,
        created_at: parse_timestamp(&created_at, "standard_sets.created_at")?,
        updated_at: parse_timestamp(&updated_at, "standard_sets.updated_at")?,
    })
}
