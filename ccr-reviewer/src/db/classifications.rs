//! Classification vocabulary persistence

use ccr_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{is_foreign_key_violation, is_unique_violation, parse_timestamp, parse_uuid};
use crate::models::Classification;

/// Create a classification; names are unique ignoring case
pub async fn create_classification(pool: &SqlitePool, name: &str) -> Result<Classification> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Classification name must not be empty".to_string()));
    }

    let classification = Classification::new(name);

    sqlx::query("INSERT INTO classifications (id, name, created_at) VALUES (?, ?, ?)")
        .bind(classification.id.to_string())
        .bind(&classification.name)
        .bind(classification.created_at.to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("Classification '{}' already exists", name))
            } else {
                Error::Database(e)
            }
        })?;

    tracing::info!(classification_id = %classification.id, name = %classification.name, "Classification created");
    Ok(classification)
}

/// All classifications, ordered by name
pub async fn list_classifications(pool: &SqlitePool) -> Result<Vec<Classification>> {
    let rows = sqlx::query(
        "SELECT id, name, created_at FROM classifications ORDER BY name COLLATE NOCASE",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_classification).collect()
}

pub async fn get_classification(pool: &SqlitePool, id: Uuid) -> Result<Option<Classification>> {
    let row = sqlx::query("SELECT id, name, created_at FROM classifications WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_classification).transpose()
}

/// Delete a classification no standard refers to
pub async fn delete_classification(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let references: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM standard_classifications WHERE classification_id = ?",
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await?;

    if references > 0 {
        return Err(Error::Conflict(format!(
            "Classification {} is used by {} standard(s)",
            id, references
        )));
    }

    let result = sqlx::query("DELETE FROM classifications WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| {
            // A standard may have been linked since the count
            if is_foreign_key_violation(&e) {
                Error::Conflict(format!("Classification {} is in use", id))
            } else {
                Error::Database(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Classification {}", id)));
    }

    tracing::info!(classification_id = %id, "Classification deleted");
    Ok(())
}

fn row_to_classification(row: &sqlx::sqlite::SqliteRow) -> Result<Classification> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");

    Ok(Classification {
        id: parse_uuid(&id, "classifications.id")?,
        name: row.get("name"),
        created_at: parse_timestamp(&created_at, "classifications.created_at")?,
    })
}
