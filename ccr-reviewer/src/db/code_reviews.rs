//! Code review persistence
//!
//! Status writes are guarded in SQL: an UPDATE only matches when the row is
//! in an allowed predecessor status, so concurrent writers cannot move a
//! review backwards or out of a terminal state.

use ccr_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{now_rfc3339, parse_timestamp, parse_uuid};
use crate::models::{CodeReview, ComplianceReport, ReviewStatus, StandardSetRef};
use crate::utils::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Create a review in `started` with a snapshot of the requested sets
pub async fn create_code_review(
    pool: &SqlitePool,
    repository_url: &str,
    standard_sets: &[StandardSetRef],
) -> Result<CodeReview> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO code_reviews (id, repository_url, status, error_message, created_at, updated_at)
         VALUES (?, ?, 'started', NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(repository_url)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for (position, set) in standard_sets.iter().enumerate() {
        sqlx::query(
            "INSERT INTO code_review_standard_sets (code_review_id, standard_set_id, standard_set_name, position)
             VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(set.id.to_string())
        .bind(&set.name)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(review_id = %id, repository_url, sets = standard_sets.len(), "Code review created");

    Ok(CodeReview {
        id,
        repository_url: repository_url.to_string(),
        status: ReviewStatus::Started,
        standard_sets: standard_sets.to_vec(),
        compliance_reports: Vec::new(),
        error_message: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_code_review(pool: &SqlitePool, id: Uuid) -> Result<Option<CodeReview>> {
    let row = sqlx::query(
        "SELECT id, repository_url, status, error_message, created_at, updated_at FROM code_reviews WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(load_children(pool, row_to_review(&row)?).await?)),
        None => Ok(None),
    }
}

/// Reviews, newest first, optionally filtered by status
pub async fn list_code_reviews(pool: &SqlitePool, status: Option<ReviewStatus>) -> Result<Vec<CodeReview>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, repository_url, status, error_message, created_at, updated_at FROM code_reviews",
    );
    if let Some(status) = status {
        builder.push(" WHERE status = ");
        builder.push_bind(status.as_str());
    }
    builder.push(" ORDER BY created_at DESC, rowid DESC");

    let rows = builder.build().fetch_all(pool).await?;

    let mut reviews = Vec::with_capacity(rows.len());
    for row in &rows {
        reviews.push(load_children(pool, row_to_review(row)?).await?);
    }
    Ok(reviews)
}

/// Current status of a review
pub async fn get_status(pool: &SqlitePool, id: Uuid) -> Result<ReviewStatus> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM code_reviews WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    status
        .ok_or_else(|| Error::NotFound(format!("Code review {}", id)))?
        .parse()
        .map_err(Error::Internal)
}

/// Move a review forward to `next`, returning the status it left
///
/// `error_message` is recorded when given. A move the state machine does not
/// allow from the stored status fails with `Conflict`.
pub async fn transition_status(
    pool: &SqlitePool,
    id: Uuid,
    next: ReviewStatus,
    error_message: Option<&str>,
) -> Result<ReviewStatus> {
    let predecessors = next.predecessors();
    let Some(previous) = predecessors.first().copied() else {
        return Err(Error::InvalidInput(format!("Cannot transition into {}", next)));
    };

    let id_str = id.to_string();

    let rows = retry_on_lock("transition_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE code_reviews SET status = ");
        builder.push_bind(next.as_str());
        builder.push(", error_message = COALESCE(");
        builder.push_bind(error_message);
        builder.push(", error_message), updated_at = ");
        builder.push_bind(now_rfc3339());
        builder.push(" WHERE id = ");
        builder.push_bind(id_str.as_str());
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in predecessors {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(pool).await?;
        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    if rows == 0 {
        let current = get_status(pool, id).await?;
        return Err(Error::Conflict(format!(
            "Code review {} cannot move from {} to {}",
            id, current, next
        )));
    }

    tracing::debug!(review_id = %id, from = %previous, to = %next, "Code review status changed");
    Ok(previous)
}

/// Append a report to a review that is still `in_progress`
///
/// The report's set must be one the review was created with.
pub async fn append_compliance_report(
    pool: &SqlitePool,
    review_id: Uuid,
    report: &ComplianceReport,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO compliance_reports (
            id, code_review_id, standard_set_id, standard_set_name, file_path, report_text, created_at
        )
        SELECT ?, ?, ?, ?, ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM code_reviews WHERE id = ? AND status = 'in_progress')
        "#,
    )
    .bind(report.id.to_string())
    .bind(review_id.to_string())
    .bind(report.standard_set_id.to_string())
    .bind(&report.standard_set_name)
    .bind(&report.file_path)
    .bind(&report.report_text)
    .bind(report.created_at.to_rfc3339())
    .bind(review_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        if super::is_foreign_key_violation(&e) {
            Error::InvalidInput(format!(
                "Standard set {} is not part of code review {}",
                report.standard_set_id, review_id
            ))
        } else {
            Error::Database(e)
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Code review {} is not in progress",
            review_id
        )));
    }

    sqlx::query("UPDATE code_reviews SET updated_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(review_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Fail reviews a previous process left non-terminal
///
/// Walks `started` reviews through `in_progress` first so the observed
/// status sequence stays a forward path.
pub async fn sweep_stale_reviews(pool: &SqlitePool, message: &str) -> Result<u64> {
    let now = now_rfc3339();

    sqlx::query("UPDATE code_reviews SET status = 'in_progress', updated_at = ? WHERE status = 'started'")
        .bind(&now)
        .execute(pool)
        .await?;

    let result = sqlx::query(
        "UPDATE code_reviews SET status = 'failed', error_message = ?, updated_at = ? WHERE status = 'in_progress'",
    )
    .bind(message)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn row_to_review(row: &sqlx::sqlite::SqliteRow) -> Result<CodeReview> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(CodeReview {
        id: parse_uuid(&id, "code_reviews.id")?,
        repository_url: row.get("repository_url"),
        status: status.parse().map_err(Error::Internal)?,
        standard_sets: Vec::new(),
        compliance_reports: Vec::new(),
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at, "code_reviews.created_at")?,
        updated_at: parse_timestamp(&updated_at, "code_reviews.updated_at")?,
    })
}

async fn load_children(pool: &SqlitePool, mut review: CodeReview) -> Result<CodeReview> {
    let review_id = review.id.to_string();

    let set_rows = sqlx::query(
        "SELECT standard_set_id, standard_set_name FROM code_review_standard_sets
         WHERE code_review_id = ? ORDER BY position",
    )
    .bind(&review_id)
    .fetch_all(pool)
    .await?;

    for row in &set_rows {
        let set_id: String = row.get("standard_set_id");
        review.standard_sets.push(StandardSetRef {
            id: parse_uuid(&set_id, "code_review_standard_sets.standard_set_id")?,
            name: row.get("standard_set_name"),
        });
    }

    let report_rows = sqlx::query(
        "SELECT id, standard_set_id, standard_set_name, file_path, report_text, created_at
         FROM compliance_reports WHERE code_review_id = ? ORDER BY created_at, rowid",
    )
    .bind(&review_id)
    .fetch_all(pool)
    .await?;

    for row in &report_rows {
        let id: String = row.get("id");
        let set_id: String = row.get("standard_set_id");
        let created_at: String = row.get("created_at");
        review.compliance_reports.push(ComplianceReport {
            id: parse_uuid(&id, "compliance_reports.id")?,
            standard_set_id: parse_uuid(&set_id, "compliance_reports.standard_set_id")?,
            standard_set_name: row.get("standard_set_name"),
            file_path: row.get("file_path"),
            report_text: row.get("report_text"),
            created_at: parse_timestamp(&created_at, "compliance_reports.created_at")?,
        });
    }

    Ok(review)
}
