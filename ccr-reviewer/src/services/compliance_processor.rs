//! Compliance review pipeline
//!
//! # Stages
//! fetch → flatten → classify codebase → per standard set: select applicable
//! standards, check compliance, render, append report → completed
//!
//! The review's status mirrors the pipeline: `started` on creation,
//! `in_progress` once processing begins, then `completed` or `failed`. Every
//! exit path from `run`, cancellation included, ends in a terminal status.

use ccr_common::events::{EventBus, ReviewEvent};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::classification_matcher::match_classifications;
use super::content_flattener::{self, FileFilter};
use super::llm_gateway::{ClassificationSubject, ComplianceRequest, LlmGateway};
use super::report_renderer::{render_no_applicable_standards, render_report, slug};
use super::repository_fetcher::{FetchRequest, RepositoryFetcher};
use super::workspace::Workspace;
use crate::db;
use crate::error::{ComplianceProcessingError, PipelineError};
use crate::models::{CodeReview, CodeReviewCreate, ComplianceReport, ReviewStatus, StandardSetRef};
use crate::utils::retry::{retry_on_unavailable, RetryPolicy};

/// Error message recorded on a review stopped through its cancellation token
pub const CANCELLED_MESSAGE: &str = "Review cancelled";

/// Workspace label for a code review
pub fn workspace_label(review_id: Uuid) -> String {
    format!("code-review-{}", review_id)
}

/// Reviews repositories against ingested standard sets
pub struct ComplianceProcessor {
    db: SqlitePool,
    event_bus: EventBus,
    fetcher: Arc<dyn RepositoryFetcher>,
    gateway: Arc<LlmGateway>,
    retry_policy: RetryPolicy,
    reports_dir: Option<PathBuf>,
    max_file_bytes: u64,
}

impl ComplianceProcessor {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        fetcher: Arc<dyn RepositoryFetcher>,
        gateway: Arc<LlmGateway>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            event_bus,
            fetcher,
            gateway,
            retry_policy,
            reports_dir: None,
            max_file_bytes: content_flattener::DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Also write each report to `<reports_dir>/<review id>/<set slug>.md`
    pub fn with_reports_dir(mut self, reports_dir: Option<PathBuf>) -> Self {
        self.reports_dir = reports_dir;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Validate the request and create the review in `started`
    ///
    /// Unknown standard set ids are rejected as invalid input.
    pub async fn create_review(&self, request: &CodeReviewCreate) -> ccr_common::Result<CodeReview> {
        let repository_url = request.repository_url.trim();
        if repository_url.is_empty() {
            return Err(ccr_common::Error::InvalidInput(
                "repository_url must not be empty".to_string(),
            ));
        }
        if request.standard_sets.is_empty() {
            return Err(ccr_common::Error::InvalidInput(
                "At least one standard set is required".to_string(),
            ));
        }

        let sets = db::standard_sets::get_standard_sets_by_ids(&self.db, &request.standard_sets)
            .await
            .map_err(|e| match e {
                ccr_common::Error::NotFound(msg) => {
                    ccr_common::Error::InvalidInput(format!("Unknown standard set id: {}", msg))
                }
                other => other,
            })?;

        let refs: Vec<StandardSetRef> = sets
            .into_iter()
            .map(|s| StandardSetRef { id: s.id, name: s.name })
            .collect();

        db::code_reviews::create_code_review(&self.db, repository_url, &refs).await
    }

    /// Process a created review until it reaches a terminal status
    ///
    /// Returns the completed review, or the cause after the review has been
    /// marked `failed`.
    pub async fn run(
        &self,
        review_id: Uuid,
        cancel_token: CancellationToken,
    ) -> Result<CodeReview, ComplianceProcessingError> {
        let start_time = std::time::Instant::now();
        tracing::info!(review_id = %review_id, "Starting code review");

        // Dropping `execute` on cancellation drops its workspace guard too
        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => Err(PipelineError::Cancelled),
            result = self.execute(review_id) => result,
        };

        let outcome = match outcome {
            Ok(()) => self
                .transition(review_id, ReviewStatus::Completed, None)
                .await
                .map_err(PipelineError::from),
            Err(cause) => Err(cause),
        };

        if let Err(cause) = outcome {
            self.record_failure(review_id, &cause).await;
            return Err(ComplianceProcessingError { review_id, cause });
        }

        tracing::info!(
            review_id = %review_id,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Code review completed"
        );

        db::code_reviews::get_code_review(&self.db, review_id)
            .await
            .map_err(|e| ComplianceProcessingError {
                review_id,
                cause: e.into(),
            })?
            .ok_or_else(|| ComplianceProcessingError {
                review_id,
                cause: PipelineError::Persistence(ccr_common::Error::NotFound(format!(
                    "Code review {}",
                    review_id
                ))),
            })
    }

    async fn execute(&self, review_id: Uuid) -> Result<(), PipelineError> {
        let review = db::code_reviews::get_code_review(&self.db, review_id)
            .await?
            .ok_or_else(|| ccr_common::Error::NotFound(format!("Code review {}", review_id)))?;

        self.transition(review_id, ReviewStatus::InProgress, None).await?;

        let workspace = self
            .fetcher
            .fetch(&FetchRequest {
                repository_url: review.repository_url.clone(),
                git_ref: None,
                label: workspace_label(review_id),
            })
            .await?;
        tracing::debug!(review_id = %review_id, "Repository fetched");

        let outcome = self.review_workspace(&review, &workspace).await;

        if let Err(e) = workspace.cleanup().await {
            tracing::warn!(review_id = %review_id, error = %e, "Failed to remove workspace");
        }

        outcome
    }

    async fn review_workspace(&self, review: &CodeReview, workspace: &Workspace) -> Result<(), PipelineError> {
        let filter = FileFilter::codebase().with_max_file_bytes(self.max_file_bytes);
        let document = content_flattener::flatten(&workspace.checkout_dir(), &filter)?;
        let codebase = document.render();

        tracing::info!(
            review_id = %review.id,
            files = document.len(),
            chars = codebase.len(),
            "Codebase flattened"
        );

        let vocabulary = db::classifications::list_classifications(&self.db).await?;
        let classification_ids = if document.is_empty() || vocabulary.is_empty() {
            tracing::debug!(review_id = %review.id, "Skipping codebase classification");
            Vec::new()
        } else {
            let names: Vec<String> = vocabulary.iter().map(|c| c.name.clone()).collect();
            let classified = retry_on_unavailable("classify_codebase", self.retry_policy, || {
                self.gateway
                    .classify(ClassificationSubject::Codebase, &codebase, &names)
            })
            .await?;
            match_classifications(&classified.classifications, &vocabulary)
        };

        tracing::info!(
            review_id = %review.id,
            classifications = classification_ids.len(),
            "Codebase classified"
        );

        let mut used_slugs = HashSet::new();
        for (position, set_ref) in review.standard_sets.iter().enumerate() {
            let report_text = self
                .report_for_set(review.id, set_ref, &classification_ids, &codebase)
                .await?;

            let mut file_slug = slug(&set_ref.name);
            if !used_slugs.insert(file_slug.clone()) {
                file_slug = format!("{}-{}", file_slug, position + 1);
                used_slugs.insert(file_slug.clone());
            }
            let file_path = format!("{}/{}.md", review.id, file_slug);
            self.write_report_file(&file_path, &report_text).await?;

            let report = ComplianceReport {
                id: Uuid::new_v4(),
                standard_set_id: set_ref.id,
                standard_set_name: set_ref.name.clone(),
                file_path,
                report_text,
                created_at: Utc::now(),
            };
            db::code_reviews::append_compliance_report(&self.db, review.id, &report).await?;

            self.event_bus.emit_lossy(ReviewEvent::ComplianceReportAdded {
                review_id: review.id,
                report_id: report.id,
                standard_set_name: report.standard_set_name.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(())
    }

    async fn report_for_set(
        &self,
        review_id: Uuid,
        set_ref: &StandardSetRef,
        classification_ids: &[Uuid],
        codebase: &str,
    ) -> Result<String, PipelineError> {
        let set = db::standard_sets::get_standard_set(&self.db, set_ref.id)
            .await?
            .ok_or_else(|| ccr_common::Error::NotFound(format!("Standard set {}", set_ref.id)))?;

        let standards =
            db::standards::select_applicable_standards(&self.db, set_ref.id, classification_ids).await?;

        tracing::info!(
            review_id = %review_id,
            standard_set = %set_ref.name,
            applicable = standards.len(),
            "Standards selected"
        );

        if standards.is_empty() {
            return Ok(render_no_applicable_standards(&set_ref.name));
        }

        let request = ComplianceRequest {
            custom_prompt: set.custom_prompt.as_deref(),
            standards: &standards,
            codebase,
        };
        let result = retry_on_unavailable("check_compliance", self.retry_policy, || {
            self.gateway.check_compliance(&request)
        })
        .await?;

        Ok(render_report(&set_ref.name, &standards, &result))
    }

    async fn write_report_file(&self, relative: &str, report_text: &str) -> Result<(), PipelineError> {
        let Some(reports_dir) = &self.reports_dir else {
            return Ok(());
        };

        let path = reports_dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ccr_common::Error::from)?;
        }
        tokio::fs::write(&path, report_text)
            .await
            .map_err(ccr_common::Error::from)?;

        tracing::debug!(path = %path.display(), "Report written");
        Ok(())
    }

    /// Persist a status move and broadcast it
    async fn transition(
        &self,
        review_id: Uuid,
        next: ReviewStatus,
        error_message: Option<&str>,
    ) -> ccr_common::Result<()> {
        let previous = db::code_reviews::transition_status(&self.db, review_id, next, error_message).await?;

        tracing::info!(review_id = %review_id, from = %previous, to = %next, "Code review status changed");
        self.event_bus.emit_lossy(ReviewEvent::CodeReviewStatusChanged {
            review_id,
            old_status: previous.to_string(),
            new_status: next.to_string(),
            error_message: error_message.map(str::to_string),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Drive the review to `failed`, stepping through `in_progress` if needed
    async fn record_failure(&self, review_id: Uuid, cause: &PipelineError) {
        let message = match cause {
            PipelineError::Cancelled => CANCELLED_MESSAGE.to_string(),
            other => other.to_string(),
        };
        tracing::error!(review_id = %review_id, error = %message, "Code review failed");

        let status = match db::code_reviews::get_status(&self.db, review_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(review_id = %review_id, error = %e, "Failed to read review status");
                return;
            }
        };

        if status == ReviewStatus::Started {
            if let Err(e) = self.transition(review_id, ReviewStatus::InProgress, None).await {
                tracing::error!(review_id = %review_id, error = %e, "Failed to record review failure");
                return;
            }
        } else if status.is_terminal() {
            tracing::warn!(review_id = %review_id, %status, "Review already terminal");
            return;
        }

        if let Err(e) = self
            .transition(review_id, ReviewStatus::Failed, Some(&message))
            .await
        {
            tracing::error!(review_id = %review_id, error = %e, "Failed to record review failure");
        }
    }
}
