//! Standard-set ingestion
//!
//! # Stages
//! fetch → discover standards files → classify each file → stage → commit
//!
//! Every stage runs strictly after the previous one. Standards are written
//! under a fresh ingest id and only become visible when `commit_ingest`
//! succeeds, so a failure at any stage leaves the set's previously visible
//! standards untouched and no rows from the failed attempt behind.

use ccr_common::events::{EventBus, ReviewEvent};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::classification_matcher::match_classifications;
use super::content_flattener::{self, FileFilter};
use super::llm_gateway::{ClassificationSubject, LlmGateway};
use super::repository_fetcher::{FetchRequest, RepositoryFetcher};
use super::workspace::Workspace;
use crate::db;
use crate::error::{PipelineError, StandardSetProcessingError};
use crate::models::{Classification, IngestStatus, NewStandard, StandardSet, StandardSetCreate};
use crate::utils::retry::{retry_on_unavailable, RetryPolicy};

/// Workspace label for a standard set's ingest
pub fn workspace_label(standard_set_id: Uuid) -> String {
    format!("standard-set-{}", standard_set_id)
}

/// Ingests standard sets from their source repositories
pub struct StandardSetProcessor {
    db: SqlitePool,
    event_bus: EventBus,
    fetcher: Arc<dyn RepositoryFetcher>,
    gateway: Arc<LlmGateway>,
    retry_policy: RetryPolicy,
    only_files: Vec<String>,
}

impl StandardSetProcessor {
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
            only_files: Vec::new(),
        }
    }

    /// Restrict ingestion to files with these stems
    pub fn with_only_files(mut self, only_files: Vec<String>) -> Self {
        if !only_files.is_empty() {
            tracing::info!(files = ?only_files, "Standards ingestion restricted to listed files");
        }
        self.only_files = only_files;
        self
    }

    /// Create or re-register the set, leaving it `pending`
    pub async fn register(&self, request: &StandardSetCreate) -> ccr_common::Result<StandardSet> {
        let set = db::standard_sets::upsert_standard_set(&self.db, request).await?;
        tracing::info!(
            standard_set_id = %set.id,
            name = %set.name,
            repository_url = %set.repository_url,
            "Standard set registered"
        );
        Ok(set)
    }

    /// Register and ingest in one call
    pub async fn ingest(&self, request: &StandardSetCreate) -> Result<StandardSet, StandardSetProcessingError> {
        let set = self.register(request).await.map_err(|e| StandardSetProcessingError {
            standard_set_id: None,
            cause: PipelineError::Persistence(e),
        })?;
        self.process(set.id).await
    }

    /// Run the ingest for a registered set
    ///
    /// On success the set is `completed` and exposes exactly the standards
    /// found by this run. On failure it is `failed` with `error_message` set
    /// and the attempt's staged rows are gone.
    pub async fn process(&self, standard_set_id: Uuid) -> Result<StandardSet, StandardSetProcessingError> {
        let wrap = |cause: PipelineError| StandardSetProcessingError {
            standard_set_id: Some(standard_set_id),
            cause,
        };

        let set = db::standard_sets::get_standard_set(&self.db, standard_set_id)
            .await
            .map_err(|e| wrap(e.into()))?
            .ok_or_else(|| {
                wrap(PipelineError::Persistence(ccr_common::Error::NotFound(format!(
                    "Standard set {}",
                    standard_set_id
                ))))
            })?;

        let ingest_id = Uuid::new_v4();
        let start_time = std::time::Instant::now();

        tracing::info!(
            standard_set_id = %set.id,
            name = %set.name,
            ingest_id = %ingest_id,
            "Starting standard set ingest"
        );

        let outcome = match db::standard_sets::set_ingest_status(&self.db, set.id, IngestStatus::InProgress, None).await {
            Ok(()) => {
                self.event_bus.emit_lossy(ReviewEvent::StandardSetIngestStarted {
                    standard_set_id: set.id,
                    name: set.name.clone(),
                    timestamp: Utc::now(),
                });
                self.run_ingest(&set, ingest_id).await
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(count) => {
                tracing::info!(
                    standard_set_id = %set.id,
                    name = %set.name,
                    standards = count,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Standard set ingest completed"
                );
                self.event_bus.emit_lossy(ReviewEvent::StandardSetIngestCompleted {
                    standard_set_id: set.id,
                    name: set.name.clone(),
                    standards_count: count,
                    timestamp: Utc::now(),
                });

                db::standard_sets::get_standard_set(&self.db, set.id)
                    .await
                    .map_err(|e| wrap(e.into()))?
                    .ok_or_else(|| {
                        wrap(PipelineError::Persistence(ccr_common::Error::NotFound(format!(
                            "Standard set {}",
                            set.id
                        ))))
                    })
            }
            Err(cause) => {
                self.record_failure(&set, ingest_id, &cause).await;
                Err(wrap(cause))
            }
        }
    }

    async fn run_ingest(&self, set: &StandardSet, ingest_id: Uuid) -> Result<usize, PipelineError> {
        let vocabulary = db::classifications::list_classifications(&self.db).await?;

        let workspace = self
            .fetcher
            .fetch(&FetchRequest {
                repository_url: set.repository_url.clone(),
                git_ref: None,
                label: workspace_label(set.id),
            })
            .await?;
        tracing::debug!(standard_set_id = %set.id, "Repository fetched");

        let staged = self.stage_standards(set, ingest_id, &workspace, &vocabulary).await;

        if let Err(e) = workspace.cleanup().await {
            tracing::warn!(standard_set_id = %set.id, error = %e, "Failed to remove workspace");
        }

        let staged = staged?;
        let committed = db::standards::commit_ingest(&self.db, set.id, ingest_id).await?;
        if committed as usize != staged {
            tracing::warn!(
                standard_set_id = %set.id,
                staged,
                committed,
                "Committed standard count differs from staged count"
            );
        }
        Ok(committed as usize)
    }

    /// Classify and stage one standard per qualifying file
    async fn stage_standards(
        &self,
        set: &StandardSet,
        ingest_id: Uuid,
        workspace: &Workspace,
        vocabulary: &[Classification],
    ) -> Result<usize, PipelineError> {
        let root = workspace.checkout_dir();
        let filter = FileFilter::standards().with_only_stems(&self.only_files);
        let files = content_flattener::discover(&root, &filter)?;

        tracing::info!(standard_set_id = %set.id, files = files.len(), "Standards files discovered");

        let names: Vec<String> = vocabulary.iter().map(|c| c.name.clone()).collect();
        let mut staged = 0usize;

        for relative in &files {
            // One file in memory at a time
            let Some(entry) = content_flattener::read_entry(&root, relative, &filter) else {
                continue;
            };
            if entry.content.trim().is_empty() {
                tracing::debug!(path = %relative, "Skipping empty standards file");
                continue;
            }

            let classified = retry_on_unavailable("classify_standard", self.retry_policy, || {
                self.gateway
                    .classify(ClassificationSubject::Standard, &entry.content, &names)
            })
            .await?;

            let classification_ids = match_classifications(&classified.classifications, vocabulary);

            db::standards::insert_staged_standard(
                &self.db,
                set.id,
                ingest_id,
                &NewStandard {
                    text: entry.content,
                    repository_path: entry.source_path,
                    classification_ids,
                },
            )
            .await?;
            staged += 1;

            tracing::debug!(standard_set_id = %set.id, path = %relative, "Standard staged");
        }

        Ok(staged)
    }

    async fn record_failure(&self, set: &StandardSet, ingest_id: Uuid, cause: &PipelineError) {
        let message = cause.to_string();
        tracing::error!(
            standard_set_id = %set.id,
            name = %set.name,
            error = %message,
            "Standard set ingest failed"
        );

        match db::standards::discard_ingest(&self.db, set.id, ingest_id).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(standard_set_id = %set.id, removed, "Discarded staged standards"),
            Err(e) => tracing::error!(standard_set_id = %set.id, error = %e, "Failed to discard staged standards"),
        }

        if let Err(e) =
            db::standard_sets::set_ingest_status(&self.db, set.id, IngestStatus::Failed, Some(&message)).await
        {
            tracing::error!(standard_set_id = %set.id, error = %e, "Failed to record ingest failure");
        }

        self.event_bus.emit_lossy(ReviewEvent::StandardSetIngestFailed {
            standard_set_id: set.id,
            name: set.name.clone(),
            error: message,
            timestamp: Utc::now(),
        });
    }
}
